//! `export` / `import` of the whole store

use crate::utils;
use colored::Colorize;
use kubeforge_core::StorageStateExportImport;
use kubeforge_storage::{ExportFilter, StorageDriver};
use std::path::Path;
use tracing::Span;

pub async fn export(filter: &ExportFilter, output: Option<&Path>) -> anyhow::Result<()> {
    let store = utils::open_store(Span::none()).await?;
    let bundle = store.export(filter).await?;
    let json = serde_json::to_string_pretty(&bundle)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!(
                "{}",
                format!(
                    "✓ Exported {} clusters and {} credentials to {}",
                    bundle.clusters.len(),
                    bundle.credentials.len(),
                    path.display()
                )
                .green()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub async fn import(input: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(input)
        .map_err(|e| anyhow::anyhow!("{}: {}", input.display(), e))?;
    let bundle: StorageStateExportImport = serde_json::from_str(&content)?;

    let store = utils::open_store(Span::none()).await?;
    store.import(&bundle).await?;

    println!(
        "{}",
        format!(
            "✓ Imported {} clusters and {} credentials",
            bundle.clusters.len(),
            bundle.credentials.len()
        )
        .green()
        .bold()
    );
    Ok(())
}
