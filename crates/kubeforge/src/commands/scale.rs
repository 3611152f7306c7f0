use crate::provider;
use crate::utils;
use colored::Colorize;
use kubeforge_cloud::{ScaleResult, orchestrator};
use kubeforge_storage::StorageDriver;
use std::path::Path;

pub async fn handle(file: Option<&Path>, workers: usize, size: Option<String>) -> anyhow::Result<()> {
    let (path, spec) = utils::load_spec(file)?;
    utils::print_loaded_cluster_file(&path);

    let vm_size = size
        .or_else(|| spec.nodes.workerplane.as_ref().map(|p| p.size.clone()))
        .ok_or_else(|| anyhow::anyhow!("no worker size given; pass --size"))?;

    let span = utils::cluster_span(&spec);
    let store = utils::open_cluster_store(&spec, span.clone()).await?;
    let cancel = utils::cancel_on_ctrl_c();
    let mut provider = provider::build(spec.cloud, utils::meta_for(&spec), cancel, span);

    println!(
        "{}",
        format!("Scaling workers of '{}' to {}...", spec.name, workers).yellow()
    );

    let result = orchestrator::scale_workers(provider.as_mut(), &store, workers, &vm_size).await;
    store.kill().await?;

    match result? {
        ScaleResult::Unchanged(count) => {
            println!("{}", format!("ℹ Already at {count} workers").cyan());
        }
        ScaleResult::Added { from, to } => {
            println!("{}", format!("✓ Workers scaled {from} → {to}").green().bold());
        }
        ScaleResult::Removed { hostnames } => {
            println!(
                "{}",
                format!("✓ Removed {} workers", hostnames.len()).green().bold()
            );
            // Nodes still registered in Kubernetes have to be drained by the caller.
            for hostname in hostnames {
                println!("  • {}", hostname.cyan());
            }
        }
    }
    Ok(())
}
