use crate::provider;
use crate::utils;
use colored::Colorize;
use kubeforge_cloud::orchestrator;
use kubeforge_storage::StorageDriver;
use std::path::Path;

pub async fn handle(file: Option<&Path>, yes: bool) -> anyhow::Result<()> {
    let (path, spec) = utils::load_spec(file)?;
    utils::print_loaded_cluster_file(&path);

    if !yes
        && !utils::confirm(&format!(
            "Delete cluster '{}' and every resource it owns on {}?",
            spec.name, spec.cloud
        ))?
    {
        println!("{}", "Cancelled".yellow());
        return Ok(());
    }

    let span = utils::cluster_span(&spec);
    let store = utils::open_cluster_store(&spec, span.clone()).await?;
    let cancel = utils::cancel_on_ctrl_c();
    let mut provider = provider::build(spec.cloud, utils::meta_for(&spec), cancel, span);

    println!("{}", format!("Deleting cluster '{}'...", spec.name).yellow());

    let result = orchestrator::delete_cluster(provider.as_mut(), &store).await;
    store.kill().await?;
    result?;

    println!("{}", "✓ Cluster deleted".green().bold());
    Ok(())
}
