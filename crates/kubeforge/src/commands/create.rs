use crate::provider;
use crate::utils;
use colored::Colorize;
use kubeforge_cloud::{ClusterSummary, InitOutcome, orchestrator};
use kubeforge_core::ClusterType;
use kubeforge_storage::StorageDriver;
use std::path::Path;

pub async fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    let (path, spec) = utils::load_spec(file)?;
    utils::print_loaded_cluster_file(&path);

    let span = utils::cluster_span(&spec);
    let store = utils::open_cluster_store(&spec, span.clone()).await?;
    let cancel = utils::cancel_on_ctrl_c();
    let mut provider = provider::build(spec.cloud, utils::meta_for(&spec), cancel, span);

    println!(
        "{}",
        format!(
            "Creating {} cluster '{}' on {} ({})...",
            spec.cluster_type, spec.name, spec.cloud, spec.region
        )
        .yellow()
    );

    let plan = utils::plan_for(&spec);
    let result = orchestrator::create_cluster(provider.as_mut(), &store, &plan).await;
    store.kill().await?;

    let outcome = result?;
    println!();
    match outcome {
        InitOutcome::AlreadyCompleted => {
            println!("{}", "ℹ Cluster already exists, nothing to do".cyan());
        }
        InitOutcome::Resumed => {
            println!("{}", "✓ Resumed and finished the cluster".green().bold());
        }
        _ => {
            println!("{}", "✓ Cluster created".green().bold());
        }
    }

    utils::print_summary(&ClusterSummary::from(provider.state()));

    if spec.cluster_type == ClusterType::Managed {
        println!();
        println!("{}", "Fetch the kubeconfig with:".bold());
        println!("  {} get --kubeconfig", "kubeforge".cyan());
    }

    Ok(())
}
