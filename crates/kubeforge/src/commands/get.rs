use crate::provider;
use crate::utils;
use colored::Colorize;
use kubeforge_cloud::ClusterSummary;
use kubeforge_core::{ClusterType, Operation};
use kubeforge_storage::StorageDriver;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn handle(file: Option<&Path>, kubeconfig: bool, state: bool) -> anyhow::Result<()> {
    let (_, spec) = utils::load_spec(file)?;
    let span = utils::cluster_span(&spec);
    let store = utils::open_cluster_store(&spec, span.clone()).await?;

    // Connection details need live credentials, so they go through the provider.
    if state {
        if spec.cluster_type != ClusterType::Ha {
            anyhow::bail!("--state is only available for ha clusters");
        }
        let mut provider = provider::build(
            spec.cloud,
            utils::meta_for(&spec),
            CancellationToken::new(),
            span,
        );
        provider.init_state(&store, Operation::Get).await?;
        let resources = provider.ha_cluster_state()?;
        println!("{}", serde_json::to_string_pretty(&resources)?);
        return Ok(());
    }

    let doc = store.read().await?;

    if kubeconfig {
        if doc.cluster_kubeconfig.is_empty() {
            anyhow::bail!("cluster '{}' has no kubeconfig yet", spec.name);
        }
        print!("{}", doc.cluster_kubeconfig);
        return Ok(());
    }

    println!("{}", format!("Cluster '{}':", spec.name).bold());
    utils::print_summary(&ClusterSummary::from(&doc));
    Ok(())
}
