use crate::utils;
use colored::Colorize;
use kubeforge_cloud::list_clusters;
use kubeforge_core::{Cloud, ClusterType};
use kubeforge_storage::ClusterFilter;
use tracing::Span;

pub async fn handle(
    cloud: Option<Cloud>,
    cluster_type: Option<ClusterType>,
    json: bool,
) -> anyhow::Result<()> {
    let store = utils::open_store(Span::none()).await?;
    let filter = ClusterFilter {
        cloud,
        cluster_type,
    };
    let summaries = list_clusters(&store, &filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("{}", "No clusters found".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<24} {:<6} {:<10} {:<8} {:<8} {:<26} {}",
            "NAME", "CLOUD", "REGION", "TYPE", "DISTRO", "NODES", "STATUS"
        )
        .bold()
    );
    for summary in &summaries {
        let status = if summary.completed {
            "ready".green()
        } else {
            "incomplete".yellow()
        };
        let distro = summary
            .distro
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<6} {:<10} {:<8} {:<8} {:<26} {}",
            summary.name.cyan(),
            summary.cloud.to_string(),
            summary.region,
            summary.cluster_type.to_string(),
            distro,
            utils::node_counts(summary),
            status
        );
    }
    Ok(())
}
