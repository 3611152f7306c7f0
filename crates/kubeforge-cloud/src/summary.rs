//! Cluster listings built from stored state

use chrono::{DateTime, Utc};
use kubeforge_core::{Cloud, ClusterType, KubernetesDistro, NodeCounts, Result, StorageDocument};
use kubeforge_storage::{ClusterFilter, StorageDriver};
use serde::Serialize;

/// One line of `kubeforge list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub region: String,
    pub cloud: Cloud,
    pub cluster_type: ClusterType,
    pub distro: Option<KubernetesDistro>,
    pub kubernetes_version: String,
    pub nodes: NodeCounts,
    pub completed: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&StorageDocument> for ClusterSummary {
    fn from(doc: &StorageDocument) -> Self {
        let base = doc.base();
        Self {
            name: doc.cluster_name.clone(),
            region: doc.region.clone(),
            cloud: doc.infra_provider,
            cluster_type: doc.cluster_type,
            distro: base
                .and_then(|b| b.kubernetes_distro)
                .or(doc.bootstrap_provider),
            kubernetes_version: base
                .map(|b| b.kubernetes_version.clone())
                .unwrap_or_default(),
            nodes: doc
                .cloud_infra
                .as_ref()
                .map(|infra| infra.node_counts())
                .unwrap_or_default(),
            completed: doc.is_completed(),
            updated_at: doc.updated_at,
        }
    }
}

/// Summaries of every stored cluster matching `filter`, HA clusters first
pub async fn list_clusters(
    storage: &dyn StorageDriver,
    filter: &ClusterFilter,
) -> Result<Vec<ClusterSummary>> {
    let clusters = storage.get_one_or_more_clusters(filter).await?;
    let summaries = ClusterType::ALL
        .iter()
        .filter_map(|t| clusters.get(t))
        .flatten()
        .map(ClusterSummary::from)
        .collect();
    Ok(summaries)
}
