//! [`CloudBackend`] over kind
//!
//! Local clusters are managed clusters whose nodes are docker containers.
//! There is no cloud account behind them: the network is the docker network
//! kind creates for itself and the cluster id is the kind cluster name.

use crate::kind::{self, Kind};
use async_trait::async_trait;
use kubeforge_cloud::{CloudBackend, ManagedClusterRequest, ManagedClusterStatus};
use kubeforge_core::{
    Cloud, ClusterType, CredentialsDocument, KubernetesDistro, LocalNetwork, Result,
};
use tracing::{Span, debug, info, warn};

pub const NETWORK_NAME: &str = "kind";
pub const NETWORK_CIDR: &str = "172.18.0.0/16";

/// Node images published alongside the kind release we target
pub const NODE_VERSIONS: &[&str] = &["1.31.0", "1.30.4", "1.29.8", "1.28.13", "1.27.16"];

pub struct LocalBackend {
    kind: Kind,
    span: Span,
}

impl LocalBackend {
    pub fn new(span: Span) -> Self {
        Self {
            kind: Kind::default(),
            span,
        }
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }
}

/// Full node version for a possibly partial one, e.g. `1.30` -> `1.30.4`
pub fn resolve_node_version(wanted: &str) -> String {
    let wanted = wanted.trim_start_matches('v');
    NODE_VERSIONS
        .iter()
        .find(|v| **v == wanted || v.starts_with(&format!("{wanted}.")))
        .map(|v| v.to_string())
        .unwrap_or_else(|| wanted.to_string())
}

#[async_trait]
impl CloudBackend for LocalBackend {
    type Network = LocalNetwork;

    fn cloud(&self) -> Cloud {
        Cloud::Local
    }

    fn supports(&self, cluster_type: ClusterType) -> bool {
        cluster_type == ClusterType::Managed
    }

    fn default_distro(&self, _cluster_type: ClusterType) -> KubernetesDistro {
        KubernetesDistro::Kind
    }

    async fn connect(&mut self, _region: &str, _stored: Option<CredentialsDocument>) -> Result<()> {
        let version = self.kind.version().await?;
        debug!(parent: &self.span, %version, "kind available");
        Ok(())
    }

    async fn versions(&self, cluster_type: ClusterType) -> Result<Option<Vec<String>>> {
        if cluster_type != ClusterType::Managed {
            return Ok(None);
        }
        Ok(Some(NODE_VERSIONS.iter().map(|v| v.to_string()).collect()))
    }

    async fn create_network(&self, _name: &str) -> Result<LocalNetwork> {
        Ok(LocalNetwork {
            name: NETWORK_NAME.to_string(),
            cidr: NETWORK_CIDR.to_string(),
        })
    }

    /// The kind network is shared by every local cluster
    async fn delete_network(&self, _network: &LocalNetwork) -> Result<()> {
        Ok(())
    }

    async fn create_managed_cluster(
        &self,
        req: ManagedClusterRequest<'_, LocalNetwork>,
    ) -> Result<String> {
        if !req.apps.is_empty() {
            warn!(parent: &self.span, apps = ?req.apps, "local clusters do not install applications");
        }

        let disable_default_cni = req.cni.is_some_and(|cni| cni != "kindnet");
        let config = kind::cluster_config(req.node_count, disable_default_cni);
        let image = kind::node_image(&resolve_node_version(req.version));

        info!(parent: &self.span, cluster = %req.name, nodes = req.node_count, %image, "creating kind cluster");
        self.kind.create_cluster(req.name, &config, &image).await?;
        Ok(req.name.to_string())
    }

    async fn get_managed_cluster(&self, id: &str) -> Result<ManagedClusterStatus> {
        let running = self.kind.list_clusters().await?.iter().any(|c| c == id);
        let kubeconfig = if running {
            Some(self.kind.kubeconfig(id).await?)
        } else {
            None
        };
        Ok(ManagedClusterStatus {
            cluster_id: id.to_string(),
            status: if running { "running" } else { "missing" }.to_string(),
            ready: running,
            kubeconfig,
        })
    }

    async fn delete_managed_cluster(&self, id: &str) -> Result<()> {
        self.kind.delete_cluster(id).await?;
        Ok(())
    }
}
