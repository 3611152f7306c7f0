//! Declarative cluster definition (`cluster.yaml`)

use crate::error::Result;
use kubeforge_core::{
    Cloud, ClusterType, Error, ErrorKind, KubernetesDistro, validate_name, validate_quorum,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A cluster as the operator describes it
///
/// ```yaml
/// cloud: civo
/// type: ha
/// name: demo
/// region: LON1
/// distro: k3s
/// version: "1.30"
/// nodes:
///   controlplane: { count: 3, size: g3.small }
///   workerplane: { count: 2, size: g3.medium }
///   datastore: { count: 3, size: g3.small }
///   loadbalancer: { size: g3.small }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cloud: Cloud,

    #[serde(rename = "type")]
    pub cluster_type: ClusterType,

    pub name: String,

    pub region: String,

    #[serde(default)]
    pub distro: Option<KubernetesDistro>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub nodes: HaNodes,

    #[serde(default)]
    pub managed: Option<ManagedNodes>,

    #[serde(default)]
    pub apps: Vec<String>,

    #[serde(default)]
    pub cni: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePool {
    #[serde(default)]
    pub count: usize,
    pub size: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HaNodes {
    #[serde(default)]
    pub controlplane: Option<NodePool>,
    #[serde(default)]
    pub workerplane: Option<NodePool>,
    #[serde(default)]
    pub datastore: Option<NodePool>,
    #[serde(default)]
    pub loadbalancer: Option<NodePool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedNodes {
    pub count: usize,
    #[serde(default)]
    pub size: Option<String>,
}

impl ClusterSpec {
    /// Reads and validates a cluster file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let spec: ClusterSpec = serde_yaml::from_str(content)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks names and the node layout required by the cluster type
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        if self.region.trim().is_empty() {
            return Err(Error::new(ErrorKind::InvalidCloudRegion, "region is empty").into());
        }

        match self.cluster_type {
            ClusterType::Ha => {
                let cp = self.require_pool(&self.nodes.controlplane, "controlplane")?;
                validate_quorum(cp.count, ErrorKind::InvalidNoOfControlplane)?;

                let ds = self.require_pool(&self.nodes.datastore, "datastore")?;
                validate_quorum(ds.count, ErrorKind::InvalidNoOfDatastore)?;

                self.require_pool(&self.nodes.loadbalancer, "loadbalancer")?;
                self.require_pool(&self.nodes.workerplane, "workerplane")?;
            }
            ClusterType::Managed => {
                let managed = self.managed.as_ref().ok_or_else(|| {
                    Error::missing_config("managed clusters need a `managed` section")
                })?;
                if managed.count == 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidNoOfWorkerplane,
                        "managed clusters need at least one node",
                    )
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Distribution to install, defaulting per cluster type and cloud
    pub fn distro(&self) -> KubernetesDistro {
        match (self.distro, self.cluster_type, self.cloud) {
            (Some(distro), _, _) => distro,
            (None, ClusterType::Ha, _) => KubernetesDistro::K3s,
            (None, ClusterType::Managed, Cloud::Local) => KubernetesDistro::Kind,
            (None, ClusterType::Managed, _) => KubernetesDistro::Managed,
        }
    }

    fn require_pool<'a>(&self, pool: &'a Option<NodePool>, role: &str) -> Result<&'a NodePool> {
        pool.as_ref().ok_or_else(|| {
            Error::missing_config(format!("ha clusters need a `nodes.{role}` pool")).into()
        })
    }
}
