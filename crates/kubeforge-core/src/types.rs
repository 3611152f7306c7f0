//! Identity tags shared across the workspace

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Infrastructure backend a cluster lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cloud {
    Aws,
    Azure,
    Civo,
    Local,
}

impl Cloud {
    /// Every backend known to the store, in listing order
    pub const ALL: [Cloud; 4] = [Cloud::Aws, Cloud::Azure, Cloud::Civo, Cloud::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cloud::Aws => "aws",
            Cloud::Azure => "azure",
            Cloud::Civo => "civo",
            Cloud::Local => "local",
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cloud {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(Cloud::Aws),
            "azure" => Ok(Cloud::Azure),
            "civo" => Ok(Cloud::Civo),
            "local" => Ok(Cloud::Local),
            other => Err(Error::new(
                ErrorKind::InvalidCloudProvider,
                format!("unsupported cloud provider '{other}'"),
            )),
        }
    }
}

/// Self-managed HA topology or a provider-managed control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Ha,
    Managed,
}

impl ClusterType {
    pub const ALL: [ClusterType; 2] = [ClusterType::Ha, ClusterType::Managed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Ha => "ha",
            ClusterType::Managed => "managed",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ha" => Ok(ClusterType::Ha),
            "managed" => Ok(ClusterType::Managed),
            other => Err(Error::new(
                ErrorKind::InvalidClusterType,
                format!("unsupported cluster type '{other}'"),
            )),
        }
    }
}

/// Function a VM plays inside an HA cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    ControlPlane,
    WorkerPlane,
    DataStore,
    LoadBalancer,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::ControlPlane,
        Role::WorkerPlane,
        Role::DataStore,
        Role::LoadBalancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ControlPlane => "controlplane",
            Role::WorkerPlane => "workerplane",
            Role::DataStore => "datastore",
            Role::LoadBalancer => "loadbalancer",
        }
    }

    /// Short code used in generated resource names (`-vm-cp-0`, `-fw-db`)
    pub fn short_code(&self) -> &'static str {
        match self {
            Role::ControlPlane => "cp",
            Role::WorkerPlane => "wp",
            Role::DataStore => "db",
            Role::LoadBalancer => "lb",
        }
    }

    /// Error kind reported when a replica count or index for this role is wrong
    pub fn count_error_kind(&self) -> ErrorKind {
        match self {
            Role::ControlPlane => ErrorKind::InvalidNoOfControlplane,
            Role::WorkerPlane => ErrorKind::InvalidNoOfWorkerplane,
            Role::DataStore => ErrorKind::InvalidNoOfDatastore,
            Role::LoadBalancer => ErrorKind::InvalidRole,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "controlplane" | "cp" => Ok(Role::ControlPlane),
            "workerplane" | "wp" => Ok(Role::WorkerPlane),
            "datastore" | "ds" | "db" => Ok(Role::DataStore),
            "loadbalancer" | "lb" => Ok(Role::LoadBalancer),
            other => Err(Error::new(
                ErrorKind::InvalidRole,
                format!("unknown role '{other}'"),
            )),
        }
    }
}

/// What the caller intends to do with the cluster record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Delete,
    Get,
    Scale,
    Switch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Get => "get",
            Operation::Scale => "scale",
            Operation::Switch => "switch",
        };
        f.write_str(s)
    }
}

/// Kubernetes distribution installed on the nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KubernetesDistro {
    K3s,
    Kubeadm,
    Kind,
    /// Control plane run by the cloud's managed Kubernetes service
    Managed,
}

impl KubernetesDistro {
    pub fn as_str(&self) -> &'static str {
        match self {
            KubernetesDistro::K3s => "k3s",
            KubernetesDistro::Kubeadm => "kubeadm",
            KubernetesDistro::Kind => "kind",
            KubernetesDistro::Managed => "managed",
        }
    }
}

impl fmt::Display for KubernetesDistro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KubernetesDistro {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "k3s" => Ok(KubernetesDistro::K3s),
            "kubeadm" => Ok(KubernetesDistro::Kubeadm),
            "kind" => Ok(KubernetesDistro::Kind),
            "managed" => Ok(KubernetesDistro::Managed),
            other => Err(Error::new(
                ErrorKind::InvalidClusterType,
                format!("unsupported kubernetes distribution '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_parse() {
        assert_eq!("civo".parse::<Cloud>().unwrap(), Cloud::Civo);
        assert_eq!("AWS".parse::<Cloud>().unwrap(), Cloud::Aws);
        assert_eq!("azure".parse::<Cloud>().unwrap(), Cloud::Azure);
        assert_eq!(Cloud::Azure.to_string(), "azure");

        let err = "gcp".parse::<Cloud>().unwrap_err();
        assert!(err.is(ErrorKind::InvalidCloudProvider));
    }

    #[test]
    fn test_cluster_type_parse() {
        assert_eq!("ha".parse::<ClusterType>().unwrap(), ClusterType::Ha);
        let err = "serverless".parse::<ClusterType>().unwrap_err();
        assert!(err.is(ErrorKind::InvalidClusterType));
    }

    #[test]
    fn test_role_serde_names() {
        let json = serde_json::to_string(&Role::WorkerPlane).unwrap();
        assert_eq!(json, "\"workerplane\"");
        assert_eq!(Role::DataStore.short_code(), "db");
    }
}
