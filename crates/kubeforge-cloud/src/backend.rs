//! Per-cloud primitives the provider engine is built on
//!
//! A backend only talks to its cloud. Skip-if-exists checks, state
//! bookkeeping, persistence and readiness polling live in
//! [`ProviderClient`](crate::ProviderClient), so each backend stays a thin
//! mapping from these calls onto the cloud's API.

use crate::firewall::FirewallRule;
use async_trait::async_trait;
use kubeforge_core::{
    Cloud, ClusterType, CredentialsDocument, Error, KubernetesDistro, NetworkState, Result, Role,
};

/// Inputs for a firewall / security group
#[derive(Debug)]
pub struct FirewallRequest<'a, N> {
    pub name: &'a str,
    pub role: Role,
    pub network: &'a N,
    pub rules: &'a [FirewallRule],
}

/// Inputs for a single VM
#[derive(Debug)]
pub struct VmRequest<'a, N> {
    pub name: &'a str,
    pub role: Role,
    pub vm_size: &'a str,
    pub network: &'a N,
    pub firewall_id: &'a str,
    pub ssh_key_id: &'a str,
    pub ssh_key_name: &'a str,
    pub ssh_user: &'a str,
    /// OpenSSH public key, for clouds that take it inline instead of by id
    pub ssh_public_key: &'a str,
    /// Whether the VM gets a public address
    pub public_ip: bool,
}

/// Observed state of a VM
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmInstance {
    pub vm_id: String,
    pub hostname: String,
    pub public_ip: String,
    pub private_ip: String,
    pub network_interface_id: String,
    /// The cloud reports the VM as running
    pub ready: bool,
}

/// Inputs for a provider-managed cluster
#[derive(Debug)]
pub struct ManagedClusterRequest<'a, N> {
    pub name: &'a str,
    pub node_size: &'a str,
    pub node_count: usize,
    pub version: &'a str,
    pub network: &'a N,
    pub apps: &'a [String],
    pub cni: Option<&'a str>,
}

/// Observed state of a provider-managed cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagedClusterStatus {
    pub cluster_id: String,
    pub status: String,
    pub ready: bool,
    pub kubeconfig: Option<String>,
}

/// Cloud specific resource primitives
///
/// Methods for resources a cloud does not offer keep their default body,
/// which fails with `FailedClusterOperation`.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Network record stored for this cloud
    type Network: NetworkState;

    fn cloud(&self) -> Cloud;

    fn supports(&self, cluster_type: ClusterType) -> bool;

    /// Distribution used when the caller does not pick one
    fn default_distro(&self, cluster_type: ClusterType) -> KubernetesDistro;

    /// Login user baked into the images this backend boots
    fn ssh_user(&self) -> &str {
        "root"
    }

    /// Resolves credentials and prepares the API client
    ///
    /// `stored` holds the credentials saved in the store, if any.
    async fn connect(&mut self, region: &str, stored: Option<CredentialsDocument>) -> Result<()>;

    /// Regions offered; `None` when the backend does not validate regions
    async fn regions(&self) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    /// VM / node sizes offered in the connected region
    async fn vm_sizes(&self) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    /// Kubernetes versions offered for a cluster type
    async fn versions(&self, _cluster_type: ClusterType) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    async fn create_network(&self, name: &str) -> Result<Self::Network>;

    async fn delete_network(&self, network: &Self::Network) -> Result<()>;

    /// Registers a public key; returns the id it is deleted by
    async fn upload_ssh_key(&self, _name: &str, _public_key: &str) -> Result<String> {
        Err(unsupported(self.cloud(), "ssh keys"))
    }

    async fn delete_ssh_key(&self, _id: &str) -> Result<()> {
        Err(unsupported(self.cloud(), "ssh keys"))
    }

    /// Creates a firewall with its rules; returns its id
    async fn create_firewall(&self, _req: FirewallRequest<'_, Self::Network>) -> Result<String> {
        Err(unsupported(self.cloud(), "firewalls"))
    }

    async fn delete_firewall(&self, _id: &str) -> Result<()> {
        Err(unsupported(self.cloud(), "firewalls"))
    }

    /// Requests a VM; returns its id without waiting for it to boot
    async fn create_vm(&self, _req: VmRequest<'_, Self::Network>) -> Result<String> {
        Err(unsupported(self.cloud(), "virtual machines"))
    }

    async fn get_vm(&self, _id: &str) -> Result<VmInstance> {
        Err(unsupported(self.cloud(), "virtual machines"))
    }

    async fn delete_vm(&self, _id: &str) -> Result<()> {
        Err(unsupported(self.cloud(), "virtual machines"))
    }

    /// Requests a managed cluster; returns its id without waiting
    async fn create_managed_cluster(
        &self,
        _req: ManagedClusterRequest<'_, Self::Network>,
    ) -> Result<String> {
        Err(unsupported(self.cloud(), "managed clusters"))
    }

    async fn get_managed_cluster(&self, _id: &str) -> Result<ManagedClusterStatus> {
        Err(unsupported(self.cloud(), "managed clusters"))
    }

    async fn delete_managed_cluster(&self, _id: &str) -> Result<()> {
        Err(unsupported(self.cloud(), "managed clusters"))
    }
}

fn unsupported(cloud: Cloud, what: &str) -> Error {
    Error::operation_failed(format!("{cloud} does not support {what}"))
}
