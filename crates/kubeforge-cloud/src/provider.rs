//! Cloud provider trait definition

use async_trait::async_trait;
use kubeforge_core::{
    Cloud, ClusterType, KubernetesDistro, Operation, Result, Role, StorageDocument, validate_name,
};
use kubeforge_storage::StorageDriver;
use serde::{Deserialize, Serialize};

/// Uniform capability set over every cloud
///
/// Each mutating call checks the state document first, talks to the cloud
/// only when needed, and persists the document before returning. Calling any
/// `new_*` twice is therefore safe, and so is re-running a partially failed
/// sequence.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn cloud(&self) -> Cloud;

    /// Cluster identity this provider was constructed for
    fn meta(&self) -> &ClusterMeta;

    /// In-memory state document
    fn state(&self) -> &StorageDocument;

    /// Loads or prepares the state document for `operation`
    ///
    /// Also connects the backend and, for `Create`, validates region and
    /// version against what the cloud offers.
    async fn init_state(
        &mut self,
        storage: &dyn StorageDriver,
        operation: Operation,
    ) -> Result<InitOutcome>;

    async fn new_network(&mut self, storage: &dyn StorageDriver, name: &str) -> Result<()>;

    /// Deletes the network, then the cluster record
    async fn del_network(&mut self, storage: &dyn StorageDriver) -> Result<()>;

    async fn create_upload_ssh_key_pair(
        &mut self,
        storage: &dyn StorageDriver,
        name: &str,
    ) -> Result<()>;

    async fn del_ssh_key_pair(&mut self, storage: &dyn StorageDriver) -> Result<()>;

    async fn new_firewall(
        &mut self,
        storage: &dyn StorageDriver,
        request: &ResourceRequest,
    ) -> Result<()>;

    async fn del_firewall(&mut self, storage: &dyn StorageDriver, role: Role) -> Result<()>;

    /// Creates VM `index` of the request's role and waits for it to run
    async fn new_vm(
        &mut self,
        storage: &dyn StorageDriver,
        request: &ResourceRequest,
        index: usize,
    ) -> Result<()>;

    /// Deletes VM `index` of `role`, clearing only that slot
    async fn del_vm(&mut self, storage: &dyn StorageDriver, role: Role, index: usize)
    -> Result<()>;

    /// Creates the managed cluster and waits until it reports ready
    async fn new_managed_cluster(
        &mut self,
        storage: &dyn StorageDriver,
        request: &ResourceRequest,
        no_of_nodes: usize,
    ) -> Result<()>;

    async fn del_managed_cluster(&mut self, storage: &dyn StorageDriver) -> Result<()>;

    /// Getter (`is_setter == false`) or create-time setter for control planes
    fn no_of_control_plane(&mut self, desired: usize, is_setter: bool) -> Result<usize>;

    /// Getter or setter for workers; the setter grows or shrinks from the tail
    async fn no_of_worker_plane(
        &mut self,
        storage: &dyn StorageDriver,
        desired: usize,
        is_setter: bool,
    ) -> Result<usize>;

    /// Getter or create-time setter for datastore nodes
    fn no_of_data_store(&mut self, desired: usize, is_setter: bool) -> Result<usize>;

    /// Hostnames of every worker slot, empty strings included
    fn worker_hostnames(&self) -> Result<Vec<String>>;

    /// Addresses and login material the bootstrap step needs
    fn ha_cluster_state(&self) -> Result<CloudResourceState>;

    /// `Ok(())` when a record for this cluster exists
    async fn is_present(&self, storage: &mut dyn StorageDriver) -> Result<()>;
}

/// Identity and desired software of the cluster a provider acts on
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMeta {
    pub cluster_name: String,
    pub region: String,
    pub cluster_type: ClusterType,
    pub distro: Option<KubernetesDistro>,
    pub kubernetes_version: String,
    pub apps: Vec<String>,
    pub cni: Option<String>,
}

impl ClusterMeta {
    pub fn new(
        cluster_name: impl Into<String>,
        region: impl Into<String>,
        cluster_type: ClusterType,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            region: region.into(),
            cluster_type,
            distro: None,
            kubernetes_version: String::new(),
            apps: Vec::new(),
            cni: None,
        }
    }

    pub fn with_distro(mut self, distro: KubernetesDistro) -> Self {
        self.distro = Some(distro);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version = version.into();
        self
    }

    pub fn with_apps(mut self, apps: Vec<String>, cni: Option<String>) -> Self {
        self.apps = apps;
        self.cni = cni;
        self
    }
}

/// Name, role and size of a resource to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub name: String,
    pub role: Role,
    pub vm_size: Option<String>,
    pub public_ip: bool,
}

impl ResourceRequest {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            vm_size: None,
            public_ip: true,
        }
    }

    pub fn with_vm_size(mut self, vm_size: impl Into<String>) -> Self {
        self.vm_size = Some(vm_size.into());
        self
    }

    pub fn with_public_ip(mut self, public_ip: bool) -> Self {
        self.public_ip = public_ip;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
    }
}

/// What `init_state` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Nothing persisted; a new document was prepared
    Fresh,
    /// A partially built cluster was loaded and will be continued
    Resumed,
    /// A completed cluster already exists; creation has nothing to do
    AlreadyCompleted,
    /// The record was loaded for delete / get
    Loaded,
}

/// Addresses of every node of one role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAddresses {
    pub hostnames: Vec<String>,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
}

/// Everything the bootstrap collaborator needs to reach the nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResourceState {
    pub cloud: Cloud,
    pub cluster_type: ClusterType,
    pub cluster_name: String,
    pub region: String,
    pub distro: Option<KubernetesDistro>,
    pub ssh_user: String,
    pub ssh_private_key: String,
    pub control_planes: NodeAddresses,
    pub worker_planes: NodeAddresses,
    pub data_stores: NodeAddresses,
    pub load_balancer_public_ip: String,
    pub load_balancer_private_ip: String,
}
