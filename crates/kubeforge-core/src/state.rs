//! Persisted cluster state
//!
//! One [`StorageDocument`] exists per cluster. Every orchestration step
//! mutates it and writes it back, so it is the single source of truth used to
//! resume, scale or tear down the cluster.

use crate::error::{Error, Result};
use crate::types::{Cloud, ClusterType, KubernetesDistro, Role};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// The persisted record of a single cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDocument {
    pub cluster_type: ClusterType,
    pub region: String,
    pub cluster_name: String,
    pub infra_provider: Cloud,

    #[serde(default)]
    pub bootstrap_provider: Option<KubernetesDistro>,

    #[serde(default, rename = "cloud_infrastructure_state")]
    pub cloud_infra: Option<InfrastructureState>,

    /// Owned by the bootstrap collaborator; only its presence is checked here
    #[serde(default, rename = "kubernetes_bootstrap_state")]
    pub k8s_bootstrap: Option<serde_json::Value>,

    #[serde(default)]
    pub cluster_kubeconfig: String,

    #[serde(default)]
    pub ssh_key_pair: SshKeyPairState,

    #[serde(default)]
    pub addons: KubernetesAddons,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StorageDocument {
    pub fn new(
        infra_provider: Cloud,
        cluster_type: ClusterType,
        cluster_name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            cluster_type,
            region: region.into(),
            cluster_name: cluster_name.into(),
            infra_provider,
            bootstrap_provider: None,
            cloud_infra: None,
            k8s_bootstrap: None,
            cluster_kubeconfig: String::new(),
            ssh_key_pair: SshKeyPairState::default(),
            addons: KubernetesAddons::default(),
            updated_at: None,
        }
    }

    /// Shared metadata of whichever provider sub-document is populated
    pub fn base(&self) -> Option<&BaseInfra> {
        self.cloud_infra.as_ref().and_then(InfrastructureState::base)
    }

    pub fn is_completed(&self) -> bool {
        self.base().is_some_and(|b| b.is_completed)
    }

    /// Rejects a record whose per-role VM arrays differ in length
    pub fn check_consistent(&self) -> Result<()> {
        if self
            .cloud_infra
            .as_ref()
            .is_some_and(|infra| !infra.is_consistent())
        {
            return Err(Error::internal(format!(
                "cluster record of {} ({}) has vm arrays of different lengths",
                self.cluster_name, self.region
            )));
        }
        Ok(())
    }
}

/// Generated SSH identity used to log into HA nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SshKeyPairState {
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
}

impl SshKeyPairState {
    pub fn is_empty(&self) -> bool {
        self.public_key.is_empty() && self.private_key.is_empty()
    }
}

/// Applications installed on top of the cluster by the add-on installer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesAddons {
    #[serde(default)]
    pub apps: Vec<AddonEntry>,
    #[serde(default)]
    pub cni: Option<AddonEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonEntry {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Per-provider infrastructure; exactly one field is populated for a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<CloudInfra<AwsNetwork>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<CloudInfra<AzureNetwork>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub civo: Option<CloudInfra<CivoNetwork>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<CloudInfra<LocalNetwork>>,
}

impl InfrastructureState {
    pub fn base(&self) -> Option<&BaseInfra> {
        self.aws
            .as_ref()
            .map(|i| &i.base)
            .or_else(|| self.azure.as_ref().map(|i| &i.base))
            .or_else(|| self.civo.as_ref().map(|i| &i.base))
            .or_else(|| self.local.as_ref().map(|i| &i.base))
    }

    /// Replica counts of whichever provider sub-document is populated
    pub fn node_counts(&self) -> NodeCounts {
        if let Some(infra) = &self.aws {
            return infra.node_counts();
        }
        if let Some(infra) = &self.azure {
            return infra.node_counts();
        }
        if let Some(infra) = &self.civo {
            return infra.node_counts();
        }
        if let Some(infra) = &self.local {
            return infra.node_counts();
        }
        NodeCounts::default()
    }

    /// Every populated sub-document keeps its VM arrays aligned
    pub fn is_consistent(&self) -> bool {
        self.aws.as_ref().is_none_or(CloudInfra::is_consistent)
            && self.azure.as_ref().is_none_or(CloudInfra::is_consistent)
            && self.civo.as_ref().is_none_or(CloudInfra::is_consistent)
            && self.local.as_ref().is_none_or(CloudInfra::is_consistent)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub control_planes: usize,
    pub worker_planes: usize,
    pub data_stores: usize,
    pub load_balancer: bool,
    pub managed_nodes: usize,
}

/// Provider specific network record
///
/// Also selects its own slot inside [`InfrastructureState`], which lets the
/// provider engine stay generic over the cloud.
pub trait NetworkState:
    Default + Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Primary identifier; empty while no network exists
    fn network_id(&self) -> &str;

    /// Address range the nodes live in
    fn cidr(&self) -> &str;

    fn select(infra: &InfrastructureState) -> Option<&CloudInfra<Self>>;

    fn select_mut(infra: &mut InfrastructureState) -> &mut Option<CloudInfra<Self>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CivoNetwork {
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub network_name: String,
    #[serde(default)]
    pub cidr: String,
}

impl NetworkState for CivoNetwork {
    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn cidr(&self) -> &str {
        &self.cidr
    }

    fn select(infra: &InfrastructureState) -> Option<&CloudInfra<Self>> {
        infra.civo.as_ref()
    }

    fn select_mut(infra: &mut InfrastructureState) -> &mut Option<CloudInfra<Self>> {
        &mut infra.civo
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsNetwork {
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub vpc_name: String,
    #[serde(default)]
    pub vpc_cidr: String,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub subnet_names: Vec<String>,
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub route_table_id: String,
}

impl NetworkState for AwsNetwork {
    fn network_id(&self) -> &str {
        &self.vpc_id
    }

    fn cidr(&self) -> &str {
        &self.vpc_cidr
    }

    fn select(infra: &InfrastructureState) -> Option<&CloudInfra<Self>> {
        infra.aws.as_ref()
    }

    fn select_mut(infra: &mut InfrastructureState) -> &mut Option<CloudInfra<Self>> {
        &mut infra.aws
    }
}

/// Azure keeps every resource of a cluster inside one resource group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureNetwork {
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub virtual_network_id: String,
    #[serde(default)]
    pub virtual_network_name: String,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub subnet_name: String,
    #[serde(default)]
    pub cidr: String,
}

impl NetworkState for AzureNetwork {
    fn network_id(&self) -> &str {
        &self.virtual_network_id
    }

    fn cidr(&self) -> &str {
        &self.cidr
    }

    fn select(infra: &InfrastructureState) -> Option<&CloudInfra<Self>> {
        infra.azure.as_ref()
    }

    fn select_mut(infra: &mut InfrastructureState) -> &mut Option<CloudInfra<Self>> {
        &mut infra.azure
    }
}

/// Local clusters run inside the container runtime's bridge network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalNetwork {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cidr: String,
}

impl NetworkState for LocalNetwork {
    fn network_id(&self) -> &str {
        &self.name
    }

    fn cidr(&self) -> &str {
        &self.cidr
    }

    fn select(infra: &InfrastructureState) -> Option<&CloudInfra<Self>> {
        infra.local.as_ref()
    }

    fn select_mut(infra: &mut InfrastructureState) -> &mut Option<CloudInfra<Self>> {
        &mut infra.local
    }
}

/// Metadata every provider sub-document carries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseInfra {
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub ssh_id: String,
    #[serde(default)]
    pub ssh_key_name: String,
    #[serde(default)]
    pub ssh_user: String,
    #[serde(default)]
    pub kubernetes_distro: Option<KubernetesDistro>,
    #[serde(default)]
    pub kubernetes_version: String,
}

/// Provider-managed control plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedState {
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub node_size: String,
}

impl ManagedState {
    pub fn clear(&mut self) {
        *self = ManagedState::default();
    }
}

/// Infrastructure of one cluster on one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudInfra<N> {
    #[serde(rename = "b")]
    pub base: BaseInfra,

    pub network: N,

    #[serde(default)]
    pub managed: ManagedState,

    #[serde(default, rename = "info_control_planes")]
    pub control_planes: VmSet,

    #[serde(default, rename = "info_worker_planes")]
    pub worker_planes: VmSet,

    #[serde(default, rename = "info_database")]
    pub data_stores: VmSet,

    #[serde(default, rename = "info_load_balancer")]
    pub load_balancer: LoadBalancer,
}

impl<N> CloudInfra<N> {
    /// Array-shaped resources of a role; `None` for the load balancer
    pub fn vm_set(&self, role: Role) -> Option<&VmSet> {
        match role {
            Role::ControlPlane => Some(&self.control_planes),
            Role::WorkerPlane => Some(&self.worker_planes),
            Role::DataStore => Some(&self.data_stores),
            Role::LoadBalancer => None,
        }
    }

    pub fn vm_set_mut(&mut self, role: Role) -> Option<&mut VmSet> {
        match role {
            Role::ControlPlane => Some(&mut self.control_planes),
            Role::WorkerPlane => Some(&mut self.worker_planes),
            Role::DataStore => Some(&mut self.data_stores),
            Role::LoadBalancer => None,
        }
    }

    /// Firewall currently attached to a role, empty when none exists
    pub fn firewall_id(&self, role: Role) -> &str {
        match self.vm_set(role) {
            Some(set) => &set.firewall_id,
            None => &self.load_balancer.firewall_id,
        }
    }

    pub fn set_firewall(&mut self, role: Role, id: String, name: String) {
        match self.vm_set_mut(role) {
            Some(set) => {
                set.firewall_id = id;
                set.firewall_name = name;
            }
            None => {
                self.load_balancer.firewall_id = id;
                self.load_balancer.firewall_name = name;
            }
        }
    }

    /// Returns the VM at `index` of `role`, if the index exists
    pub fn vm(&self, role: Role, index: usize) -> Option<VmSlot> {
        match self.vm_set(role) {
            Some(set) => set.slot(index),
            None => (index == 0).then(|| self.load_balancer.vm.clone()),
        }
    }

    /// Overwrites the VM at `index`; returns false when the index is out of range
    pub fn set_vm(&mut self, role: Role, index: usize, slot: VmSlot) -> bool {
        match self.vm_set_mut(role) {
            Some(set) => set.set_slot(index, slot),
            None if index == 0 => {
                self.load_balancer.vm = slot;
                true
            }
            None => false,
        }
    }

    /// True once every VM of every role has an id and a private address
    pub fn all_vms_ready(&self) -> bool {
        let lb_ready = self.load_balancer.vm.is_empty() || self.load_balancer.vm.is_ready();
        lb_ready
            && [&self.control_planes, &self.worker_planes, &self.data_stores]
                .iter()
                .all(|set| set.all_ready())
    }

    pub fn node_counts(&self) -> NodeCounts {
        NodeCounts {
            control_planes: self.control_planes.len(),
            worker_planes: self.worker_planes.len(),
            data_stores: self.data_stores.len(),
            load_balancer: !self.load_balancer.vm.is_empty(),
            managed_nodes: self.managed.node_count,
        }
    }
    pub fn is_consistent(&self) -> bool {
        [&self.control_planes, &self.worker_planes, &self.data_stores]
            .iter()
            .all(|set| set.is_consistent())
    }
}

/// Parallel arrays describing every VM of one role
///
/// Index `i` across all arrays is "VM #i of the role". The arrays always
/// have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmSet {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub public_ips: Vec<String>,
    #[serde(default)]
    pub private_ips: Vec<String>,
    #[serde(default)]
    pub vm_ids: Vec<String>,
    #[serde(default)]
    pub network_interface_ids: Vec<String>,
    #[serde(default)]
    pub vm_sizes: Vec<String>,
    #[serde(default)]
    pub firewall_id: String,
    #[serde(default)]
    pub firewall_name: String,
}

impl VmSet {
    pub fn len(&self) -> usize {
        self.vm_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vm_ids.is_empty()
    }

    fn arrays_mut(&mut self) -> [&mut Vec<String>; 7] {
        [
            &mut self.names,
            &mut self.hostnames,
            &mut self.public_ips,
            &mut self.private_ips,
            &mut self.vm_ids,
            &mut self.network_interface_ids,
            &mut self.vm_sizes,
        ]
    }

    /// Grows by appending empty slots or shrinks by dropping the tail
    pub fn resize(&mut self, len: usize) {
        for array in self.arrays_mut() {
            array.resize(len, String::new());
        }
    }

    /// Every parallel array has the same length
    pub fn is_consistent(&self) -> bool {
        let len = self.vm_ids.len();
        [
            &self.names,
            &self.hostnames,
            &self.public_ips,
            &self.private_ips,
            &self.network_interface_ids,
            &self.vm_sizes,
        ]
        .iter()
        .all(|a| a.len() == len)
    }

    /// `None` when `index` is out of range or the arrays are misaligned
    pub fn slot(&self, index: usize) -> Option<VmSlot> {
        Some(VmSlot {
            name: self.names.get(index)?.clone(),
            hostname: self.hostnames.get(index)?.clone(),
            public_ip: self.public_ips.get(index)?.clone(),
            private_ip: self.private_ips.get(index)?.clone(),
            vm_id: self.vm_ids.get(index)?.clone(),
            network_interface_id: self.network_interface_ids.get(index)?.clone(),
            vm_size: self.vm_sizes.get(index)?.clone(),
        })
    }

    pub fn set_slot(&mut self, index: usize, slot: VmSlot) -> bool {
        if index >= self.len() || !self.is_consistent() {
            return false;
        }
        self.names[index] = slot.name;
        self.hostnames[index] = slot.hostname;
        self.public_ips[index] = slot.public_ip;
        self.private_ips[index] = slot.private_ip;
        self.vm_ids[index] = slot.vm_id;
        self.network_interface_ids[index] = slot.network_interface_id;
        self.vm_sizes[index] = slot.vm_size;
        true
    }

    fn all_ready(&self) -> bool {
        self.is_consistent()
            && self
                .vm_ids
                .iter()
                .zip(&self.private_ips)
                .all(|(id, ip)| !id.is_empty() && !ip.is_empty())
    }
}

/// A single VM, as stored for the load balancer or copied out of a [`VmSet`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmSlot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub vm_id: String,
    #[serde(default)]
    pub network_interface_id: String,
    #[serde(default)]
    pub vm_size: String,
}

impl VmSlot {
    /// No VM has been requested for this slot
    pub fn is_empty(&self) -> bool {
        self.vm_id.is_empty()
    }

    /// The VM exists and its addresses have been recorded
    pub fn is_ready(&self) -> bool {
        !self.vm_id.is_empty() && !self.private_ip.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    #[serde(flatten)]
    pub vm: VmSlot,
    #[serde(default)]
    pub firewall_id: String,
    #[serde(default)]
    pub firewall_name: String,
}

/// Stored credentials of one cloud account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsDocument {
    pub infra_provider: Cloud,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub civo: Option<CivoCredentials>,
}

impl CredentialsDocument {
    pub fn civo(token: impl Into<String>) -> Self {
        Self {
            infra_provider: Cloud::Civo,
            aws: None,
            azure: None,
            civo: Some(CivoCredentials {
                token: token.into(),
            }),
        }
    }

    pub fn aws(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            infra_provider: Cloud::Aws,
            aws: Some(AwsCredentials {
                access_key_id: access_key_id.into(),
                secret_access_key: secret_access_key.into(),
            }),
            azure: None,
            civo: None,
        }
    }

    pub fn azure(creds: AzureCredentials) -> Self {
        Self {
            infra_provider: Cloud::Azure,
            aws: None,
            azure: Some(creds),
            civo: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Service principal used for the Azure Resource Manager API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureCredentials {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CivoCredentials {
    pub token: String,
}

/// Bundle moved between stores by export / import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStateExportImport {
    #[serde(default)]
    pub clusters: Vec<StorageDocument>,
    #[serde(default)]
    pub credentials: Vec<CredentialsDocument>,
}
