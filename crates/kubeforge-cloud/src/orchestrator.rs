//! Ordered create / delete / scale sequences over a [`CloudProvider`]
//!
//! Each step is idempotent on its own, so any sequence can be re-run after a
//! failure and continues where the previous run stopped.

use crate::provider::{CloudProvider, InitOutcome, ResourceRequest};
use kubeforge_core::{ClusterType, Error, ErrorKind, Operation, Result, Role, validate_name};
use kubeforge_storage::StorageDriver;
use std::cmp::Ordering;

/// Generated resource names
pub mod names {
    use kubeforge_core::Role;

    pub fn network(cluster: &str) -> String {
        format!("{cluster}-net")
    }

    pub fn ssh_key(cluster: &str) -> String {
        format!("{cluster}-ssh")
    }

    pub fn firewall(cluster: &str, role: Role) -> String {
        format!("{cluster}-fw-{}", role.short_code())
    }

    pub fn vm(cluster: &str, role: Role, index: usize) -> String {
        match role {
            Role::LoadBalancer => format!("{cluster}-vm-lb"),
            _ => format!("{cluster}-vm-{}-{index}", role.short_code()),
        }
    }
}

/// Count and size of one HA role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePlan {
    pub count: usize,
    pub size: String,
}

impl NodePlan {
    pub fn new(count: usize, size: impl Into<String>) -> Self {
        Self {
            count,
            size: size.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaPlan {
    pub cluster_name: String,
    pub control_planes: NodePlan,
    pub worker_planes: NodePlan,
    pub data_stores: NodePlan,
    pub load_balancer_size: String,
}

impl HaPlan {
    fn size_for(&self, role: Role) -> &str {
        match role {
            Role::ControlPlane => &self.control_planes.size,
            Role::WorkerPlane => &self.worker_planes.size,
            Role::DataStore => &self.data_stores.size,
            Role::LoadBalancer => &self.load_balancer_size,
        }
    }

    fn count_for(&self, role: Role) -> usize {
        match role {
            Role::ControlPlane => self.control_planes.count,
            Role::WorkerPlane => self.worker_planes.count,
            Role::DataStore => self.data_stores.count,
            Role::LoadBalancer => 1,
        }
    }

    /// Checks every name the plan derives from the cluster name, so a name
    /// that is too long fails before anything is created
    pub fn validate_names(&self) -> Result<()> {
        let cluster = self.cluster_name.as_str();
        validate_name(&names::network(cluster))?;
        validate_name(&names::ssh_key(cluster))?;
        for role in Role::ALL {
            validate_name(&names::firewall(cluster, role))?;
            let last = self.count_for(role).saturating_sub(1);
            validate_name(&names::vm(cluster, role, last))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPlan {
    pub cluster_name: String,
    pub node_count: usize,
    pub node_size: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterPlan {
    Ha(HaPlan),
    Managed(ManagedPlan),
}

/// Result of [`scale_workers`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleResult {
    Unchanged(usize),
    Added { from: usize, to: usize },
    Removed { hostnames: Vec<String> },
}

/// Initialises state and builds the cluster described by `plan`
pub async fn create_cluster(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
    plan: &ClusterPlan,
) -> Result<InitOutcome> {
    let outcome = provider.init_state(storage, Operation::Create).await?;
    if outcome == InitOutcome::AlreadyCompleted {
        return Ok(outcome);
    }

    match plan {
        ClusterPlan::Ha(plan) => create_ha_cluster(provider, storage, plan).await?,
        ClusterPlan::Managed(plan) => create_managed_cluster(provider, storage, plan).await?,
    }
    Ok(outcome)
}

/// Loads the stored cluster and tears it down
pub async fn delete_cluster(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
) -> Result<()> {
    provider.init_state(storage, Operation::Delete).await?;
    match provider.meta().cluster_type {
        ClusterType::Ha => delete_ha_cluster(provider, storage).await,
        ClusterType::Managed => delete_managed_cluster(provider, storage).await,
    }
}

/// Network, counts, SSH identity, firewalls, then VMs role by role
pub async fn create_ha_cluster(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
    plan: &HaPlan,
) -> Result<()> {
    plan.validate_names()?;
    let cluster = plan.cluster_name.as_str();

    provider
        .new_network(storage, &names::network(cluster))
        .await?;

    provider.no_of_control_plane(plan.control_planes.count, true)?;
    provider
        .no_of_worker_plane(storage, plan.worker_planes.count, true)
        .await?;
    provider.no_of_data_store(plan.data_stores.count, true)?;

    provider
        .create_upload_ssh_key_pair(storage, &names::ssh_key(cluster))
        .await?;

    for role in [
        Role::LoadBalancer,
        Role::DataStore,
        Role::ControlPlane,
        Role::WorkerPlane,
    ] {
        let request = ResourceRequest::new(names::firewall(cluster, role), role);
        provider.new_firewall(storage, &request).await?;
    }

    let lb = ResourceRequest::new(names::vm(cluster, Role::LoadBalancer, 0), Role::LoadBalancer)
        .with_vm_size(plan.size_for(Role::LoadBalancer));
    provider.new_vm(storage, &lb, 0).await?;

    for role in [Role::DataStore, Role::ControlPlane, Role::WorkerPlane] {
        let count = role_count(provider, storage, role).await?;
        for index in 0..count {
            let request = ResourceRequest::new(names::vm(cluster, role, index), role)
                .with_vm_size(plan.size_for(role));
            provider.new_vm(storage, &request, index).await?;
        }
    }
    Ok(())
}

/// VMs (highest index first), firewalls, SSH identity, then the network
pub async fn delete_ha_cluster(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
) -> Result<()> {
    for role in [Role::WorkerPlane, Role::ControlPlane, Role::DataStore] {
        let count = role_count(provider, storage, role).await?;
        for index in (0..count).rev() {
            provider.del_vm(storage, role, index).await?;
        }
    }
    provider.del_vm(storage, Role::LoadBalancer, 0).await?;

    for role in [
        Role::DataStore,
        Role::ControlPlane,
        Role::WorkerPlane,
        Role::LoadBalancer,
    ] {
        provider.del_firewall(storage, role).await?;
    }

    provider.del_ssh_key_pair(storage).await?;
    provider.del_network(storage).await
}

pub async fn create_managed_cluster(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
    plan: &ManagedPlan,
) -> Result<()> {
    validate_name(&names::network(&plan.cluster_name))?;
    provider
        .new_network(storage, &names::network(&plan.cluster_name))
        .await?;

    let mut request = ResourceRequest::new(plan.cluster_name.clone(), Role::WorkerPlane);
    if let Some(size) = &plan.node_size {
        request = request.with_vm_size(size.clone());
    }
    provider
        .new_managed_cluster(storage, &request, plan.node_count)
        .await
}

pub async fn delete_managed_cluster(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
) -> Result<()> {
    provider.del_managed_cluster(storage).await?;
    provider.del_network(storage).await
}

/// Grows the worker pool to `desired`; returns the previous count
pub async fn add_worker_nodes(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
    desired: usize,
    vm_size: &str,
) -> Result<usize> {
    let current = provider.no_of_worker_plane(storage, 0, false).await?;
    if desired <= current {
        return Err(Error::new(
            ErrorKind::InvalidNoOfWorkerplane,
            format!("cannot add workers: {desired} is not above the current {current}"),
        ));
    }

    let cluster = provider.meta().cluster_name.clone();
    validate_name(&names::vm(&cluster, Role::WorkerPlane, desired - 1))?;

    provider.no_of_worker_plane(storage, desired, true).await?;

    for index in 0..desired {
        let name = names::vm(&cluster, Role::WorkerPlane, index);
        let request = ResourceRequest::new(name, Role::WorkerPlane).with_vm_size(vm_size);
        provider.new_vm(storage, &request, index).await?;
    }
    Ok(current)
}

/// Shrinks the worker pool to `desired`; returns the removed hostnames
pub async fn del_worker_nodes(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
    desired: usize,
) -> Result<Vec<String>> {
    let current = provider.no_of_worker_plane(storage, 0, false).await?;
    if desired >= current {
        return Err(Error::new(
            ErrorKind::InvalidNoOfWorkerplane,
            format!("cannot remove workers: {desired} is not below the current {current}"),
        ));
    }

    let hostnames = provider.worker_hostnames()?;
    for index in (desired..current).rev() {
        provider.del_vm(storage, Role::WorkerPlane, index).await?;
    }
    provider.no_of_worker_plane(storage, desired, true).await?;

    Ok(hostnames[desired..current].to_vec())
}

/// Loads an HA cluster and moves its worker pool to `desired`
pub async fn scale_workers(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
    desired: usize,
    vm_size: &str,
) -> Result<ScaleResult> {
    provider.init_state(storage, Operation::Get).await?;
    if provider.meta().cluster_type != ClusterType::Ha {
        return Err(Error::new(
            ErrorKind::InvalidClusterType,
            "only ha clusters have a worker pool to scale",
        ));
    }

    let current = provider.no_of_worker_plane(storage, 0, false).await?;
    match desired.cmp(&current) {
        Ordering::Equal => Ok(ScaleResult::Unchanged(current)),
        Ordering::Greater => {
            let from = add_worker_nodes(provider, storage, desired, vm_size).await?;
            Ok(ScaleResult::Added { from, to: desired })
        }
        Ordering::Less => {
            let hostnames = del_worker_nodes(provider, storage, desired).await?;
            Ok(ScaleResult::Removed { hostnames })
        }
    }
}

async fn role_count(
    provider: &mut dyn CloudProvider,
    storage: &dyn StorageDriver,
    role: Role,
) -> Result<usize> {
    match role {
        Role::ControlPlane => provider.no_of_control_plane(0, false),
        Role::DataStore => provider.no_of_data_store(0, false),
        Role::WorkerPlane => provider.no_of_worker_plane(storage, 0, false).await,
        Role::LoadBalancer => Ok(1),
    }
}
