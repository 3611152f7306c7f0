//! Provider engine shared by every cloud
//!
//! [`ProviderClient`] owns the in-memory state document and implements the
//! skip / call / persist protocol of [`CloudProvider`] once. The cloud specific
//! part is the [`CloudBackend`] it wraps.

use crate::backend::{CloudBackend, FirewallRequest, ManagedClusterRequest, VmRequest};
use crate::firewall;
use crate::provider::{
    CloudProvider, CloudResourceState, ClusterMeta, InitOutcome, NodeAddresses, ResourceRequest,
};
use crate::ssh;
use async_trait::async_trait;
use chrono::Utc;
use kubeforge_core::{
    Cloud, CloudInfra, ClusterType, CredentialsDocument, Error, ErrorKind, InfrastructureState,
    KubernetesDistro, ManagedState, NetworkState, Operation, Result, RetryConfig, Role,
    StorageDocument, VmSet, VmSlot, Waiter, validate_name, validate_quorum,
};
use kubeforge_storage::StorageDriver;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info};

/// [`CloudProvider`] implementation over a cloud backend
pub struct ProviderClient<B: CloudBackend> {
    backend: B,
    meta: ClusterMeta,
    state: StorageDocument,
    cancel: CancellationToken,
    /// Retries cloud calls that fail transiently
    waiter: Waiter,
    /// Polls resources until the cloud reports them ready
    readiness: Waiter,
    vm_sizes: OnceCell<Option<Vec<String>>>,
    span: Span,
}

impl<B: CloudBackend> ProviderClient<B> {
    pub fn new(backend: B, meta: ClusterMeta, cancel: CancellationToken, span: Span) -> Self {
        let state = StorageDocument::new(
            backend.cloud(),
            meta.cluster_type,
            meta.cluster_name.clone(),
            meta.region.clone(),
        );
        Self {
            waiter: Waiter::new(RetryConfig::default(), cancel.clone(), span.clone()),
            readiness: Waiter::new(RetryConfig::readiness(), cancel.clone(), span.clone()),
            backend,
            meta,
            state,
            cancel,
            vm_sizes: OnceCell::new(),
            span,
        }
    }

    /// Overrides the retry budgets for cloud calls and readiness polling
    pub fn with_retry(mut self, calls: RetryConfig, readiness: RetryConfig) -> Self {
        self.waiter = Waiter::new(calls, self.cancel.clone(), self.span.clone());
        self.readiness = Waiter::new(readiness, self.cancel.clone(), self.span.clone());
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn distro(&self) -> KubernetesDistro {
        self.meta
            .distro
            .unwrap_or_else(|| self.backend.default_distro(self.meta.cluster_type))
    }

    fn fresh_state(&self) -> StorageDocument {
        let distro = self.distro();
        let mut doc = StorageDocument::new(
            self.backend.cloud(),
            self.meta.cluster_type,
            self.meta.cluster_name.clone(),
            self.meta.region.clone(),
        );
        doc.bootstrap_provider = Some(distro);

        let mut infra = CloudInfra::<B::Network>::default();
        infra.base.kubernetes_distro = Some(distro);
        infra.base.kubernetes_version = self.meta.kubernetes_version.clone();

        let mut all = InfrastructureState::default();
        *B::Network::select_mut(&mut all) = Some(infra);
        doc.cloud_infra = Some(all);
        doc
    }

    async fn load_credentials(&self, storage: &dyn StorageDriver) -> Result<Option<CredentialsDocument>> {
        match storage.read_credentials(self.backend.cloud()).await {
            Ok(creds) => Ok(Some(creds)),
            Err(e) if e.is(ErrorKind::NoMatchingRecordsFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn validate_create(&self) -> Result<()> {
        let region = &self.meta.region;
        if let Some(regions) = self.backend.regions().await?
            && !regions.iter().any(|r| r == region)
        {
            return Err(Error::new(
                ErrorKind::InvalidCloudRegion,
                format!("region '{region}' is not offered by {}", self.backend.cloud()),
            ));
        }

        let version = &self.meta.kubernetes_version;
        if !version.is_empty()
            && let Some(versions) = self.backend.versions(self.meta.cluster_type).await?
            && !versions.iter().any(|v| version_matches(v, version))
        {
            return Err(Error::new(
                ErrorKind::InvalidVersion,
                format!("kubernetes version '{version}' is not offered"),
            ));
        }
        Ok(())
    }

    async fn validate_vm_size(&self, size: &str) -> Result<()> {
        let sizes = self
            .vm_sizes
            .get_or_try_init(|| self.backend.vm_sizes())
            .await?;
        if let Some(sizes) = sizes
            && !sizes.iter().any(|s| s == size)
        {
            return Err(Error::new(
                ErrorKind::InvalidCloudVmSize,
                format!("size '{size}' is not offered in {}", self.meta.region),
            ));
        }
        Ok(())
    }

    /// Create-time sizing for roles whose count must form a quorum
    fn fixed_count(&mut self, role: Role, desired: usize, is_setter: bool) -> Result<usize> {
        let infra = infra_mut::<B::Network>(&mut self.state)?;
        let set = role_set_mut(infra, role)?;
        if !is_setter {
            return Ok(set.len());
        }

        validate_quorum(desired, role.count_error_kind())?;
        if set.is_empty() {
            set.resize(desired);
            debug!(parent: &self.span, %role, count = desired, "sized role");
        } else if set.len() != desired {
            return Err(Error::new(
                role.count_error_kind(),
                format!(
                    "{role} count is fixed at {} once the cluster exists",
                    set.len()
                ),
            ));
        }
        Ok(desired)
    }
}

#[async_trait]
impl<B: CloudBackend> CloudProvider for ProviderClient<B> {
    fn cloud(&self) -> Cloud {
        self.backend.cloud()
    }

    fn meta(&self) -> &ClusterMeta {
        &self.meta
    }

    fn state(&self) -> &StorageDocument {
        &self.state
    }

    async fn init_state(
        &mut self,
        storage: &dyn StorageDriver,
        operation: Operation,
    ) -> Result<InitOutcome> {
        if matches!(operation, Operation::Scale | Operation::Switch) {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("'{operation}' cannot initialise cluster state"),
            ));
        }
        if !self.backend.supports(self.meta.cluster_type) {
            return Err(Error::new(
                ErrorKind::InvalidClusterType,
                format!(
                    "{} does not provide {} clusters",
                    self.backend.cloud(),
                    self.meta.cluster_type
                ),
            ));
        }
        validate_name(&self.meta.cluster_name)?;

        let stored = self.load_credentials(storage).await?;
        self.backend.connect(&self.meta.region, stored).await?;

        let outcome = match operation {
            Operation::Create => {
                self.validate_create().await?;
                match storage.read().await {
                    Ok(doc) => {
                        let completed = doc.is_completed();
                        self.state = doc;
                        if infra::<B::Network>(&self.state).is_err() {
                            return Err(Error::internal(format!(
                                "stored record of {} has no {} infrastructure",
                                self.meta.cluster_name,
                                self.backend.cloud()
                            )));
                        }
                        if completed {
                            info!(parent: &self.span, cluster = %self.meta.cluster_name, "cluster already exists, nothing to create");
                            InitOutcome::AlreadyCompleted
                        } else {
                            info!(parent: &self.span, cluster = %self.meta.cluster_name, "resuming partially created cluster");
                            InitOutcome::Resumed
                        }
                    }
                    Err(e) if e.is(ErrorKind::NoMatchingRecordsFound) => {
                        self.state = self.fresh_state();
                        info!(parent: &self.span, cluster = %self.meta.cluster_name, "starting fresh cluster state");
                        InitOutcome::Fresh
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => {
                self.state = storage.read().await?;
                debug!(parent: &self.span, cluster = %self.meta.cluster_name, %operation, "loaded cluster state");
                InitOutcome::Loaded
            }
        };
        Ok(outcome)
    }

    async fn new_network(&mut self, storage: &dyn StorageDriver, name: &str) -> Result<()> {
        validate_name(name)?;
        let infra = infra::<B::Network>(&self.state)?;
        if !infra.network.network_id().is_empty() {
            info!(parent: &self.span, network = %name, "skipped network creation, already created");
            return Ok(());
        }

        let network = self.backend.create_network(name).await?;
        let id = network.network_id().to_string();
        infra_mut::<B::Network>(&mut self.state)?.network = network;
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, network = %name, %id, "created network");
        Ok(())
    }

    async fn del_network(&mut self, storage: &dyn StorageDriver) -> Result<()> {
        let network = infra::<B::Network>(&self.state)?.network.clone();
        if network.network_id().is_empty() {
            info!(parent: &self.span, "skipped network deletion, not found");
        } else {
            let backend = &self.backend;
            let target = &network;
            self.waiter
                .retry("delete network", move || backend.delete_network(target))
                .await?;

            infra_mut::<B::Network>(&mut self.state)?.network = B::Network::default();
            persist(&mut self.state, storage).await?;
            info!(parent: &self.span, id = %network.network_id(), "deleted network");
        }

        match storage.delete_cluster().await {
            Ok(()) => {}
            Err(e) if e.is(ErrorKind::NoMatchingRecordsFound) => {}
            Err(e) => return Err(e),
        }
        info!(parent: &self.span, cluster = %self.meta.cluster_name, "removed cluster record");
        Ok(())
    }

    async fn create_upload_ssh_key_pair(
        &mut self,
        storage: &dyn StorageDriver,
        name: &str,
    ) -> Result<()> {
        validate_name(name)?;
        if !infra::<B::Network>(&self.state)?.base.ssh_id.is_empty() {
            info!(parent: &self.span, key = %name, "skipped ssh key creation, already created");
            return Ok(());
        }

        // Keep the key material stable across retries of the upload.
        if self.state.ssh_key_pair.public_key.is_empty() {
            self.state.ssh_key_pair = ssh::generate_key_pair()?;
            persist(&mut self.state, storage).await?;
        }

        let id = self
            .backend
            .upload_ssh_key(name, &self.state.ssh_key_pair.public_key)
            .await?;
        let user = self.backend.ssh_user().to_string();

        let base = &mut infra_mut::<B::Network>(&mut self.state)?.base;
        base.ssh_id = id.clone();
        base.ssh_key_name = name.to_string();
        base.ssh_user = user;
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, key = %name, %id, "uploaded ssh key");
        Ok(())
    }

    async fn del_ssh_key_pair(&mut self, storage: &dyn StorageDriver) -> Result<()> {
        let id = infra::<B::Network>(&self.state)?.base.ssh_id.clone();
        if id.is_empty() {
            info!(parent: &self.span, "skipped ssh key deletion, not found");
            return Ok(());
        }

        self.backend.delete_ssh_key(&id).await?;

        let base = &mut infra_mut::<B::Network>(&mut self.state)?.base;
        base.ssh_id.clear();
        base.ssh_key_name.clear();
        base.ssh_user.clear();
        self.state.ssh_key_pair = Default::default();
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, %id, "deleted ssh key");
        Ok(())
    }

    async fn new_firewall(
        &mut self,
        storage: &dyn StorageDriver,
        request: &ResourceRequest,
    ) -> Result<()> {
        request.validate()?;
        let role = request.role;
        let infra = infra::<B::Network>(&self.state)?;
        if !infra.firewall_id(role).is_empty() {
            info!(parent: &self.span, %role, firewall = %request.name, "skipped firewall creation, already created");
            return Ok(());
        }
        if infra.network.network_id().is_empty() {
            return Err(Error::missing_config(
                "the network must exist before firewalls are created",
            ));
        }

        let rules = firewall::rules_for(role, infra.network.cidr(), self.distro());
        let id = self
            .backend
            .create_firewall(FirewallRequest {
                name: &request.name,
                role,
                network: &infra.network,
                rules: &rules,
            })
            .await?;

        infra_mut::<B::Network>(&mut self.state)?.set_firewall(
            role,
            id.clone(),
            request.name.clone(),
        );
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, %role, firewall = %request.name, %id, "created firewall");
        Ok(())
    }

    async fn del_firewall(&mut self, storage: &dyn StorageDriver, role: Role) -> Result<()> {
        let id = infra::<B::Network>(&self.state)?.firewall_id(role).to_string();
        if id.is_empty() {
            info!(parent: &self.span, %role, "skipped firewall deletion, not found");
            return Ok(());
        }

        let backend = &self.backend;
        let target = id.as_str();
        self.waiter
            .retry("delete firewall", move || backend.delete_firewall(target))
            .await?;

        infra_mut::<B::Network>(&mut self.state)?.set_firewall(role, String::new(), String::new());
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, %role, %id, "deleted firewall");
        Ok(())
    }

    async fn new_vm(
        &mut self,
        storage: &dyn StorageDriver,
        request: &ResourceRequest,
        index: usize,
    ) -> Result<()> {
        request.validate()?;
        let role = request.role;
        let vm_size = request.vm_size.as_deref().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidCloudVmSize,
                format!("no vm size given for {}", request.name),
            )
        })?;

        let infra = infra::<B::Network>(&self.state)?;
        let slot = infra.vm(role, index).ok_or_else(|| out_of_range(role, index))?;
        if slot.is_ready() {
            info!(parent: &self.span, %role, index, vm = %request.name, "skipped vm creation, already created");
            return Ok(());
        }

        let vm_id = if slot.vm_id.is_empty() {
            self.validate_vm_size(vm_size).await?;
            if infra.network.network_id().is_empty() {
                return Err(Error::missing_config(
                    "the network must exist before vms are created",
                ));
            }

            let id = self
                .backend
                .create_vm(VmRequest {
                    name: &request.name,
                    role,
                    vm_size,
                    network: &infra.network,
                    firewall_id: infra.firewall_id(role),
                    ssh_key_id: &infra.base.ssh_id,
                    ssh_key_name: &infra.base.ssh_key_name,
                    ssh_user: &infra.base.ssh_user,
                    ssh_public_key: &self.state.ssh_key_pair.public_key,
                    public_ip: request.public_ip,
                })
                .await?;

            infra_mut::<B::Network>(&mut self.state)?.set_vm(
                role,
                index,
                VmSlot {
                    name: request.name.clone(),
                    vm_id: id.clone(),
                    vm_size: vm_size.to_string(),
                    ..Default::default()
                },
            );
            persist(&mut self.state, storage).await?;
            info!(parent: &self.span, %role, index, vm = %request.name, %id, "requested vm");
            id
        } else {
            info!(parent: &self.span, %role, index, vm = %request.name, "vm exists without addresses, resuming watch");
            slot.vm_id
        };

        let backend = &self.backend;
        let target = vm_id.as_str();
        let instance = self
            .readiness
            .until("wait for vm", move || async move {
                let vm = backend.get_vm(target).await?;
                Ok(vm.ready.then_some(vm))
            })
            .await?;

        let infra = infra_mut::<B::Network>(&mut self.state)?;
        let mut slot = infra.vm(role, index).unwrap_or_default();
        if slot.name.is_empty() {
            slot.name = request.name.clone();
        }
        if slot.vm_size.is_empty() {
            slot.vm_size = vm_size.to_string();
        }
        slot.vm_id = vm_id.clone();
        slot.hostname = instance.hostname;
        slot.public_ip = instance.public_ip;
        slot.private_ip = instance.private_ip;
        slot.network_interface_id = instance.network_interface_id;
        infra.set_vm(role, index, slot);

        if completes_cluster(infra, role, index) && infra.all_vms_ready() {
            infra.base.is_completed = true;
            info!(parent: &self.span, cluster = %self.meta.cluster_name, "all vms are running");
        }
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, %role, index, vm = %request.name, id = %vm_id, "vm is running");
        Ok(())
    }

    async fn del_vm(
        &mut self,
        storage: &dyn StorageDriver,
        role: Role,
        index: usize,
    ) -> Result<()> {
        let slot = infra::<B::Network>(&self.state)?
            .vm(role, index)
            .ok_or_else(|| out_of_range(role, index))?;
        if slot.vm_id.is_empty() {
            info!(parent: &self.span, %role, index, "skipped vm deletion, not found");
            return Ok(());
        }

        self.backend.delete_vm(&slot.vm_id).await?;

        infra_mut::<B::Network>(&mut self.state)?.set_vm(role, index, VmSlot::default());
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, %role, index, vm = %slot.name, id = %slot.vm_id, "deleted vm");
        Ok(())
    }

    async fn new_managed_cluster(
        &mut self,
        storage: &dyn StorageDriver,
        request: &ResourceRequest,
        no_of_nodes: usize,
    ) -> Result<()> {
        request.validate()?;
        if self.meta.cluster_type != ClusterType::Managed {
            return Err(Error::new(
                ErrorKind::InvalidClusterType,
                "managed cluster requested for an ha cluster",
            ));
        }
        if no_of_nodes == 0 {
            return Err(Error::new(
                ErrorKind::InvalidNoOfWorkerplane,
                "a managed cluster needs at least one node",
            ));
        }

        let infra = infra::<B::Network>(&self.state)?;
        let cluster_id = if infra.managed.cluster_id.is_empty() {
            let node_size = request.vm_size.as_deref().unwrap_or_default();
            self.validate_vm_size(node_size).await?;

            let id = self
                .backend
                .create_managed_cluster(ManagedClusterRequest {
                    name: &request.name,
                    node_size,
                    node_count: no_of_nodes,
                    version: &self.meta.kubernetes_version,
                    network: &infra.network,
                    apps: &self.meta.apps,
                    cni: self.meta.cni.as_deref(),
                })
                .await?;

            infra_mut::<B::Network>(&mut self.state)?.managed = ManagedState {
                cluster_id: id.clone(),
                cluster_name: request.name.clone(),
                node_count: no_of_nodes,
                node_size: node_size.to_string(),
            };
            persist(&mut self.state, storage).await?;
            info!(parent: &self.span, cluster = %request.name, %id, "requested managed cluster");
            id
        } else if infra.base.is_completed {
            info!(parent: &self.span, cluster = %request.name, "skipped managed cluster creation, already created");
            return Ok(());
        } else {
            info!(parent: &self.span, cluster = %request.name, "managed cluster not ready yet, resuming watch");
            infra.managed.cluster_id.clone()
        };

        let backend = &self.backend;
        let target = cluster_id.as_str();
        let status = self
            .readiness
            .until("wait for managed cluster", move || async move {
                let status = backend.get_managed_cluster(target).await?;
                Ok(status.ready.then_some(status))
            })
            .await?;

        self.state.cluster_kubeconfig = status.kubeconfig.unwrap_or_default();
        infra_mut::<B::Network>(&mut self.state)?.base.is_completed = true;
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, cluster = %request.name, id = %cluster_id, "managed cluster is ready");
        Ok(())
    }

    async fn del_managed_cluster(&mut self, storage: &dyn StorageDriver) -> Result<()> {
        let id = infra::<B::Network>(&self.state)?.managed.cluster_id.clone();
        if id.is_empty() {
            info!(parent: &self.span, "skipped managed cluster deletion, not found");
            return Ok(());
        }

        self.backend.delete_managed_cluster(&id).await?;

        infra_mut::<B::Network>(&mut self.state)?.managed.clear();
        self.state.cluster_kubeconfig.clear();
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, %id, "deleted managed cluster");
        Ok(())
    }

    fn no_of_control_plane(&mut self, desired: usize, is_setter: bool) -> Result<usize> {
        self.fixed_count(Role::ControlPlane, desired, is_setter)
    }

    async fn no_of_worker_plane(
        &mut self,
        storage: &dyn StorageDriver,
        desired: usize,
        is_setter: bool,
    ) -> Result<usize> {
        let workers = &mut infra_mut::<B::Network>(&mut self.state)?.worker_planes;
        let current = workers.len();
        if !is_setter || current == desired {
            return Ok(current);
        }

        workers.resize(desired);
        persist(&mut self.state, storage).await?;

        info!(parent: &self.span, from = current, to = desired, "resized worker pool");
        Ok(desired)
    }

    fn no_of_data_store(&mut self, desired: usize, is_setter: bool) -> Result<usize> {
        self.fixed_count(Role::DataStore, desired, is_setter)
    }

    fn worker_hostnames(&self) -> Result<Vec<String>> {
        Ok(infra::<B::Network>(&self.state)?
            .worker_planes
            .hostnames
            .clone())
    }

    fn ha_cluster_state(&self) -> Result<CloudResourceState> {
        if self.meta.cluster_type != ClusterType::Ha {
            return Err(Error::new(
                ErrorKind::InvalidClusterType,
                "node addresses exist only for ha clusters",
            ));
        }
        let infra = infra::<B::Network>(&self.state)?;
        Ok(CloudResourceState {
            cloud: self.backend.cloud(),
            cluster_type: self.meta.cluster_type,
            cluster_name: self.meta.cluster_name.clone(),
            region: self.meta.region.clone(),
            distro: infra.base.kubernetes_distro,
            ssh_user: infra.base.ssh_user.clone(),
            ssh_private_key: self.state.ssh_key_pair.private_key.clone(),
            control_planes: addresses(&infra.control_planes),
            worker_planes: addresses(&infra.worker_planes),
            data_stores: addresses(&infra.data_stores),
            load_balancer_public_ip: infra.load_balancer.vm.public_ip.clone(),
            load_balancer_private_ip: infra.load_balancer.vm.private_ip.clone(),
        })
    }

    async fn is_present(&self, storage: &mut dyn StorageDriver) -> Result<()> {
        storage
            .already_created(
                self.backend.cloud(),
                &self.meta.region,
                &self.meta.cluster_name,
                self.meta.cluster_type,
            )
            .await
    }
}

fn infra<N: NetworkState>(state: &StorageDocument) -> Result<&CloudInfra<N>> {
    state
        .cloud_infra
        .as_ref()
        .and_then(N::select)
        .ok_or_else(not_initialised)
}

fn infra_mut<N: NetworkState>(state: &mut StorageDocument) -> Result<&mut CloudInfra<N>> {
    state
        .cloud_infra
        .as_mut()
        .and_then(|all| N::select_mut(all).as_mut())
        .ok_or_else(not_initialised)
}

fn role_set_mut<N>(infra: &mut CloudInfra<N>, role: Role) -> Result<&mut VmSet> {
    infra.vm_set_mut(role).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidRole,
            format!("{role} has a single vm and no replica count"),
        )
    })
}

async fn persist(state: &mut StorageDocument, storage: &dyn StorageDriver) -> Result<()> {
    state.updated_at = Some(Utc::now());
    storage.write(state).await
}

fn not_initialised() -> Error {
    Error::internal("cluster state is not initialised; call init_state first")
}

fn out_of_range(role: Role, index: usize) -> Error {
    Error::new(
        role.count_error_kind(),
        format!("{role} index {index} is out of range"),
    )
}

/// The VM whose readiness completes the cluster: the last worker, or the
/// last control plane when there are no workers
fn completes_cluster<N>(infra: &CloudInfra<N>, role: Role, index: usize) -> bool {
    let workers = infra.worker_planes.len();
    match role {
        Role::WorkerPlane => index + 1 == workers,
        Role::ControlPlane => workers == 0 && index + 1 == infra.control_planes.len(),
        _ => false,
    }
}

fn addresses(set: &VmSet) -> NodeAddresses {
    NodeAddresses {
        hostnames: set.hostnames.clone(),
        public_ips: set.public_ips.clone(),
        private_ips: set.private_ips.clone(),
    }
}

/// `1.30` matches `1.30`, `1.30.2` and `1.30.2-k3s1`
fn version_matches(offered: &str, wanted: &str) -> bool {
    offered == wanted
        || offered
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('-'))
}
