//! In-memory backend for orchestration tests
//!
//! Records every mutating call so tests can assert that repeated or resumed
//! sequences do not touch the cloud again.

use crate::backend::{
    CloudBackend, FirewallRequest, ManagedClusterRequest, ManagedClusterStatus, VmInstance,
    VmRequest,
};
use async_trait::async_trait;
use kubeforge_core::{
    CivoNetwork, Cloud, ClusterType, CredentialsDocument, Error, KubernetesDistro, Result,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const MOCK_REGIONS: [&str; 3] = ["LON1", "NYC1", "FRA1"];
pub const MOCK_SIZES: [&str; 3] = ["g3.small", "g3.medium", "g4s.kube.small"];
pub const MOCK_VERSIONS: [&str; 2] = ["1.30.2-k3s1", "1.29.8-k3s1"];

#[derive(Debug, Default)]
struct MockState {
    next_id: usize,
    calls: Vec<String>,
    failures: HashMap<String, usize>,
    vms: HashMap<String, VmInstance>,
    clusters: HashMap<String, usize>,
    not_ready_polls: usize,
    pending_polls: HashMap<String, usize>,
    connected: bool,
}

/// Cloned handles share state, so a test can keep one after moving the
/// backend into a provider
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every mutating call, in order, as `"<operation> <target>"`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Calls whose operation equals `operation`
    pub fn calls_to(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    /// Makes the next `times` calls of `operation` fail
    pub fn fail_next(&self, operation: &str, times: usize) {
        self.lock().failures.insert(operation.to_string(), times);
    }

    /// Makes each new VM or managed cluster report "not ready" this many times
    pub fn not_ready_polls(&self, polls: usize) {
        self.lock().not_ready_polls = polls;
    }

    pub fn live_vms(&self) -> usize {
        self.lock().vms.len()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn record(&self, operation: &str, target: &str) -> Result<String> {
        let mut state = self.lock();
        if let Some(remaining) = state.failures.get_mut(operation)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(Error::operation_failed(format!(
                "injected failure: {operation} {target}"
            )));
        }
        state.calls.push(format!("{operation} {target}"));
        state.next_id += 1;
        Ok(format!("{operation}-{}", state.next_id))
    }

    fn poll_ready(&self, id: &str) -> bool {
        let mut state = self.lock();
        let remaining = state.pending_polls.entry(id.to_string()).or_insert(0);
        if *remaining == 0 {
            true
        } else {
            *remaining -= 1;
            false
        }
    }
}

#[async_trait]
impl CloudBackend for MockBackend {
    type Network = CivoNetwork;

    fn cloud(&self) -> Cloud {
        Cloud::Civo
    }

    fn supports(&self, _cluster_type: ClusterType) -> bool {
        true
    }

    fn default_distro(&self, cluster_type: ClusterType) -> KubernetesDistro {
        match cluster_type {
            ClusterType::Ha => KubernetesDistro::K3s,
            ClusterType::Managed => KubernetesDistro::Managed,
        }
    }

    async fn connect(&mut self, _region: &str, _stored: Option<CredentialsDocument>) -> Result<()> {
        self.lock().connected = true;
        Ok(())
    }

    async fn regions(&self) -> Result<Option<Vec<String>>> {
        Ok(Some(MOCK_REGIONS.iter().map(|s| s.to_string()).collect()))
    }

    async fn vm_sizes(&self) -> Result<Option<Vec<String>>> {
        Ok(Some(MOCK_SIZES.iter().map(|s| s.to_string()).collect()))
    }

    async fn versions(&self, _cluster_type: ClusterType) -> Result<Option<Vec<String>>> {
        Ok(Some(MOCK_VERSIONS.iter().map(|s| s.to_string()).collect()))
    }

    async fn create_network(&self, name: &str) -> Result<CivoNetwork> {
        let id = self.record("create_network", name)?;
        Ok(CivoNetwork {
            network_id: id,
            network_name: name.to_string(),
            cidr: "192.168.1.0/24".to_string(),
        })
    }

    async fn delete_network(&self, network: &CivoNetwork) -> Result<()> {
        self.record("delete_network", &network.network_id)?;
        Ok(())
    }

    async fn upload_ssh_key(&self, name: &str, _public_key: &str) -> Result<String> {
        self.record("upload_ssh_key", name)
    }

    async fn delete_ssh_key(&self, id: &str) -> Result<()> {
        self.record("delete_ssh_key", id)?;
        Ok(())
    }

    async fn create_firewall(&self, req: FirewallRequest<'_, CivoNetwork>) -> Result<String> {
        self.record("create_firewall", req.name)
    }

    async fn delete_firewall(&self, id: &str) -> Result<()> {
        self.record("delete_firewall", id)?;
        Ok(())
    }

    async fn create_vm(&self, req: VmRequest<'_, CivoNetwork>) -> Result<String> {
        let id = self.record("create_vm", req.name)?;
        let mut state = self.lock();
        let n = state.vms.len() + 1;
        let polls = state.not_ready_polls;
        state.pending_polls.insert(id.clone(), polls);
        state.vms.insert(
            id.clone(),
            VmInstance {
                vm_id: id.clone(),
                hostname: req.name.to_string(),
                public_ip: format!("203.0.113.{n}"),
                private_ip: format!("192.168.1.{n}"),
                network_interface_id: String::new(),
                ready: true,
            },
        );
        Ok(id)
    }

    async fn get_vm(&self, id: &str) -> Result<VmInstance> {
        let ready = self.poll_ready(id);
        let vm = self
            .lock()
            .vms
            .get(id)
            .cloned()
            .ok_or_else(|| Error::operation_failed(format!("vm {id} not found")))?;
        Ok(VmInstance { ready, ..vm })
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        self.record("delete_vm", id)?;
        self.lock().vms.remove(id);
        Ok(())
    }

    async fn create_managed_cluster(
        &self,
        req: ManagedClusterRequest<'_, CivoNetwork>,
    ) -> Result<String> {
        let id = self.record("create_managed_cluster", req.name)?;
        let mut state = self.lock();
        let polls = state.not_ready_polls;
        state.pending_polls.insert(id.clone(), polls);
        state.clusters.insert(id.clone(), req.node_count);
        Ok(id)
    }

    async fn get_managed_cluster(&self, id: &str) -> Result<ManagedClusterStatus> {
        let ready = self.poll_ready(id);
        if !self.lock().clusters.contains_key(id) {
            return Err(Error::operation_failed(format!("cluster {id} not found")));
        }
        Ok(ManagedClusterStatus {
            cluster_id: id.to_string(),
            status: if ready { "ACTIVE" } else { "BUILDING" }.to_string(),
            ready,
            kubeconfig: ready.then(|| format!("apiVersion: v1\n# {id}\n")),
        })
    }

    async fn delete_managed_cluster(&self, id: &str) -> Result<()> {
        self.record("delete_managed_cluster", id)?;
        self.lock().clusters.remove(id);
        Ok(())
    }
}
