//! [`CloudBackend`] over the Civo API

use crate::api::{
    ApiFirewallRule, ApiInstance, CivoApi, CreateFirewallRequest, CreateInstanceRequest,
    CreateKubernetesClusterRequest,
};
use crate::error::CivoError;
use async_trait::async_trait;
use kubeforge_cloud::{
    CloudBackend, Direction, FirewallRequest, FirewallRule, ManagedClusterRequest,
    ManagedClusterStatus, Protocol, VmInstance, VmRequest,
};
use kubeforge_core::{
    CivoNetwork, Cloud, ClusterType, CredentialsDocument, KubernetesDistro, Result,
};
use tracing::{Span, debug, info};

pub const TOKEN_ENV: &str = "CIVO_TOKEN";
pub const DISK_IMAGE: &str = "ubuntu-jammy";
const DEFAULT_CIDR: &str = "192.168.1.0/24";
const INSTANCE_ACTIVE: &str = "ACTIVE";

pub struct CivoBackend {
    api: Option<CivoApi>,
    base_url: Option<String>,
    span: Span,
}

impl CivoBackend {
    pub fn new(span: Span) -> Self {
        Self {
            api: None,
            base_url: None,
            span,
        }
    }

    /// API root used on the next `connect`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn api(&self) -> std::result::Result<&CivoApi, CivoError> {
        self.api.as_ref().ok_or(CivoError::NotConnected)
    }
}

/// `CIVO_TOKEN` wins over the stored credentials
pub fn resolve_token(stored: Option<&CredentialsDocument>) -> std::result::Result<String, CivoError> {
    if let Ok(token) = std::env::var(TOKEN_ENV)
        && !token.trim().is_empty()
    {
        return Ok(token);
    }
    stored
        .and_then(|creds| creds.civo.as_ref())
        .map(|civo| civo.token.clone())
        .filter(|token| !token.trim().is_empty())
        .ok_or(CivoError::MissingToken)
}

/// Civo firewall rules have no "all protocols" value, so those expand to
/// one tcp and one udp rule
pub fn to_api_rules(rules: &[FirewallRule]) -> Vec<ApiFirewallRule> {
    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        let direction = match rule.direction {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        };
        let protocols: &[Protocol] = match rule.protocol {
            Protocol::All => &[Protocol::Tcp, Protocol::Udp],
            Protocol::Tcp => &[Protocol::Tcp],
            Protocol::Udp => &[Protocol::Udp],
        };
        let (start, end) = match rule.protocol {
            Protocol::All => (1, 65535),
            _ => (rule.start_port, rule.end_port),
        };
        for protocol in protocols {
            out.push(ApiFirewallRule {
                protocol: protocol.as_str().to_string(),
                start_port: start.to_string(),
                end_port: end.to_string(),
                cidr: vec![rule.cidr.clone()],
                direction: direction.to_string(),
                label: rule.description.clone(),
                action: "allow".to_string(),
            });
        }
    }
    out
}

fn to_vm_instance(instance: ApiInstance) -> VmInstance {
    let ready = instance.status == INSTANCE_ACTIVE && !instance.private_ip.is_empty();
    VmInstance {
        vm_id: instance.id,
        hostname: instance.hostname,
        public_ip: instance.public_ip,
        private_ip: instance.private_ip,
        network_interface_id: String::new(),
        ready,
    }
}

/// Deleting something already gone counts as done
fn ignore_not_found(result: std::result::Result<(), CivoError>) -> Result<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => Ok(other?),
    }
}

#[async_trait]
impl CloudBackend for CivoBackend {
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

    async fn connect(&mut self, region: &str, stored: Option<CredentialsDocument>) -> Result<()> {
        let token = resolve_token(stored.as_ref())?;
        let mut api = CivoApi::new(token, region);
        if let Some(base_url) = &self.base_url {
            api = api.with_base_url(base_url.clone());
        }
        self.api = Some(api);
        debug!(parent: &self.span, %region, "civo client ready");
        Ok(())
    }

    async fn regions(&self) -> Result<Option<Vec<String>>> {
        let regions = self.api()?.list_regions().await?;
        Ok(Some(regions.into_iter().map(|r| r.code).collect()))
    }

    async fn vm_sizes(&self) -> Result<Option<Vec<String>>> {
        let sizes = self.api()?.list_sizes().await?;
        Ok(Some(
            sizes
                .into_iter()
                .filter(|s| s.selectable != Some(false))
                .map(|s| s.name)
                .collect(),
        ))
    }

    async fn versions(&self, cluster_type: ClusterType) -> Result<Option<Vec<String>>> {
        // HA clusters install k3s themselves; any release is allowed.
        if cluster_type == ClusterType::Ha {
            return Ok(None);
        }
        let versions = self.api()?.list_kubernetes_versions().await?;
        Ok(Some(
            versions
                .into_iter()
                .filter(|v| v.kind != "deprecated")
                .map(|v| v.version)
                .collect(),
        ))
    }

    async fn create_network(&self, name: &str) -> Result<CivoNetwork> {
        let api = self.api()?;
        let created = api.create_network(name).await?;
        let network = api.get_network(&created.id).await?;
        let cidr = if network.cidr.is_empty() {
            DEFAULT_CIDR.to_string()
        } else {
            network.cidr
        };

        info!(parent: &self.span, network = %name, id = %created.id, %cidr, "civo network created");
        Ok(CivoNetwork {
            network_id: created.id,
            network_name: name.to_string(),
            cidr,
        })
    }

    async fn delete_network(&self, network: &CivoNetwork) -> Result<()> {
        ignore_not_found(self.api()?.delete_network(&network.network_id).await)
    }

    async fn upload_ssh_key(&self, name: &str, public_key: &str) -> Result<String> {
        let created = self
            .api()?
            .create_ssh_key(&name.to_lowercase(), public_key)
            .await?;
        Ok(created.id)
    }

    async fn delete_ssh_key(&self, id: &str) -> Result<()> {
        ignore_not_found(self.api()?.delete_ssh_key(id).await)
    }

    async fn create_firewall(&self, req: FirewallRequest<'_, CivoNetwork>) -> Result<String> {
        let api = self.api()?;
        let body = CreateFirewallRequest {
            name: req.name,
            network_id: &req.network.network_id,
            region: api.region(),
            create_rules: false,
            rules: to_api_rules(req.rules),
        };
        Ok(api.create_firewall(&body).await?.id)
    }

    async fn delete_firewall(&self, id: &str) -> Result<()> {
        ignore_not_found(self.api()?.delete_firewall(id).await)
    }

    async fn create_vm(&self, req: VmRequest<'_, CivoNetwork>) -> Result<String> {
        let api = self.api()?;
        let image = api.find_disk_image(DISK_IMAGE).await?;
        let initial_user = if req.ssh_user.is_empty() {
            self.ssh_user()
        } else {
            req.ssh_user
        };

        let body = CreateInstanceRequest {
            hostname: req.name,
            size: req.vm_size,
            region: api.region(),
            network_id: &req.network.network_id,
            template_id: &image.id,
            initial_user,
            sshkey_id: req.ssh_key_id,
            firewall_id: req.firewall_id,
            public_ip: if req.public_ip { "create" } else { "none" },
            count: 1,
        };
        let instance = api.create_instance(&body).await?;
        debug!(parent: &self.span, vm = %req.name, id = %instance.id, "civo instance requested");
        Ok(instance.id)
    }

    async fn get_vm(&self, id: &str) -> Result<VmInstance> {
        let instance = self.api()?.get_instance(id).await?;
        Ok(to_vm_instance(instance))
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        ignore_not_found(self.api()?.delete_instance(id).await)
    }

    async fn create_managed_cluster(
        &self,
        req: ManagedClusterRequest<'_, CivoNetwork>,
    ) -> Result<String> {
        let api = self.api()?;
        let body = CreateKubernetesClusterRequest {
            name: req.name,
            region: api.region(),
            network_id: &req.network.network_id,
            num_target_nodes: req.node_count,
            target_nodes_size: req.node_size,
            kubernetes_version: req.version,
            applications: req.apps.join(","),
            cni_plugin: req.cni,
        };
        Ok(api.create_kubernetes_cluster(&body).await?.id)
    }

    async fn get_managed_cluster(&self, id: &str) -> Result<ManagedClusterStatus> {
        let cluster = self.api()?.get_kubernetes_cluster(id).await?;
        Ok(ManagedClusterStatus {
            cluster_id: cluster.id,
            status: cluster.status,
            ready: cluster.ready,
            kubeconfig: cluster.kubeconfig.filter(|_| cluster.ready),
        })
    }

    async fn delete_managed_cluster(&self, id: &str) -> Result<()> {
        ignore_not_found(self.api()?.delete_kubernetes_cluster(id).await)
    }
}
