//! [`CloudBackend`] over Azure Resource Manager
//!
//! A cluster's network is a resource group holding one virtual network with
//! a single subnet. Firewalls are network security groups attached to each
//! VM's network interface. Azure has no key pair resource, so the public key
//! travels inline with every VM.

use crate::arm::{
    ARM_BASE, ArmApi, ArmKubernetesVersions, ArmNetworkInterface, ArmPublicIp, ArmResource,
    ArmVirtualMachine, COMPUTE_API, CONTAINER_API, LOGIN_BASE, MANAGED_CLUSTERS, NETWORK_API,
    NETWORK_INTERFACES, PUBLIC_IPS, RESOURCES_API, SECURITY_GROUPS, VIRTUAL_MACHINES,
    VIRTUAL_NETWORKS, split_resource_id,
};
use crate::error::AzureError;
use async_trait::async_trait;
use kubeforge_cloud::{
    CloudBackend, Direction, FirewallRequest, FirewallRule, ManagedClusterRequest,
    ManagedClusterStatus, Protocol, VmInstance, VmRequest,
};
use kubeforge_core::{
    AzureCredentials, AzureNetwork, Cloud, ClusterType, CredentialsDocument, KubernetesDistro,
    Result, RetryConfig, Waiter,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, warn};

pub const SUBSCRIPTION_ENV: &str = "AZURE_SUBSCRIPTION_ID";
pub const TENANT_ENV: &str = "AZURE_TENANT_ID";
pub const CLIENT_ID_ENV: &str = "AZURE_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "AZURE_CLIENT_SECRET";

pub const VNET_CIDR: &str = "10.1.0.0/16";
const SSH_USER: &str = "azureuser";
const FIRST_RULE_PRIORITY: usize = 100;
const SUCCEEDED: &str = "Succeeded";

pub struct AzureBackend {
    arm: Option<ArmApi>,
    base_urls: Option<(String, String)>,
    /// Waits for ARM deployments to settle
    provisioning: Waiter,
    span: Span,
}

impl AzureBackend {
    pub fn new(cancel: CancellationToken, span: Span) -> Self {
        Self {
            arm: None,
            base_urls: None,
            provisioning: Waiter::new(RetryConfig::readiness(), cancel, span.clone()),
            span,
        }
    }

    /// Management and login roots used on the next `connect`
    pub fn with_base_urls(
        mut self,
        arm_base: impl Into<String>,
        login_base: impl Into<String>,
    ) -> Self {
        self.base_urls = Some((arm_base.into(), login_base.into()));
        self
    }

    fn arm(&self) -> std::result::Result<&ArmApi, AzureError> {
        self.arm.as_ref().ok_or(AzureError::NotConnected)
    }

    /// Polls `id` until its deployment reaches `Succeeded`
    async fn provisioned(&self, operation: &str, id: &str, api_version: &str) -> Result<()> {
        let arm = self.arm()?;
        self.provisioning
            .until(operation, move || async move {
                let resource: ArmResource = arm.get(id, api_version).await?;
                let done = provisioning_done(id, &resource.properties.provisioning_state)?;
                Ok(done.then_some(()))
            })
            .await
    }

    /// Deletes `id` and polls until ARM no longer knows it
    async fn delete_and_wait(&self, operation: &str, id: &str, api_version: &str) -> Result<()> {
        let arm = self.arm()?;
        if let Err(err) = arm.delete(id, api_version).await {
            if err.is_not_found() {
                return Ok(());
            }
            return Err(err.into());
        }
        self.provisioning
            .until(operation, move || async move {
                match arm.get::<ArmResource>(id, api_version).await {
                    Ok(_) => Ok(None),
                    Err(err) if err.is_not_found() => Ok(Some(())),
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }
}

/// Environment variables win over stored credentials; all four must be set
pub fn resolve_credentials(
    stored: Option<&CredentialsDocument>,
) -> std::result::Result<AzureCredentials, AzureError> {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    if let (Some(subscription_id), Some(tenant_id), Some(client_id), Some(client_secret)) = (
        var(SUBSCRIPTION_ENV),
        var(TENANT_ENV),
        var(CLIENT_ID_ENV),
        var(CLIENT_SECRET_ENV),
    ) {
        return Ok(AzureCredentials {
            subscription_id,
            tenant_id,
            client_id,
            client_secret,
        });
    }
    stored
        .and_then(|creds| creds.azure.clone())
        .filter(|azure| {
            [
                &azure.subscription_id,
                &azure.tenant_id,
                &azure.client_id,
                &azure.client_secret,
            ]
            .iter()
            .all(|field| !field.trim().is_empty())
        })
        .ok_or(AzureError::MissingCredentials)
}

/// `Ok(true)` once a deployment succeeded; terminal failures are errors
pub fn provisioning_done(resource: &str, state: &str) -> std::result::Result<bool, AzureError> {
    match state {
        SUCCEEDED => Ok(true),
        "Failed" | "Canceled" => Err(AzureError::ProvisioningFailed {
            resource: resource.to_string(),
            state: state.to_string(),
        }),
        _ => Ok(false),
    }
}

fn rule_name(description: &str, priority: usize) -> String {
    let slug: String = description
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{slug}-{priority}")
}

/// Network security group rules, one per firewall rule, in priority order
pub fn to_security_rules(rules: &[FirewallRule]) -> Vec<Value> {
    rules
        .iter()
        .enumerate()
        .map(|(i, rule)| {
            let priority = FIRST_RULE_PRIORITY + i;
            let protocol = match rule.protocol {
                Protocol::Tcp => "Tcp",
                Protocol::Udp => "Udp",
                Protocol::All => "*",
            };
            let ports = match rule.protocol {
                Protocol::All => "*".to_string(),
                _ if rule.start_port == rule.end_port => rule.start_port.to_string(),
                _ => format!("{}-{}", rule.start_port, rule.end_port),
            };
            let (direction, source, destination) = match rule.direction {
                Direction::Ingress => ("Inbound", rule.cidr.as_str(), "*"),
                Direction::Egress => ("Outbound", "*", rule.cidr.as_str()),
            };
            json!({
                "name": rule_name(&rule.description, priority),
                "properties": {
                    "description": rule.description,
                    "priority": priority,
                    "protocol": protocol,
                    "access": "Allow",
                    "direction": direction,
                    "sourcePortRange": "*",
                    "destinationPortRange": ports,
                    "sourceAddressPrefix": source,
                    "destinationAddressPrefix": destination,
                }
            })
        })
        .collect()
}

/// VM body: Ubuntu 22.04, key-only login, disk removed with the VM
pub fn vm_body(
    location: &str,
    req: &VmRequest<'_, AzureNetwork>,
    nic_id: &str,
    user: &str,
) -> Value {
    json!({
        "location": location,
        "properties": {
            "hardwareProfile": { "vmSize": req.vm_size },
            "storageProfile": {
                "imageReference": {
                    "publisher": "Canonical",
                    "offer": "0001-com-ubuntu-server-jammy",
                    "sku": "22_04-lts-gen2",
                    "version": "latest",
                },
                "osDisk": {
                    "name": format!("{}-disk", req.name),
                    "createOption": "FromImage",
                    "deleteOption": "Delete",
                    "managedDisk": { "storageAccountType": "Standard_LRS" },
                },
            },
            "osProfile": {
                "computerName": req.name,
                "adminUsername": user,
                "linuxConfiguration": {
                    "disablePasswordAuthentication": true,
                    "ssh": {
                        "publicKeys": [{
                            "path": format!("/home/{user}/.ssh/authorized_keys"),
                            "keyData": req.ssh_public_key,
                        }]
                    },
                },
            },
            "networkProfile": {
                "networkInterfaces": [{ "id": nic_id, "properties": { "primary": true } }]
            },
        }
    })
}

fn nic_body(location: &str, subnet_id: &str, nsg_id: &str, public_ip_id: Option<&str>) -> Value {
    let mut ip_config = json!({
        "subnet": { "id": subnet_id },
        "privateIPAllocationMethod": "Dynamic",
    });
    if let Some(id) = public_ip_id {
        ip_config["publicIPAddress"] = json!({ "id": id });
    }
    json!({
        "location": location,
        "properties": {
            "networkSecurityGroup": { "id": nsg_id },
            "ipConfigurations": [{ "name": "ipconfig1", "properties": ip_config }],
        }
    })
}

pub fn managed_cluster_body(
    location: &str,
    creds: &AzureCredentials,
    req: &ManagedClusterRequest<'_, AzureNetwork>,
) -> Value {
    json!({
        "location": location,
        "properties": {
            "dnsPrefix": req.name,
            "kubernetesVersion": req.version,
            "agentPoolProfiles": [{
                "name": "nodepool1",
                "count": req.node_count,
                "vmSize": req.node_size,
                "mode": "System",
                "osType": "Linux",
                "type": "VirtualMachineScaleSets",
                "vnetSubnetID": req.network.subnet_id,
            }],
            "servicePrincipalProfile": {
                "clientId": creds.client_id,
                "secret": creds.client_secret,
            },
            "networkProfile": { "networkPlugin": req.cni.unwrap_or("azure") },
        }
    })
}

/// AKS accepts both minor versions and their patch releases
fn offered_versions(versions: ArmKubernetesVersions) -> Vec<String> {
    let mut out = Vec::new();
    for version in versions.values.into_iter().filter(|v| !v.is_preview) {
        out.extend(version.patch_versions.into_keys());
        out.push(version.version);
    }
    out
}

fn to_vm_instance(
    vm: ArmVirtualMachine,
    nic_id: String,
    private_ip: String,
    public_ip: String,
) -> VmInstance {
    let ready = vm.properties.provisioning_state == SUCCEEDED && !private_ip.is_empty();
    let hostname = vm
        .properties
        .os_profile
        .map(|os| os.computer_name)
        .filter(|name| !name.is_empty())
        .unwrap_or(vm.name);
    VmInstance {
        vm_id: vm.id,
        hostname,
        public_ip,
        private_ip,
        network_interface_id: nic_id,
        ready,
    }
}

#[async_trait]
impl CloudBackend for AzureBackend {
    type Network = AzureNetwork;

    fn cloud(&self) -> Cloud {
        Cloud::Azure
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

    fn ssh_user(&self) -> &str {
        SSH_USER
    }

    async fn connect(&mut self, region: &str, stored: Option<CredentialsDocument>) -> Result<()> {
        let creds = resolve_credentials(stored.as_ref())?;
        let (arm_base, login_base) = self
            .base_urls
            .clone()
            .unwrap_or_else(|| (ARM_BASE.to_string(), LOGIN_BASE.to_string()));
        self.arm = Some(ArmApi::new(creds, region).with_base_urls(&arm_base, &login_base));
        debug!(parent: &self.span, %region, "azure client ready");
        Ok(())
    }

    async fn regions(&self) -> Result<Option<Vec<String>>> {
        Ok(Some(self.arm()?.list_locations().await?))
    }

    async fn vm_sizes(&self) -> Result<Option<Vec<String>>> {
        Ok(Some(self.arm()?.list_vm_sizes().await?))
    }

    async fn versions(&self, cluster_type: ClusterType) -> Result<Option<Vec<String>>> {
        if cluster_type == ClusterType::Ha {
            return Ok(None);
        }
        let versions = self.arm()?.list_kubernetes_versions().await?;
        Ok(Some(offered_versions(versions)))
    }

    async fn create_network(&self, name: &str) -> Result<AzureNetwork> {
        let arm = self.arm()?;
        let resource_group = format!("{name}-rg");
        arm.create_resource_group(&resource_group).await?;

        let subnet_name = format!("{name}-subnet");
        let vnet_id = arm.resource_id(&resource_group, VIRTUAL_NETWORKS, name);
        let body = json!({
            "location": arm.location(),
            "properties": {
                "addressSpace": { "addressPrefixes": [VNET_CIDR] },
                "subnets": [{ "name": subnet_name, "properties": { "addressPrefix": VNET_CIDR } }],
            }
        });
        arm.put(&vnet_id, NETWORK_API, &body).await?;
        self.provisioned("wait for virtual network", &vnet_id, NETWORK_API)
            .await?;

        info!(parent: &self.span, %resource_group, vnet = %name, cidr = VNET_CIDR, "azure network ready");
        Ok(AzureNetwork {
            subnet_id: format!("{vnet_id}/subnets/{subnet_name}"),
            resource_group,
            virtual_network_id: vnet_id,
            virtual_network_name: name.to_string(),
            subnet_name,
            cidr: VNET_CIDR.to_string(),
        })
    }

    async fn delete_network(&self, network: &AzureNetwork) -> Result<()> {
        if network.resource_group.is_empty() {
            return Ok(());
        }
        let id = self.arm()?.resource_group_id(&network.resource_group);
        self.delete_and_wait("wait for resource group deletion", &id, RESOURCES_API)
            .await
    }

    async fn upload_ssh_key(&self, name: &str, _public_key: &str) -> Result<String> {
        debug!(parent: &self.span, key = %name, "azure takes ssh keys inline, nothing to upload");
        Ok(name.to_string())
    }

    async fn delete_ssh_key(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn create_firewall(&self, req: FirewallRequest<'_, AzureNetwork>) -> Result<String> {
        let arm = self.arm()?;
        let id = arm.resource_id(&req.network.resource_group, SECURITY_GROUPS, req.name);
        let body = json!({
            "location": arm.location(),
            "properties": { "securityRules": to_security_rules(req.rules) },
        });
        arm.put(&id, NETWORK_API, &body).await?;
        self.provisioned("wait for network security group", &id, NETWORK_API)
            .await?;
        Ok(id)
    }

    async fn delete_firewall(&self, id: &str) -> Result<()> {
        self.delete_and_wait("wait for network security group deletion", id, NETWORK_API)
            .await
    }

    async fn create_vm(&self, req: VmRequest<'_, AzureNetwork>) -> Result<String> {
        let arm = self.arm()?;
        let group = &req.network.resource_group;

        let public_ip_id = if req.public_ip {
            let id = arm.resource_id(group, PUBLIC_IPS, &format!("{}-pip", req.name));
            let body = json!({
                "location": arm.location(),
                "sku": { "name": "Standard" },
                "properties": { "publicIPAllocationMethod": "Static" },
            });
            arm.put(&id, NETWORK_API, &body).await?;
            self.provisioned("wait for public ip", &id, NETWORK_API).await?;
            Some(id)
        } else {
            None
        };

        let nic_id = arm.resource_id(group, NETWORK_INTERFACES, &format!("{}-nic", req.name));
        let body = nic_body(
            arm.location(),
            &req.network.subnet_id,
            req.firewall_id,
            public_ip_id.as_deref(),
        );
        arm.put(&nic_id, NETWORK_API, &body).await?;
        self.provisioned("wait for network interface", &nic_id, NETWORK_API)
            .await?;

        let user = if req.ssh_user.is_empty() {
            self.ssh_user()
        } else {
            req.ssh_user
        };
        let vm_id = arm.resource_id(group, VIRTUAL_MACHINES, req.name);
        arm.put(&vm_id, COMPUTE_API, &vm_body(arm.location(), &req, &nic_id, user))
            .await?;
        debug!(parent: &self.span, vm = %req.name, id = %vm_id, "azure vm requested");
        Ok(vm_id)
    }

    async fn get_vm(&self, id: &str) -> Result<VmInstance> {
        let arm = self.arm()?;
        let vm: ArmVirtualMachine = arm.get(id, COMPUTE_API).await?;
        provisioning_done(id, &vm.properties.provisioning_state)?;

        let nic_id = vm
            .properties
            .network_profile
            .network_interfaces
            .first()
            .map(|nic| nic.id.clone())
            .ok_or(AzureError::MissingField("networkInterfaces"))?;
        let nic: ArmNetworkInterface = arm.get(&nic_id, NETWORK_API).await?;
        let ip_config = nic
            .properties
            .ip_configurations
            .into_iter()
            .next()
            .map(|c| c.properties)
            .unwrap_or_default();

        let public_ip = match &ip_config.public_ip_address {
            Some(pip) => {
                let pip: ArmPublicIp = arm.get(&pip.id, NETWORK_API).await?;
                pip.properties.ip_address.unwrap_or_default()
            }
            None => String::new(),
        };
        let private_ip = ip_config.private_ip_address.unwrap_or_default();
        Ok(to_vm_instance(vm, nic_id, private_ip, public_ip))
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        let arm = self.arm()?;
        let (group_id, name) = split_resource_id(id)?;
        let nic_id = format!("{group_id}/providers/{NETWORK_INTERFACES}/{name}-nic");
        let public_ip_id = format!("{group_id}/providers/{PUBLIC_IPS}/{name}-pip");

        self.delete_and_wait("wait for vm deletion", id, COMPUTE_API)
            .await?;
        // The address stays attached until the interface is gone.
        self.delete_and_wait("wait for network interface deletion", &nic_id, NETWORK_API)
            .await?;
        if let Err(err) = arm.delete(&public_ip_id, NETWORK_API).await
            && !err.is_not_found()
        {
            return Err(err.into());
        }
        Ok(())
    }

    async fn create_managed_cluster(
        &self,
        req: ManagedClusterRequest<'_, AzureNetwork>,
    ) -> Result<String> {
        let arm = self.arm()?;
        if !req.apps.is_empty() {
            warn!(parent: &self.span, apps = ?req.apps, "AKS has no application marketplace, apps are ignored");
        }
        let id = arm.resource_id(&req.network.resource_group, MANAGED_CLUSTERS, req.name);
        let body = managed_cluster_body(arm.location(), arm.credentials(), &req);
        arm.put(&id, CONTAINER_API, &body).await?;
        Ok(id)
    }

    async fn get_managed_cluster(&self, id: &str) -> Result<ManagedClusterStatus> {
        let arm = self.arm()?;
        let cluster: ArmResource = arm.get(id, CONTAINER_API).await?;
        let status = cluster.properties.provisioning_state;
        let ready = provisioning_done(id, &status)?;
        let kubeconfig = if ready {
            Some(arm.cluster_admin_kubeconfig(id).await?)
        } else {
            None
        };
        Ok(ManagedClusterStatus {
            cluster_id: cluster.id,
            status,
            ready,
            kubeconfig,
        })
    }

    async fn delete_managed_cluster(&self, id: &str) -> Result<()> {
        self.delete_and_wait("wait for AKS cluster deletion", id, CONTAINER_API)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeforge_core::{ErrorKind, Role};

    fn stored() -> CredentialsDocument {
        CredentialsDocument::azure(AzureCredentials {
            subscription_id: "stored-sub".into(),
            tenant_id: "stored-tenant".into(),
            client_id: "stored-client".into(),
            client_secret: "stored-secret".into(),
        })
    }

    fn network() -> AzureNetwork {
        AzureNetwork {
            resource_group: "demo-net-rg".into(),
            virtual_network_id: "/vnet".into(),
            virtual_network_name: "demo-net".into(),
            subnet_id: "/vnet/subnets/demo-net-subnet".into(),
            subnet_name: "demo-net-subnet".into(),
            cidr: VNET_CIDR.into(),
        }
    }

    #[test]
    fn test_credentials_precedence() {
        let stored = stored();
        temp_env::with_vars(
            [
                (SUBSCRIPTION_ENV, Some("env-sub")),
                (TENANT_ENV, Some("env-tenant")),
                (CLIENT_ID_ENV, Some("env-client")),
                (CLIENT_SECRET_ENV, Some("env-secret")),
            ],
            || {
                let creds = resolve_credentials(Some(&stored)).unwrap();
                assert_eq!(creds.subscription_id, "env-sub");
                assert_eq!(creds.client_secret, "env-secret");
            },
        );
        // A partial environment does not shadow the stored principal.
        temp_env::with_vars(
            [
                (SUBSCRIPTION_ENV, Some("env-sub")),
                (TENANT_ENV, None),
                (CLIENT_ID_ENV, None),
                (CLIENT_SECRET_ENV, None),
            ],
            || {
                let creds = resolve_credentials(Some(&stored)).unwrap();
                assert_eq!(creds.subscription_id, "stored-sub");
                assert!(matches!(
                    resolve_credentials(None),
                    Err(AzureError::MissingCredentials)
                ));
            },
        );
    }

    #[test]
    fn test_provisioning_states() {
        assert!(provisioning_done("vm", "Succeeded").unwrap());
        assert!(!provisioning_done("vm", "Creating").unwrap());
        assert!(!provisioning_done("vm", "Updating").unwrap());
        assert!(matches!(
            provisioning_done("vm", "Failed"),
            Err(AzureError::ProvisioningFailed { .. })
        ));
        assert!(provisioning_done("vm", "Canceled").is_err());
    }

    #[test]
    fn test_security_rules() {
        let rules = kubeforge_cloud::firewall::rules_for(
            Role::ControlPlane,
            VNET_CIDR,
            KubernetesDistro::K3s,
        );
        let nsg_rules = to_security_rules(&rules);
        assert_eq!(nsg_rules.len(), rules.len());

        let priorities: Vec<u64> = nsg_rules
            .iter()
            .map(|r| r["properties"]["priority"].as_u64().unwrap())
            .collect();
        assert_eq!(priorities[0], 100);
        assert!(priorities.windows(2).all(|w| w[0] < w[1]));

        let names: Vec<&str> = nsg_rules.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert!(names.iter().all(|n| !n.contains(' ')));

        let api = nsg_rules
            .iter()
            .find(|r| r["properties"]["destinationPortRange"] == "6443")
            .unwrap();
        assert_eq!(api["properties"]["direction"], "Inbound");
        assert_eq!(api["properties"]["protocol"], "Tcp");

        let egress = nsg_rules
            .iter()
            .find(|r| r["properties"]["direction"] == "Outbound")
            .unwrap();
        assert_eq!(egress["properties"]["protocol"], "*");
        assert_eq!(egress["properties"]["destinationPortRange"], "*");
        assert_eq!(egress["properties"]["sourceAddressPrefix"], "*");
    }

    #[test]
    fn test_vm_body_carries_key_inline() {
        let network = network();
        let req = VmRequest {
            name: "demo-vm-cp-0",
            role: Role::ControlPlane,
            vm_size: "Standard_B2s",
            network: &network,
            firewall_id: "/nsg",
            ssh_key_id: "demo-ssh",
            ssh_key_name: "demo-ssh",
            ssh_user: "azureuser",
            ssh_public_key: "ssh-ed25519 AAAA demo",
            public_ip: true,
        };
        let body = vm_body("eastus", &req, "/nic", "azureuser");
        let os = &body["properties"]["osProfile"];
        assert_eq!(os["computerName"], "demo-vm-cp-0");
        assert_eq!(
            os["linuxConfiguration"]["ssh"]["publicKeys"][0]["keyData"],
            "ssh-ed25519 AAAA demo"
        );
        assert_eq!(os["linuxConfiguration"]["disablePasswordAuthentication"], true);
        assert_eq!(
            body["properties"]["storageProfile"]["osDisk"]["deleteOption"],
            "Delete"
        );
        assert_eq!(body["properties"]["networkProfile"]["networkInterfaces"][0]["id"], "/nic");

        let nic = nic_body("eastus", &network.subnet_id, "/nsg", None);
        let ip = &nic["properties"]["ipConfigurations"][0]["properties"];
        assert_eq!(ip["subnet"]["id"], "/vnet/subnets/demo-net-subnet");
        assert!(ip.get("publicIPAddress").is_none());
    }

    #[test]
    fn test_managed_cluster_body() {
        let network = network();
        let creds = AzureCredentials {
            subscription_id: "s".into(),
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: "x".into(),
        };
        let req = ManagedClusterRequest {
            name: "demo",
            node_size: "Standard_DS2_v2",
            node_count: 3,
            version: "1.29",
            network: &network,
            apps: &[],
            cni: None,
        };
        let body = managed_cluster_body("eastus", &creds, &req);
        let pool = &body["properties"]["agentPoolProfiles"][0];
        assert_eq!(pool["count"], 3);
        assert_eq!(pool["vnetSubnetID"], "/vnet/subnets/demo-net-subnet");
        assert_eq!(body["properties"]["networkProfile"]["networkPlugin"], "azure");
        assert_eq!(body["properties"]["servicePrincipalProfile"]["clientId"], "c");
    }

    #[test]
    fn test_offered_versions_skip_previews() {
        let versions: ArmKubernetesVersions = serde_json::from_str(
            r#"{"values":[
                {"version":"1.29","patchVersions":{"1.29.2":{},"1.29.4":{}}},
                {"version":"1.31","isPreview":true,"patchVersions":{"1.31.0":{}}}
            ]}"#,
        )
        .unwrap();
        let offered = offered_versions(versions);
        assert!(offered.contains(&"1.29".to_string()));
        assert!(offered.contains(&"1.29.4".to_string()));
        assert!(!offered.iter().any(|v| v.starts_with("1.31")));
    }

    #[test]
    fn test_vm_readiness() {
        let vm = ArmVirtualMachine {
            id: "/vm".into(),
            name: "demo-vm-wp-0".into(),
            ..Default::default()
        };
        let building = to_vm_instance(vm.clone(), "/nic".into(), String::new(), String::new());
        assert!(!building.ready);
        assert_eq!(building.hostname, "demo-vm-wp-0");

        let mut vm = vm;
        vm.properties.provisioning_state = SUCCEEDED.into();
        let running = to_vm_instance(vm, "/nic".into(), "10.1.0.5".into(), String::new());
        assert!(running.ready);
        assert_eq!(running.network_interface_id, "/nic");
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail() {
        let backend = AzureBackend::new(CancellationToken::new(), Span::none());
        assert!(backend.supports(ClusterType::Managed));
        assert_eq!(backend.ssh_user(), "azureuser");

        let err = backend.get_vm("/vm").await.unwrap_err();
        assert!(err.is(ErrorKind::MissingConfiguration));
        // Keys travel with the VM, so nothing needs a connection here.
        let key_id = backend
            .upload_ssh_key("demo-ssh", "ssh-ed25519 AAAA")
            .await
            .unwrap();
        assert_eq!(key_id, "demo-ssh");
    }
}
