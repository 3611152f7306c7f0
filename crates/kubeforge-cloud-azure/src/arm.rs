//! Azure Resource Manager REST client
//!
//! Resources are addressed by their full ARM id
//! (`/subscriptions/{sub}/resourceGroups/{rg}/providers/{type}/{name}`), so a
//! stored id is enough to read or delete anything later. Writes are `PUT`s of
//! the whole resource and are idempotent.

use crate::error::{AzureError, Result};
use base64::Engine;
use kubeforge_core::AzureCredentials;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const ARM_BASE: &str = "https://management.azure.com";
pub const LOGIN_BASE: &str = "https://login.microsoftonline.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";
/// Tokens are refreshed this long before they expire
const TOKEN_SLACK: Duration = Duration::from_secs(120);

pub const RESOURCES_API: &str = "2021-04-01";
pub const SUBSCRIPTIONS_API: &str = "2022-12-01";
pub const NETWORK_API: &str = "2023-09-01";
pub const COMPUTE_API: &str = "2023-09-01";
pub const CONTAINER_API: &str = "2024-02-01";

pub const VIRTUAL_NETWORKS: &str = "Microsoft.Network/virtualNetworks";
pub const SECURITY_GROUPS: &str = "Microsoft.Network/networkSecurityGroups";
pub const PUBLIC_IPS: &str = "Microsoft.Network/publicIPAddresses";
pub const NETWORK_INTERFACES: &str = "Microsoft.Network/networkInterfaces";
pub const VIRTUAL_MACHINES: &str = "Microsoft.Compute/virtualMachines";
pub const MANAGED_CLUSTERS: &str = "Microsoft.ContainerService/managedClusters";

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct ArmApi {
    client: reqwest::Client,
    arm_base: String,
    login_base: String,
    creds: AzureCredentials,
    location: String,
    token: Mutex<Option<AccessToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ArmErrorBody {
    #[serde(default)]
    error: Option<ErrorField>,
    /// Set by the login endpoint, whose `error` is a bare code
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Detail(ArmErrorDetail),
    Code(String),
}

#[derive(Debug, Default, Deserialize)]
struct ArmErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningProperties {
    #[serde(default)]
    pub provisioning_state: String,
}

/// Any ARM resource, read for its provisioning state
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmResource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: ProvisioningProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubResource {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmVirtualMachine {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: VmProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmProperties {
    #[serde(default)]
    pub provisioning_state: String,
    #[serde(default)]
    pub os_profile: Option<OsProfile>,
    #[serde(default)]
    pub network_profile: NetworkProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    #[serde(default)]
    pub computer_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    #[serde(default)]
    pub network_interfaces: Vec<SubResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmNetworkInterface {
    #[serde(default)]
    pub properties: NicProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicProperties {
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpConfiguration {
    #[serde(default)]
    pub properties: IpConfigurationProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpConfigurationProperties {
    #[serde(default, rename = "privateIPAddress")]
    pub private_ip_address: Option<String>,
    #[serde(default, rename = "publicIPAddress")]
    pub public_ip_address: Option<SubResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmPublicIp {
    #[serde(default)]
    pub properties: PublicIpProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpProperties {
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArmNamed {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ArmList {
    value: Vec<ArmNamed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmKubernetesVersions {
    #[serde(default)]
    pub values: Vec<ArmKubernetesVersion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmKubernetesVersion {
    pub version: String,
    #[serde(default)]
    pub is_preview: bool,
    #[serde(default)]
    pub patch_versions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmCredentialResults {
    #[serde(default)]
    pub kubeconfigs: Vec<ArmCredential>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmCredential {
    #[serde(default)]
    pub name: String,
    /// base64 encoded kubeconfig
    pub value: String,
}

impl ArmApi {
    pub fn new(creds: AzureCredentials, location: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            arm_base: ARM_BASE.to_string(),
            login_base: LOGIN_BASE.to_string(),
            creds,
            location: location.into(),
            token: Mutex::new(None),
        }
    }

    /// Points the client at other management and login roots
    pub fn with_base_urls(mut self, arm_base: &str, login_base: &str) -> Self {
        self.arm_base = arm_base.trim_end_matches('/').to_string();
        self.login_base = login_base.trim_end_matches('/').to_string();
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn credentials(&self) -> &AzureCredentials {
        &self.creds
    }

    pub fn resource_group_id(&self, resource_group: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{resource_group}",
            self.creds.subscription_id
        )
    }

    pub fn resource_id(&self, resource_group: &str, kind: &str, name: &str) -> String {
        format!(
            "{}/providers/{kind}/{name}",
            self.resource_group_id(resource_group)
        )
    }

    fn url(&self, id: &str) -> String {
        format!("{}/{}", self.arm_base, id.trim_start_matches('/'))
    }

    /// Bearer token for the service principal, cached until shortly before expiry
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + TOKEN_SLACK
        {
            return Ok(token.value.clone());
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base, self.creds.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.creds.client_id.as_str()),
            ("client_secret", self.creds.client_secret.as_str()),
            ("scope", ARM_SCOPE),
        ];
        let response = self.client.post(url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AzureError::AuthenticationFailed(error_message(&body)));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        let value = token.access_token;
        *cached = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    /// Sends an authenticated request and returns the body of a 2xx response
    async fn execute(&self, request: reqwest::RequestBuilder, api_version: &str) -> Result<String> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .query(&[("api-version", api_version)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AzureError::from_status(status.as_u16(), error_message(&body)));
        }
        Ok(body)
    }

    pub async fn get<T: DeserializeOwned>(&self, id: &str, api_version: &str) -> Result<T> {
        let body = self.execute(self.client.get(self.url(id)), api_version).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn put(&self, id: &str, api_version: &str, body: &Value) -> Result<ArmResource> {
        let request = self.client.put(self.url(id)).json(body);
        let body = self.execute(request, api_version).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Starts a delete; ARM finishes most deletes in the background
    pub async fn delete(&self, id: &str, api_version: &str) -> Result<()> {
        self.execute(self.client.delete(self.url(id)), api_version)
            .await?;
        Ok(())
    }

    pub async fn create_resource_group(&self, resource_group: &str) -> Result<ArmResource> {
        let id = self.resource_group_id(resource_group);
        self.put(&id, RESOURCES_API, &json!({ "location": self.location }))
            .await
    }

    pub async fn list_locations(&self) -> Result<Vec<String>> {
        let id = format!("/subscriptions/{}/locations", self.creds.subscription_id);
        let list: ArmList = self.get(&id, SUBSCRIPTIONS_API).await?;
        Ok(list.value.into_iter().map(|l| l.name).collect())
    }

    pub async fn list_vm_sizes(&self) -> Result<Vec<String>> {
        let id = format!(
            "/subscriptions/{}/providers/Microsoft.Compute/locations/{}/vmSizes",
            self.creds.subscription_id, self.location
        );
        let list: ArmList = self.get(&id, COMPUTE_API).await?;
        Ok(list.value.into_iter().map(|s| s.name).collect())
    }

    pub async fn list_kubernetes_versions(&self) -> Result<ArmKubernetesVersions> {
        let id = format!(
            "/subscriptions/{}/providers/Microsoft.ContainerService/locations/{}/kubernetesVersions",
            self.creds.subscription_id, self.location
        );
        self.get(&id, CONTAINER_API).await
    }

    /// Admin kubeconfig of an AKS cluster
    pub async fn cluster_admin_kubeconfig(&self, cluster_id: &str) -> Result<String> {
        let url = self.url(&format!("{cluster_id}/listClusterAdminCredential"));
        let body = self
            .execute(self.client.post(url).json(&json!({})), CONTAINER_API)
            .await?;
        decode_kubeconfig(serde_json::from_str(&body)?)
    }
}

pub fn decode_kubeconfig(results: ArmCredentialResults) -> Result<String> {
    let credential = results
        .kubeconfigs
        .into_iter()
        .next()
        .ok_or(AzureError::MissingField("kubeconfigs"))?;
    let raw = base64::engine::general_purpose::STANDARD.decode(credential.value.trim())?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Resource group id and resource name of a full ARM id
pub fn split_resource_id(id: &str) -> Result<(&str, &str)> {
    let (group, provider) = id
        .split_once("/providers/")
        .ok_or_else(|| AzureError::InvalidResourceId(id.to_string()))?;
    match provider.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() && group.contains("/resourceGroups/") => {
            Ok((group, name))
        }
        _ => Err(AzureError::InvalidResourceId(id.to_string())),
    }
}

/// Best effort message from an ARM or login error body
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<ArmErrorBody>(body).unwrap_or_default();
    match (parsed.error, parsed.error_description) {
        (_, Some(description)) if !description.is_empty() => description,
        (Some(ErrorField::Detail(detail)), _) if !detail.message.is_empty() => {
            format!("{} ({})", detail.message, detail.code)
        }
        (Some(ErrorField::Detail(detail)), _) if !detail.code.is_empty() => detail.code,
        (Some(ErrorField::Code(code)), _) if !code.is_empty() => code,
        _ if body.is_empty() => "empty response".to_string(),
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AzureCredentials {
        AzureCredentials {
            subscription_id: "sub-1".into(),
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "secret".into(),
        }
    }

    #[test]
    fn test_resource_ids() {
        let api = ArmApi::new(creds(), "eastus")
            .with_base_urls("http://localhost:9000/", "http://localhost:9001");
        let id = api.resource_id("demo-net-rg", VIRTUAL_NETWORKS, "demo-net");
        assert_eq!(
            id,
            "/subscriptions/sub-1/resourceGroups/demo-net-rg/providers/Microsoft.Network/virtualNetworks/demo-net"
        );
        assert_eq!(api.url(&id), format!("http://localhost:9000{id}"));

        let (group, name) = split_resource_id(&id).unwrap();
        assert_eq!(group, "/subscriptions/sub-1/resourceGroups/demo-net-rg");
        assert_eq!(name, "demo-net");

        assert!(split_resource_id("demo-net").is_err());
        assert!(split_resource_id("/subscriptions/sub-1/providers/Microsoft.Compute/").is_err());
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(
                r#"{"error":{"code":"ResourceGroupNotFound","message":"Resource group 'x' could not be found."}}"#
            ),
            "Resource group 'x' could not be found. (ResourceGroupNotFound)"
        );
        assert_eq!(
            error_message(r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret"}"#),
            "AADSTS7000215: Invalid client secret"
        );
        assert_eq!(error_message(r#"{"error":"invalid_grant"}"#), "invalid_grant");
        assert_eq!(error_message(""), "empty response");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_kubeconfig_decoding() {
        let results: ArmCredentialResults = serde_json::from_str(
            r#"{"kubeconfigs":[{"name":"clusterAdmin","value":"YXBpVmVyc2lvbjogdjEK"}]}"#,
        )
        .unwrap();
        assert_eq!(decode_kubeconfig(results).unwrap(), "apiVersion: v1\n");

        let empty = ArmCredentialResults::default();
        assert!(matches!(
            decode_kubeconfig(empty),
            Err(AzureError::MissingField("kubeconfigs"))
        ));

        let garbage = ArmCredentialResults {
            kubeconfigs: vec![ArmCredential {
                name: "clusterAdmin".into(),
                value: "not base64!".into(),
            }],
        };
        assert!(matches!(decode_kubeconfig(garbage), Err(AzureError::Kubeconfig(_))));
    }

    #[test]
    fn test_vm_response_parsing() {
        let vm: ArmVirtualMachine = serde_json::from_str(
            r#"{
                "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/demo-vm-cp-0",
                "name": "demo-vm-cp-0",
                "properties": {
                    "provisioningState": "Creating",
                    "osProfile": { "computerName": "demo-vm-cp-0" },
                    "networkProfile": { "networkInterfaces": [ { "id": "/nic-id" } ] }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(vm.properties.provisioning_state, "Creating");
        assert_eq!(vm.properties.network_profile.network_interfaces[0].id, "/nic-id");

        let nic: ArmNetworkInterface = serde_json::from_str(
            r#"{"properties":{"ipConfigurations":[{"properties":{"privateIPAddress":"10.1.0.4","publicIPAddress":{"id":"/pip-id"}}}]}}"#,
        )
        .unwrap();
        let ip = &nic.properties.ip_configurations[0].properties;
        assert_eq!(ip.private_ip_address.as_deref(), Some("10.1.0.4"));
        assert_eq!(ip.public_ip_address.as_ref().map(|p| p.id.as_str()), Some("/pip-id"));
    }
}
