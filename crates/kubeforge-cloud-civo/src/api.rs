//! Civo REST API client
//!
//! Thin typed wrapper over the v2 endpoints kubeforge needs. Every call is
//! scoped to the region the client was built for.

use crate::error::{CivoError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const CIVO_API_BASE: &str = "https://api.civo.com/v2";

pub struct CivoApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRegion {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSize {
    pub name: String,
    #[serde(default)]
    pub selectable: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKubernetesVersion {
    pub version: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiNetwork {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub cidr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCreated {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiDiskImage {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiInstance {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub private_ip: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKubernetesCluster {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateNetworkRequest<'a> {
    pub label: &'a str,
    pub region: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateSshKeyRequest<'a> {
    pub name: &'a str,
    pub public_key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiFirewallRule {
    pub protocol: String,
    pub start_port: String,
    pub end_port: String,
    pub cidr: Vec<String>,
    pub direction: String,
    pub label: String,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct CreateFirewallRequest<'a> {
    pub name: &'a str,
    pub network_id: &'a str,
    pub region: &'a str,
    /// Civo adds permissive default rules unless this is false
    pub create_rules: bool,
    pub rules: Vec<ApiFirewallRule>,
}

#[derive(Debug, Serialize)]
pub struct CreateInstanceRequest<'a> {
    pub hostname: &'a str,
    pub size: &'a str,
    pub region: &'a str,
    pub network_id: &'a str,
    pub template_id: &'a str,
    pub initial_user: &'a str,
    pub sshkey_id: &'a str,
    pub firewall_id: &'a str,
    /// `"create"` or `"none"`
    pub public_ip: &'a str,
    pub count: u32,
}

#[derive(Debug, Serialize)]
pub struct CreateKubernetesClusterRequest<'a> {
    pub name: &'a str,
    pub region: &'a str,
    pub network_id: &'a str,
    pub num_target_nodes: usize,
    pub target_nodes_size: &'a str,
    pub kubernetes_version: &'a str,
    /// Comma separated marketplace applications
    #[serde(skip_serializing_if = "String::is_empty")]
    pub applications: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cni_plugin: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    reason: String,
}

impl CivoApi {
    pub fn new(token: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: CIVO_API_BASE.to_string(),
            token: token.into(),
            region: region.into(),
        }
    }

    /// Points the client at another API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends an authenticated request and returns the body of a 2xx response
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request
            .bearer_auth(&self.token)
            .query(&[("region", self.region.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CivoError::from_status(status.as_u16(), error_message(&body)));
        }
        Ok(body)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let body = self.execute(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.execute(self.client.delete(self.url(path))).await?;
        Ok(())
    }

    pub async fn list_regions(&self) -> Result<Vec<ApiRegion>> {
        self.send(self.client.get(self.url("regions"))).await
    }

    pub async fn list_sizes(&self) -> Result<Vec<ApiSize>> {
        self.send(self.client.get(self.url("sizes"))).await
    }

    pub async fn list_kubernetes_versions(&self) -> Result<Vec<ApiKubernetesVersion>> {
        self.send(self.client.get(self.url("kubernetes/versions")))
            .await
    }

    pub async fn create_network(&self, label: &str) -> Result<ApiCreated> {
        let body = CreateNetworkRequest {
            label,
            region: &self.region,
        };
        self.send(self.client.post(self.url("networks")).json(&body))
            .await
    }

    pub async fn get_network(&self, id: &str) -> Result<ApiNetwork> {
        self.send(self.client.get(self.url(&format!("networks/{id}"))))
            .await
    }

    pub async fn delete_network(&self, id: &str) -> Result<()> {
        self.delete(&format!("networks/{id}")).await
    }

    pub async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<ApiCreated> {
        let body = CreateSshKeyRequest { name, public_key };
        self.send(self.client.post(self.url("sshkeys")).json(&body))
            .await
    }

    pub async fn delete_ssh_key(&self, id: &str) -> Result<()> {
        self.delete(&format!("sshkeys/{id}")).await
    }

    pub async fn create_firewall(&self, body: &CreateFirewallRequest<'_>) -> Result<ApiCreated> {
        self.send(self.client.post(self.url("firewalls")).json(body))
            .await
    }

    pub async fn delete_firewall(&self, id: &str) -> Result<()> {
        self.delete(&format!("firewalls/{id}")).await
    }

    pub async fn find_disk_image(&self, name: &str) -> Result<ApiDiskImage> {
        let images: Vec<ApiDiskImage> = self.send(self.client.get(self.url("disk_images"))).await?;
        images
            .into_iter()
            .find(|image| image.name == name)
            .ok_or_else(|| CivoError::DiskImageNotFound(name.to_string()))
    }

    pub async fn create_instance(&self, body: &CreateInstanceRequest<'_>) -> Result<ApiInstance> {
        self.send(self.client.post(self.url("instances")).json(body))
            .await
    }

    pub async fn get_instance(&self, id: &str) -> Result<ApiInstance> {
        self.send(self.client.get(self.url(&format!("instances/{id}"))))
            .await
    }

    pub async fn delete_instance(&self, id: &str) -> Result<()> {
        self.delete(&format!("instances/{id}")).await
    }

    pub async fn create_kubernetes_cluster(
        &self,
        body: &CreateKubernetesClusterRequest<'_>,
    ) -> Result<ApiKubernetesCluster> {
        self.send(self.client.post(self.url("kubernetes/clusters")).json(body))
            .await
    }

    pub async fn get_kubernetes_cluster(&self, id: &str) -> Result<ApiKubernetesCluster> {
        self.send(
            self.client
                .get(self.url(&format!("kubernetes/clusters/{id}"))),
        )
        .await
    }

    pub async fn delete_kubernetes_cluster(&self, id: &str) -> Result<()> {
        self.delete(&format!("kubernetes/clusters/{id}")).await
    }
}

/// Best effort message from an error body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) if !err.reason.is_empty() => format!("{} ({})", err.reason, err.code),
        Ok(err) if !err.code.is_empty() => err.code,
        _ if body.is_empty() => "empty response".to_string(),
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let api = CivoApi::new("token", "LON1").with_base_url("http://localhost:8080/v2/");
        assert_eq!(api.url("networks"), "http://localhost:8080/v2/networks");
        assert_eq!(api.url("/sizes"), "http://localhost:8080/v2/sizes");
        assert_eq!(api.region(), "LON1");
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(r#"{"code":"database_network_not_found","reason":"no such network"}"#),
            "no such network (database_network_not_found)"
        );
        assert_eq!(error_message(r#"{"code":"quota_exceeded"}"#), "quota_exceeded");
        assert_eq!(error_message(""), "empty response");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_cluster_response_parsing() {
        let cluster: ApiKubernetesCluster = serde_json::from_str(
            r#"{"id":"c1","name":"demo","status":"ACTIVE","ready":true,"kubeconfig":"apiVersion: v1"}"#,
        )
        .unwrap();
        assert!(cluster.ready);
        assert_eq!(cluster.kubeconfig.as_deref(), Some("apiVersion: v1"));

        let instance: ApiInstance =
            serde_json::from_str(r#"{"id":"i1","status":"BUILDING"}"#).unwrap();
        assert!(instance.private_ip.is_empty());
    }

    #[test]
    fn test_cluster_request_skips_empty_fields() {
        let body = CreateKubernetesClusterRequest {
            name: "demo",
            region: "LON1",
            network_id: "n1",
            num_target_nodes: 3,
            target_nodes_size: "g4s.kube.small",
            kubernetes_version: "1.30.2-k3s1",
            applications: String::new(),
            cni_plugin: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("applications").is_none());
        assert!(json.get("cni_plugin").is_none());
        assert_eq!(json["num_target_nodes"], 3);
    }
}
