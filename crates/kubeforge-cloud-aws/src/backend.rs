//! [`CloudBackend`] over EC2
//!
//! AWS offers HA clusters only: one VPC with a single public subnet, a
//! security group per role and Ubuntu instances logged into as `ubuntu`.

use crate::ec2::{Ec2Api, InstanceInfo, LaunchSpec};
use crate::error::AwsError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::{Credentials, Region};
use kubeforge_cloud::{CloudBackend, FirewallRequest, VmInstance, VmRequest};
use kubeforge_core::{
    AwsNetwork, Cloud, ClusterType, CredentialsDocument, KubernetesDistro, Result, RetryConfig,
    Waiter,
};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, warn};

pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const VPC_CIDR: &str = "172.31.0.0/16";
pub const SUBNET_CIDR: &str = "172.31.32.0/20";
const SSH_USER: &str = "ubuntu";

pub struct AwsBackend {
    ec2: Option<Ec2Api>,
    /// Waits for terminated instances to release their security groups
    termination: Waiter,
    span: Span,
}

impl AwsBackend {
    pub fn new(cancel: CancellationToken, span: Span) -> Self {
        Self {
            ec2: None,
            termination: Waiter::new(RetryConfig::readiness(), cancel, span.clone()),
            span,
        }
    }

    fn ec2(&self) -> std::result::Result<&Ec2Api, AwsError> {
        self.ec2.as_ref().ok_or(AwsError::NotConnected)
    }
}

/// Environment variables win over stored credentials
pub fn resolve_credentials(
    stored: Option<&CredentialsDocument>,
) -> std::result::Result<(String, String), AwsError> {
    if let (Ok(access), Ok(secret)) = (std::env::var(ACCESS_KEY_ENV), std::env::var(SECRET_KEY_ENV))
        && !access.is_empty()
        && !secret.is_empty()
    {
        return Ok((access, secret));
    }
    stored
        .and_then(|creds| creds.aws.as_ref())
        .filter(|aws| !aws.access_key_id.is_empty() && !aws.secret_access_key.is_empty())
        .map(|aws| (aws.access_key_id.clone(), aws.secret_access_key.clone()))
        .ok_or(AwsError::MissingCredentials)
}

fn to_vm_instance(info: InstanceInfo) -> VmInstance {
    let ready = info.running && !info.private_ip.is_empty();
    VmInstance {
        vm_id: info.instance_id,
        hostname: info.name,
        public_ip: info.public_ip,
        private_ip: info.private_ip,
        network_interface_id: info.network_interface_id,
        ready,
    }
}

#[async_trait]
impl CloudBackend for AwsBackend {
    type Network = AwsNetwork;

    fn cloud(&self) -> Cloud {
        Cloud::Aws
    }

    fn supports(&self, cluster_type: ClusterType) -> bool {
        cluster_type == ClusterType::Ha
    }

    fn default_distro(&self, _cluster_type: ClusterType) -> KubernetesDistro {
        KubernetesDistro::K3s
    }

    fn ssh_user(&self) -> &str {
        SSH_USER
    }

    async fn connect(&mut self, region: &str, stored: Option<CredentialsDocument>) -> Result<()> {
        let (access_key_id, secret_access_key) = resolve_credentials(stored.as_ref())?;
        let credentials = Credentials::new(access_key_id, secret_access_key, None, None, "kubeforge");

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .load()
            .await;
        self.ec2 = Some(Ec2Api::new(aws_sdk_ec2::Client::new(&config)));

        debug!(parent: &self.span, %region, "ec2 client ready");
        Ok(())
    }

    async fn regions(&self) -> Result<Option<Vec<String>>> {
        Ok(Some(self.ec2()?.regions().await?))
    }

    async fn vm_sizes(&self) -> Result<Option<Vec<String>>> {
        Ok(Some(self.ec2()?.instance_types().await?))
    }

    async fn create_network(&self, name: &str) -> Result<AwsNetwork> {
        let ec2 = self.ec2()?;
        let mut network = AwsNetwork {
            vpc_name: name.to_string(),
            vpc_cidr: VPC_CIDR.to_string(),
            ..Default::default()
        };

        network.vpc_id = ec2.create_vpc(name, VPC_CIDR).await?;

        // Everything below is undone on failure so a retry starts clean.
        let built: std::result::Result<(), AwsError> = async {
            let subnet_name = format!("{name}-subnet");
            let subnet_id = ec2
                .create_subnet(&subnet_name, &network.vpc_id, SUBNET_CIDR)
                .await?;
            network.subnet_ids.push(subnet_id.clone());
            network.subnet_names.push(subnet_name);

            network.gateway_id = ec2
                .create_internet_gateway(&format!("{name}-igw"), &network.vpc_id)
                .await?;
            network.route_table_id = ec2
                .create_public_route_table(
                    &format!("{name}-rt"),
                    &network.vpc_id,
                    &network.gateway_id,
                    &subnet_id,
                )
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = built {
            warn!(parent: &self.span, network = %name, error = %err, "network creation failed, rolling back");
            if let Err(cleanup) = self.delete_network(&network).await {
                warn!(parent: &self.span, vpc = %network.vpc_id, error = %cleanup, "rollback left resources behind");
            }
            return Err(err.into());
        }

        info!(parent: &self.span, vpc = %network.vpc_id, subnet = ?network.subnet_ids, "vpc ready");
        Ok(network)
    }

    async fn delete_network(&self, network: &AwsNetwork) -> Result<()> {
        let ec2 = self.ec2()?;
        for subnet_id in &network.subnet_ids {
            ec2.delete_subnet(subnet_id).await?;
        }
        if !network.route_table_id.is_empty() {
            ec2.delete_route_table(&network.route_table_id).await?;
        }
        if !network.gateway_id.is_empty() {
            ec2.delete_internet_gateway(&network.gateway_id, &network.vpc_id)
                .await?;
        }
        if !network.vpc_id.is_empty() {
            ec2.delete_vpc(&network.vpc_id).await?;
        }
        Ok(())
    }

    async fn upload_ssh_key(&self, name: &str, public_key: &str) -> Result<String> {
        Ok(self.ec2()?.import_key_pair(name, public_key).await?)
    }

    async fn delete_ssh_key(&self, id: &str) -> Result<()> {
        Ok(self.ec2()?.delete_key_pair(id).await?)
    }

    async fn create_firewall(&self, req: FirewallRequest<'_, AwsNetwork>) -> Result<String> {
        let description = format!("kubeforge {} nodes", req.role);
        let id = self
            .ec2()?
            .create_security_group(req.name, &description, &req.network.vpc_id, req.rules)
            .await?;
        Ok(id)
    }

    async fn delete_firewall(&self, id: &str) -> Result<()> {
        Ok(self.ec2()?.delete_security_group(id).await?)
    }

    async fn create_vm(&self, req: VmRequest<'_, AwsNetwork>) -> Result<String> {
        let ec2 = self.ec2()?;
        let subnet_id = req
            .network
            .subnet_ids
            .first()
            .ok_or(AwsError::MissingField("subnet id"))?;
        let image_id = ec2.latest_ubuntu_image().await?;

        let spec = LaunchSpec {
            name: req.name,
            image_id: &image_id,
            instance_type: req.vm_size,
            subnet_id,
            security_group_id: req.firewall_id,
            key_name: req.ssh_key_name,
            public_ip: req.public_ip,
        };
        let id = ec2.run_instance(&spec).await?;
        debug!(parent: &self.span, vm = %req.name, %id, image = %image_id, "ec2 instance requested");
        Ok(id)
    }

    async fn get_vm(&self, id: &str) -> Result<VmInstance> {
        let info = self.ec2()?.describe_instance(id).await?;
        Ok(to_vm_instance(info))
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        let ec2 = self.ec2()?;
        ec2.terminate_instance(id).await?;

        self.termination
            .until("wait for instance termination", move || async move {
                let gone = ec2.is_terminated(id).await?;
                Ok(gone.then_some(()))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeforge_core::ErrorKind;

    #[test]
    fn test_credentials_precedence() {
        let stored = CredentialsDocument::aws("AKIASTORED", "stored-secret");
        temp_env::with_vars(
            [
                (ACCESS_KEY_ENV, Some("AKIAENV")),
                (SECRET_KEY_ENV, Some("env-secret")),
            ],
            || {
                let (access, _) = resolve_credentials(Some(&stored)).unwrap();
                assert_eq!(access, "AKIAENV");
            },
        );
        temp_env::with_vars(
            [(ACCESS_KEY_ENV, None::<&str>), (SECRET_KEY_ENV, None)],
            || {
                let (access, secret) = resolve_credentials(Some(&stored)).unwrap();
                assert_eq!(access, "AKIASTORED");
                assert_eq!(secret, "stored-secret");
                assert!(matches!(
                    resolve_credentials(None),
                    Err(AwsError::MissingCredentials)
                ));
            },
        );
    }

    #[test]
    fn test_only_ha_clusters() {
        let backend = AwsBackend::new(CancellationToken::new(), Span::none());
        assert!(backend.supports(ClusterType::Ha));
        assert!(!backend.supports(ClusterType::Managed));
        assert_eq!(backend.ssh_user(), "ubuntu");
    }

    #[test]
    fn test_readiness_needs_private_ip() {
        let info = InstanceInfo {
            instance_id: "i-1".into(),
            running: true,
            ..Default::default()
        };
        assert!(!to_vm_instance(info.clone()).ready);

        let info = InstanceInfo {
            private_ip: "172.31.32.5".into(),
            ..info
        };
        assert!(to_vm_instance(info).ready);
    }

    #[tokio::test]
    async fn test_managed_clusters_unsupported() {
        let backend = AwsBackend::new(CancellationToken::new(), Span::none());
        let err = backend.get_managed_cluster("c-1").await.unwrap_err();
        assert!(err.is(ErrorKind::FailedClusterOperation));

        let err = backend.get_vm("i-1").await.unwrap_err();
        assert!(err.is(ErrorKind::MissingConfiguration));
    }
}
