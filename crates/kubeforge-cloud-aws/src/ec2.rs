//! EC2 calls used by the backend
//!
//! Every resource kubeforge creates carries a `Name` tag with its generated
//! name, which is also what shows up in the AWS console.

use crate::error::{AwsError, Result};
use aws_sdk_ec2::Client;
use aws_sdk_ec2::primitives::Blob;
use aws_sdk_ec2::types::{
    AttributeBooleanValue, Filter, Instance, InstanceNetworkInterfaceSpecification,
    InstanceStateName, InstanceType, IpPermission, IpRange, ResourceType, Tag, TagSpecification,
};
use kubeforge_cloud::{FirewallRule, Protocol};

/// Canonical's account, the publisher of the official Ubuntu AMIs
pub const UBUNTU_OWNER: &str = "099720109477";
pub const UBUNTU_IMAGE_NAME: &str = "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-amd64-server-*";

pub struct Ec2Api {
    client: Client,
}

/// Addresses and status of one instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub name: String,
    pub running: bool,
    pub public_ip: String,
    pub private_ip: String,
    pub network_interface_id: String,
}

/// Inputs for `run_instances`
#[derive(Debug)]
pub struct LaunchSpec<'a> {
    pub name: &'a str,
    pub image_id: &'a str,
    pub instance_type: &'a str,
    pub subnet_id: &'a str,
    pub security_group_id: &'a str,
    pub key_name: &'a str,
    pub public_ip: bool,
}

fn name_tag(resource: ResourceType, name: &str) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource)
        .tags(Tag::builder().key("Name").value(name).build())
        .build()
}

fn required(value: Option<&str>, field: &'static str) -> Result<String> {
    value
        .map(str::to_string)
        .ok_or(AwsError::MissingField(field))
}

/// Tolerates deleting what is already gone
fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

/// Ingress rules as EC2 permissions; egress stays at the security group
/// default, which already allows everything
pub fn ingress_permissions(rules: &[FirewallRule]) -> Vec<IpPermission> {
    rules
        .iter()
        .filter(|rule| rule.is_ingress())
        .map(|rule| {
            let range = IpRange::builder()
                .cidr_ip(&rule.cidr)
                .description(&rule.description)
                .build();
            let builder = IpPermission::builder().ip_ranges(range);
            let builder = match rule.protocol {
                Protocol::All => builder.ip_protocol("-1"),
                protocol => builder
                    .ip_protocol(protocol.as_str())
                    .from_port(i32::from(rule.start_port))
                    .to_port(i32::from(rule.end_port)),
            };
            builder.build()
        })
        .collect()
}

pub fn instance_info(instance: &Instance) -> InstanceInfo {
    let name = instance
        .tags()
        .iter()
        .find(|tag| tag.key() == Some("Name"))
        .and_then(|tag| tag.value())
        .unwrap_or_default();
    let running = instance
        .state()
        .and_then(|state| state.name())
        .is_some_and(|state| *state == InstanceStateName::Running);

    InstanceInfo {
        instance_id: instance.instance_id().unwrap_or_default().to_string(),
        name: name.to_string(),
        running,
        public_ip: instance.public_ip_address().unwrap_or_default().to_string(),
        private_ip: instance.private_ip_address().unwrap_or_default().to_string(),
        network_interface_id: instance
            .network_interfaces()
            .first()
            .and_then(|eni| eni.network_interface_id())
            .unwrap_or_default()
            .to_string(),
    }
}

impl Ec2Api {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn regions(&self) -> Result<Vec<String>> {
        let out = self.client.describe_regions().send().await?;
        Ok(out
            .regions()
            .iter()
            .filter_map(|r| r.region_name())
            .map(str::to_string)
            .collect())
    }

    pub async fn instance_types(&self) -> Result<Vec<String>> {
        let mut types = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .client
                .describe_instance_types()
                .filters(
                    Filter::builder()
                        .name("current-generation")
                        .values("true")
                        .build(),
                )
                .set_next_token(next_token.take())
                .send()
                .await?;
            types.extend(
                out.instance_types()
                    .iter()
                    .filter_map(|t| t.instance_type())
                    .map(|t| t.as_str().to_string()),
            );
            match out.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(types)
    }

    pub async fn create_vpc(&self, name: &str, cidr: &str) -> Result<String> {
        let out = self
            .client
            .create_vpc()
            .cidr_block(cidr)
            .tag_specifications(name_tag(ResourceType::Vpc, name))
            .send()
            .await?;
        let vpc_id = required(out.vpc().and_then(|v| v.vpc_id()), "vpc id")?;

        self.client
            .modify_vpc_attribute()
            .vpc_id(&vpc_id)
            .enable_dns_hostnames(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await?;
        Ok(vpc_id)
    }

    pub async fn create_subnet(&self, name: &str, vpc_id: &str, cidr: &str) -> Result<String> {
        let out = self
            .client
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(cidr)
            .tag_specifications(name_tag(ResourceType::Subnet, name))
            .send()
            .await?;
        let subnet_id = required(out.subnet().and_then(|s| s.subnet_id()), "subnet id")?;

        self.client
            .modify_subnet_attribute()
            .subnet_id(&subnet_id)
            .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await?;
        Ok(subnet_id)
    }

    pub async fn create_internet_gateway(&self, name: &str, vpc_id: &str) -> Result<String> {
        let out = self
            .client
            .create_internet_gateway()
            .tag_specifications(name_tag(ResourceType::InternetGateway, name))
            .send()
            .await?;
        let gateway_id = required(
            out.internet_gateway()
                .and_then(|g| g.internet_gateway_id()),
            "internet gateway id",
        )?;

        self.client
            .attach_internet_gateway()
            .internet_gateway_id(&gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await?;
        Ok(gateway_id)
    }

    /// Route table sending 0.0.0.0/0 through the gateway, associated with the subnet
    pub async fn create_public_route_table(
        &self,
        name: &str,
        vpc_id: &str,
        gateway_id: &str,
        subnet_id: &str,
    ) -> Result<String> {
        let out = self
            .client
            .create_route_table()
            .vpc_id(vpc_id)
            .tag_specifications(name_tag(ResourceType::RouteTable, name))
            .send()
            .await?;
        let table_id = required(
            out.route_table().and_then(|t| t.route_table_id()),
            "route table id",
        )?;

        self.client
            .create_route()
            .route_table_id(&table_id)
            .destination_cidr_block("0.0.0.0/0")
            .gateway_id(gateway_id)
            .send()
            .await?;
        self.client
            .associate_route_table()
            .route_table_id(&table_id)
            .subnet_id(subnet_id)
            .send()
            .await?;
        Ok(table_id)
    }

    pub async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let result = self
            .client
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .map(drop)
            .map_err(AwsError::from);
        ignore_not_found(result)
    }

    pub async fn delete_route_table(&self, table_id: &str) -> Result<()> {
        let result = self
            .client
            .delete_route_table()
            .route_table_id(table_id)
            .send()
            .await
            .map(drop)
            .map_err(AwsError::from);
        ignore_not_found(result)
    }

    pub async fn delete_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let detached = self
            .client
            .detach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map(drop)
            .map_err(AwsError::from);
        ignore_not_found(detached)?;

        let result = self
            .client
            .delete_internet_gateway()
            .internet_gateway_id(gateway_id)
            .send()
            .await
            .map(drop)
            .map_err(AwsError::from);
        ignore_not_found(result)
    }

    pub async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        let result = self
            .client
            .delete_vpc()
            .vpc_id(vpc_id)
            .send()
            .await
            .map(drop)
            .map_err(AwsError::from);
        ignore_not_found(result)
    }

    pub async fn import_key_pair(&self, name: &str, public_key: &str) -> Result<String> {
        let out = self
            .client
            .import_key_pair()
            .key_name(name)
            .public_key_material(Blob::new(public_key.as_bytes()))
            .tag_specifications(name_tag(ResourceType::KeyPair, name))
            .send()
            .await?;
        required(out.key_pair_id(), "key pair id")
    }

    pub async fn delete_key_pair(&self, key_pair_id: &str) -> Result<()> {
        let result = self
            .client
            .delete_key_pair()
            .key_pair_id(key_pair_id)
            .send()
            .await
            .map(drop)
            .map_err(AwsError::from);
        ignore_not_found(result)
    }

    pub async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        rules: &[FirewallRule],
    ) -> Result<String> {
        let out = self
            .client
            .create_security_group()
            .group_name(name)
            .description(description)
            .vpc_id(vpc_id)
            .tag_specifications(name_tag(ResourceType::SecurityGroup, name))
            .send()
            .await?;
        let group_id = required(out.group_id(), "security group id")?;

        let permissions = ingress_permissions(rules);
        if !permissions.is_empty() {
            self.client
                .authorize_security_group_ingress()
                .group_id(&group_id)
                .set_ip_permissions(Some(permissions))
                .send()
                .await?;
        }
        Ok(group_id)
    }

    pub async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        let result = self
            .client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map(drop)
            .map_err(AwsError::from);
        ignore_not_found(result)
    }

    /// Newest official Ubuntu 22.04 amd64 image
    pub async fn latest_ubuntu_image(&self) -> Result<String> {
        let out = self
            .client
            .describe_images()
            .owners(UBUNTU_OWNER)
            .filters(Filter::builder().name("name").values(UBUNTU_IMAGE_NAME).build())
            .filters(Filter::builder().name("architecture").values("x86_64").build())
            .filters(Filter::builder().name("state").values("available").build())
            .send()
            .await?;

        out.images()
            .iter()
            .filter(|image| image.image_id().is_some())
            .max_by(|a, b| a.creation_date().cmp(&b.creation_date()))
            .and_then(|image| image.image_id())
            .map(str::to_string)
            .ok_or(AwsError::ImageNotFound)
    }

    pub async fn run_instance(&self, spec: &LaunchSpec<'_>) -> Result<String> {
        let interface = InstanceNetworkInterfaceSpecification::builder()
            .device_index(0)
            .subnet_id(spec.subnet_id)
            .groups(spec.security_group_id)
            .associate_public_ip_address(spec.public_ip)
            .delete_on_termination(true)
            .build();

        let out = self
            .client
            .run_instances()
            .image_id(spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type))
            .key_name(spec.key_name)
            .min_count(1)
            .max_count(1)
            .network_interfaces(interface)
            .tag_specifications(name_tag(ResourceType::Instance, spec.name))
            .send()
            .await?;

        required(
            out.instances().first().and_then(|i| i.instance_id()),
            "instance id",
        )
    }

    pub async fn describe_instance(&self, instance_id: &str) -> Result<InstanceInfo> {
        let out = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await?;

        out.reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .map(instance_info)
            .ok_or_else(|| {
                AwsError::api(
                    "InvalidInstanceID.NotFound",
                    format!("instance {instance_id} not found"),
                )
            })
    }

    /// Whether the instance is gone for good
    pub async fn is_terminated(&self, instance_id: &str) -> Result<bool> {
        let out = match self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
        {
            Ok(out) => out,
            Err(err) => {
                let err = AwsError::from(err);
                return if err.is_not_found() { Ok(true) } else { Err(err) };
            }
        };

        let terminated = out
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .all(|i| {
                i.state()
                    .and_then(|s| s.name())
                    .is_some_and(|s| *s == InstanceStateName::Terminated)
            });
        Ok(terminated)
    }

    pub async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let result = self
            .client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map(drop)
            .map_err(AwsError::from);
        ignore_not_found(result)
    }
}
