//! OpenStack provider implementation

use crate::args::{
    ExternalNetworkArgs, FloatingIpArgs, FloatingIpAssociateArgs, InstanceArgs, KeypairArgs,
    NetworkArgs, RouterArgs, RouterInterfaceArgs, SecurityGroupArgs, SecurityGroupRuleArgs,
    SubnetArgs,
};
use crate::error::{OpenStackError, Result};
use crate::openstack::OpenStackCli;
use async_trait::async_trait;
use kindacool_cloud::{
    Attributes, AuthStatus, CloudProvider, ImageInfo, ResourceConfig, ResourceKind,
    ResourceState,
};
use serde_json::json;

/// Separator for IDs of resources that are links between two others
const LINK_SEPARATOR: char = '/';

/// OpenStack provider
pub struct OpenStackProvider {
    cli: OpenStackCli,
}

impl OpenStackProvider {
    pub fn new() -> Self {
        Self {
            cli: OpenStackCli::new(),
        }
    }

    async fn create_resource(&self, resource: &ResourceConfig) -> Result<Attributes> {
        let attributes = match resource.kind {
            ResourceKind::Keypair => {
                let args: KeypairArgs = resource.parse()?;
                let (info, private_key) = self.cli.create_keypair(&args.name).await?;
                Attributes::from([
                    ("id".to_string(), json!(info.name)),
                    ("name".to_string(), json!(info.name)),
                    ("fingerprint".to_string(), json!(info.fingerprint)),
                    ("private_key".to_string(), json!(private_key)),
                ])
            }
            ResourceKind::SecurityGroup => {
                let args: SecurityGroupArgs = resource.parse()?;
                let group = self.cli.create_security_group(&args).await?;
                Attributes::from([
                    ("id".to_string(), json!(group.id)),
                    ("name".to_string(), json!(args.name)),
                ])
            }
            ResourceKind::SecurityGroupRule => {
                let args: SecurityGroupRuleArgs = resource.parse()?;
                let rule = self.cli.create_security_group_rule(&args).await?;
                Attributes::from([("id".to_string(), json!(rule.id))])
            }
            ResourceKind::Network => {
                let args: NetworkArgs = resource.parse()?;
                let network = self.cli.create_network(&args).await?;
                Attributes::from([
                    ("id".to_string(), json!(network.id)),
                    ("name".to_string(), json!(network.name)),
                ])
            }
            ResourceKind::Subnet => {
                let args: SubnetArgs = resource.parse()?;
                let subnet = self.cli.create_subnet(&args).await?;
                Attributes::from([
                    ("id".to_string(), json!(subnet.id)),
                    ("cidr".to_string(), json!(args.cidr)),
                ])
            }
            ResourceKind::Router => {
                let args: RouterArgs = resource.parse()?;
                let router = self.cli.create_router(&args).await?;
                Attributes::from([("id".to_string(), json!(router.id))])
            }
            ResourceKind::RouterInterface => {
                let args: RouterInterfaceArgs = resource.parse()?;
                self.cli
                    .add_router_subnet(&args.router_id, &args.subnet_id)
                    .await?;
                Attributes::from([(
                    "id".to_string(),
                    json!(link_id(&args.router_id, &args.subnet_id)),
                )])
            }
            ResourceKind::FloatingIp => {
                let args: FloatingIpArgs = resource.parse()?;
                let fip = self.cli.create_floating_ip(&args).await?;
                Attributes::from([
                    ("id".to_string(), json!(fip.id)),
                    ("address".to_string(), json!(fip.floating_ip_address)),
                ])
            }
            ResourceKind::FloatingIpAssociate => {
                let args: FloatingIpAssociateArgs = resource.parse()?;
                self.cli
                    .add_floating_ip(&args.instance_id, &args.floating_ip)
                    .await?;
                Attributes::from([(
                    "id".to_string(),
                    json!(link_id(&args.instance_id, &args.floating_ip)),
                )])
            }
            ResourceKind::Instance => {
                let args: InstanceArgs = resource.parse()?;
                let server = self.cli.create_server(&args).await?;
                let network = args.networks.first().map(|n| n.name.as_str());
                let Some(access_ip) = server.access_ip_v4(network) else {
                    let err = OpenStackError::UnexpectedOutput(format!(
                        "server {} has no IPv4 address",
                        args.name
                    ));
                    return Err(self.cli.roll_back(&["server"], &server.id, true, err).await);
                };
                Attributes::from([
                    ("id".to_string(), json!(server.id)),
                    ("name".to_string(), json!(server.name)),
                    ("access_ip_v4".to_string(), json!(access_ip)),
                ])
            }
            ResourceKind::ExternalNetwork | ResourceKind::Command => {
                return Err(OpenStackError::InvalidArgs(format!(
                    "{} cannot be created by the openstack provider",
                    resource.kind
                )));
            }
        };

        tracing::debug!("Created {}", resource.key());
        Ok(attributes)
    }

    async fn read_external_network(&self, resource: &ResourceConfig) -> Result<Attributes> {
        let args: ExternalNetworkArgs = resource.parse()?;
        let network = self
            .cli
            .show_network(&args.network_id)
            .await?
            .ok_or_else(|| OpenStackError::NotFound(format!("network {}", args.network_id)))?;

        if network.name != args.name {
            return Err(OpenStackError::NetworkMismatch(format!(
                "network {} is named '{}', expected '{}'",
                network.id, network.name, args.name
            )));
        }

        Ok(Attributes::from([
            ("id".to_string(), json!(network.id)),
            ("name".to_string(), json!(network.name)),
        ]))
    }

    async fn resource_exists(&self, kind: ResourceKind, resource: &ResourceState) -> Result<bool> {
        let id = resource.id.as_str();
        let exists = match kind {
            ResourceKind::Keypair => self.cli.show(&["keypair"], id).await?.is_some(),
            ResourceKind::SecurityGroup => {
                self.cli.show(&["security", "group"], id).await?.is_some()
            }
            ResourceKind::SecurityGroupRule => self
                .cli
                .show(&["security", "group", "rule"], id)
                .await?
                .is_some(),
            ResourceKind::Network => self.cli.show(&["network"], id).await?.is_some(),
            ResourceKind::Subnet => self.cli.show(&["subnet"], id).await?.is_some(),
            ResourceKind::Router => self.cli.show(&["router"], id).await?.is_some(),
            ResourceKind::RouterInterface => {
                let (router_id, subnet_id) = split_link(id)?;
                self.cli
                    .router_subnets(router_id)
                    .await?
                    .is_some_and(|subnets| subnets.iter().any(|s| s == subnet_id))
            }
            ResourceKind::FloatingIp => self.cli.show(&["floating", "ip"], id).await?.is_some(),
            ResourceKind::FloatingIpAssociate => {
                let (_, address) = split_link(id)?;
                self.cli
                    .show_floating_ip(address)
                    .await?
                    .is_some_and(|fip| fip.port_id.is_some())
            }
            ResourceKind::Instance => self.cli.show_server(id).await?.is_some(),
            ResourceKind::ExternalNetwork | ResourceKind::Command => true,
        };
        Ok(exists)
    }

    async fn delete_resource(&self, kind: ResourceKind, resource: &ResourceState) -> Result<()> {
        let id = resource.id.as_str();
        match kind {
            ResourceKind::Keypair => self.cli.delete(&["keypair"], id, false).await?,
            ResourceKind::SecurityGroup => {
                self.cli.delete(&["security", "group"], id, false).await?
            }
            ResourceKind::SecurityGroupRule => {
                self.cli
                    .delete(&["security", "group", "rule"], id, false)
                    .await?
            }
            ResourceKind::Network => self.cli.delete(&["network"], id, false).await?,
            ResourceKind::Subnet => self.cli.delete(&["subnet"], id, false).await?,
            ResourceKind::Router => self.cli.delete(&["router"], id, false).await?,
            ResourceKind::RouterInterface => {
                let (router_id, subnet_id) = split_link(id)?;
                self.cli.remove_router_subnet(router_id, subnet_id).await?
            }
            ResourceKind::FloatingIp => self.cli.delete(&["floating", "ip"], id, false).await?,
            ResourceKind::FloatingIpAssociate => {
                let (server_id, address) = split_link(id)?;
                self.cli.remove_floating_ip(server_id, address).await?
            }
            ResourceKind::Instance => self.cli.delete(&["server"], id, true).await?,
            ResourceKind::ExternalNetwork | ResourceKind::Command => {}
        }
        tracing::debug!("Deleted {} {}", kind, id);
        Ok(())
    }
}

impl Default for OpenStackProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn link_id(left: &str, right: &str) -> String {
    format!("{}{}{}", left, LINK_SEPARATOR, right)
}

fn split_link(id: &str) -> Result<(&str, &str)> {
    id.split_once(LINK_SEPARATOR)
        .ok_or_else(|| OpenStackError::InvalidArgs(format!("malformed link id '{}'", id)))
}

fn kind_of(resource: &ResourceState) -> Result<ResourceKind> {
    Ok(resource.resource_type.parse::<ResourceKind>()?)
}

#[async_trait]
impl CloudProvider for OpenStackProvider {
    fn name(&self) -> &str {
        "openstack"
    }

    fn display_name(&self) -> &str {
        "OpenStack"
    }

    async fn check_auth(&self) -> kindacool_cloud::Result<AuthStatus> {
        match self.cli.check_auth().await {
            Ok(token) => {
                let account_info = match (token.user_id, token.project_id) {
                    (Some(user), Some(project)) => format!("user {} in project {}", user, project),
                    (Some(user), None) => format!("user {}", user),
                    _ => "Unknown".to_string(),
                };
                Ok(AuthStatus::ok(account_info))
            }
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn lookup_image(&self, name: &str) -> kindacool_cloud::Result<Option<ImageInfo>> {
        let image = self.cli.show_image(name).await?;
        Ok(image.map(|i| ImageInfo {
            id: i.id,
            name: i.name,
        }))
    }

    async fn read(&self, resource: &ResourceConfig) -> kindacool_cloud::Result<Attributes> {
        match resource.kind {
            ResourceKind::ExternalNetwork => Ok(self.read_external_network(resource).await?),
            other => Err(OpenStackError::InvalidArgs(format!("{} is not a data resource", other)).into()),
        }
    }

    async fn create(&self, resource: &ResourceConfig) -> kindacool_cloud::Result<Attributes> {
        Ok(self.create_resource(resource).await?)
    }

    async fn exists(&self, resource: &ResourceState) -> kindacool_cloud::Result<bool> {
        let kind = kind_of(resource)?;
        Ok(self.resource_exists(kind, resource).await?)
    }

    async fn delete(&self, resource: &ResourceState) -> kindacool_cloud::Result<()> {
        let kind = kind_of(resource)?;
        Ok(self.delete_resource(kind, resource).await?)
    }
}
