//! Network topology selection

use crate::error::{ClusterError, Result};
use crate::spec::NetworkMode;
use kindacool_cloud::{Input, ResourceGraph, ResourceId, ResourceKind, args};

pub const SUBNET_CIDR: &str = "10.0.0.0/16";
pub const SUBNET_DESCRIPTION: &str = "subnet for all k3s cluster nodes";

/// The network instances attach to
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    /// Network name, literal or the managed network's name output
    pub name: Input,
    /// Resources that must exist before instances can use the network
    pub ready: Vec<ResourceId>,
    pub managed: Option<ManagedNetwork>,
}

impl NetworkHandle {
    pub fn is_managed(&self) -> bool {
        self.managed.is_some()
    }
}

/// Resources declared for public mode
#[derive(Debug, Clone)]
pub struct ManagedNetwork {
    pub network: ResourceId,
    pub subnet: ResourceId,
    pub external_network: ResourceId,
    pub router: ResourceId,
    pub router_interface: ResourceId,
}

/// Reject network modes with empty required fields
pub fn validate(mode: &NetworkMode) -> Result<()> {
    match mode {
        NetworkMode::Private { network_name } if network_name.is_empty() => {
            Err(ClusterError::Configuration(
                "private network name is empty (required unless the cluster is public)"
                    .to_string(),
            ))
        }
        NetworkMode::Public {
            ip_pool,
            network_name,
            network_id,
        } if ip_pool.is_empty() || network_name.is_empty() || network_id.is_empty() => {
            Err(ClusterError::Configuration(
                "public network info is incomplete (ip pool, network name and network id are required)"
                    .to_string(),
            ))
        }
        _ => Ok(()),
    }
}

/// Resolve the network for `mode`, declaring a routed network in public mode
pub fn select_network(
    graph: &mut ResourceGraph,
    cluster: &str,
    mode: &NetworkMode,
) -> Result<NetworkHandle> {
    validate(mode)?;

    match mode {
        NetworkMode::Private { network_name } => Ok(NetworkHandle {
            name: Input::from(network_name.as_str()),
            ready: Vec::new(),
            managed: None,
        }),
        NetworkMode::Public {
            network_name,
            network_id,
            ..
        } => {
            let managed = declare_public_network(graph, cluster, network_name, network_id)?;
            Ok(NetworkHandle {
                name: Input::output(managed.network, "name"),
                ready: vec![managed.router_interface],
                managed: Some(managed),
            })
        }
    }
}

fn declare_public_network(
    graph: &mut ResourceGraph,
    cluster: &str,
    external_name: &str,
    external_id: &str,
) -> Result<ManagedNetwork> {
    let network = graph.declare(
        ResourceKind::Network,
        cluster,
        args([
            ("name", Input::from(cluster)),
            ("admin_state_up", Input::from(true)),
        ]),
        &[],
    )?;

    let subnet = graph.declare(
        ResourceKind::Subnet,
        cluster,
        args([
            ("name", Input::from(cluster)),
            ("network_id", Input::output(network, "id")),
            ("cidr", Input::from(SUBNET_CIDR)),
            ("description", Input::from(SUBNET_DESCRIPTION)),
        ]),
        &[network],
    )?;

    let external_network = graph.declare(
        ResourceKind::ExternalNetwork,
        external_name,
        args([
            ("name", Input::from(external_name)),
            ("network_id", Input::from(external_id)),
        ]),
        &[],
    )?;

    let router = graph.declare(
        ResourceKind::Router,
        cluster,
        args([
            ("name", Input::from(cluster)),
            ("admin_state_up", Input::from(true)),
            (
                "external_network_id",
                Input::output(external_network, "id"),
            ),
        ]),
        &[],
    )?;

    let router_interface = graph.declare(
        ResourceKind::RouterInterface,
        cluster,
        args([
            ("router_id", Input::output(router, "id")),
            ("subnet_id", Input::output(subnet, "id")),
        ]),
        &[router, subnet],
    )?;

    tracing::debug!("Declared public network for {} via {}", cluster, external_name);
    Ok(ManagedNetwork {
        network,
        subnet,
        external_network,
        router,
        router_interface,
    })
}
