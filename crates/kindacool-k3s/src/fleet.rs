//! Compute instances

use crate::error::{ClusterError, Result};
use crate::network::NetworkHandle;
use crate::spec::{ClusterSpec, NetworkMode};
use kindacool_cloud::{ImageInfo, Input, ResourceGraph, ResourceId, ResourceKind, args};

pub const FLOATING_IP_DESCRIPTION: &str = "floating ip for the k3s cluster master node";

/// One declared machine
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    /// 0 runs the control plane, everything else joins as a worker
    pub index: usize,
    pub instance: ResourceId,
    /// Where the machine is reached over SSH
    pub address: Input,
    pub floating_ip: Option<ResourceId>,
    /// Last resource that has to exist before the machine is reachable at `address`
    pub reachable: ResourceId,
}

impl InstanceRecord {
    pub fn is_control_plane(&self) -> bool {
        self.index == 0
    }
}

/// Shared resources every instance uses
#[derive(Debug, Clone)]
pub struct FleetRequest<'a> {
    pub cluster: &'a str,
    pub spec: &'a ClusterSpec,
    pub image: &'a ImageInfo,
    pub keypair: ResourceId,
    pub security_group: ResourceId,
    pub network: &'a NetworkHandle,
}

pub fn instance_name(cluster: &str, index: usize) -> String {
    format!("{}-node-{}", cluster, index)
}

/// Declare `spec.node_count` instances, plus a floating IP each in public mode
pub fn build_fleet(
    graph: &mut ResourceGraph,
    req: &FleetRequest<'_>,
) -> Result<Vec<InstanceRecord>> {
    let count = usize::try_from(req.spec.node_count)
        .ok()
        .filter(|n| *n > 0)
        .ok_or(ClusterError::InvalidNodeCount(req.spec.node_count))?;

    let mut fleet = Vec::with_capacity(count);
    for index in 0..count {
        let name = instance_name(req.cluster, index);
        let instance = graph.declare(
            ResourceKind::Instance,
            name.clone(),
            instance_args(&name, req),
            &req.network.ready,
        )?;

        let record = match &req.spec.network {
            NetworkMode::Public { ip_pool, .. } => {
                let fip = graph.declare(
                    ResourceKind::FloatingIp,
                    name.clone(),
                    args([
                        ("pool", Input::from(ip_pool.as_str())),
                        ("description", Input::from(FLOATING_IP_DESCRIPTION)),
                    ]),
                    &[],
                )?;
                let association = graph.declare(
                    ResourceKind::FloatingIpAssociate,
                    name.clone(),
                    args([
                        ("floating_ip", Input::output(fip, "address")),
                        ("instance_id", Input::output(instance, "id")),
                    ]),
                    &[],
                )?;
                InstanceRecord {
                    index,
                    instance,
                    address: Input::output(fip, "address"),
                    floating_ip: Some(fip),
                    reachable: association,
                }
            }
            NetworkMode::Private { .. } => InstanceRecord {
                index,
                instance,
                address: Input::output(instance, "access_ip_v4"),
                floating_ip: None,
                reachable: instance,
            },
        };
        fleet.push(record);
    }

    tracing::debug!("Declared {} instances for {}", fleet.len(), req.cluster);
    Ok(fleet)
}

fn instance_args(name: &str, req: &FleetRequest<'_>) -> kindacool_cloud::Args {
    let mut instance = args([
        ("name", Input::from(name)),
        ("flavor_name", Input::from(req.spec.flavor.as_str())),
        ("key_pair", Input::output(req.keypair, "name")),
        (
            "security_groups",
            Input::list([Input::output(req.security_group, "id")]),
        ),
        (
            "networks",
            Input::list([Input::object([("name", req.network.name.clone())])]),
        ),
    ]);

    match req.spec.volume_size {
        Some(size) => {
            instance.insert(
                "block_devices".to_string(),
                Input::list([Input::object([
                    ("uuid", Input::from(req.image.id.as_str())),
                    ("source_type", Input::from("image")),
                    ("destination_type", Input::from("volume")),
                    ("delete_on_termination", Input::from(true)),
                    ("volume_size", Input::from(size)),
                ])]),
            );
        }
        None => {
            instance.insert(
                "image_name".to_string(),
                Input::from(req.spec.image_name.as_str()),
            );
        }
    }

    instance
}
