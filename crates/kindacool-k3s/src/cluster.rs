//! The cluster program
//!
//! Validates a [`ClusterSpec`] and declares the complete resource graph for one cluster.
//! Nothing is created here; the graph is handed to the engine afterwards.

use crate::bootstrap::{BootstrapPlan, BootstrapRequest, declare_bootstrap};
use crate::error::{ClusterError, Result};
use crate::fleet::{FleetRequest, InstanceRecord, build_fleet};
use crate::network::{NetworkHandle, select_network};
use crate::outputs::declare_outputs;
use crate::security::{SecurityGroupHandle, SecurityRuleSet, declare_security_group};
use crate::spec::ClusterSpec;
use kindacool_cloud::{
    CloudProvider, ImageInfo, Input, ResourceGraph, ResourceId, ResourceKind, args,
};

/// Declared graph of a cluster plus handles into it
#[derive(Debug, Clone)]
pub struct ClusterProgram {
    pub name: String,
    pub graph: ResourceGraph,
    pub image: ImageInfo,
    pub keypair: ResourceId,
    pub security: SecurityGroupHandle,
    pub network: NetworkHandle,
    pub fleet: Vec<InstanceRecord>,
    pub bootstrap: BootstrapPlan,
}

impl ClusterProgram {
    /// Resource id for an arena index reported by the engine
    pub fn resource_at(&self, index: usize) -> Option<ResourceId> {
        self.graph.iter().nth(index).map(|r| r.id)
    }
}

/// Build the resource graph for cluster `name`
///
/// Checks run before anything is declared: network fields first, then the node count,
/// then the image lookup.
pub async fn build_cluster(
    name: &str,
    spec: &ClusterSpec,
    provider: &dyn CloudProvider,
) -> Result<ClusterProgram> {
    spec.validate()?;
    let image = lookup_image(provider, &spec.image_name).await?;

    let mut graph = ResourceGraph::new();

    let keypair = graph.declare(
        ResourceKind::Keypair,
        name,
        args([("name", Input::from(name))]),
        &[],
    )?;
    let security = declare_security_group(
        &mut graph,
        name,
        &SecurityRuleSet::new(&spec.additional_ports),
    )?;
    let network = select_network(&mut graph, name, &spec.network)?;

    let fleet = build_fleet(
        &mut graph,
        &FleetRequest {
            cluster: name,
            spec,
            image: &image,
            keypair,
            security_group: security.group,
            network: &network,
        },
    )?;

    let bootstrap = declare_bootstrap(
        &mut graph,
        &BootstrapRequest {
            fleet: &fleet,
            machine_user: &spec.machine_user,
            keypair,
        },
    )?;
    declare_outputs(&mut graph, name, keypair, &bootstrap)?;

    tracing::debug!("Cluster {} declares {} resources", name, graph.len());
    Ok(ClusterProgram {
        name: name.to_string(),
        graph,
        image,
        keypair,
        security,
        network,
        fleet,
        bootstrap,
    })
}

async fn lookup_image(provider: &dyn CloudProvider, name: &str) -> Result<ImageInfo> {
    match provider.lookup_image(name).await {
        Ok(Some(image)) => Ok(image),
        Ok(None) => Err(ClusterError::ImageNotFound {
            name: name.to_string(),
            reason: "no such image".to_string(),
        }),
        Err(e) => Err(ClusterError::ImageNotFound {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}
