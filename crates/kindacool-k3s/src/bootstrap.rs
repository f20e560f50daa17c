//! k3s bootstrap over SSH
//!
//! Every step is a [`ResourceKind::Command`] resource, so the engine runs them once per
//! cluster and replays the recorded output (or the harmless update command) on later
//! passes. Ordering comes from the edges declared here:
//!
//! ```text
//! install (node 0) ──┬── extract-token ──── join (node 1..n)
//!                    └── extract-kubeconfig
//! ```

use crate::error::{ClusterError, Result};
use crate::fleet::InstanceRecord;
use kindacool_cloud::{Input, ResourceGraph, ResourceId, ResourceKind, args};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub const K3S_INSTALL_URL: &str = "https://get.k3s.io";
pub const K3S_CHANNEL: &str = "stable";
pub const API_SERVER_PORT: u16 = 6443;
pub const SSH_PORT: u16 = 22;

pub const TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
pub const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// Re-runs of an install or join only confirm the machine is reachable
pub const NOOP_COMMAND: &str = "echo 'just chilling'";

pub const INSTALL_RESOURCE: &str = "k3s";
pub const TOKEN_RESOURCE: &str = "extract-token";
pub const KUBECONFIG_RESOURCE: &str = "extract-kubeconfig";

/// Command resource joining the `ordinal`-th worker, counted from 0
pub fn worker_resource(ordinal: usize) -> String {
    format!("k3s-worker-{}", ordinal)
}

/// A remote step of the bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootstrapStep {
    InstallControlPlane,
    ExtractToken,
    ExtractKubeconfig,
    JoinWorker,
}

impl BootstrapStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapStep::InstallControlPlane => "install-control-plane",
            BootstrapStep::ExtractToken => "extract-token",
            BootstrapStep::ExtractKubeconfig => "extract-kubeconfig",
            BootstrapStep::JoinWorker => "join-worker",
        }
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a cluster's bootstrap has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BootstrapState {
    Unprovisioned,
    MasterInstalling,
    MasterInstalled,
    TokenExtracted,
    KubeconfigExtracted,
    WorkersJoining,
    Ready,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BootstrapState::Unprovisioned => "unprovisioned",
            BootstrapState::MasterInstalling => "master installing",
            BootstrapState::MasterInstalled => "master installed",
            BootstrapState::TokenExtracted => "token extracted",
            BootstrapState::KubeconfigExtracted => "kubeconfig extracted",
            BootstrapState::WorkersJoining => "workers joining",
            BootstrapState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Install command for the control plane, trusting `address` for TLS
pub fn install_command(address: Input) -> Input {
    Input::concat([
        Input::from(format!(
            "curl -sfL {} | INSTALL_K3S_EXEC='server --tls-san=\"",
            K3S_INSTALL_URL
        )),
        address,
        Input::from(format!(
            "\"' INSTALL_K3S_CHANNEL=\"{}\" sh -",
            K3S_CHANNEL
        )),
    ])
}

/// Join command for a worker
pub fn join_command(master: Input, token: Input) -> Input {
    Input::concat([
        Input::from(format!("curl -sfL {} | K3S_URL=https://", K3S_INSTALL_URL)),
        master,
        Input::from(format!(":{} K3S_TOKEN=", API_SERVER_PORT)),
        token,
        Input::from(" sh -"),
    ])
}

fn read_file_command(path: &str) -> String {
    format!("sudo cat {}", path)
}

/// SSH connection to a fleet member
pub fn connection(record: &InstanceRecord, user: &str, keypair: ResourceId) -> Input {
    Input::object([
        ("host", record.address.clone()),
        ("user", Input::from(user)),
        ("private_key", Input::output(keypair, "private_key")),
        ("port", Input::from(SSH_PORT)),
    ])
}

/// Inputs for [`declare_bootstrap`]
#[derive(Debug, Clone)]
pub struct BootstrapRequest<'a> {
    pub fleet: &'a [InstanceRecord],
    pub machine_user: &'a str,
    pub keypair: ResourceId,
}

/// Declared bootstrap commands
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub install: ResourceId,
    pub token: ResourceId,
    pub kubeconfig: ResourceId,
    /// `(node index, command)` for every worker
    pub joins: Vec<(usize, ResourceId)>,
    /// Address of the control plane
    pub master_address: Input,
}

impl BootstrapPlan {
    /// Join token with surrounding whitespace removed
    pub fn token_value(&self) -> Input {
        Input::output(self.token, "stdout").trim()
    }

    /// Kubeconfig exactly as the control plane wrote it
    pub fn raw_kubeconfig(&self) -> Input {
        Input::output(self.kubeconfig, "stdout")
    }

    /// Step and node index of a declared command
    pub fn step_of(&self, id: ResourceId) -> Option<(BootstrapStep, usize)> {
        if id == self.install {
            return Some((BootstrapStep::InstallControlPlane, 0));
        }
        if id == self.token {
            return Some((BootstrapStep::ExtractToken, 0));
        }
        if id == self.kubeconfig {
            return Some((BootstrapStep::ExtractKubeconfig, 0));
        }
        self.joins
            .iter()
            .find(|(_, join)| *join == id)
            .map(|(index, _)| (BootstrapStep::JoinWorker, *index))
    }

    /// Furthest state reached given the commands that have completed
    pub fn state(&self, completed: &[ResourceId]) -> BootstrapState {
        let done: HashSet<ResourceId> = completed.iter().copied().collect();

        if !done.contains(&self.install) {
            return BootstrapState::Unprovisioned;
        }
        if !done.contains(&self.token) {
            return BootstrapState::MasterInstalled;
        }
        if !done.contains(&self.kubeconfig) {
            return BootstrapState::TokenExtracted;
        }

        let joined = self
            .joins
            .iter()
            .filter(|(_, id)| done.contains(id))
            .count();
        match joined {
            n if n == self.joins.len() => BootstrapState::Ready,
            0 => BootstrapState::KubeconfigExtracted,
            _ => BootstrapState::WorkersJoining,
        }
    }
}

/// Declare the install, extraction and join commands for `req.fleet`
pub fn declare_bootstrap(
    graph: &mut ResourceGraph,
    req: &BootstrapRequest<'_>,
) -> Result<BootstrapPlan> {
    let (master, workers) = req
        .fleet
        .split_first()
        .ok_or(ClusterError::InvalidNodeCount(0))?;
    let master_conn = connection(master, req.machine_user, req.keypair);

    let install = graph.declare(
        ResourceKind::Command,
        INSTALL_RESOURCE,
        args([
            ("connection", master_conn.clone()),
            ("create", install_command(master.address.clone())),
            ("update", Input::from(NOOP_COMMAND)),
        ]),
        &[master.reachable],
    )?;

    let token = graph.declare(
        ResourceKind::Command,
        TOKEN_RESOURCE,
        args([
            ("connection", master_conn.clone()),
            ("create", Input::from(read_file_command(TOKEN_PATH))),
        ]),
        &[install],
    )?;

    let kubeconfig = graph.declare(
        ResourceKind::Command,
        KUBECONFIG_RESOURCE,
        args([
            ("connection", master_conn),
            ("create", Input::from(read_file_command(KUBECONFIG_PATH))),
        ]),
        &[install],
    )?;

    let mut plan = BootstrapPlan {
        install,
        token,
        kubeconfig,
        joins: Vec::with_capacity(workers.len()),
        master_address: master.address.clone(),
    };

    for (ordinal, worker) in workers.iter().enumerate() {
        let join = graph.declare(
            ResourceKind::Command,
            worker_resource(ordinal),
            args([
                (
                    "connection",
                    connection(worker, req.machine_user, req.keypair),
                ),
                (
                    "create",
                    join_command(plan.master_address.clone(), plan.token_value()),
                ),
                ("update", Input::from(NOOP_COMMAND)),
            ]),
            &[worker.reachable],
        )?;
        plan.joins.push((worker.index, join));
    }

    tracing::debug!("Declared bootstrap with {} worker joins", plan.joins.len());
    Ok(plan)
}
