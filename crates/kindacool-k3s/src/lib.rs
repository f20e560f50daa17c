//! kindacool k3s clusters
//!
//! Declares everything a k3s cluster on OpenStack needs and hands it to the
//! `kindacool-cloud` engine:
//!
//! - [`security`]: the cluster's security group and its ingress rules
//! - [`network`]: an existing private network, or a routed network in public mode
//! - [`fleet`]: the instances, with floating IPs in public mode
//! - [`bootstrap`]: k3s install, token and kubeconfig extraction, worker joins over SSH
//! - [`outputs`]: the rewritten kubeconfig and the SSH key, both secret
//!
//! [`ClusterManager`] drives the whole lifecycle.

pub mod bootstrap;
pub mod cluster;
pub mod error;
pub mod fleet;
pub mod kubeconfig;
pub mod manager;
pub mod network;
pub mod outputs;
pub mod security;
pub mod spec;

#[cfg(test)]
mod testing;

pub use bootstrap::{BootstrapPlan, BootstrapState, BootstrapStep};
pub use cluster::{ClusterProgram, build_cluster};
pub use error::{ClusterError, Result};
pub use kubeconfig::KubeconfigSummary;
pub use manager::{ClusterManager, ProvisionReport};
pub use outputs::OutputKey;
pub use spec::{ClusterArgs, ClusterSpec, NetworkMode};
