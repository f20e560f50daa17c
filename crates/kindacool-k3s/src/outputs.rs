//! Published cluster outputs

use crate::bootstrap::BootstrapPlan;
use crate::error::{ClusterError, Result};
use crate::kubeconfig::rewrite_input;
use kindacool_cloud::{Input, ResourceGraph, ResourceId};
use std::fmt;
use std::str::FromStr;

/// Values a cluster publishes, all of them secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKey {
    /// Rewritten admin kubeconfig
    Kubeconfig,
    /// Private key of the cluster's keypair
    SshKey,
}

impl OutputKey {
    pub const ALL: [OutputKey; 2] = [OutputKey::Kubeconfig, OutputKey::SshKey];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKey::Kubeconfig => "kubeconfig",
            OutputKey::SshKey => "sshKey",
        }
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputKey {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        OutputKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ClusterError::Configuration(format!("unknown output '{}'", s)))
    }
}

/// Export the kubeconfig and SSH key of `cluster`
pub fn declare_outputs(
    graph: &mut ResourceGraph,
    cluster: &str,
    keypair: ResourceId,
    bootstrap: &BootstrapPlan,
) -> Result<()> {
    let kubeconfig = rewrite_input(
        bootstrap.raw_kubeconfig(),
        bootstrap.master_address.clone(),
        cluster,
    );
    graph.export(OutputKey::Kubeconfig.as_str(), kubeconfig.secret())?;
    graph.export(
        OutputKey::SshKey.as_str(),
        Input::output(keypair, "private_key").secret(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_keys() {
        assert_eq!("sshKey".parse::<OutputKey>().unwrap(), OutputKey::SshKey);
        assert_eq!(
            "kubeconfig".parse::<OutputKey>().unwrap(),
            OutputKey::Kubeconfig
        );
        assert!("sshkey".parse::<OutputKey>().is_err());
    }
}
