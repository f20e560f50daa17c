//! Cluster error types

use crate::bootstrap::BootstrapStep;
use kindacool_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid amount of nodes, must be > 0 (got {0})")]
    InvalidNodeCount(i32),

    #[error("image not found by name '{name}': {reason}")]
    ImageNotFound { name: String, reason: String },

    #[error("no cluster with name {0} could be found")]
    ClusterNotFound(String),

    #[error("bootstrap step {step} failed on node {index}: {source}")]
    Bootstrap {
        step: BootstrapStep,
        index: usize,
        #[source]
        source: CloudError,
    },

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[from] serde_yaml::Error),

    #[error(transparent)]
    Provisioning(#[from] CloudError),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
