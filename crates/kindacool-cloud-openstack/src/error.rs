//! OpenStack provider error types

use kindacool_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenStackError {
    #[error("openstack CLI not found. Please install: pip install python-openstackclient")]
    CliNotFound,

    #[error("openstack authentication failed (did you source your openrc?): {0}")]
    AuthenticationFailed(String),

    #[error("openstack command failed: {0}")]
    CommandFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network mismatch: {0}")]
    NetworkMismatch(String),

    #[error("Unexpected openstack output: {0}")]
    UnexpectedOutput(String),

    #[error("Invalid resource arguments: {0}")]
    InvalidArgs(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] CloudError),
}

impl From<OpenStackError> for CloudError {
    fn from(err: OpenStackError) -> Self {
        match err {
            OpenStackError::CloudError(inner) => inner,
            OpenStackError::CliNotFound | OpenStackError::AuthenticationFailed(_) => {
                CloudError::AuthenticationFailed(err.to_string())
            }
            OpenStackError::NotFound(what) => CloudError::ResourceNotFound(what),
            OpenStackError::InvalidArgs(msg) => CloudError::InvalidConfig(msg),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenStackError>;
