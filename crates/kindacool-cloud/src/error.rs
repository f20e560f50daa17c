//! Engine error types

use thiserror::Error;

/// Errors raised by the graph, the state store and the apply engine
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("Unknown resource id: {0}")]
    UnknownResource(usize),

    #[error("Unresolved input: {0}")]
    UnresolvedInput(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Output not available: {0}")]
    OutputUnavailable(String),

    #[error("{resource}: {source}")]
    ResourceFailed {
        /// Graph key (`kind:name`) of the failing resource
        resource: String,
        /// Arena index of the failing resource, if it is still declared
        index: Option<usize>,
        #[source]
        source: Box<CloudError>,
    },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Secret encryption failed: {0}")]
    Crypto(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Unwraps `ResourceFailed` down to the error the resource itself raised
    pub fn root(&self) -> &CloudError {
        match self {
            CloudError::ResourceFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
