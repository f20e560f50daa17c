//! kindacool resource engine
//!
//! This crate turns a declared [`ResourceGraph`] into cloud API calls and remote commands,
//! and keeps track of what exists in a per-stack state file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 kindacool-k3s                   │
//! │        (declares the cluster topology)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ResourceGraph
//! ┌─────────────────▼───────────────────────────────┐
//! │                kindacool-cloud                  │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   Engine (plan, levels, apply, destroy)  │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │  State Mgmt  │  │   Secrets    │             │
//! │  └──────────────┘  └──────────────┘             │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ CloudProvider │ │RemoteExecutor │
//! │  (openstack)  │ │    (ssh)      │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod engine;
pub mod error;
pub mod graph;
pub mod provider;
pub mod remote;
pub mod secret;
pub mod state;

// Re-exports
pub use action::{Action, ActionType, ApplyResult, Plan, PlanSummary};
pub use engine::{Engine, UpSummary};
pub use error::{CloudError, Result};
pub use graph::{
    Args, Input, Resource, ResourceGraph, ResourceId, ResourceKind, args, replace_all,
};
pub use provider::{Attributes, AuthStatus, CloudProvider, ImageInfo, ResourceConfig, RetryConfig};
pub use remote::{Connection, RemoteCommand, RemoteExecutor, SshExecutor};
pub use secret::{Secret, SecretCipher};
pub use state::{
    ResourceState, ResourceStatus, StackState, StateLock, StateManager, StoredValue,
};
