//! OpenStack provider for kindacool
//!
//! This crate implements the CloudProvider trait for OpenStack, so the engine can manage
//! keypairs, security groups, networks, routers, floating IPs and servers.
//!
//! # Requirements
//!
//! - the `openstack` CLI must be installed
//! - credentials are taken from the `OS_*` environment (source your openrc first)
//!
//! # Example
//!
//! ```ignore
//! use kindacool_cloud::CloudProvider;
//! use kindacool_cloud_openstack::OpenStackProvider;
//!
//! let provider = OpenStackProvider::new();
//!
//! // Check authentication
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//!
//! let image = provider.lookup_image("Ubuntu 22.04").await?;
//! ```

pub mod args;
pub mod error;
pub mod openstack;
pub mod provider;

pub use error::{OpenStackError, Result};
pub use openstack::{OpenStackCli, ServerInfo};
pub use provider::OpenStackProvider;
