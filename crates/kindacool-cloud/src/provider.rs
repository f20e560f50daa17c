//! Cloud provider trait definition

use crate::error::Result;
use crate::graph::ResourceKind;
use crate::state::ResourceState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Attributes a provider reports for a realized resource
///
/// Every resource reports at least `id`.
pub type Attributes = HashMap<String, serde_json::Value>;

/// Cloud provider abstraction trait
///
/// The engine calls into a provider for every resource kind except
/// [`ResourceKind::Command`], which runs through a
/// [`RemoteExecutor`](crate::remote::RemoteExecutor).
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "openstack")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Look up a boot image by name
    async fn lookup_image(&self, name: &str) -> Result<Option<ImageInfo>>;

    /// Read a data resource
    async fn read(&self, resource: &ResourceConfig) -> Result<Attributes>;

    /// Create a resource
    async fn create(&self, resource: &ResourceConfig) -> Result<Attributes>;

    /// Converge an existing resource whose arguments changed
    ///
    /// Replaces the resource unless the provider knows better.
    async fn update(
        &self,
        resource: &ResourceConfig,
        current: &ResourceState,
    ) -> Result<Attributes> {
        self.delete(current).await?;
        self.create(resource).await
    }

    /// Whether a recorded resource still exists
    async fn exists(&self, resource: &ResourceState) -> Result<bool>;

    /// Delete a recorded resource; deleting something already gone succeeds
    async fn delete(&self, resource: &ResourceState) -> Result<()>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Boot image found by [`CloudProvider::lookup_image`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
}

/// A resource with every input resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub kind: ResourceKind,

    /// Resource name, unique per kind within a stack
    pub name: String,

    /// Resource-specific configuration
    pub config: serde_json::Value,
}

impl ResourceConfig {
    pub fn new(kind: ResourceKind, name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            config,
        }
    }

    /// Get the full resource key (kind:name)
    pub fn key(&self) -> String {
        crate::graph::resource_key(self.kind, &self.name)
    }

    /// Get a configuration value as a specific type
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Deserialize the whole configuration
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.config.clone())?)
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before the given retry (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_backoff_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for(3), Duration::from_secs(4));
        assert_eq!(retry.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_resource_config_accessors() {
        let config = ResourceConfig::new(
            ResourceKind::Subnet,
            "demo",
            json!({ "cidr": "10.0.0.0/16", "network_id": "n-1" }),
        );
        assert_eq!(config.key(), "subnet:demo");
        assert_eq!(
            config.get_config::<String>("cidr").as_deref(),
            Some("10.0.0.0/16")
        );
        assert_eq!(config.get_config::<String>("missing"), None);
    }
}
