//! Cluster lifecycle on top of the resource engine

use crate::bootstrap::BootstrapState;
use crate::cluster::{ClusterProgram, build_cluster};
use crate::error::{ClusterError, Result};
use crate::outputs::OutputKey;
use crate::spec::ClusterSpec;
use kindacool_cloud::{
    ApplyResult, AuthStatus, CloudError, CloudProvider, Engine, RemoteExecutor, Secret,
    state::validate_stack_name,
};
use std::path::Path;
use std::sync::Arc;

/// Outcome of a successful [`ClusterManager::provision`]
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub state: BootstrapState,
    pub result: ApplyResult,
    pub nodes: usize,
}

/// Provisions, tears down and inspects clusters, one engine stack per cluster name
pub struct ClusterManager {
    engine: Engine,
}

impl ClusterManager {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        executor: Arc<dyn RemoteExecutor>,
        state_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        Ok(Self {
            engine: Engine::new(provider, executor, state_dir)?,
        })
    }

    /// Fail unless the provider accepts the current credentials
    pub async fn ensure_environment(&self) -> Result<AuthStatus> {
        let provider = self.engine.provider();
        let status = provider.check_auth().await?;
        if !status.authenticated {
            let reason = status
                .error
                .clone()
                .unwrap_or_else(|| "not authenticated".to_string());
            return Err(CloudError::AuthenticationFailed(format!(
                "{}: {}",
                provider.display_name(),
                reason
            ))
            .into());
        }
        tracing::debug!(
            "Authenticated against {} as {}",
            provider.display_name(),
            status.account_info.as_deref().unwrap_or("unknown")
        );
        Ok(status)
    }

    /// Create or converge cluster `name`
    pub async fn provision(&self, name: &str, spec: &ClusterSpec) -> Result<ProvisionReport> {
        validate_stack_name(name)?;
        let program = build_cluster(name, spec, self.engine.provider().as_ref()).await?;
        tracing::info!(
            "Provisioning cluster {} with {} nodes ({} resources)",
            name,
            program.fleet.len(),
            program.graph.len()
        );

        let summary = self
            .engine
            .up(name, &program.graph)
            .await
            .map_err(|e| bootstrap_failure(&program, e))?;

        let state = program.bootstrap.state(&summary.completed);
        tracing::info!("Cluster {} is {}", name, state);
        Ok(ProvisionReport {
            state,
            result: summary.result,
            nodes: program.fleet.len(),
        })
    }

    /// Tear down cluster `name`; `false` when there was nothing to tear down
    pub async fn destroy(&self, name: &str) -> Result<bool> {
        match self.engine.destroy(name).await {
            Ok(result) => {
                tracing::info!(
                    "Destroyed cluster {} ({} resources)",
                    name,
                    result.succeeded.len()
                );
                Ok(true)
            }
            Err(CloudError::StackNotFound(_)) => {
                tracing::info!("No cluster named {}, nothing to destroy", name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of every known cluster
    pub async fn list(&self) -> Result<Vec<String>> {
        Ok(self.engine.list().await?)
    }

    pub async fn fetch_output(&self, name: &str, key: OutputKey) -> Result<Secret<String>> {
        self.engine
            .output(name, key.as_str())
            .await
            .map_err(|e| match e {
                CloudError::StackNotFound(_) => ClusterError::ClusterNotFound(name.to_string()),
                other => other.into(),
            })
    }
}

/// Tag a failed bootstrap command with its step and node
fn bootstrap_failure(program: &ClusterProgram, err: CloudError) -> ClusterError {
    match err {
        CloudError::ResourceFailed {
            resource,
            index: Some(index),
            source,
        } => {
            let step = program
                .resource_at(index)
                .and_then(|id| program.bootstrap.step_of(id));
            match step {
                Some((step, node)) => ClusterError::Bootstrap {
                    step,
                    index: node,
                    source: *source,
                },
                None => ClusterError::Provisioning(CloudError::ResourceFailed {
                    resource,
                    index: Some(index),
                    source,
                }),
            }
        }
        other => ClusterError::Provisioning(other),
    }
}
