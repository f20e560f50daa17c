pub mod create;
pub mod destroy;
pub mod kubeconfig;
pub mod ls;
pub mod sshkey;

use kindacool_cloud::SshExecutor;
use kindacool_cloud_openstack::OpenStackProvider;
use kindacool_k3s::ClusterManager;
use std::sync::Arc;

/// Manager over the OpenStack provider, with state in the configured state dir
pub fn manager() -> anyhow::Result<ClusterManager> {
    let state_dir = kindacool_config::state_dir()?;
    tracing::debug!("Using state directory {}", state_dir.display());
    Ok(ClusterManager::new(
        Arc::new(OpenStackProvider::new()),
        Arc::new(SshExecutor::new()),
        state_dir,
    )?)
}
