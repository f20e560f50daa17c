//! Local directories used by kindacool
//!
//! - state directory: per-cluster state files and the secret key
//!   (`KINDACOOL_STATE_DIR`, else `<config dir>/kindacool/state`)
//! - kube directory: `~/.kube`, holding one `kindacool-<cluster>.yaml` per cluster

pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};

/// Product name, used for directory and file names
pub const PRODUCT: &str = "kindacool";

/// Overrides the state directory
pub const STATE_DIR_ENV: &str = "KINDACOOL_STATE_DIR";

/// kindacool's config directory, created if missing
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join(PRODUCT);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Where cluster state and the secret key live
///
/// 1. `KINDACOOL_STATE_DIR`
/// 2. `<config dir>/kindacool/state`
pub fn state_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(STATE_DIR_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => get_config_dir()?.join("state"),
    };

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("Created state directory: {}", dir.display());
    }

    Ok(dir)
}

/// `~/.kube`, created if missing
pub fn kube_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .ok_or(ConfigError::HomeDirNotFound)?
        .join(".kube");

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }

    Ok(dir)
}

/// Kubeconfig file name for a cluster inside `dir`
pub fn kubeconfig_path(dir: &Path, cluster: &str) -> PathBuf {
    dir.join(format!("{}-{}.yaml", PRODUCT, cluster))
}

/// `~/.kube/kindacool-<cluster>.yaml`
pub fn kubeconfig_file(cluster: &str) -> Result<PathBuf> {
    Ok(kubeconfig_path(&kube_dir()?, cluster))
}

/// Write a cluster's kubeconfig, readable by the owner only
pub fn write_kubeconfig(cluster: &str, content: &str) -> Result<PathBuf> {
    let path = kubeconfig_file(cluster)?;
    write_private(&path, content.as_bytes())?;
    tracing::debug!("Wrote kubeconfig to {}", path.display());
    Ok(path)
}

/// Remove a cluster's kubeconfig; a missing file is not an error
pub fn remove_kubeconfig(cluster: &str) -> Result<bool> {
    let path = kubeconfig_file(cluster)?;
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies to new files
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(content)
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, content)
}
