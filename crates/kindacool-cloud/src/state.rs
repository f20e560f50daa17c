//! State management for provisioned stacks
//!
//! Each stack (one cluster) is tracked in `<state_dir>/stacks/<stack>.json`. Secret
//! values are stored sealed (see [`SecretCipher`](crate::secret::SecretCipher)).

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STACKS_DIR: &str = "stacks";
const LOCKS_DIR: &str = "locks";
const STATE_EXT: &str = "json";
const BACKUP_EXT: &str = "json.backup";
const LOCK_EXT: &str = "lock";

/// State of one stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State file version
    pub version: u32,

    /// Stack name
    pub name: String,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by kind:name
    pub resources: BTreeMap<String, ResourceState>,

    /// Exported stack outputs
    #[serde(default)]
    pub outputs: BTreeMap<String, StoredValue>,
}

impl StackState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            name: name.into(),
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add or update a resource
    pub fn set_resource(&mut self, key: String, state: ResourceState) {
        self.resources.insert(key, state);
        self.updated_at = Utc::now();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, key: &str) -> Option<ResourceState> {
        let result = self.resources.remove(key);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    /// Get a resource by key
    pub fn get_resource(&self, key: &str) -> Option<&ResourceState> {
        self.resources.get(key)
    }

    /// Keys in an order that deletes dependents before their dependencies
    ///
    /// Dependencies that are no longer recorded are ignored. Ties are broken by key so
    /// the order is deterministic.
    pub fn deletion_order(&self) -> Vec<String> {
        let mut remaining: BTreeMap<&str, &ResourceState> = self
            .resources
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .keys()
                .filter(|key| {
                    !remaining
                        .values()
                        .any(|other| other.depends_on.iter().any(|d| d == *key))
                })
                .copied()
                .collect();

            // A corrupted file could carry a cycle; fall back to key order
            let batch = if ready.is_empty() {
                remaining.keys().copied().collect()
            } else {
                ready
            };

            for key in batch {
                remaining.remove(key);
                order.push(key.to_string());
            }
        }

        order
    }
}

/// A value in the state file, either plain or sealed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredValue {
    Plain(serde_json::Value),
    /// `base64(nonce || ciphertext)` of the JSON encoding
    Sealed(String),
}

/// State of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-specific resource ID
    pub id: String,

    /// Resource type
    pub resource_type: String,

    /// Current status
    pub status: ResourceStatus,

    /// Resource attributes (IP, private key, stdout, ...)
    pub attributes: HashMap<String, StoredValue>,

    /// Resolved inputs the resource was last applied with
    #[serde(default)]
    pub inputs: Option<StoredValue>,

    /// Keys of the resources this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            status: ResourceStatus::Unknown,
            attributes: HashMap::new(),
            inputs: None,
            depends_on: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes
            .insert(key.into(), StoredValue::Plain(value));
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: StoredValue) {
        self.attributes.insert(key.into(), value);
        self.updated_at = Utc::now();
    }

    /// Read a plain attribute; sealed attributes are never returned here
    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.attributes.get(key) {
            Some(StoredValue::Plain(v)) => serde_json::from_value(v.clone()).ok(),
            _ => None,
        }
    }
}

/// Status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Resource is running/active
    Running,
    /// Resource is in error state
    Error,
    /// Status is unknown
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Running => write!(f, "running"),
            ResourceStatus::Error => write!(f, "error"),
            ResourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Stack names end up in file names
pub fn validate_stack_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CloudError::InvalidConfig(format!(
            "invalid stack name '{}': use letters, digits, '-', '_' or '.'",
            name
        )))
    }
}

/// State manager for reading/writing stack files
#[derive(Debug, Clone)]
pub struct StateManager {
    /// State directory
    root: PathBuf,
}

impl StateManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stacks_dir(&self) -> PathBuf {
        self.root.join(STACKS_DIR)
    }

    fn state_path(&self, stack: &str) -> PathBuf {
        self.stacks_dir().join(format!("{}.{}", stack, STATE_EXT))
    }

    fn backup_path(&self, stack: &str) -> PathBuf {
        self.stacks_dir().join(format!("{}.{}", stack, BACKUP_EXT))
    }

    fn lock_path(&self, stack: &str) -> PathBuf {
        self.root.join(LOCKS_DIR).join(format!("{}.{}", stack, LOCK_EXT))
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load a stack, `None` if it was never provisioned
    pub async fn load(&self, stack: &str) -> Result<Option<StackState>> {
        validate_stack_name(stack)?;
        let path = self.state_path(stack);
        if !path.exists() {
            tracing::debug!("No state file for stack {}", stack);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let state: StackState = serde_json::from_str(&content)?;

        // Version check
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(
            "Loaded stack {} with {} resources",
            stack,
            state.resources.len()
        );
        Ok(Some(state))
    }

    /// Save a stack
    pub async fn save(&self, state: &StackState) -> Result<()> {
        validate_stack_name(&state.name)?;
        self.ensure_dir(&self.stacks_dir()).await?;

        let path = self.state_path(&state.name);
        let backup = self.backup_path(&state.name);

        // The previous state stays in place until the new one replaces it
        if path.exists() {
            fs::copy(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let dir = self.stacks_dir();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, content.as_bytes()))
            .await
            .map_err(|e| CloudError::StateError(format!("state writer failed: {}", e)))??;

        tracing::debug!(
            "Saved stack {} with {} resources",
            state.name,
            state.resources.len()
        );
        Ok(())
    }

    /// Forget a stack entirely
    pub async fn remove(&self, stack: &str) -> Result<()> {
        validate_stack_name(stack)?;
        for path in [self.state_path(stack), self.backup_path(stack)] {
            if path.exists() {
                fs::remove_file(&path).await?;
            }
        }
        tracing::debug!("Removed stack {}", stack);
        Ok(())
    }

    /// Names of all recorded stacks, sorted
    pub async fn list_stacks(&self) -> Result<Vec<String>> {
        let dir = self.stacks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STATE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Acquire a lock for exclusive access to a stack
    pub async fn acquire_lock(&self, stack: &str) -> Result<StateLock> {
        validate_stack_name(stack)?;
        let lock_path = self.lock_path(stack);
        if let Some(parent) = lock_path.parent() {
            self.ensure_dir(parent).await?;
        }

        // Check for existing lock
        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // Check if lock is stale (older than 1 hour)
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "Stack {} is locked by {} (pid {}) since {}",
                    stack, lock_info.holder, lock_info.pid, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock on {} from {}", stack, lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired lock on stack {}", stack);
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

/// Write `content` to a temporary file in `dir`, then rename it over `path`
fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tempfile::Builder::new()
        .prefix(".state-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    #[serde(default)]
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for a stack lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released stack lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
