//! Apply engine
//!
//! [`Engine::up`] converges a stack towards a [`ResourceGraph`]:
//!
//! 1. refresh recorded resources against the provider
//! 2. apply the graph level by level, each level concurrently
//! 3. delete recorded resources that are no longer declared
//! 4. resolve and store the graph's exports
//!
//! State is saved as soon as each resource is applied, so a failed or interrupted run
//! leaves behind exactly what was realized.

use crate::action::{ActionType, ApplyResult, Plan};
use crate::error::{CloudError, Result};
use crate::graph::{Input, Resource, ResourceGraph, ResourceId, ResourceKind, replace_all};
use crate::provider::{Attributes, CloudProvider, ResourceConfig};
use crate::remote::{Connection, RemoteCommand, RemoteExecutor};
use crate::secret::{Secret, SecretCipher};
use crate::state::{ResourceState, ResourceStatus, StackState, StateManager, StoredValue};
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Key file for sealing secrets, relative to the state directory
pub const SECRET_KEY_FILE: &str = "secret.key";

/// A resolved value and whether a secret flowed into it
#[derive(Debug, Clone)]
struct Resolved {
    value: Value,
    secret: bool,
}

impl Resolved {
    fn plain(value: Value) -> Self {
        Self {
            value,
            secret: false,
        }
    }

    fn as_string(&self) -> String {
        value_to_string(&self.value)
    }
}

/// Attributes of a realized resource, as seen by dependents
#[derive(Debug, Clone, Default)]
struct Realized {
    attributes: HashMap<String, Resolved>,
}

/// A resource with its inputs resolved, ready to apply
struct Prepared {
    id: ResourceId,
    key: String,
    kind: ResourceKind,
    name: String,
    config: Value,
    /// Arguments a secret flowed into
    secret_args: BTreeSet<String>,
    depends_on: Vec<String>,
    prior: Option<ResourceState>,
}

impl Prepared {
    fn resource_config(&self) -> ResourceConfig {
        ResourceConfig::new(self.kind, self.name.clone(), self.config.clone())
    }
}

struct Applied {
    action: ActionType,
    state: ResourceState,
    realized: Realized,
}

/// Outcome of a successful [`Engine::up`]
#[derive(Debug, Clone)]
pub struct UpSummary {
    pub result: ApplyResult,

    /// Resources applied in this run, in completion order
    pub completed: Vec<ResourceId>,
}

/// Drives a [`CloudProvider`] and a [`RemoteExecutor`] from a declared graph
pub struct Engine {
    provider: Arc<dyn CloudProvider>,
    executor: Arc<dyn RemoteExecutor>,
    state: StateManager,
    cipher: SecretCipher,
}

impl Engine {
    /// Create an engine keeping its state under `state_dir`
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        executor: Arc<dyn RemoteExecutor>,
        state_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        let cipher = SecretCipher::load_or_create(&state_dir.join(SECRET_KEY_FILE))?;
        Ok(Self {
            provider,
            executor,
            state: StateManager::new(state_dir),
            cipher,
        })
    }

    pub fn provider(&self) -> &Arc<dyn CloudProvider> {
        &self.provider
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Converge `stack` towards `graph`
    pub async fn up(&self, stack: &str, graph: &ResourceGraph) -> Result<UpSummary> {
        let lock = self.state.acquire_lock(stack).await?;
        let result = self.converge(stack, graph).await;
        let released = lock.release().await;
        let summary = result?;
        released?;
        Ok(summary)
    }

    /// Delete everything recorded for `stack` and forget it
    pub async fn destroy(&self, stack: &str) -> Result<ApplyResult> {
        let lock = self.state.acquire_lock(stack).await?;
        let result = self.teardown(stack).await;
        let released = lock.release().await;
        let result = result?;
        released?;
        Ok(result)
    }

    /// Names of all recorded stacks
    pub async fn list(&self) -> Result<Vec<String>> {
        self.state.list_stacks().await
    }

    /// Reveal an exported output of `stack`
    pub async fn output(&self, stack: &str, name: &str) -> Result<Secret<String>> {
        let state = self
            .state
            .load(stack)
            .await?
            .ok_or_else(|| CloudError::StackNotFound(stack.to_string()))?;
        let stored = state
            .outputs
            .get(name)
            .ok_or_else(|| CloudError::OutputUnavailable(name.to_string()))?;
        let resolved = self.open(stored)?;
        Ok(Secret::new(resolved.as_string()))
    }

    async fn converge(&self, stack: &str, graph: &ResourceGraph) -> Result<UpSummary> {
        let started = Instant::now();
        let mut stack_state = self
            .state
            .load(stack)
            .await?
            .unwrap_or_else(|| StackState::new(stack));

        self.refresh(&mut stack_state).await?;

        let plan = Plan::for_graph(graph, Some(&stack_state));
        tracing::info!("Converging stack {}: {}", stack, plan.summary());

        let mut result = ApplyResult::new();
        let mut completed = Vec::new();
        let mut realized: HashMap<ResourceId, Realized> = HashMap::new();

        for level in graph.levels() {
            let mut prepared = Vec::with_capacity(level.len());
            for id in level {
                let resource = graph.get(id).ok_or(CloudError::UnknownResource(id.index()))?;
                let prior = stack_state.get_resource(&resource.key()).cloned();
                let ready = self
                    .prepare(resource, graph, &realized, prior)
                    .map_err(|e| resource_failed(resource.key(), Some(id), e))?;
                prepared.push(ready);
            }

            let mut pending: FuturesUnordered<_> = prepared
                .into_iter()
                .map(|p| async move {
                    let outcome = self.apply_one(&p).await;
                    (p, outcome)
                })
                .collect();

            // Siblings keep running after a failure; each finished one is recorded at once
            let mut failure = None;
            while let Some((p, outcome)) = pending.next().await {
                match outcome {
                    Ok(applied) => {
                        if applied.action != ActionType::NoOp {
                            tracing::info!("{} {}", applied.action, p.key);
                        }
                        result.add_success(p.key.clone(), applied.action.to_string());
                        stack_state.set_resource(p.key, applied.state);
                        realized.insert(p.id, applied.realized);
                        completed.push(p.id);
                        self.state.save(&stack_state).await?;
                    }
                    Err(e) => {
                        tracing::error!("Failed to apply {}: {}", p.key, e);
                        result.add_failure(p.key.clone(), e.to_string());
                        if failure.is_none() {
                            failure = Some(resource_failed(p.key, Some(p.id), e));
                        }
                    }
                }
            }

            if let Some(err) = failure {
                return Err(err);
            }
        }

        for key in stack_state.deletion_order() {
            if graph.contains_key(&key) {
                continue;
            }
            let Some(recorded) = stack_state.get_resource(&key).cloned() else {
                continue;
            };
            if let Err(e) = self.delete_recorded(&key, &recorded).await {
                self.state.save(&stack_state).await?;
                return Err(resource_failed(key, None, e));
            }
            result.add_success(key.clone(), ActionType::Delete.to_string());
            stack_state.remove_resource(&key);
        }

        stack_state.outputs.clear();
        for (name, input) in graph.exports() {
            let resolved = resolve(input, &realized)?;
            let stored = self.store(&resolved)?;
            stack_state.outputs.insert(name.clone(), stored);
        }
        self.state.save(&stack_state).await?;

        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Stack {} converged: {} resources in {} ms",
            stack,
            stack_state.resources.len(),
            result.duration_ms
        );
        Ok(UpSummary { result, completed })
    }

    async fn teardown(&self, stack: &str) -> Result<ApplyResult> {
        let started = Instant::now();
        let Some(mut stack_state) = self.state.load(stack).await? else {
            return Err(CloudError::StackNotFound(stack.to_string()));
        };

        let plan = Plan::for_destroy(&stack_state);
        tracing::info!("Destroying stack {}: {}", stack, plan.summary());

        let mut result = ApplyResult::new();
        for key in stack_state.deletion_order() {
            let Some(recorded) = stack_state.get_resource(&key).cloned() else {
                continue;
            };
            match self.delete_recorded(&key, &recorded).await {
                Ok(true) => result.add_success(key.clone(), ActionType::Delete.to_string()),
                Ok(false) => {}
                Err(e) => {
                    result.add_failure(key.clone(), e.to_string());
                    self.state.save(&stack_state).await?;
                    return Err(resource_failed(key, None, e));
                }
            }
            stack_state.remove_resource(&key);
        }

        self.state.remove(stack).await?;
        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!("Stack {} destroyed", stack);
        Ok(result)
    }

    /// Drop recorded resources the provider no longer knows about
    async fn refresh(&self, stack_state: &mut StackState) -> Result<()> {
        let candidates: Vec<(String, ResourceState)> = stack_state
            .resources
            .iter()
            .filter(|(_, rs)| is_cloud_resource(rs))
            .map(|(k, rs)| (k.clone(), rs.clone()))
            .collect();

        let checks = join_all(candidates.iter().map(|(_, rs)| self.provider.exists(rs))).await;
        for ((key, _), exists) in candidates.iter().zip(checks) {
            if !exists? {
                tracing::warn!("{} no longer exists, dropping it from state", key);
                stack_state.remove_resource(key);
            }
        }

        // Commands that ran against something now gone must run again
        loop {
            let stale: Vec<String> = stack_state
                .resources
                .iter()
                .filter(|(_, rs)| rs.resource_type == ResourceKind::Command.as_str())
                .filter(|(_, rs)| {
                    rs.depends_on
                        .iter()
                        .any(|dep| !stack_state.resources.contains_key(dep))
                })
                .map(|(k, _)| k.clone())
                .collect();
            if stale.is_empty() {
                break;
            }
            for key in stale {
                tracing::debug!("Forgetting {} since its target is gone", key);
                stack_state.remove_resource(&key);
            }
        }

        Ok(())
    }

    fn prepare(
        &self,
        resource: &Resource,
        graph: &ResourceGraph,
        realized: &HashMap<ResourceId, Realized>,
        prior: Option<ResourceState>,
    ) -> Result<Prepared> {
        let mut config = Map::new();
        let mut secret_args = BTreeSet::new();
        for (name, input) in &resource.args {
            let resolved = resolve(input, realized)?;
            if resolved.secret {
                secret_args.insert(name.clone());
            }
            config.insert(name.clone(), resolved.value);
        }

        let depends_on = resource
            .dependencies()
            .into_iter()
            .filter_map(|dep| graph.get(dep).map(Resource::key))
            .collect();

        Ok(Prepared {
            id: resource.id,
            key: resource.key(),
            kind: resource.kind,
            name: resource.name.clone(),
            config: Value::Object(config),
            secret_args,
            depends_on,
            prior,
        })
    }

    async fn apply_one(&self, p: &Prepared) -> Result<Applied> {
        if p.kind == ResourceKind::Command {
            return self.apply_command(p).await;
        }

        let config = p.resource_config();
        let (action, attributes) = if p.kind.is_data() {
            (ActionType::Read, self.provider.read(&config).await?)
        } else {
            match &p.prior {
                None => (ActionType::Create, self.provider.create(&config).await?),
                Some(prior) => {
                    if self.inputs_unchanged(prior, &p.config)? {
                        return self.unchanged(p, prior);
                    }
                    (
                        ActionType::Update,
                        self.provider.update(&config, prior).await?,
                    )
                }
            }
        };

        self.record(p, action, attributes)
    }

    async fn apply_command(&self, p: &Prepared) -> Result<Applied> {
        let connection = parse_connection(&p.config)?;
        let command_line = |name: &str| {
            p.config
                .get(name)
                .and_then(Value::as_str)
                .map(|line| RemoteCommand::new(line, p.secret_args.contains(name)))
        };
        let create = command_line("create")
            .ok_or_else(|| CloudError::InvalidConfig(format!("{} has no create command", p.key)))?;
        let update = command_line("update");

        // Recorded commands run their update action; without one they only run again
        // when their inputs changed
        let (action, command) = match (&p.prior, update) {
            (None, _) => (ActionType::Create, create),
            (Some(_), Some(update)) => (ActionType::Update, update),
            (Some(prior), None) => {
                if self.inputs_unchanged(prior, &p.config)? {
                    return self.unchanged(p, prior);
                }
                (ActionType::Update, create)
            }
        };

        let stdout = self.executor.run(&connection, &command).await?;
        let mut attributes = Attributes::new();
        attributes.insert("id".to_string(), Value::String(p.name.clone()));
        attributes.insert("stdout".to_string(), Value::String(stdout));
        self.record(p, action, attributes)
    }

    fn unchanged(&self, p: &Prepared, prior: &ResourceState) -> Result<Applied> {
        let mut state = prior.clone();
        state.depends_on = p.depends_on.clone();
        let realized = self.realize(prior)?;
        Ok(Applied {
            action: ActionType::NoOp,
            state,
            realized,
        })
    }

    fn record(&self, p: &Prepared, action: ActionType, attributes: Attributes) -> Result<Applied> {
        let id = attributes
            .get("id")
            .map(value_to_string)
            .unwrap_or_else(|| p.name.clone());

        let mut state =
            ResourceState::new(id, p.kind.as_str()).with_status(ResourceStatus::Running);
        if let Some(prior) = &p.prior {
            state.created_at = prior.created_at;
        }
        state.depends_on = p.depends_on.clone();
        state.inputs = Some(self.store(&Resolved {
            value: p.config.clone(),
            secret: !p.secret_args.is_empty(),
        })?);

        let secret_attributes = p.kind.secret_attributes();
        let mut realized = Realized::default();
        for (name, value) in attributes {
            let resolved = Resolved {
                value,
                secret: secret_attributes.contains(&name.as_str()),
            };
            state.set_attribute(name.clone(), self.store(&resolved)?);
            realized.attributes.insert(name, resolved);
        }

        Ok(Applied {
            action,
            state,
            realized,
        })
    }

    fn realize(&self, recorded: &ResourceState) -> Result<Realized> {
        let mut realized = Realized::default();
        for (name, stored) in &recorded.attributes {
            realized.attributes.insert(name.clone(), self.open(stored)?);
        }
        Ok(realized)
    }

    fn inputs_unchanged(&self, prior: &ResourceState, config: &Value) -> Result<bool> {
        match &prior.inputs {
            Some(stored) => Ok(&self.open(stored)?.value == config),
            None => Ok(false),
        }
    }

    /// Returns whether anything was deleted in the cloud
    async fn delete_recorded(&self, key: &str, recorded: &ResourceState) -> Result<bool> {
        if !is_cloud_resource(recorded) {
            tracing::debug!("Forgetting {}", key);
            return Ok(false);
        }
        self.provider.delete(recorded).await?;
        tracing::info!("delete {}", key);
        Ok(true)
    }

    fn store(&self, resolved: &Resolved) -> Result<StoredValue> {
        if resolved.secret {
            let json = serde_json::to_string(&resolved.value)?;
            Ok(StoredValue::Sealed(self.cipher.seal(&json)?))
        } else {
            Ok(StoredValue::Plain(resolved.value.clone()))
        }
    }

    fn open(&self, stored: &StoredValue) -> Result<Resolved> {
        match stored {
            StoredValue::Plain(value) => Ok(Resolved::plain(value.clone())),
            StoredValue::Sealed(sealed) => {
                let json = self.cipher.open(sealed)?;
                Ok(Resolved {
                    value: serde_json::from_str(json.expose())?,
                    secret: true,
                })
            }
        }
    }
}

fn resource_failed(key: String, id: Option<ResourceId>, source: CloudError) -> CloudError {
    CloudError::ResourceFailed {
        resource: key,
        index: id.map(ResourceId::index),
        source: Box::new(source),
    }
}

/// Recorded resources that exist in the cloud (not lookups, not commands)
fn is_cloud_resource(recorded: &ResourceState) -> bool {
    match recorded.resource_type.parse::<ResourceKind>() {
        Ok(kind) => !kind.is_data() && kind != ResourceKind::Command,
        Err(_) => false,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn resolve(input: &Input, realized: &HashMap<ResourceId, Realized>) -> Result<Resolved> {
    match input {
        Input::Literal(value) => Ok(Resolved::plain(value.clone())),
        Input::Output {
            resource,
            attribute,
        } => realized
            .get(resource)
            .and_then(|r| r.attributes.get(attribute))
            .cloned()
            .ok_or_else(|| {
                CloudError::UnresolvedInput(format!(
                    "resource {} has no attribute '{}'",
                    resource, attribute
                ))
            }),
        Input::Concat(parts) => {
            let mut out = String::new();
            let mut secret = false;
            for part in parts {
                let resolved = resolve(part, realized)?;
                secret |= resolved.secret;
                out.push_str(&resolved.as_string());
            }
            Ok(Resolved {
                value: Value::String(out),
                secret,
            })
        }
        Input::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            let mut secret = false;
            for item in items {
                let resolved = resolve(item, realized)?;
                secret |= resolved.secret;
                values.push(resolved.value);
            }
            Ok(Resolved {
                value: Value::Array(values),
                secret,
            })
        }
        Input::Object(fields) => {
            let mut map = Map::new();
            let mut secret = false;
            for (name, field) in fields {
                let resolved = resolve(field, realized)?;
                secret |= resolved.secret;
                map.insert(name.clone(), resolved.value);
            }
            Ok(Resolved {
                value: Value::Object(map),
                secret,
            })
        }
        Input::Trim(inner) => {
            let resolved = resolve(inner, realized)?;
            Ok(Resolved {
                value: Value::String(resolved.as_string().trim().to_string()),
                secret: resolved.secret,
            })
        }
        Input::Replace {
            source,
            replacements,
        } => {
            let source = resolve(source, realized)?;
            let mut secret = source.secret;
            let mut pairs = Vec::with_capacity(replacements.len());
            for (pattern, replacement) in replacements {
                let resolved = resolve(replacement, realized)?;
                secret |= resolved.secret;
                pairs.push((pattern.as_str(), resolved.as_string()));
            }
            let borrowed: Vec<(&str, &str)> =
                pairs.iter().map(|(p, r)| (*p, r.as_str())).collect();
            Ok(Resolved {
                value: Value::String(replace_all(&source.as_string(), &borrowed)),
                secret,
            })
        }
        Input::Secret(inner) => {
            let resolved = resolve(inner, realized)?;
            Ok(Resolved {
                value: resolved.value,
                secret: true,
            })
        }
    }
}

fn parse_connection(config: &Value) -> Result<Connection> {
    let conn = config
        .get("connection")
        .ok_or_else(|| CloudError::InvalidConfig("command has no connection".to_string()))?;
    let field = |name: &str| -> Result<String> {
        conn.get(name)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| CloudError::InvalidConfig(format!("connection has no {}", name)))
    };

    let port = match conn.get("port").and_then(Value::as_u64) {
        Some(port) => u16::try_from(port)
            .map_err(|_| CloudError::InvalidConfig(format!("invalid ssh port {}", port)))?,
        None => 22,
    };

    Ok(Connection::new(
        field("host")?,
        field("user")?,
        Secret::new(field("private_key")?),
    )
    .with_port(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Args, args};
    use crate::provider::{AuthStatus, ImageInfo};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeProvider {
        calls: Mutex<Vec<String>>,
        gone: Mutex<BTreeSet<String>>,
        next_id: AtomicUsize,
        /// Creates of this kind never return
        hang_on: Option<ResourceKind>,
        /// Creates of this kind fail
        fail_on: Option<ResourceKind>,
    }

    impl FakeProvider {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl CloudProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        fn display_name(&self) -> &str {
            "Fake"
        }

        async fn check_auth(&self) -> Result<AuthStatus> {
            Ok(AuthStatus::ok("tester"))
        }

        async fn lookup_image(&self, name: &str) -> Result<Option<ImageInfo>> {
            Ok(Some(ImageInfo {
                id: "img-1".into(),
                name: name.into(),
            }))
        }

        async fn read(&self, resource: &ResourceConfig) -> Result<Attributes> {
            self.log(format!("read {}", resource.key()));
            Ok(Attributes::from([("id".to_string(), json!("ext-1"))]))
        }

        async fn create(&self, resource: &ResourceConfig) -> Result<Attributes> {
            self.log(format!("create {}", resource.key()));
            if self.hang_on == Some(resource.kind) {
                std::future::pending::<()>().await;
            }
            if self.fail_on == Some(resource.kind) {
                return Err(CloudError::ApiError("quota exceeded".into()));
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut attrs = Attributes::from([
                ("id".to_string(), json!(format!("{}-{}", resource.kind, n))),
                ("config".to_string(), resource.config.clone()),
            ]);
            if resource.kind == ResourceKind::Keypair {
                attrs.insert("private_key".into(), json!("PRIVATE-KEY-MATERIAL"));
            }
            if resource.kind == ResourceKind::Instance {
                attrs.insert("access_ip_v4".into(), json!(format!("10.0.0.{}", n)));
            }
            Ok(attrs)
        }

        async fn exists(&self, resource: &ResourceState) -> Result<bool> {
            Ok(!self.gone.lock().unwrap().contains(&resource.id))
        }

        async fn delete(&self, resource: &ResourceState) -> Result<()> {
            self.log(format!("delete {}", resource.id));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeExecutor {
        runs: Mutex<Vec<(String, String)>>,
        sensitive: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl RemoteExecutor for FakeExecutor {
        async fn run(&self, connection: &Connection, command: &RemoteCommand) -> Result<String> {
            let line = command.expose().to_string();
            self.runs
                .lock()
                .unwrap()
                .push((connection.host.clone(), line.clone()));
            if command.is_sensitive() {
                self.sensitive.lock().unwrap().push(line.clone());
            }
            if self.fail_on.as_deref() == Some(line.as_str()) {
                return Err(CloudError::CommandFailed("exit status 1".into()));
            }
            Ok(format!("  out of {}\n", line))
        }
    }

    fn engine(
        dir: &Path,
        provider: Arc<FakeProvider>,
        executor: Arc<FakeExecutor>,
    ) -> Engine {
        Engine::new(provider, executor, dir).unwrap()
    }

    /// keypair -> instance -> command, with the command output exported as a secret
    fn sample_graph(with_update: bool) -> (ResourceGraph, ResourceId, ResourceId) {
        let mut graph = ResourceGraph::new();
        let key = graph
            .declare(
                ResourceKind::Keypair,
                "demo",
                args([("name", Input::from("demo"))]),
                &[],
            )
            .unwrap();
        let node = graph
            .declare(
                ResourceKind::Instance,
                "demo-node-0",
                args([("key_pair", Input::output(key, "id"))]),
                &[],
            )
            .unwrap();

        let mut cmd_args = args([
            (
                "connection",
                Input::object([
                    ("host", Input::output(node, "access_ip_v4")),
                    ("user", Input::from("ubuntu")),
                    ("private_key", Input::output(key, "private_key")),
                ]),
            ),
            ("create", Input::from("cat token")),
        ]);
        if with_update {
            cmd_args.insert("update".into(), Input::from("echo ok"));
        }
        let cmd = graph
            .declare(ResourceKind::Command, "token", cmd_args, &[node])
            .unwrap();
        graph
            .export("token", Input::output(cmd, "stdout").trim().secret())
            .unwrap();
        (graph, node, cmd)
    }

    #[tokio::test]
    async fn test_up_resolves_outputs_and_seals_secrets() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let executor = Arc::new(FakeExecutor::default());
        let engine = engine(dir.path(), provider.clone(), executor.clone());
        let (graph, _, cmd) = sample_graph(false);

        let summary = engine.up("demo", &graph).await.unwrap();
        assert!(summary.result.is_success());
        assert_eq!(summary.completed.len(), 3);
        assert_eq!(summary.completed.last(), Some(&cmd));

        assert_eq!(
            provider.calls(),
            vec!["create keypair:demo", "create instance:demo-node-0"]
        );
        let runs = executor.runs.lock().unwrap().clone();
        assert_eq!(runs, vec![("10.0.0.1".to_string(), "cat token".to_string())]);

        let token = engine.output("demo", "token").await.unwrap();
        assert_eq!(token.expose(), "out of cat token");

        let raw = std::fs::read_to_string(dir.path().join("stacks/demo.json")).unwrap();
        assert!(!raw.contains("PRIVATE-KEY-MATERIAL"));
        assert!(!raw.contains("out of cat token"));

        let stack = engine.state().load("demo").await.unwrap().unwrap();
        let instance = stack.get_resource("instance:demo-node-0").unwrap();
        assert_eq!(instance.depends_on, vec!["keypair:demo"]);
    }

    #[tokio::test]
    async fn test_second_pass_converges_without_changes() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let executor = Arc::new(FakeExecutor::default());
        let engine = engine(dir.path(), provider.clone(), executor.clone());
        let (graph, _, _) = sample_graph(false);

        engine.up("demo", &graph).await.unwrap();
        let summary = engine.up("demo", &graph).await.unwrap();

        assert_eq!(provider.calls().len(), 2);
        assert_eq!(executor.runs.lock().unwrap().len(), 1);
        assert!(
            summary
                .result
                .succeeded
                .iter()
                .all(|r| r.message == "no-op")
        );
        let token = engine.output("demo", "token").await.unwrap();
        assert_eq!(token.expose(), "out of cat token");
    }

    #[tokio::test]
    async fn test_second_pass_runs_update_command() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let executor = Arc::new(FakeExecutor::default());
        let engine = engine(dir.path(), provider.clone(), executor.clone());
        let (graph, _, _) = sample_graph(true);

        engine.up("demo", &graph).await.unwrap();
        engine.up("demo", &graph).await.unwrap();

        let commands: Vec<String> = executor
            .runs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect();
        assert_eq!(commands, vec!["cat token", "echo ok"]);
    }

    #[tokio::test]
    async fn test_failure_keeps_completed_resources() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let executor = Arc::new(FakeExecutor {
            fail_on: Some("cat token".into()),
            ..Default::default()
        });
        let engine = engine(dir.path(), provider, executor);
        let (graph, _, cmd) = sample_graph(false);

        let err = engine.up("demo", &graph).await.unwrap_err();
        match &err {
            CloudError::ResourceFailed {
                resource, index, ..
            } => {
                assert_eq!(resource, "command:token");
                assert_eq!(*index, Some(cmd.index()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root(), CloudError::CommandFailed(_)));

        let stack = engine.state().load("demo").await.unwrap().unwrap();
        assert_eq!(stack.resources.len(), 2);
        assert!(stack.outputs.is_empty());
        // Lock released after the failure
        engine.state().acquire_lock("demo").await.unwrap();
    }

    /// A security group and an instance in the same level
    fn sibling_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .declare(ResourceKind::SecurityGroup, "demo", Args::new(), &[])
            .unwrap();
        graph
            .declare(ResourceKind::Instance, "demo-node-0", Args::new(), &[])
            .unwrap();
        assert_eq!(graph.levels().len(), 1);
        graph
    }

    #[tokio::test]
    async fn test_interrupted_run_keeps_created_resources() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider {
            hang_on: Some(ResourceKind::Instance),
            ..Default::default()
        });
        let engine = engine(dir.path(), provider.clone(), Arc::new(FakeExecutor::default()));
        let graph = sibling_graph();

        let interrupted =
            tokio::time::timeout(Duration::from_millis(200), engine.up("demo", &graph)).await;
        assert!(interrupted.is_err());

        let stack = engine.state().load("demo").await.unwrap().unwrap();
        assert!(stack.get_resource("security-group:demo").is_some());
        assert!(stack.get_resource("instance:demo-node-0").is_none());

        // The next pass only creates what is missing
        let provider = Arc::new(FakeProvider::default());
        let engine = self::engine(dir.path(), provider.clone(), Arc::new(FakeExecutor::default()));
        engine.up("demo", &graph).await.unwrap();
        assert_eq!(provider.calls(), vec!["create instance:demo-node-0"]);
    }

    #[tokio::test]
    async fn test_failed_sibling_keeps_created_resources() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider {
            fail_on: Some(ResourceKind::Instance),
            ..Default::default()
        });
        let engine = engine(dir.path(), provider, Arc::new(FakeExecutor::default()));

        let err = engine.up("demo", &sibling_graph()).await.unwrap_err();
        assert!(matches!(err.root(), CloudError::ApiError(_)));

        let stack = engine.state().load("demo").await.unwrap().unwrap();
        assert_eq!(
            stack.resources.keys().collect::<Vec<_>>(),
            vec!["security-group:demo"]
        );
    }

    #[tokio::test]
    async fn test_commands_built_from_secrets_are_sensitive() {
        let dir = tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::default());
        let engine = engine(dir.path(), Arc::new(FakeProvider::default()), executor.clone());
        let (mut graph, node, cmd) = sample_graph(false);
        graph
            .declare(
                ResourceKind::Command,
                "join",
                args([
                    (
                        "connection",
                        Input::object([
                            ("host", Input::output(node, "access_ip_v4")),
                            ("user", Input::from("ubuntu")),
                            ("private_key", Input::from("KEY")),
                        ]),
                    ),
                    (
                        "create",
                        Input::concat([Input::from("join "), Input::output(cmd, "stdout").trim()]),
                    ),
                ]),
                &[],
            )
            .unwrap();

        engine.up("demo", &graph).await.unwrap();

        let sensitive = executor.sensitive.lock().unwrap().clone();
        assert_eq!(sensitive, vec!["join out of cat token"]);
    }

    #[tokio::test]
    async fn test_orphans_are_deleted() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let engine = engine(dir.path(), provider.clone(), Arc::new(FakeExecutor::default()));

        let mut graph = ResourceGraph::new();
        graph
            .declare(ResourceKind::SecurityGroup, "demo", Args::new(), &[])
            .unwrap();
        graph
            .declare(ResourceKind::SecurityGroupRule, "demo-extra-8080", Args::new(), &[])
            .unwrap();
        engine.up("demo", &graph).await.unwrap();

        let mut smaller = ResourceGraph::new();
        smaller
            .declare(ResourceKind::SecurityGroup, "demo", Args::new(), &[])
            .unwrap();
        engine.up("demo", &smaller).await.unwrap();

        assert_eq!(
            provider.calls().last().map(String::as_str),
            Some("delete security-group-rule-1")
        );
        let stack = engine.state().load("demo").await.unwrap().unwrap();
        assert_eq!(stack.resources.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_recreates_vanished_resources() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let executor = Arc::new(FakeExecutor::default());
        let engine = engine(dir.path(), provider.clone(), executor.clone());
        let (graph, _, _) = sample_graph(false);

        engine.up("demo", &graph).await.unwrap();
        provider.gone.lock().unwrap().insert("instance-1".into());
        engine.up("demo", &graph).await.unwrap();

        let calls = provider.calls();
        assert_eq!(calls.last().map(String::as_str), Some("create instance:demo-node-0"));
        // The command against the vanished instance runs again on the new one
        let runs = executor.runs.lock().unwrap().clone();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].0, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_destroy_reverses_dependencies() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let engine = engine(dir.path(), provider.clone(), Arc::new(FakeExecutor::default()));
        let (graph, _, _) = sample_graph(false);

        engine.up("demo", &graph).await.unwrap();
        let result = engine.destroy("demo").await.unwrap();

        assert_eq!(result.succeeded.len(), 2);
        let calls = provider.calls();
        assert_eq!(&calls[2..], ["delete instance-1", "delete keypair-0"]);
        assert!(engine.list().await.unwrap().is_empty());

        assert!(matches!(
            engine.destroy("demo").await,
            Err(CloudError::StackNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_output_errors() {
        let dir = tempdir().unwrap();
        let engine = engine(
            dir.path(),
            Arc::new(FakeProvider::default()),
            Arc::new(FakeExecutor::default()),
        );
        assert!(matches!(
            engine.output("nothing", "kubeconfig").await,
            Err(CloudError::StackNotFound(_))
        ));

        let (graph, _, _) = sample_graph(false);
        engine.up("demo", &graph).await.unwrap();
        assert!(matches!(
            engine.output("demo", "kubeconfig").await,
            Err(CloudError::OutputUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_data_resources_are_read_every_pass() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let engine = engine(dir.path(), provider.clone(), Arc::new(FakeExecutor::default()));

        let mut graph = ResourceGraph::new();
        let ext = graph
            .declare(
                ResourceKind::ExternalNetwork,
                "public",
                args([("name", Input::from("public"))]),
                &[],
            )
            .unwrap();
        graph
            .declare(
                ResourceKind::Router,
                "demo",
                args([("external_network_id", Input::output(ext, "id"))]),
                &[],
            )
            .unwrap();

        engine.up("demo", &graph).await.unwrap();
        engine.up("demo", &graph).await.unwrap();

        assert_eq!(
            provider.calls(),
            vec![
                "read external-network:public",
                "create router:demo",
                "read external-network:public"
            ]
        );
    }

    #[test]
    fn test_resolve_replace_and_concat() {
        let id = ResourceId(0);
        let mut realized = HashMap::new();
        realized.insert(
            id,
            Realized {
                attributes: HashMap::from([
                    ("address".to_string(), Resolved::plain(json!("1.2.3.4"))),
                    (
                        "stdout".to_string(),
                        Resolved {
                            value: json!("server: https://127.0.0.1:6443\n"),
                            secret: true,
                        },
                    ),
                ]),
            },
        );

        let url = resolve(
            &Input::concat([
                Input::from("https://"),
                Input::output(id, "address"),
                Input::from(":6443"),
            ]),
            &realized,
        )
        .unwrap();
        assert_eq!(url.value, json!("https://1.2.3.4:6443"));
        assert!(!url.secret);

        let rewritten = resolve(
            &Input::output(id, "stdout").replace_all([("127.0.0.1", Input::output(id, "address"))]),
            &realized,
        )
        .unwrap();
        assert_eq!(rewritten.value, json!("server: https://1.2.3.4:6443\n"));
        assert!(rewritten.secret);

        let missing = resolve(&Input::output(id, "nope"), &realized);
        assert!(matches!(missing, Err(CloudError::UnresolvedInput(_))));
    }
}
