//! Provider and executor doubles shared by the unit tests

use async_trait::async_trait;
use kindacool_cloud::{
    Attributes, AuthStatus, CloudError, CloudProvider, Connection, ImageInfo, RemoteCommand,
    RemoteExecutor, ResourceConfig, ResourceKind, ResourceState, Result,
};
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const TOKEN: &str = "K10abc::server:def";

pub const K3S_YAML: &str = "apiVersion: v1
clusters:
- cluster:
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
users:
- name: default
  user:
    token: abc
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageLookup {
    #[default]
    Found,
    Missing,
    Broken,
}

#[derive(Default)]
pub struct FakeProvider {
    pub image: ImageLookup,
    pub unauthenticated: bool,
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) lookups: AtomicUsize,
    pub(crate) next_id: AtomicUsize,
}

impl FakeProvider {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of `create <kind>:...` calls for `kind`
    pub fn created(&self, kind: ResourceKind) -> usize {
        let prefix = format!("create {}:", kind);
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
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
        "Fake Cloud"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        if self.unauthenticated {
            Ok(AuthStatus::failed("no OS_AUTH_URL"))
        } else {
            Ok(AuthStatus::ok("tester"))
        }
    }

    async fn lookup_image(&self, name: &str) -> Result<Option<ImageInfo>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.image {
            ImageLookup::Found => Ok(Some(ImageInfo {
                id: "img-1".into(),
                name: name.into(),
            })),
            ImageLookup::Missing => Ok(None),
            ImageLookup::Broken => Err(CloudError::ApiError("image service down".into())),
        }
    }

    async fn read(&self, resource: &ResourceConfig) -> Result<Attributes> {
        self.log(format!("read {}", resource.key()));
        Ok(Attributes::from([
            ("id".to_string(), json!("ext-net-id")),
            ("name".to_string(), json!(resource.name)),
        ]))
    }

    async fn create(&self, resource: &ResourceConfig) -> Result<Attributes> {
        self.log(format!("create {}", resource.key()));
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut attrs = Attributes::from([
            ("id".to_string(), json!(format!("{}-{}", resource.kind, n))),
            ("name".to_string(), json!(resource.name)),
        ]);
        match resource.kind {
            ResourceKind::Keypair => {
                attrs.insert("private_key".into(), json!("-----BEGIN KEY-----"));
            }
            ResourceKind::Instance => {
                attrs.insert("access_ip_v4".into(), json!(format!("10.0.0.{}", n)));
            }
            ResourceKind::FloatingIp => {
                attrs.insert("address".into(), json!(format!("203.0.113.{}", n)));
            }
            _ => {}
        }
        Ok(attrs)
    }

    async fn exists(&self, _resource: &ResourceState) -> Result<bool> {
        Ok(true)
    }

    async fn delete(&self, resource: &ResourceState) -> Result<()> {
        self.log(format!("delete {}", resource.resource_type));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeExecutor {
    /// Commands containing this text fail
    pub fail_on: Option<String>,
    pub(crate) runs: Mutex<Vec<(String, String)>>,
    pub(crate) redacted: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn failing_on(text: &str) -> Self {
        Self {
            fail_on: Some(text.to_string()),
            ..Default::default()
        }
    }

    /// `(host, command)` in execution order
    pub fn runs(&self) -> Vec<(String, String)> {
        self.runs.lock().unwrap().clone()
    }

    /// Commands that reached the executor marked sensitive
    pub fn redacted(&self) -> Vec<String> {
        self.redacted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn run(&self, connection: &Connection, command: &RemoteCommand) -> Result<String> {
        if command.is_sensitive() {
            self.redacted.lock().unwrap().push(command.expose().to_string());
        }
        let command = command.expose();
        self.runs
            .lock()
            .unwrap()
            .push((connection.host.clone(), command.to_string()));

        if let Some(text) = &self.fail_on {
            if command.contains(text.as_str()) {
                return Err(CloudError::CommandFailed(format!(
                    "ssh {}: exit status 1",
                    connection.host
                )));
            }
        }

        let stdout = if command.ends_with("node-token") {
            format!("{}\n", TOKEN)
        } else if command.ends_with("k3s.yaml") {
            K3S_YAML.to_string()
        } else {
            String::new()
        };
        Ok(stdout)
    }
}
