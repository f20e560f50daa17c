//! Kubeconfig rewriting
//!
//! k3s writes an admin kubeconfig that points at the loopback address and names
//! everything `default`. Before it leaves the control plane it is pointed at the
//! machine's reachable address and renamed after the cluster.

use crate::error::Result;
use kindacool_cloud::{Input, replace_all};
use serde::Deserialize;

pub const LOOPBACK: &str = "127.0.0.1";
pub const LOCALHOST: &str = "localhost";
pub const DEFAULT_NAME: &str = "default";

/// Context, user and cluster name used in a cluster's kubeconfig
pub fn context_name(cluster: &str) -> String {
    format!("{}-{}", kindacool_config::PRODUCT, cluster)
}

/// Rewrite a kubeconfig that is already known
pub fn rewrite(raw: &str, host: &str, cluster: &str) -> String {
    let name = context_name(cluster);
    replace_all(
        raw,
        &[(LOOPBACK, host), (LOCALHOST, host), (DEFAULT_NAME, &name)],
    )
}

/// Rewrite a kubeconfig once the engine has resolved `raw` and `host`
pub fn rewrite_input(raw: Input, host: Input, cluster: &str) -> Input {
    raw.replace_all([
        (LOOPBACK, host.clone()),
        (LOCALHOST, host),
        (DEFAULT_NAME, Input::from(context_name(cluster))),
    ])
}

#[derive(Debug, Deserialize)]
struct RawKubeconfig {
    #[serde(default, rename = "current-context")]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<Named>,
    #[serde(default)]
    users: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEndpoint,
}

#[derive(Debug, Deserialize)]
struct ClusterEndpoint {
    server: String,
}

/// Names and endpoints of a kubeconfig, without any credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigSummary {
    pub current_context: Option<String>,
    /// `(name, server)` per cluster entry
    pub clusters: Vec<(String, String)>,
    pub contexts: Vec<String>,
    pub users: Vec<String>,
}

impl KubeconfigSummary {
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawKubeconfig = serde_yaml::from_str(content)?;
        Ok(Self {
            current_context: raw.current_context,
            clusters: raw
                .clusters
                .into_iter()
                .map(|c| (c.name, c.cluster.server))
                .collect(),
            contexts: raw.contexts.into_iter().map(|c| c.name).collect(),
            users: raw.users.into_iter().map(|u| u.name).collect(),
        })
    }

    /// API server of the first cluster entry
    pub fn server(&self) -> Option<&str> {
        self.clusters.first().map(|(_, server)| server.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K3S_YAML: &str = r#"apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTg==
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
preferences: {}
users:
- name: default
  user:
    client-certificate-data: LS0tLS1CRUdJTg==
    client-key-data: LS0tLS1CRUdJTg==
"#;

    #[test]
    fn test_rewrite_points_at_host() {
        let out = rewrite(K3S_YAML, "203.0.113.7", "demo");

        assert!(!out.contains("127.0.0.1"));
        assert!(!out.contains("localhost"));
        assert!(!out.contains("default"));
        assert!(out.contains("server: https://203.0.113.7:6443"));

        let summary = KubeconfigSummary::parse(&out).unwrap();
        assert_eq!(summary.current_context.as_deref(), Some("kindacool-demo"));
        assert_eq!(summary.contexts, vec!["kindacool-demo"]);
        assert_eq!(summary.users, vec!["kindacool-demo"]);
        assert_eq!(summary.server(), Some("https://203.0.113.7:6443"));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let once = rewrite(K3S_YAML, "203.0.113.7", "demo");
        let twice = rewrite(&once, "203.0.113.7", "demo");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_localhost_server() {
        let raw = "server: https://localhost:6443\n";
        assert_eq!(rewrite(raw, "10.0.0.5", "x"), "server: https://10.0.0.5:6443\n");
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(KubeconfigSummary::parse("clusters: [").is_err());
    }
}
