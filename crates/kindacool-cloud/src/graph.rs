//! Declared resource graph
//!
//! Resources live in an arena and refer to each other by [`ResourceId`]. An edge exists
//! when a resource lists another in `depends_on` or reads one of its outputs through an
//! [`Input`]. Both kinds of edge can only point at resources declared earlier, so every
//! graph is acyclic by construction.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Arena index of a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub(crate) usize);

impl ResourceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resource kinds the engine knows how to manage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Keypair,
    SecurityGroup,
    SecurityGroupRule,
    Network,
    Subnet,
    /// Lookup of an existing network, never created or deleted
    ExternalNetwork,
    Router,
    RouterInterface,
    FloatingIp,
    FloatingIpAssociate,
    Instance,
    /// Shell command run on a remote host over SSH
    Command,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Keypair => "keypair",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::SecurityGroupRule => "security-group-rule",
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::ExternalNetwork => "external-network",
            ResourceKind::Router => "router",
            ResourceKind::RouterInterface => "router-interface",
            ResourceKind::FloatingIp => "floating-ip",
            ResourceKind::FloatingIpAssociate => "floating-ip-associate",
            ResourceKind::Instance => "instance",
            ResourceKind::Command => "command",
        }
    }

    /// Data resources are read on every pass and own nothing in the cloud
    pub fn is_data(&self) -> bool {
        matches!(self, ResourceKind::ExternalNetwork)
    }

    /// Attributes that must be sealed before they reach the state file
    pub fn secret_attributes(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Keypair => &["private_key"],
            ResourceKind::Command => &["stdout"],
            _ => &[],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "keypair" => ResourceKind::Keypair,
            "security-group" => ResourceKind::SecurityGroup,
            "security-group-rule" => ResourceKind::SecurityGroupRule,
            "network" => ResourceKind::Network,
            "subnet" => ResourceKind::Subnet,
            "external-network" => ResourceKind::ExternalNetwork,
            "router" => ResourceKind::Router,
            "router-interface" => ResourceKind::RouterInterface,
            "floating-ip" => ResourceKind::FloatingIp,
            "floating-ip-associate" => ResourceKind::FloatingIpAssociate,
            "instance" => ResourceKind::Instance,
            "command" => ResourceKind::Command,
            other => {
                return Err(CloudError::InvalidConfig(format!(
                    "unknown resource kind: {}",
                    other
                )));
            }
        };
        Ok(kind)
    }
}

/// A value that may only be known once upstream resources are realized
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Literal(Value),
    /// Attribute of another resource
    Output {
        resource: ResourceId,
        attribute: String,
    },
    /// String concatenation of the parts
    Concat(Vec<Input>),
    /// JSON array of the items
    List(Vec<Input>),
    /// JSON object built from named inputs
    Object(BTreeMap<String, Input>),
    /// Leading and trailing whitespace removed
    Trim(Box<Input>),
    /// See [`replace_all`]
    Replace {
        source: Box<Input>,
        replacements: Vec<(String, Input)>,
    },
    /// Value is sealed at rest and redacted in logs
    Secret(Box<Input>),
}

impl Input {
    pub fn literal(value: impl Into<Value>) -> Self {
        Input::Literal(value.into())
    }

    pub fn output(resource: ResourceId, attribute: impl Into<String>) -> Self {
        Input::Output {
            resource,
            attribute: attribute.into(),
        }
    }

    pub fn concat(parts: impl IntoIterator<Item = Input>) -> Self {
        Input::Concat(parts.into_iter().collect())
    }

    pub fn list(items: impl IntoIterator<Item = Input>) -> Self {
        Input::List(items.into_iter().collect())
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Input)>) -> Self {
        Input::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn trim(self) -> Self {
        Input::Trim(Box::new(self))
    }

    pub fn replace_all<K: Into<String>>(
        self,
        replacements: impl IntoIterator<Item = (K, Input)>,
    ) -> Self {
        Input::Replace {
            source: Box::new(self),
            replacements: replacements
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        }
    }

    pub fn secret(self) -> Self {
        Input::Secret(Box::new(self))
    }

    /// Every resource this input reads from
    pub fn references(&self) -> BTreeSet<ResourceId> {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut BTreeSet<ResourceId>) {
        match self {
            Input::Literal(_) => {}
            Input::Output { resource, .. } => {
                refs.insert(*resource);
            }
            Input::Concat(parts) | Input::List(parts) => {
                parts.iter().for_each(|p| p.collect_references(refs))
            }
            Input::Object(fields) => fields.values().for_each(|v| v.collect_references(refs)),
            Input::Trim(inner) | Input::Secret(inner) => inner.collect_references(refs),
            Input::Replace {
                source,
                replacements,
            } => {
                source.collect_references(refs);
                replacements
                    .iter()
                    .for_each(|(_, v)| v.collect_references(refs));
            }
        }
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Input::literal(value)
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Input::literal(value)
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Input::literal(value)
    }
}

impl From<u16> for Input {
    fn from(value: u16) -> Self {
        Input::literal(value)
    }
}

impl From<u32> for Input {
    fn from(value: u32) -> Self {
        Input::literal(value)
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Literal(value)
    }
}

/// Named arguments of a resource
pub type Args = BTreeMap<String, Input>;

/// Build an [`Args`] map from `(name, input)` pairs
pub fn args<K: Into<String>>(fields: impl IntoIterator<Item = (K, Input)>) -> Args {
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// A declared resource
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    pub args: Args,
    pub depends_on: Vec<ResourceId>,
}

impl Resource {
    /// State key (`kind:name`)
    pub fn key(&self) -> String {
        resource_key(self.kind, &self.name)
    }

    /// Explicit and implicit dependencies
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps: BTreeSet<ResourceId> = self.depends_on.iter().copied().collect();
        for input in self.args.values() {
            input.collect_references(&mut deps);
        }
        deps
    }
}

pub fn resource_key(kind: ResourceKind, name: &str) -> String {
    format!("{}:{}", kind, name)
}

/// Arena of declared resources plus the stack's exported values
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    keys: HashMap<String, ResourceId>,
    exports: BTreeMap<String, Input>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource
    ///
    /// Fails when `kind:name` is already taken or when `depends_on` or any input refers to
    /// a resource that has not been declared yet.
    pub fn declare(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        args: Args,
        depends_on: &[ResourceId],
    ) -> Result<ResourceId> {
        let name = name.into();
        let key = resource_key(kind, &name);
        if self.keys.contains_key(&key) {
            return Err(CloudError::DuplicateResource(key));
        }

        let id = ResourceId(self.resources.len());
        let resource = Resource {
            id,
            kind,
            name,
            args,
            depends_on: depends_on.to_vec(),
        };
        for dep in resource.dependencies() {
            self.check_declared(dep)?;
        }

        tracing::debug!("Declared {} as {}", key, id);
        self.keys.insert(key, id);
        self.resources.push(resource);
        Ok(id)
    }

    /// Publish a stack output
    pub fn export(&mut self, name: impl Into<String>, value: Input) -> Result<()> {
        for dep in value.references() {
            self.check_declared(dep)?;
        }
        self.exports.insert(name.into(), value);
        Ok(())
    }

    fn check_declared(&self, id: ResourceId) -> Result<()> {
        if id.0 < self.resources.len() {
            Ok(())
        } else {
            Err(CloudError::UnknownResource(id.0))
        }
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.0)
    }

    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<&Resource> {
        self.keys
            .get(&resource_key(kind, name))
            .and_then(|id| self.get(*id))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn by_kind(&self, kind: ResourceKind) -> Vec<&Resource> {
        self.resources.iter().filter(|r| r.kind == kind).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn exports(&self) -> &BTreeMap<String, Input> {
        &self.exports
    }

    /// Topological levels in declaration order
    ///
    /// A resource sits one level above its deepest dependency, so everything within a
    /// level can be applied concurrently.
    pub fn levels(&self) -> Vec<Vec<ResourceId>> {
        let mut depth = vec![0usize; self.resources.len()];
        let mut levels: Vec<Vec<ResourceId>> = Vec::new();

        for resource in &self.resources {
            // Dependencies always have a lower index, so their depth is final here
            let d = resource
                .dependencies()
                .iter()
                .map(|dep| depth[dep.0] + 1)
                .max()
                .unwrap_or(0);
            depth[resource.id.0] = d;

            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(resource.id);
        }

        levels
    }
}

/// Replace every pattern in one left-to-right pass
///
/// At each position the first pattern (in the given order) that matches wins, and
/// replaced text is never rescanned, so replacements cannot overlap or cascade.
pub fn replace_all(source: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    'scan: while !rest.is_empty() {
        for (pattern, replacement) in replacements {
            if !pattern.is_empty() && rest.starts_with(pattern) {
                out.push_str(replacement);
                rest = &rest[pattern.len()..];
                continue 'scan;
            }
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declare(graph: &mut ResourceGraph, name: &str, deps: &[ResourceId]) -> ResourceId {
        graph
            .declare(ResourceKind::Network, name, Args::new(), deps)
            .unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected_per_kind() {
        let mut graph = ResourceGraph::new();
        declare(&mut graph, "demo", &[]);

        let err = graph
            .declare(ResourceKind::Network, "demo", Args::new(), &[])
            .unwrap_err();
        assert!(matches!(err, CloudError::DuplicateResource(ref k) if k == "network:demo"));

        // Same name, different kind
        graph
            .declare(ResourceKind::Subnet, "demo", Args::new(), &[])
            .unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_forward_references_rejected() {
        let mut graph = ResourceGraph::new();
        let err = graph
            .declare(
                ResourceKind::Subnet,
                "s",
                args([("network_id", Input::output(ResourceId(7), "id"))]),
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, CloudError::UnknownResource(7)));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_levels_follow_explicit_and_implicit_edges() {
        let mut graph = ResourceGraph::new();
        let net = declare(&mut graph, "net", &[]);
        let sg = graph
            .declare(ResourceKind::SecurityGroup, "sg", Args::new(), &[])
            .unwrap();
        let subnet = graph
            .declare(
                ResourceKind::Subnet,
                "subnet",
                args([("network_id", Input::output(net, "id"))]),
                &[],
            )
            .unwrap();
        let router = graph
            .declare(ResourceKind::Router, "router", Args::new(), &[])
            .unwrap();
        let iface = graph
            .declare(
                ResourceKind::RouterInterface,
                "iface",
                Args::new(),
                &[router, subnet],
            )
            .unwrap();

        let levels = graph.levels();
        assert_eq!(levels[0], vec![net, sg, router]);
        assert_eq!(levels[1], vec![subnet]);
        assert_eq!(levels[2], vec![iface]);
    }

    #[test]
    fn test_input_references() {
        let a = ResourceId(0);
        let b = ResourceId(1);
        let input = Input::concat([
            Input::literal("K3S_URL=https://"),
            Input::output(a, "address"),
            Input::output(b, "stdout").trim(),
        ])
        .secret();

        assert_eq!(input.references(), BTreeSet::from([a, b]));
    }

    #[test]
    fn test_replace_all_single_pass() {
        let raw = "server: https://127.0.0.1:6443\ncluster: default\nuser: default";
        let out = replace_all(
            raw,
            &[
                ("127.0.0.1", "1.2.3.4"),
                ("localhost", "1.2.3.4"),
                ("default", "kindacool-demo"),
            ],
        );
        assert_eq!(
            out,
            "server: https://1.2.3.4:6443\ncluster: kindacool-demo\nuser: kindacool-demo"
        );
    }

    #[test]
    fn test_replace_all_does_not_rescan_output() {
        // "a" -> "b" must not feed into "b" -> "c"
        assert_eq!(replace_all("ab", &[("a", "b"), ("b", "c")]), "bc");
        // Earlier pattern wins at the same position
        assert_eq!(replace_all("abc", &[("ab", "X"), ("abc", "Y")]), "Xc");
    }

    #[test]
    fn test_resource_kind_round_trip_str() {
        for kind in [
            ResourceKind::Keypair,
            ResourceKind::RouterInterface,
            ResourceKind::FloatingIpAssociate,
            ResourceKind::Command,
        ] {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
    }
}
