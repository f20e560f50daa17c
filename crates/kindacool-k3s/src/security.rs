//! Inbound firewall rules

use crate::error::Result;
use kindacool_cloud::{Input, ResourceGraph, ResourceId, ResourceKind, args};
use std::collections::BTreeMap;

/// Ports every cluster exposes
pub const FIXED_RULES: [(u16, &str); 4] = [
    (22, "ssh"),
    (6443, "kube-apiserver"),
    (443, "https"),
    (80, "http"),
];

pub const ADDITIONAL_PORT_LABEL: &str = "additional-port";

/// Port to label map, one ingress rule per entry
///
/// Additional ports are inserted after the fixed ones, so a colliding port ends up
/// labelled `additional-port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRuleSet {
    rules: BTreeMap<u16, String>,
}

impl SecurityRuleSet {
    pub fn new(additional_ports: &[u16]) -> Self {
        let mut rules: BTreeMap<u16, String> = FIXED_RULES
            .iter()
            .map(|(port, label)| (*port, label.to_string()))
            .collect();
        for port in additional_ports {
            rules.insert(*port, ADDITIONAL_PORT_LABEL.to_string());
        }
        Self { rules }
    }

    pub fn label(&self, port: u16) -> Option<&str> {
        self.rules.get(&port).map(String::as_str)
    }

    /// Rules ordered by port
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.rules.iter().map(|(port, label)| (*port, label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Declared security group and its rules
#[derive(Debug, Clone)]
pub struct SecurityGroupHandle {
    pub group: ResourceId,
    pub rules: Vec<ResourceId>,
}

pub fn security_group_description(cluster: &str) -> String {
    format!("sec group for kindacool cluster {}", cluster)
}

pub fn rule_name(cluster: &str, label: &str, port: u16) -> String {
    format!("{}-{}-{}", cluster, label, port)
}

/// Declare the cluster's security group with one rule per entry in `rules`
pub fn declare_security_group(
    graph: &mut ResourceGraph,
    cluster: &str,
    rules: &SecurityRuleSet,
) -> Result<SecurityGroupHandle> {
    let group = graph.declare(
        ResourceKind::SecurityGroup,
        cluster,
        args([
            ("name", Input::from(cluster)),
            ("description", Input::from(security_group_description(cluster))),
        ]),
        &[],
    )?;

    let mut declared = Vec::with_capacity(rules.len());
    for (port, label) in rules.iter() {
        let rule = graph.declare(
            ResourceKind::SecurityGroupRule,
            rule_name(cluster, label, port),
            args([
                ("security_group_id", Input::output(group, "id")),
                ("direction", Input::from("ingress")),
                ("ethertype", Input::from("IPv4")),
                ("protocol", Input::from("tcp")),
                ("port_range_min", Input::from(port)),
                ("port_range_max", Input::from(port)),
                ("description", Input::from(label)),
            ]),
            &[],
        )?;
        declared.push(rule);
    }

    tracing::debug!("Declared security group {} with {} rules", cluster, declared.len());
    Ok(SecurityGroupHandle {
        group,
        rules: declared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixed_rules_always_present() {
        let rules = SecurityRuleSet::new(&[]);
        assert_eq!(rules.len(), 4);
        assert_eq!(rules.label(22), Some("ssh"));
        assert_eq!(rules.label(6443), Some("kube-apiserver"));
        assert_eq!(rules.label(443), Some("https"));
        assert_eq!(rules.label(80), Some("http"));
    }

    #[test]
    fn test_additional_ports_and_collisions() {
        let rules = SecurityRuleSet::new(&[8080, 443, 8080]);
        assert_eq!(rules.len(), 5);
        assert_eq!(rules.label(8080), Some("additional-port"));
        // A fixed port listed again is relabelled, never duplicated
        assert_eq!(rules.label(443), Some("additional-port"));
        assert_eq!(rules.label(22), Some("ssh"));
    }

    #[test]
    fn test_declared_rules() {
        let mut graph = ResourceGraph::new();
        let handle =
            declare_security_group(&mut graph, "demo", &SecurityRuleSet::new(&[30080])).unwrap();

        assert_eq!(handle.rules.len(), 5);
        let group = graph.get(handle.group).unwrap();
        assert_eq!(
            group.args["description"],
            Input::literal("sec group for kindacool cluster demo")
        );

        let rule = graph
            .find(ResourceKind::SecurityGroupRule, "demo-kube-apiserver-6443")
            .unwrap();
        assert_eq!(rule.args["port_range_min"], Input::literal(json!(6443)));
        assert_eq!(rule.args["protocol"], Input::literal("tcp"));
        assert!(rule.dependencies().contains(&handle.group));

        assert!(
            graph
                .find(ResourceKind::SecurityGroupRule, "demo-additional-port-30080")
                .is_some()
        );
    }
}
