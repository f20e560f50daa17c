//! Resolved resource arguments, per resource kind

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeypairArgs {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupArgs {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupRuleArgs {
    pub security_group_id: String,
    pub direction: String,
    pub ethertype: String,
    pub protocol: String,
    pub port_range_min: u16,
    pub port_range_max: u16,
    pub description: String,
}

impl SecurityGroupRuleArgs {
    /// `--dst-port` value
    pub fn port_range(&self) -> String {
        format!("{}:{}", self.port_range_min, self.port_range_max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkArgs {
    pub name: String,
    #[serde(default = "enabled")]
    pub admin_state_up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetArgs {
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    pub description: String,
}

/// Lookup of an existing network by name and ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalNetworkArgs {
    pub name: String,
    pub network_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterArgs {
    pub name: String,
    #[serde(default = "enabled")]
    pub admin_state_up: bool,
    pub external_network_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterInterfaceArgs {
    pub router_id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIpArgs {
    pub pool: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIpAssociateArgs {
    pub floating_ip: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceArgs {
    pub name: String,
    pub flavor_name: String,
    pub key_pair: String,
    #[serde(default)]
    pub image_name: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub networks: Vec<InstanceNetwork>,
    #[serde(default)]
    pub block_devices: Vec<BlockDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceNetwork {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDevice {
    pub uuid: String,
    pub source_type: String,
    pub destination_type: String,
    pub volume_size: u32,
    #[serde(default)]
    pub delete_on_termination: bool,
    #[serde(default)]
    pub boot_index: u32,
}

impl BlockDevice {
    /// `--block-device` value
    pub fn to_flag(&self) -> String {
        format!(
            "uuid={},source_type={},destination_type={},volume_size={},delete_on_termination={},boot_index={}",
            self.uuid,
            self.source_type,
            self.destination_type,
            self.volume_size,
            self.delete_on_termination,
            self.boot_index
        )
    }
}

fn enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_args_from_volume() {
        let args: InstanceArgs = serde_json::from_value(json!({
            "name": "demo-node-0",
            "flavor_name": "m4.large",
            "key_pair": "demo",
            "security_groups": ["sg-1"],
            "networks": [{ "name": "net1" }],
            "block_devices": [{
                "uuid": "img-1",
                "source_type": "image",
                "destination_type": "volume",
                "volume_size": 20,
                "delete_on_termination": true
            }]
        }))
        .unwrap();

        assert!(args.image_name.is_none());
        assert_eq!(
            args.block_devices[0].to_flag(),
            "uuid=img-1,source_type=image,destination_type=volume,volume_size=20,delete_on_termination=true,boot_index=0"
        );
    }

    #[test]
    fn test_rule_port_range() {
        let rule: SecurityGroupRuleArgs = serde_json::from_value(json!({
            "security_group_id": "sg-1",
            "direction": "ingress",
            "ethertype": "IPv4",
            "protocol": "tcp",
            "port_range_min": 6443,
            "port_range_max": 6443,
            "description": "kube-apiserver"
        }))
        .unwrap();
        assert_eq!(rule.port_range(), "6443:6443");
    }
}
