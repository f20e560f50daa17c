//! Cluster specification

use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FLAVOR: &str = "m4.large";
pub const DEFAULT_IMAGE: &str = "Ubuntu 22.04";
pub const DEFAULT_USER: &str = "ubuntu";
pub const DEFAULT_NODE_COUNT: i32 = 1;

/// How the cluster's machines are attached to the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkMode {
    /// Attach to an existing network; machines are reached on their fixed address
    Private { network_name: String },
    /// Create a network routed to an external one; machines get floating IPs from `ip_pool`
    Public {
        ip_pool: String,
        network_name: String,
        network_id: String,
    },
}

impl NetworkMode {
    pub fn is_public(&self) -> bool {
        matches!(self, NetworkMode::Public { .. })
    }
}

/// Everything needed to provision one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Machines in the cluster; the first runs the control plane
    pub node_count: i32,
    pub flavor: String,
    pub image_name: String,
    /// Boot from a new volume of this size (GB) instead of the image directly
    pub volume_size: Option<u32>,
    pub machine_user: String,
    /// Opened in addition to ssh, http, https and the API server
    pub additional_ports: Vec<u16>,
    pub network: NetworkMode,
}

impl ClusterSpec {
    /// Checks that need no cloud access: network fields first, then the node count
    pub fn validate(&self) -> Result<()> {
        crate::network::validate(&self.network)?;
        if self.node_count <= 0 {
            return Err(ClusterError::InvalidNodeCount(self.node_count));
        }
        Ok(())
    }
}

/// Flat cluster settings as they come from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterArgs {
    pub additional_ports: Vec<u16>,
    pub flavor: String,
    pub node_count: i32,
    /// Values <= 0 boot from the image without a volume
    pub volume_size: i32,
    pub machine_image: String,
    pub machine_user: String,
    pub private_network_name: String,
    pub public: bool,
    pub public_ip_pool: String,
    pub public_network_name: String,
    pub public_network_id: String,
}

impl Default for ClusterArgs {
    fn default() -> Self {
        Self {
            additional_ports: Vec::new(),
            flavor: DEFAULT_FLAVOR.to_string(),
            node_count: DEFAULT_NODE_COUNT,
            volume_size: 0,
            machine_image: DEFAULT_IMAGE.to_string(),
            machine_user: DEFAULT_USER.to_string(),
            private_network_name: String::new(),
            public: false,
            public_ip_pool: String::new(),
            public_network_name: String::new(),
            public_network_id: String::new(),
        }
    }
}

impl From<ClusterArgs> for ClusterSpec {
    /// `public` picks the network variant; the fields of the other variant are dropped.
    /// Emptiness is checked later by [`ClusterSpec::validate`].
    fn from(args: ClusterArgs) -> Self {
        let network = if args.public {
            NetworkMode::Public {
                ip_pool: args.public_ip_pool,
                network_name: args.public_network_name,
                network_id: args.public_network_id,
            }
        } else {
            NetworkMode::Private {
                network_name: args.private_network_name,
            }
        };

        ClusterSpec {
            node_count: args.node_count,
            flavor: args.flavor,
            image_name: args.machine_image,
            volume_size: u32::try_from(args.volume_size).ok().filter(|size| *size > 0),
            machine_user: args.machine_user,
            additional_ports: args.additional_ports,
            network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let spec = ClusterSpec::from(ClusterArgs::default());
        assert_eq!(spec.node_count, 1);
        assert_eq!(spec.flavor, "m4.large");
        assert_eq!(spec.image_name, "Ubuntu 22.04");
        assert_eq!(spec.machine_user, "ubuntu");
        assert_eq!(spec.volume_size, None);
        assert!(!spec.network.is_public());
    }

    #[test]
    fn test_public_flag_selects_variant() {
        let spec = ClusterSpec::from(ClusterArgs {
            public: true,
            private_network_name: "ignored".into(),
            public_ip_pool: "ext".into(),
            public_network_name: "public".into(),
            public_network_id: "id1".into(),
            ..Default::default()
        });
        assert_eq!(
            spec.network,
            NetworkMode::Public {
                ip_pool: "ext".into(),
                network_name: "public".into(),
                network_id: "id1".into(),
            }
        );
    }

    #[test]
    fn test_validate_order() {
        // Both invalid: the network is reported
        let spec = ClusterSpec::from(ClusterArgs {
            node_count: 0,
            ..Default::default()
        });
        assert!(matches!(spec.validate(), Err(ClusterError::Configuration(_))));

        let spec = ClusterSpec::from(ClusterArgs {
            node_count: -2,
            private_network_name: "net1".into(),
            ..Default::default()
        });
        assert!(matches!(
            spec.validate(),
            Err(ClusterError::InvalidNodeCount(-2))
        ));
    }

    #[test]
    fn test_volume_size_conversion() {
        for (raw, expected) in [(20, Some(20)), (0, None), (-5, None)] {
            let spec = ClusterSpec::from(ClusterArgs {
                volume_size: raw,
                ..Default::default()
            });
            assert_eq!(spec.volume_size, expected);
        }
    }
}
