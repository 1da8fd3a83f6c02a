//! leaf.toml configuration parser.
//!
//! The file describes one leaf: its own id and sockets, the sampling range
//! tables, and every virtual cluster it serves with the cluster's workers,
//! upstream spines and initial register values.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafConfig {
    pub leaf: LeafSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<RangeTablesConfig>,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafSection {
    /// Id this leaf uses as `src` on packets it originates.
    pub id: u16,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Admin HTTP endpoint (metrics and snapshots). Disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<SocketAddr>,
    /// Size of each cluster's worker-id address space.
    #[serde(default = "default_max_workers")]
    pub max_workers_per_cluster: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Fixed RNG seed for reproducible sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Custom sampling range tables. Omitted tables get every power of two.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeTablesConfig {
    #[serde(default)]
    pub workers: Vec<RangeEntryConfig>,
    #[serde(default)]
    pub spines: Vec<RangeEntryConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEntryConfig {
    pub count: u16,
    pub width_bits: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: u16,
    /// Fixed-point step added to the aggregate backlog per queued task.
    pub qlen_unit: u8,
    pub num_valid_local_workers: u16,
    #[serde(default)]
    pub num_valid_upstream_spines: u16,
    /// Workers known to be idle at start, bottom of the stack first.
    #[serde(default)]
    pub idle_workers: Vec<u16>,
    /// Upstream spines, indexed by sampled position.
    #[serde(default)]
    pub spines: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_idle_spine: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_sq_spine: Option<u16>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// Directory entry: where packets for a worker or spine leave the leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u16,
    pub port: u16,
    pub address: SocketAddr,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1234))
}

fn default_max_workers() -> u16 {
    1000
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_sweep_interval_ms() -> u64 {
    100
}

impl LeafConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: LeafConfig = toml::from_str(content)?;
        config.check_unique_clusters()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn check_unique_clusters(&self) -> CoreResult<()> {
        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            if !seen.insert(cluster.id) {
                return Err(CoreError::Invalid(format!(
                    "cluster {} declared twice",
                    cluster.id
                )));
            }
        }
        Ok(())
    }

    /// A single-cluster leaf with four idle workers and one spine.
    pub fn scaffold(leaf_id: u16) -> Self {
        let workers = (0..4u16).map(|id| NodeConfig {
            id,
            port: 148,
            address: SocketAddr::from(([10, 0, 0, 1 + id as u8], 1234)),
        });
        let spine = NodeConfig {
            id: 10,
            port: 132,
            address: SocketAddr::from(([10, 0, 1, 1], 1234)),
        };

        LeafConfig {
            leaf: LeafSection {
                id: leaf_id,
                listen: default_listen(),
                admin: Some(SocketAddr::from(([127, 0, 0, 1], 9100))),
                max_workers_per_cluster: default_max_workers(),
                probe_timeout_ms: default_probe_timeout_ms(),
                sweep_interval_ms: default_sweep_interval_ms(),
                seed: None,
            },
            ranges: None,
            clusters: vec![ClusterConfig {
                id: 0,
                qlen_unit: 0b0000_0010,
                num_valid_local_workers: 4,
                num_valid_upstream_spines: 1,
                idle_workers: vec![0, 1, 2, 3],
                spines: vec![10],
                linked_idle_spine: None,
                linked_sq_spine: None,
                nodes: workers.chain(std::iter::once(spine)).collect(),
            }],
        }
    }
}
