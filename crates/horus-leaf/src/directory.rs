//! Worker directory — where packets for a node leave the leaf.
//!
//! Holds one entry per worker and per upstream spine of a cluster. Entries
//! are written by provisioning and read on every forwarded packet.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use horus_core::{ClusterId, NodeId};

use crate::error::{LeafError, LeafResult};

/// Physical egress for a node: switch port plus the address packets are
/// sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Egress {
    pub port: u16,
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerDirectory {
    entries: HashMap<NodeId, Egress>,
}

impl WorkerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `node`. Returns the previous entry.
    pub fn upsert(&mut self, node: NodeId, egress: Egress) -> Option<Egress> {
        self.entries.insert(node, egress)
    }

    pub fn get(&self, node: NodeId) -> Option<&Egress> {
        self.entries.get(&node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.contains_key(&node)
    }

    /// Resolve `node`, failing with the cluster it was looked up in.
    pub fn resolve(&self, cluster: ClusterId, node: NodeId) -> LeafResult<Egress> {
        self.entries
            .get(&node)
            .copied()
            .ok_or(LeafError::UnknownDestination { cluster, node })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by node id.
    pub fn entries(&self) -> Vec<(NodeId, Egress)> {
        let mut all: Vec<_> = self.entries.iter().map(|(id, e)| (*id, *e)).collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }
}
