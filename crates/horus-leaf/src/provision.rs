//! Provisioning — turning a cluster description into scheduling state.
//!
//! Everything is validated up front: a cluster either comes up with every
//! count resolvable, every referenced node in its directory and no sentinel
//! ids, or it is rejected without touching the leaf.

use std::collections::HashSet;

use horus_core::config::ClusterConfig;
use horus_core::{ClusterId, NodeId, SpineId, WorkerId, INVALID_ID};

use crate::directory::{Egress, WorkerDirectory};
use crate::error::{LeafError, LeafResult};
use crate::range::{RangeAction, RangeTables};

/// Desired initial state of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub id: ClusterId,
    pub qlen_unit: u8,
    pub num_valid_local_workers: u16,
    pub num_valid_upstream_spines: u16,
    /// Bottom of the stack first.
    pub idle_workers: Vec<WorkerId>,
    pub spines: Vec<SpineId>,
    pub linked_idle_spine: Option<SpineId>,
    pub linked_sq_spine: Option<SpineId>,
    pub nodes: Vec<(NodeId, Egress)>,
}

impl ClusterSpec {
    pub fn new(id: ClusterId, qlen_unit: u8, num_valid_local_workers: u16) -> Self {
        Self {
            id,
            qlen_unit,
            num_valid_local_workers,
            num_valid_upstream_spines: 0,
            idle_workers: Vec::new(),
            spines: Vec::new(),
            linked_idle_spine: None,
            linked_sq_spine: None,
            nodes: Vec::new(),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            id: ClusterId(config.id),
            qlen_unit: config.qlen_unit,
            num_valid_local_workers: config.num_valid_local_workers,
            num_valid_upstream_spines: config.num_valid_upstream_spines,
            idle_workers: config.idle_workers.iter().copied().map(NodeId).collect(),
            spines: config.spines.iter().copied().map(NodeId).collect(),
            linked_idle_spine: config.linked_idle_spine.and_then(NodeId::from_register),
            linked_sq_spine: config.linked_sq_spine.and_then(NodeId::from_register),
            nodes: config
                .nodes
                .iter()
                .map(|n| {
                    (
                        NodeId(n.id),
                        Egress {
                            port: n.port,
                            address: n.address,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn with_node(mut self, node: NodeId, egress: Egress) -> Self {
        self.nodes.push((node, egress));
        self
    }

    pub fn with_idle_workers(mut self, workers: impl IntoIterator<Item = u16>) -> Self {
        self.idle_workers = workers.into_iter().map(NodeId).collect();
        self
    }

    /// Upstream spines; the valid count is the list length.
    pub fn with_spines(mut self, spines: impl IntoIterator<Item = u16>) -> Self {
        self.spines = spines.into_iter().map(NodeId).collect();
        self.num_valid_upstream_spines = u16::try_from(self.spines.len()).unwrap_or(u16::MAX);
        self
    }

    pub fn with_linked_idle_spine(mut self, spine: u16) -> Self {
        self.linked_idle_spine = Some(NodeId(spine));
        self
    }

    pub fn with_linked_sq_spine(mut self, spine: u16) -> Self {
        self.linked_sq_spine = Some(NodeId(spine));
        self
    }

    fn reject(&self, reason: impl Into<String>) -> LeafError {
        LeafError::Provisioning {
            cluster: self.id,
            reason: reason.into(),
        }
    }

    /// Check this cluster against the leaf's limits and range tables, returning
    /// the resolved directory and sampling ranges.
    pub(crate) fn validate(
        &self,
        max_workers: u16,
        ranges: &RangeTables,
    ) -> LeafResult<(WorkerDirectory, RangeAction, Option<RangeAction>)> {
        if self.num_valid_local_workers == 0 {
            return Err(self.reject("cluster has no valid workers"));
        }
        if self.num_valid_local_workers > max_workers {
            return Err(self.reject(format!(
                "{} valid workers exceed the address space of {max_workers}",
                self.num_valid_local_workers
            )));
        }
        let worker_range = ranges.workers.resolve(self.num_valid_local_workers)?;
        let spine_range = self.spine_range(ranges)?;

        let mut directory = WorkerDirectory::new();
        for (node, egress) in &self.nodes {
            check_id(node.0)?;
            directory.upsert(*node, *egress);
        }

        for worker in (0..self.num_valid_local_workers).map(NodeId) {
            self.require_entry(&directory, worker)?;
        }

        let mut seen = HashSet::new();
        for &worker in &self.idle_workers {
            check_id(worker.0)?;
            if worker.0 >= max_workers {
                return Err(LeafError::WorkerOutOfRange {
                    worker,
                    max: max_workers,
                });
            }
            if !seen.insert(worker) {
                return Err(self.reject(format!("worker {worker} listed idle twice")));
            }
            self.require_entry(&directory, worker)?;
        }
        if self.idle_workers.len() > usize::from(self.num_valid_local_workers) {
            return Err(self.reject(format!(
                "{} idle workers exceed {} valid workers",
                self.idle_workers.len(),
                self.num_valid_local_workers
            )));
        }

        let sampled = usize::from(self.num_valid_upstream_spines);
        for &spine in self.spines.iter().take(sampled) {
            check_id(spine.0)?;
            self.require_entry(&directory, spine)?;
        }
        for spine in [self.linked_idle_spine, self.linked_sq_spine].into_iter().flatten() {
            check_id(spine.0)?;
            self.require_entry(&directory, spine)?;
        }

        Ok((directory, worker_range, spine_range))
    }

    fn spine_range(&self, ranges: &RangeTables) -> LeafResult<Option<RangeAction>> {
        if self.num_valid_upstream_spines == 0 {
            return Ok(None);
        }
        let range = ranges.spines.resolve(self.num_valid_upstream_spines)?;
        if self.spines.len() < usize::from(range.bound()) {
            return Err(self.reject(format!(
                "{} valid spines but only {} listed",
                self.num_valid_upstream_spines,
                self.spines.len()
            )));
        }
        Ok(Some(range))
    }

    fn require_entry(&self, directory: &WorkerDirectory, node: NodeId) -> LeafResult<()> {
        if directory.contains(node) {
            Ok(())
        } else {
            Err(LeafError::UnknownDestination {
                cluster: self.id,
                node,
            })
        }
    }
}

fn check_id(raw: u16) -> LeafResult<()> {
    if raw == INVALID_ID {
        return Err(LeafError::ReservedId(raw));
    }
    Ok(())
}
