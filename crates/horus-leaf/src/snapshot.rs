//! Read access to cluster state.
//!
//! [`ClusterSnapshot`] is the bulk read: every register of a cluster in one
//! consistent copy, taken under the cluster lock. [`Register`] names single
//! registers for point reads. Link and probe registers use the wire
//! sentinels for "none".

use serde::{Deserialize, Serialize};

use horus_core::{ClusterId, NodeId, INVALID_LEN};

use crate::cluster::{ClusterState, ClusterStats};
use crate::idle_link::ProbePhase;
use crate::queue_len::WorkerLanes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub id: NodeId,
    pub queue_len: [u16; 2],
    pub deferred: [i16; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSnapshot {
    pub cluster: ClusterId,
    pub qlen_unit: u8,
    pub num_valid_local_workers: u16,
    pub num_valid_upstream_spines: u16,
    pub idle_count: u16,
    /// Bottom of the stack first.
    pub idle_list: Vec<NodeId>,
    pub aggregate_queue_len: u64,
    pub linked_iq_spine: u16,
    pub linked_sq_spine: u16,
    pub probed_spine_id: u16,
    pub probed_spine_idle_len: u8,
    pub probe_phase: ProbePhase,
    /// Workers in the valid sampling range.
    pub workers: Vec<WorkerSnapshot>,
    pub stats: ClusterStats,
}

impl ClusterSnapshot {
    pub(crate) fn capture(cluster: &ClusterState) -> Self {
        let workers = (0..cluster.num_valid_local_workers)
            .map(NodeId)
            .map(|id| {
                let WorkerLanes { qlen, deferred } = cluster.queues.lanes(id);
                WorkerSnapshot {
                    id,
                    queue_len: qlen,
                    deferred,
                }
            })
            .collect();

        Self {
            cluster: cluster.id,
            qlen_unit: cluster.queues.qlen_unit(),
            num_valid_local_workers: cluster.num_valid_local_workers,
            num_valid_upstream_spines: cluster.num_valid_upstream_spines,
            idle_count: cluster.idle.idle_count(),
            idle_list: cluster.idle.as_slice().to_vec(),
            aggregate_queue_len: cluster.queues.aggregate(),
            linked_iq_spine: NodeId::or_invalid(cluster.idle_link.linked()),
            linked_sq_spine: NodeId::or_invalid(cluster.sq_link.linked()),
            probed_spine_id: NodeId::or_invalid(cluster.idle_link.probed_spine_id()),
            probed_spine_idle_len: cluster
                .idle_link
                .probed_spine_idle_len()
                .unwrap_or(INVALID_LEN),
            probe_phase: cluster.idle_link.phase(),
            workers,
            stats: cluster.stats,
        }
    }

    /// Sum of effective queue lengths over the valid workers.
    pub fn total_queue_len(&self) -> i64 {
        self.workers
            .iter()
            .map(|w| i64::from(w.queue_len[0]) + i64::from(w.deferred[0]))
            .sum()
    }

    /// True when every worker's two lanes agree.
    pub fn mirrors_consistent(&self) -> bool {
        self.workers
            .iter()
            .all(|w| w.queue_len[0] == w.queue_len[1] && w.deferred[0] == w.deferred[1])
    }
}

/// Named per-cluster registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    IdleCount,
    /// Indexed by stack slot, bottom first.
    IdleList,
    AggregateQueueLen,
    LinkedSqSpine,
    LinkedIqSpine,
    /// Indexed by worker id.
    QueueLen1,
    QueueLen2,
    Deferred1,
    Deferred2,
    ProbedSpineId,
    ProbedSpineIdleLen,
}

impl Register {
    /// Read the register. `index` selects the slot for indexed registers
    /// and is ignored otherwise. `None` for an index out of range.
    pub(crate) fn read(self, cluster: &ClusterState, index: usize) -> Option<i32> {
        let worker = || {
            u16::try_from(index)
                .ok()
                .map(NodeId)
                .filter(|id| id.index() < cluster.queues.capacity())
                .map(|id| cluster.queues.lanes(id))
        };
        let value = match self {
            Register::IdleCount => i32::from(cluster.idle.idle_count()),
            Register::IdleList => i32::from(cluster.idle.as_slice().get(index)?.0),
            Register::AggregateQueueLen => i32::try_from(cluster.queues.aggregate()).unwrap_or(i32::MAX),
            Register::LinkedSqSpine => i32::from(NodeId::or_invalid(cluster.sq_link.linked())),
            Register::LinkedIqSpine => i32::from(NodeId::or_invalid(cluster.idle_link.linked())),
            Register::QueueLen1 => i32::from(worker()?.qlen[0]),
            Register::QueueLen2 => i32::from(worker()?.qlen[1]),
            Register::Deferred1 => i32::from(worker()?.deferred[0]),
            Register::Deferred2 => i32::from(worker()?.deferred[1]),
            Register::ProbedSpineId => {
                i32::from(NodeId::or_invalid(cluster.idle_link.probed_spine_id()))
            }
            Register::ProbedSpineIdleLen => {
                i32::from(cluster.idle_link.probed_spine_idle_len().unwrap_or(INVALID_LEN))
            }
        };
        Some(value)
    }
}
