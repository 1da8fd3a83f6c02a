//! Dispatch engine — picks the worker for each new task.
//!
//! Idle workers go first: if the idle stack is non-empty the task goes to
//! its top, with no queue-length bookkeeping since an idle worker has
//! nothing outstanding. Otherwise two workers are sampled from the valid
//! range and the task goes to the one with the shorter folded queue, ties
//! to the first sample. The first candidate is read from the primary lane
//! and the second from the mirror lane.

use tracing::{debug, trace};

use horus_core::{HorusPacket, NodeId, WorkerId};

use crate::cluster::{ClusterState, Decision, Handled, Outbound};
use crate::directory::Egress;
use crate::error::LeafResult;
use crate::queue_len::Lane;
use crate::sq_link::QueueReport;

impl ClusterState {
    /// NEW_TASK: idle-first, else shortest of two.
    pub(crate) fn dispatch_task(&mut self, packet: HorusPacket) -> LeafResult<Handled> {
        if let Some(worker) = self.idle.top() {
            let egress = self.directory.resolve(self.id, worker)?;
            self.idle.pop();
            self.stats.dispatched_idle += 1;
            trace!(cluster = %self.id, %worker, idle_count = self.idle.idle_count(), "task to idle worker");
            return Ok(Handled {
                decision: Some(Decision::Idle { worker }),
                outbound: vec![forward(packet, worker, egress)],
            });
        }

        let candidates = self.sample_two();
        let [(first, first_len), (second, second_len)] = candidates;
        let worker = if second_len < first_len { second } else { first };
        self.stats.dispatched_sampled += 1;
        trace!(
            cluster = %self.id,
            %first, first_len, %second, second_len, %worker,
            "task to shorter of two"
        );
        self.enqueue(packet, Decision::Sampled { worker, candidates })
    }

    /// NEW_TASK_RANDOM: one uniform sample, no idle stack, no comparison.
    pub(crate) fn dispatch_random(&mut self, packet: HorusPacket) -> LeafResult<Handled> {
        let worker = self.sample_worker();
        self.stats.dispatched_random += 1;
        self.enqueue(packet, Decision::Random { worker })
    }

    fn sample_worker(&mut self) -> WorkerId {
        NodeId(self.sampler.sample(self.worker_range.bound()))
    }

    /// Draw both candidates, folding each one's deferred delta before its
    /// length is read.
    fn sample_two(&mut self) -> [(WorkerId, u16); 2] {
        let first = self.sample_worker();
        let second = self.sample_worker();
        let first_len = self.queues.read_folded(first, Lane::Primary);
        let second_len = self.queues.read_folded(second, Lane::Mirror);
        [(first, first_len), (second, second_len)]
    }

    /// Forward to the chosen worker, count the task against it and tell the
    /// linked SQ spine about the new backlog.
    fn enqueue(&mut self, packet: HorusPacket, decision: Decision) -> LeafResult<Handled> {
        let worker = decision.worker();
        let egress = self.directory.resolve(self.id, worker)?;
        if !self.queues.increment(worker) {
            debug!(cluster = %self.id, %worker, "queue length at ceiling, task untracked");
        }

        let mut outbound = vec![forward(packet, worker, egress)];
        outbound.extend(self.queue_signal(QueueReport::Update)?);
        Ok(Handled {
            decision: Some(decision),
            outbound,
        })
    }
}

/// The task as it leaves for `worker`: same packet, new destination.
fn forward(packet: HorusPacket, worker: WorkerId, egress: Egress) -> Outbound {
    Outbound {
        egress,
        packet: packet.to_node(worker),
    }
}
