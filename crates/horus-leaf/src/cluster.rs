//! Per-cluster scheduling state.
//!
//! A `ClusterState` owns everything one virtual cluster needs: its worker
//! directory, idle stack, queue-length tracker, both spine links and its
//! own sampler. Clusters share nothing, so the leaf locks them
//! independently.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use horus_core::{
    clamp_reported_len, ClusterId, HorusPacket, MessageKind, NodeId, SpineId, WorkerId,
};

use crate::directory::{Egress, WorkerDirectory};
use crate::error::{LeafError, LeafResult};
use crate::idle_link::{IdleLinkAction, IdleLinkNegotiator};
use crate::idle_stack::{IdleStack, PushRefused};
use crate::queue_len::QueueLenTracker;
use crate::range::RangeAction;
use crate::sampler::IndexSampler;
use crate::sq_link::{QueueReport, SqLink};

/// A packet ready to leave the leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub egress: Egress,
    pub packet: HorusPacket,
}

/// How a task was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum Decision {
    /// Popped off the idle stack.
    Idle { worker: WorkerId },
    /// Shortest of two sampled candidates, with the lengths read for each.
    Sampled {
        worker: WorkerId,
        candidates: [(WorkerId, u16); 2],
    },
    /// Uniformly random worker (NEW_TASK_RANDOM).
    Random { worker: WorkerId },
}

impl Decision {
    pub fn worker(&self) -> WorkerId {
        match *self {
            Decision::Idle { worker }
            | Decision::Sampled { worker, .. }
            | Decision::Random { worker } => worker,
        }
    }
}

/// Result of handling one packet.
#[derive(Debug, Clone, Default)]
pub struct Handled {
    pub decision: Option<Decision>,
    pub outbound: Vec<Outbound>,
}

impl Handled {
    fn sent(outbound: Vec<Outbound>) -> Self {
        Self {
            decision: None,
            outbound,
        }
    }
}

/// Event counters since provisioning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub dispatched_idle: u64,
    pub dispatched_sampled: u64,
    pub dispatched_random: u64,
    pub completions: u64,
    pub idle_completions: u64,
    pub probes_sent: u64,
    pub probes_expired: u64,
    pub queue_signals: u64,
}

pub struct ClusterState {
    pub(crate) id: ClusterId,
    pub(crate) leaf_id: NodeId,
    pub(crate) num_valid_local_workers: u16,
    pub(crate) num_valid_upstream_spines: u16,
    pub(crate) worker_range: RangeAction,
    pub(crate) spine_range: Option<RangeAction>,
    pub(crate) directory: WorkerDirectory,
    pub(crate) spines: Vec<SpineId>,
    pub(crate) idle: IdleStack,
    pub(crate) queues: QueueLenTracker,
    pub(crate) idle_link: IdleLinkNegotiator,
    pub(crate) sq_link: SqLink,
    pub(crate) sampler: Box<dyn IndexSampler>,
    pub(crate) stats: ClusterStats,
}

/// Parameters for a fresh cluster; validated by the leaf before use.
pub(crate) struct ClusterInit {
    pub id: ClusterId,
    pub leaf_id: NodeId,
    pub qlen_unit: u8,
    pub max_workers: u16,
    pub num_valid_local_workers: u16,
    pub num_valid_upstream_spines: u16,
    pub worker_range: RangeAction,
    pub spine_range: Option<RangeAction>,
    pub directory: WorkerDirectory,
    pub spines: Vec<SpineId>,
    pub idle_workers: Vec<WorkerId>,
    pub linked_idle_spine: Option<SpineId>,
    pub linked_sq_spine: Option<SpineId>,
    pub probe_timeout: Duration,
    pub sampler: Box<dyn IndexSampler>,
}

impl ClusterState {
    pub(crate) fn new(init: ClusterInit) -> Self {
        // Provisioning already rejected duplicates and overflow.
        let mut idle = IdleStack::new(init.num_valid_local_workers);
        for worker in init.idle_workers {
            let pushed = idle.push(worker);
            debug_assert!(pushed.is_ok(), "initial idle worker {worker} refused: {pushed:?}");
        }

        let mut idle_link = IdleLinkNegotiator::new(init.probe_timeout);
        idle_link.set_linked(init.linked_idle_spine);

        Self {
            id: init.id,
            leaf_id: init.leaf_id,
            num_valid_local_workers: init.num_valid_local_workers,
            num_valid_upstream_spines: init.num_valid_upstream_spines,
            worker_range: init.worker_range,
            spine_range: init.spine_range,
            directory: init.directory,
            spines: init.spines,
            idle,
            queues: QueueLenTracker::new(init.max_workers, init.qlen_unit),
            idle_link,
            sq_link: SqLink::new(init.linked_sq_spine),
            sampler: init.sampler,
            stats: ClusterStats::default(),
        }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn idle_count(&self) -> u16 {
        self.idle.idle_count()
    }

    pub fn aggregate_queue_len(&self) -> u64 {
        self.queues.aggregate()
    }

    pub fn queues(&self) -> &QueueLenTracker {
        &self.queues
    }

    pub fn idle_stack(&self) -> &IdleStack {
        &self.idle
    }

    pub fn idle_link(&self) -> &IdleLinkNegotiator {
        &self.idle_link
    }

    pub fn sq_link(&self) -> &SqLink {
        &self.sq_link
    }

    pub fn stats(&self) -> ClusterStats {
        self.stats
    }

    /// Process one inbound packet to completion.
    pub fn handle(&mut self, packet: HorusPacket, now: Instant) -> LeafResult<Handled> {
        match packet.kind {
            MessageKind::NewTask => self.dispatch_task(packet),
            MessageKind::NewTaskRandom => self.dispatch_random(packet),
            MessageKind::TaskDone => self.complete_task(packet.src, false, now),
            MessageKind::TaskDoneIdle => self.complete_task(packet.src, true, now),
            MessageKind::ScanQueue => self.on_scan(packet.src),
            MessageKind::QueueRemove => {
                if self.sq_link.on_remove(packet.src) {
                    info!(cluster = %self.id, spine = %packet.src, "sq link removed");
                } else {
                    debug!(cluster = %self.id, spine = %packet.src, "queue remove from unlinked spine ignored");
                }
                Ok(Handled::default())
            }
            MessageKind::ProbeIdleResponse => self.on_probe_response(packet.src, packet.qlen, now),
            MessageKind::IdleRemove => {
                if self.idle_link.on_remove(packet.src) {
                    info!(cluster = %self.id, spine = %packet.src, "idle link removed");
                } else {
                    debug!(cluster = %self.id, spine = %packet.src, "idle remove from unlinked spine ignored");
                }
                Ok(Handled::default())
            }
            kind @ (MessageKind::IdleSignal
            | MessageKind::QueueSignalUpdate
            | MessageKind::QueueSignalInit
            | MessageKind::ProbeIdleQueue) => Err(LeafError::Misrouted(kind)),
        }
    }

    /// Periodic housekeeping: expire overdue probes and start an idle-link
    /// round if the cluster has idle workers but nowhere to advertise them.
    pub fn tick(&mut self, now: Instant) -> Vec<Outbound> {
        if let Some(spine) = self.idle_link.expire(now) {
            self.stats.probes_expired += 1;
            warn!(cluster = %self.id, %spine, "idle probe timed out, round abandoned");
        }
        self.try_start_idle_link(now).into_iter().collect()
    }

    // ── Completions ────────────────────────────────────────────────

    fn complete_task(&mut self, worker: WorkerId, now_idle: bool, now: Instant) -> LeafResult<Handled> {
        self.check_worker(worker)?;
        if now_idle {
            self.check_idle_candidate(worker)?;
        }
        let before = self.queues.aggregate();
        let mut outbound = Vec::new();

        self.stats.completions += 1;
        if now_idle {
            self.stats.idle_completions += 1;
            let dropped = self.queues.clear(worker);
            if dropped > 0 {
                debug!(cluster = %self.id, %worker, dropped, "idle worker had tracked tasks left");
            }
            match self.idle.push(worker) {
                Ok(()) => {
                    debug!(cluster = %self.id, %worker, idle_count = self.idle.idle_count(), "worker idle");
                    outbound.extend(self.try_start_idle_link(now));
                }
                Err(PushRefused::AlreadyIdle) => {
                    debug!(cluster = %self.id, %worker, "worker already on idle stack");
                }
                Err(PushRefused::Full) => {
                    warn!(cluster = %self.id, %worker, "idle stack full, worker not recorded");
                }
            }
        } else if !self.queues.record_completion(worker) {
            debug!(cluster = %self.id, %worker, "completion for untracked task");
        }

        if self.queues.aggregate() != before {
            outbound.extend(self.queue_signal(QueueReport::Update)?);
        }
        Ok(Handled::sent(outbound))
    }

    pub(crate) fn check_worker(&self, worker: WorkerId) -> LeafResult<()> {
        if worker.index() >= self.queues.capacity() {
            return Err(LeafError::WorkerOutOfRange {
                worker,
                max: u16::try_from(self.queues.capacity()).unwrap_or(u16::MAX),
            });
        }
        Ok(())
    }

    /// Only a valid worker the directory can reach may go on the idle stack.
    fn check_idle_candidate(&self, worker: WorkerId) -> LeafResult<()> {
        if worker.0 >= self.num_valid_local_workers {
            return Err(LeafError::WorkerOutOfRange {
                worker,
                max: self.num_valid_local_workers,
            });
        }
        self.directory.resolve(self.id, worker).map(|_| ())
    }

    // ── SQ link ────────────────────────────────────────────────────

    fn on_scan(&mut self, spine: SpineId) -> LeafResult<Handled> {
        // Resolve before linking so an unknown spine never becomes the target.
        self.directory.resolve(self.id, spine)?;
        if let Some(previous) = self.sq_link.on_scan(spine) {
            info!(cluster = %self.id, %previous, %spine, "sq link taken over");
        } else {
            info!(cluster = %self.id, %spine, "sq link established");
        }
        let reply = self.queue_signal(QueueReport::Initial)?;
        Ok(Handled::sent(reply.into_iter().collect()))
    }

    /// Report the aggregate backlog to the linked SQ spine, if any.
    pub(crate) fn queue_signal(&mut self, report: QueueReport) -> LeafResult<Option<Outbound>> {
        let Some(spine) = self.sq_link.update_target() else {
            return Ok(None);
        };
        let kind = match report {
            QueueReport::Initial => MessageKind::QueueSignalInit,
            QueueReport::Update => MessageKind::QueueSignalUpdate,
        };
        let qlen = clamp_reported_len(self.queues.aggregate());
        let packet = self.control_packet(kind, spine).with_qlen(qlen);
        self.stats.queue_signals += 1;
        Ok(Some(Outbound {
            egress: self.directory.resolve(self.id, spine)?,
            packet,
        }))
    }

    // ── Idle link ──────────────────────────────────────────────────

    fn try_start_idle_link(&mut self, now: Instant) -> Option<Outbound> {
        if self.idle.is_empty() || self.idle_link.linked().is_some() || self.idle_link.in_flight() {
            return None;
        }
        let spine = pick_spine(self.sampler.as_mut(), &self.spines, self.spine_range)?;
        let egress = match self.directory.resolve(self.id, spine) {
            Ok(egress) => egress,
            Err(e) => {
                warn!(cluster = %self.id, error = %e, "cannot probe spine");
                return None;
            }
        };
        self.idle_link.start(spine, now).ok()?;
        self.stats.probes_sent += 1;
        debug!(cluster = %self.id, %spine, "idle link round started");
        Some(Outbound {
            egress,
            packet: self.control_packet(MessageKind::ProbeIdleQueue, spine),
        })
    }

    fn on_probe_response(&mut self, src: SpineId, idle_len: u8, now: Instant) -> LeafResult<Handled> {
        let sampler = self.sampler.as_mut();
        let spines = &self.spines;
        let range = self.spine_range;
        let action = self
            .idle_link
            .on_response(src, idle_len, now, || pick_spine(sampler, spines, range));

        let outbound = match action {
            None => None,
            Some(IdleLinkAction::Probe(spine)) => {
                self.stats.probes_sent += 1;
                Some(Outbound {
                    egress: self.directory.resolve(self.id, spine)?,
                    packet: self.control_packet(MessageKind::ProbeIdleQueue, spine),
                })
            }
            Some(IdleLinkAction::Signal(spine)) => {
                info!(cluster = %self.id, %spine, "idle link established");
                let idle_count = clamp_reported_len(u64::from(self.idle.idle_count()));
                Some(Outbound {
                    egress: self.directory.resolve(self.id, spine)?,
                    packet: self
                        .control_packet(MessageKind::IdleSignal, spine)
                        .with_qlen(idle_count),
                })
            }
        };
        Ok(Handled::sent(outbound.into_iter().collect()))
    }

    /// A leaf-originated packet addressed to `dst`.
    pub(crate) fn control_packet(&self, kind: MessageKind, dst: NodeId) -> HorusPacket {
        HorusPacket::new(kind, self.id).from_node(self.leaf_id).to_node(dst)
    }
}

/// Sample an upstream spine, or `None` when the cluster has no upstream tier.
fn pick_spine(
    sampler: &mut dyn IndexSampler,
    spines: &[SpineId],
    range: Option<RangeAction>,
) -> Option<SpineId> {
    let range = range?;
    let index = sampler.sample(range.bound());
    spines.get(usize::from(index)).copied()
}
