//! Queue-length tracker.
//!
//! Every worker carries two copies of its queue length and two copies of a
//! signed deferred delta. Both shortest-of-2 candidates are read in the same
//! decision, the first from the primary lane and the second from the mirror
//! lane, so the copies must agree whenever nothing is mid-update.
//!
//! Writes are two-phase. [`QueueLenTracker::stage`] applies an operation to
//! one lane and returns a [`StagedWrite`]; [`QueueLenTracker::commit`]
//! applies the same operation to the other lane. Between the two, a reader
//! sees [`MirrorRead::Diverged`].
//!
//! Completions are fast writes into the deferred delta. The delta is folded
//! into the queue length right before a comparison read.

use serde::Serialize;

use horus_core::WorkerId;

/// One of the two copies of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Primary,
    Mirror,
}

impl Lane {
    fn index(self) -> usize {
        match self {
            Lane::Primary => 0,
            Lane::Mirror => 1,
        }
    }

    pub fn other(self) -> Lane {
        match self {
            Lane::Primary => Lane::Mirror,
            Lane::Mirror => Lane::Primary,
        }
    }
}

/// A counter write applied lane by lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// Move the deferred delta into the queue length, clamping at zero.
    Fold,
    /// One more task queued at the worker.
    Increment,
    /// Add to the deferred delta.
    Defer(i16),
    /// Zero both the queue length and the deferred delta.
    Clear,
}

/// A write that has reached one lane and still owes the other.
#[must_use = "a staged write leaves the mirrors diverged until committed"]
#[derive(Debug)]
pub struct StagedWrite {
    worker: WorkerId,
    op: WriteOp,
    pending: Lane,
}

impl StagedWrite {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn pending_lane(&self) -> Lane {
        self.pending
    }
}

/// Result of reading a mirrored counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MirrorRead<T> {
    Consistent { value: T },
    /// The lanes differ: a write is in flight. Not corruption.
    Diverged { primary: T, mirror: T },
}

impl<T: Copy + PartialEq> MirrorRead<T> {
    fn of(lanes: [T; 2]) -> Self {
        if lanes[0] == lanes[1] {
            MirrorRead::Consistent { value: lanes[0] }
        } else {
            MirrorRead::Diverged {
                primary: lanes[0],
                mirror: lanes[1],
            }
        }
    }

    pub fn consistent(self) -> Option<T> {
        match self {
            MirrorRead::Consistent { value } => Some(value),
            MirrorRead::Diverged { .. } => None,
        }
    }
}

/// Raw lane contents for one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerLanes {
    pub qlen: [u16; 2],
    pub deferred: [i16; 2],
}

impl WorkerLanes {
    fn apply(&mut self, lane: Lane, op: WriteOp) {
        let i = lane.index();
        match op {
            WriteOp::Fold => {
                let folded = i32::from(self.qlen[i]) + i32::from(self.deferred[i]);
                self.qlen[i] = folded.clamp(0, i32::from(u16::MAX)) as u16;
                self.deferred[i] = 0;
            }
            WriteOp::Increment => {
                self.qlen[i] = self.qlen[i].saturating_add(1);
            }
            WriteOp::Defer(delta) => {
                self.deferred[i] = self.deferred[i].saturating_add(delta);
            }
            WriteOp::Clear => {
                self.qlen[i] = 0;
                self.deferred[i] = 0;
            }
        }
    }

    /// Queue length as it will read after the next fold.
    fn effective(&self, lane: Lane) -> i32 {
        let i = lane.index();
        i32::from(self.qlen[i]) + i32::from(self.deferred[i])
    }
}

#[derive(Debug, Clone)]
pub struct QueueLenTracker {
    workers: Vec<WorkerLanes>,
    /// Wide enough that `qlen_unit` times every worker's count never
    /// saturates; the 8-bit wire clamp happens at send time.
    aggregate: u64,
    qlen_unit: u8,
}

impl QueueLenTracker {
    /// Zeroed counters for `capacity` workers.
    pub fn new(capacity: u16, qlen_unit: u8) -> Self {
        Self {
            workers: vec![WorkerLanes::default(); usize::from(capacity)],
            aggregate: 0,
            qlen_unit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    pub fn qlen_unit(&self) -> u8 {
        self.qlen_unit
    }

    pub fn set_qlen_unit(&mut self, unit: u8) {
        self.qlen_unit = unit;
    }

    pub fn aggregate(&self) -> u64 {
        self.aggregate
    }

    /// First phase of a write: apply `op` to `first` only.
    pub fn stage(&mut self, worker: WorkerId, op: WriteOp, first: Lane) -> StagedWrite {
        self.workers[worker.index()].apply(first, op);
        StagedWrite {
            worker,
            op,
            pending: first.other(),
        }
    }

    /// Second phase: bring the other lane level.
    pub fn commit(&mut self, staged: StagedWrite) {
        self.workers[staged.worker.index()].apply(staged.pending, staged.op);
    }

    fn write(&mut self, worker: WorkerId, op: WriteOp, first: Lane) {
        let staged = self.stage(worker, op, first);
        self.commit(staged);
    }

    /// Fold the worker's deferred delta and return its queue length as seen
    /// from `lane`.
    pub fn read_folded(&mut self, worker: WorkerId, lane: Lane) -> u16 {
        let staged = self.stage(worker, WriteOp::Fold, lane);
        let value = self.workers[worker.index()].qlen[lane.index()];
        self.commit(staged);
        value
    }

    /// Queue one more task at `worker`; the aggregate grows by one unit.
    ///
    /// Returns `false` without touching anything when the worker's counter
    /// is already at its ceiling, so the task goes untracked.
    pub fn increment(&mut self, worker: WorkerId) -> bool {
        if self.workers[worker.index()].qlen[Lane::Primary.index()] == u16::MAX {
            return false;
        }
        self.write(worker, WriteOp::Increment, Lane::Primary);
        self.aggregate += u64::from(self.qlen_unit);
        true
    }

    /// Record a completion as a deferred decrement.
    ///
    /// Returns `false` without touching anything when the worker has no
    /// tracked tasks left (its task came off the idle stack).
    pub fn record_completion(&mut self, worker: WorkerId) -> bool {
        if self.workers[worker.index()].effective(Lane::Primary) <= 0 {
            return false;
        }
        self.write(worker, WriteOp::Defer(-1), Lane::Primary);
        self.aggregate = self.aggregate.saturating_sub(u64::from(self.qlen_unit));
        true
    }

    /// Fold and zero the worker's counters, returning how many tracked tasks
    /// were dropped. The aggregate shrinks accordingly.
    pub fn clear(&mut self, worker: WorkerId) -> u16 {
        let dropped = self.read_folded(worker, Lane::Primary);
        self.write(worker, WriteOp::Clear, Lane::Primary);
        self.aggregate = self
            .aggregate
            .saturating_sub(u64::from(dropped) * u64::from(self.qlen_unit));
        dropped
    }

    /// Effective queue length (length plus pending delta) without folding.
    pub fn queue_len(&self, worker: WorkerId) -> MirrorRead<i32> {
        let lanes = &self.workers[worker.index()];
        MirrorRead::of([lanes.effective(Lane::Primary), lanes.effective(Lane::Mirror)])
    }

    pub fn deferred(&self, worker: WorkerId) -> MirrorRead<i16> {
        MirrorRead::of(self.workers[worker.index()].deferred)
    }

    pub fn lanes(&self, worker: WorkerId) -> WorkerLanes {
        self.workers[worker.index()]
    }

    /// True when every worker's lanes agree.
    pub fn is_quiescent(&self) -> bool {
        self.workers
            .iter()
            .all(|w| w.qlen[0] == w.qlen[1] && w.deferred[0] == w.deferred[1])
    }

    /// Sum of queue lengths plus deferred deltas on the primary lane.
    pub fn outstanding(&self) -> i64 {
        self.workers
            .iter()
            .map(|w| i64::from(w.qlen[0]) + i64::from(w.deferred[0]))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horus_core::NodeId;

    const W0: WorkerId = NodeId(0);
    const W1: WorkerId = NodeId(1);

    #[test]
    fn increment_updates_both_lanes_and_aggregate() {
        let mut t = QueueLenTracker::new(4, 2);
        t.increment(W0);
        t.increment(W0);

        assert_eq!(t.queue_len(W0), MirrorRead::Consistent { value: 2 });
        assert_eq!(t.lanes(W0).qlen, [2, 2]);
        assert_eq!(t.aggregate(), 4);
    }

    #[test]
    fn staged_write_is_visible_as_divergence() {
        let mut t = QueueLenTracker::new(2, 1);
        let staged = t.stage(W1, WriteOp::Increment, Lane::Primary);

        assert_eq!(staged.pending_lane(), Lane::Mirror);
        assert_eq!(t.queue_len(W1), MirrorRead::Diverged { primary: 1, mirror: 0 });
        assert!(!t.is_quiescent());

        t.commit(staged);
        assert_eq!(t.queue_len(W1), MirrorRead::Consistent { value: 1 });
        assert!(t.is_quiescent());
    }

    #[test]
    fn completion_lands_in_deferred_until_folded() {
        let mut t = QueueLenTracker::new(2, 1);
        t.increment(W0);
        t.increment(W0);
        assert!(t.record_completion(W0));

        let lanes = t.lanes(W0);
        assert_eq!(lanes.qlen, [2, 2]);
        assert_eq!(lanes.deferred, [-1, -1]);
        assert_eq!(t.queue_len(W0).consistent(), Some(1));

        assert_eq!(t.read_folded(W0, Lane::Mirror), 1);
        let lanes = t.lanes(W0);
        assert_eq!(lanes.qlen, [1, 1]);
        assert_eq!(lanes.deferred, [0, 0]);
    }

    #[test]
    fn completion_without_tracked_task_is_ignored() {
        let mut t = QueueLenTracker::new(2, 3);
        assert!(!t.record_completion(W0));
        assert_eq!(t.lanes(W0), WorkerLanes::default());
        assert_eq!(t.aggregate(), 0);
    }

    #[test]
    fn pending_decrements_block_further_completions() {
        let mut t = QueueLenTracker::new(1, 1);
        t.increment(W0);
        assert!(t.record_completion(W0));
        assert!(!t.record_completion(W0));
        assert_eq!(t.outstanding(), 0);
    }

    #[test]
    fn clear_drops_tracked_tasks_from_aggregate() {
        let mut t = QueueLenTracker::new(2, 2);
        t.increment(W0);
        t.increment(W0);
        t.increment(W1);
        assert!(t.record_completion(W0));
        assert_eq!(t.aggregate(), 4);

        assert_eq!(t.clear(W0), 1);
        assert_eq!(t.lanes(W0), WorkerLanes::default());
        assert_eq!(t.aggregate(), 2);
    }

    #[test]
    fn outstanding_counts_deferred() {
        let mut t = QueueLenTracker::new(3, 1);
        for _ in 0..3 {
            t.increment(W1);
        }
        t.record_completion(W1);
        assert_eq!(t.outstanding(), 2);
        assert_eq!(i64::try_from(t.aggregate()).unwrap(), t.outstanding());
    }

    #[test]
    fn aggregate_keeps_counting_past_u16() {
        let mut t = QueueLenTracker::new(2, u8::MAX);
        for _ in 0..300 {
            assert!(t.increment(W0));
        }
        assert_eq!(t.aggregate(), 300 * 255);
        assert!(t.aggregate() > u64::from(u16::MAX));

        for _ in 0..100 {
            assert!(t.record_completion(W0));
        }
        assert_eq!(t.aggregate(), 200 * 255);
        assert_eq!(t.clear(W0), 200);
        assert_eq!(t.aggregate(), 0);
    }

    #[test]
    fn saturated_worker_is_not_counted() {
        let mut t = QueueLenTracker::new(1, 1);
        for _ in 0..u16::MAX {
            assert!(t.increment(W0));
        }
        assert!(!t.increment(W0));
        assert_eq!(t.lanes(W0).qlen, [u16::MAX, u16::MAX]);
        assert_eq!(t.aggregate(), u64::from(u16::MAX));
    }
}
