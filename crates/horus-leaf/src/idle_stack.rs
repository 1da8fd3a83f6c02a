//! Idle-worker stack.
//!
//! LIFO of workers with no outstanding tasks. The most recently freed
//! worker is handed the next task, so recently active workers are reused
//! before cold ones.

use horus_core::WorkerId;

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRefused {
    /// The stack already holds `capacity` workers.
    Full,
    /// The worker is already on the stack.
    AlreadyIdle,
}

#[derive(Debug, Clone)]
pub struct IdleStack {
    workers: Vec<WorkerId>,
    capacity: usize,
}

impl IdleStack {
    /// An empty stack holding at most `capacity` workers.
    pub fn new(capacity: u16) -> Self {
        Self {
            workers: Vec::with_capacity(usize::from(capacity)),
            capacity: usize::from(capacity),
        }
    }

    pub fn push(&mut self, worker: WorkerId) -> Result<(), PushRefused> {
        if self.workers.contains(&worker) {
            return Err(PushRefused::AlreadyIdle);
        }
        if self.workers.len() >= self.capacity {
            return Err(PushRefused::Full);
        }
        self.workers.push(worker);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<WorkerId> {
        self.workers.pop()
    }

    pub fn top(&self) -> Option<WorkerId> {
        self.workers.last().copied()
    }

    pub fn idle_count(&self) -> u16 {
        // Bounded by `capacity`, which came from a u16.
        self.workers.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.workers.contains(&worker)
    }

    /// Stack contents, bottom first.
    pub fn as_slice(&self) -> &[WorkerId] {
        &self.workers
    }

    /// Change the capacity after a valid-count update. Workers whose id is
    /// no longer below the new count are dropped, in stack order.
    pub fn resize(&mut self, capacity: u16) -> Vec<WorkerId> {
        self.capacity = usize::from(capacity);
        let (kept, dropped): (Vec<WorkerId>, Vec<WorkerId>) = self
            .workers
            .drain(..)
            .partition(|worker| worker.0 < capacity);
        self.workers = kept;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horus_core::NodeId;

    #[test]
    fn pops_most_recent_first() {
        let mut stack = IdleStack::new(4);
        for id in [0, 1, 2, 3] {
            stack.push(NodeId(id)).unwrap();
        }
        assert_eq!(stack.idle_count(), 4);
        assert_eq!(stack.top(), Some(NodeId(3)));

        let order: Vec<u16> = std::iter::from_fn(|| stack.pop()).map(|w| w.0).collect();
        assert_eq!(order, vec![3, 2, 1, 0]);
        assert_eq!(stack.idle_count(), 0);
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut stack = IdleStack::new(2);
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn refuses_overflow_and_duplicates() {
        let mut stack = IdleStack::new(2);
        stack.push(NodeId(5)).unwrap();
        assert_eq!(stack.push(NodeId(5)), Err(PushRefused::AlreadyIdle));
        stack.push(NodeId(6)).unwrap();
        assert_eq!(stack.push(NodeId(7)), Err(PushRefused::Full));
        assert_eq!(stack.as_slice(), &[NodeId(5), NodeId(6)]);
    }

    #[test]
    fn shrinking_drops_from_top() {
        let mut stack = IdleStack::new(4);
        for id in [0, 1, 2, 3] {
            stack.push(NodeId(id)).unwrap();
        }
        let dropped = stack.resize(2);
        assert_eq!(dropped, vec![NodeId(2), NodeId(3)]);
        assert_eq!(stack.idle_count(), 2);
        assert_eq!(stack.top(), Some(NodeId(1)));
    }

    #[test]
    fn shrinking_drops_workers_beyond_new_count() {
        let mut stack = IdleStack::new(4);
        for id in [3, 0, 2] {
            stack.push(NodeId(id)).unwrap();
        }
        let dropped = stack.resize(2);
        assert_eq!(dropped, vec![NodeId(3), NodeId(2)]);
        assert_eq!(stack.as_slice(), &[NodeId(0)]);
    }
}
