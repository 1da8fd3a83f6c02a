//! Shortest-queue link.
//!
//! A spine scans the leaf, gets the aggregate backlog back as an initial
//! report, and from then on receives an update every time the backlog
//! changes, until it sends a removal. One spine at a time; a newer scan
//! simply takes over the link.

use horus_core::SpineId;

/// Which report a queue signal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueReport {
    /// Reply to a scan (QUEUE_SIGNAL_INIT).
    Initial,
    /// Push after a change (QUEUE_SIGNAL).
    Update,
}

#[derive(Debug, Clone, Default)]
pub struct SqLink {
    linked: Option<SpineId>,
}

impl SqLink {
    pub fn new(linked: Option<SpineId>) -> Self {
        Self { linked }
    }

    pub fn linked(&self) -> Option<SpineId> {
        self.linked
    }

    /// SCAN_QUEUE from `spine`: link it and return the previous holder.
    pub fn on_scan(&mut self, spine: SpineId) -> Option<SpineId> {
        self.linked.replace(spine).filter(|prev| *prev != spine)
    }

    /// QUEUE_REMOVE from `spine`; ignored unless `spine` is linked.
    pub fn on_remove(&mut self, spine: SpineId) -> bool {
        if self.linked == Some(spine) {
            self.linked = None;
            true
        } else {
            false
        }
    }

    /// Where to push an update after the backlog changed.
    pub fn update_target(&self) -> Option<SpineId> {
        self.linked
    }
}
