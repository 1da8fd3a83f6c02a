//! Idle-link negotiation.
//!
//! When a leaf has idle workers but no spine to advertise them to, it
//! probes two randomly chosen spines for the length of their idle lists and
//! links to the shorter one:
//!
//! ```text
//! Idle ──start──▶ FirstProbeSent ──response──▶ SecondProbeSent ──response──▶ Idle
//!   ▲                   │                             │                      (linked)
//!   └──── timeout ──────┴─────────────────────────────┘
//! ```
//!
//! Only one round runs at a time. A probe that is never answered expires
//! after the configured timeout and the negotiator falls back to `Idle`
//! without linking; the next trigger starts a fresh round.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use horus_core::SpineId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    FirstProbeSent {
        spine: SpineId,
        deadline: Instant,
    },
    SecondProbeSent {
        candidate: SpineId,
        candidate_len: u8,
        spine: SpineId,
        deadline: Instant,
    },
}

/// Coarse view of [`ProbeState`] for snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbePhase {
    Idle,
    FirstProbeSent,
    SecondProbeSent,
}

/// Why a round could not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRefused {
    /// A round is already outstanding.
    InFlight,
}

/// What the negotiator wants sent after a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleLinkAction {
    /// Send a PROBE_IDLE_QUEUE to this spine.
    Probe(SpineId),
    /// Negotiation finished: send IDLE_SIGNAL to the new linked spine.
    Signal(SpineId),
}

#[derive(Debug, Clone)]
pub struct IdleLinkNegotiator {
    state: ProbeState,
    linked: Option<SpineId>,
    timeout: Duration,
}

impl IdleLinkNegotiator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: ProbeState::Idle,
            linked: None,
            timeout,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn phase(&self) -> ProbePhase {
        match self.state {
            ProbeState::Idle => ProbePhase::Idle,
            ProbeState::FirstProbeSent { .. } => ProbePhase::FirstProbeSent,
            ProbeState::SecondProbeSent { .. } => ProbePhase::SecondProbeSent,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.state != ProbeState::Idle
    }

    pub fn linked(&self) -> Option<SpineId> {
        self.linked
    }

    pub fn set_linked(&mut self, spine: Option<SpineId>) {
        self.linked = spine;
    }

    /// Spine that answered the first probe of the current round.
    pub fn probed_spine_id(&self) -> Option<SpineId> {
        match self.state {
            ProbeState::SecondProbeSent { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    /// Idle-list length reported by [`Self::probed_spine_id`].
    pub fn probed_spine_idle_len(&self) -> Option<u8> {
        match self.state {
            ProbeState::SecondProbeSent { candidate_len, .. } => Some(candidate_len),
            _ => None,
        }
    }

    /// Open a round by probing `spine`.
    pub fn start(&mut self, spine: SpineId, now: Instant) -> Result<(), StartRefused> {
        if self.in_flight() {
            return Err(StartRefused::InFlight);
        }
        self.state = ProbeState::FirstProbeSent {
            spine,
            deadline: now + self.timeout,
        };
        Ok(())
    }

    /// Handle a PROBE_IDLE_RESPONSE from `src` reporting `idle_len`.
    ///
    /// `pick_second` chooses the spine for the second probe; returning
    /// `None` abandons the round.
    pub fn on_response(
        &mut self,
        src: SpineId,
        idle_len: u8,
        now: Instant,
        pick_second: impl FnOnce() -> Option<SpineId>,
    ) -> Option<IdleLinkAction> {
        match self.state {
            ProbeState::FirstProbeSent { spine, .. } if spine == src => match pick_second() {
                Some(second) => {
                    self.state = ProbeState::SecondProbeSent {
                        candidate: src,
                        candidate_len: idle_len,
                        spine: second,
                        deadline: now + self.timeout,
                    };
                    Some(IdleLinkAction::Probe(second))
                }
                None => {
                    self.state = ProbeState::Idle;
                    None
                }
            },
            ProbeState::SecondProbeSent {
                candidate,
                candidate_len,
                spine,
                ..
            } if spine == src => {
                let winner = if idle_len < candidate_len { src } else { candidate };
                debug!(
                    %candidate,
                    candidate_len,
                    second = %src,
                    second_len = idle_len,
                    %winner,
                    "idle link negotiated"
                );
                self.linked = Some(winner);
                self.state = ProbeState::Idle;
                Some(IdleLinkAction::Signal(winner))
            }
            _ => {
                debug!(%src, idle_len, state = ?self.phase(), "ignoring stray probe response");
                None
            }
        }
    }

    /// IDLE_REMOVE from `src`. Only the linked spine can unlink.
    pub fn on_remove(&mut self, src: SpineId) -> bool {
        if self.linked == Some(src) {
            self.linked = None;
            true
        } else {
            false
        }
    }

    /// Abandon the round if its deadline has passed. Returns the spine whose
    /// answer never came.
    pub fn expire(&mut self, now: Instant) -> Option<SpineId> {
        let (spine, deadline) = match self.state {
            ProbeState::Idle => return None,
            ProbeState::FirstProbeSent { spine, deadline } => (spine, deadline),
            ProbeState::SecondProbeSent { spine, deadline, .. } => (spine, deadline),
        };
        if now < deadline {
            return None;
        }
        self.state = ProbeState::Idle;
        Some(spine)
    }
}
