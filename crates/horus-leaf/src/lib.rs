//! horus-leaf — the leaf tier of the Horus two-tier scheduler.
//!
//! A leaf sits in front of a rack of workers and places every new task on
//! one of them. It prefers an idle worker; when none is idle it samples two
//! workers and picks the one with the shorter queue. It also keeps two links
//! to the spine tier above it: the idle link, chosen by probing two spines
//! and advertising idle capacity to the less loaded one, and the SQ link,
//! to which it reports its aggregate backlog after every change.
//!
//! # Architecture
//!
//! ```text
//! Leaf
//!   ├── RangeTables (valid count → sampling width, shared)
//!   └── Per-cluster state (own lock)
//!       ├── WorkerDirectory (node → egress)
//!       ├── IdleStack (LIFO of idle workers)
//!       ├── QueueLenTracker (mirrored per-worker counters + aggregate)
//!       ├── IdleLinkNegotiator (two-probe state machine with deadline)
//!       ├── SqLink (spine receiving backlog reports)
//!       └── IndexSampler (uniform draws for dispatch and probing)
//! ```

pub mod cluster;
pub mod directory;
mod dispatch;
pub mod error;
pub mod idle_link;
pub mod idle_stack;
pub mod leaf;
pub mod provision;
pub mod queue_len;
pub mod range;
pub mod sampler;
pub mod snapshot;
pub mod sq_link;

pub use cluster::{ClusterStats, Decision, Handled, Outbound};
pub use directory::{Egress, WorkerDirectory};
pub use error::{LeafError, LeafResult};
pub use leaf::{Leaf, LeafSettings, SamplerFactory};
pub use provision::ClusterSpec;
pub use range::{RangeAction, RangeTableKind, RangeTables};
pub use sampler::{IndexSampler, RngSampler, ScriptedSampler};
pub use snapshot::{ClusterSnapshot, Register, WorkerSnapshot};
