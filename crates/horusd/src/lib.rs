//! horusd — the Horus leaf daemon.
//!
//! Wires a [`horus_leaf::Leaf`] to the network:
//! - **`transport`** — UDP packet loop and the periodic probe sweep
//! - **`admin`** — HTTP admin API (cluster snapshots, register reads)
//! - **`exposition`** — Prometheus text rendering of cluster snapshots
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/clusters` | Snapshots of every cluster |
//! | GET | `/api/v1/clusters/{id}` | Snapshot of one cluster |
//! | GET | `/api/v1/clusters/{id}/registers/{name}` | Single register read |
//! | GET | `/metrics` | Prometheus exposition |

pub mod admin;
pub mod exposition;
pub mod transport;

pub use admin::build_router;
pub use exposition::render_prometheus;
pub use transport::PacketLoop;
