//! horus-core — types shared by the Horus leaf scheduler and daemon.
//!
//! - **`types`** — cluster and node identifiers, wire sentinels
//! - **`packet`** — the Horus packet header and its codec
//! - **`config`** — `leaf.toml` parsing

pub mod config;
pub mod error;
pub mod packet;
pub mod types;

pub use config::LeafConfig;
pub use error::{CoreError, CoreResult};
pub use packet::{HorusPacket, MessageKind, HEADER_LEN};
pub use types::*;
