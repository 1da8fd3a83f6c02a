//! Leaf scheduler error types.

use thiserror::Error;

use horus_core::{ClusterId, MessageKind, NodeId};

use crate::range::RangeTableKind;

/// Errors raised by provisioning and packet handling.
#[derive(Debug, Error)]
pub enum LeafError {
    #[error("cluster not provisioned: {0}")]
    UnknownCluster(ClusterId),

    #[error("cluster already provisioned: {0}")]
    AlreadyProvisioned(ClusterId),

    #[error("no {table} range entry for valid count {count}")]
    UnprovisionedRange { table: RangeTableKind, count: u16 },

    #[error("range entry for count {count} must be a power of two with width {expected_bits}, got width {width_bits}")]
    InvalidRangeEntry {
        count: u16,
        width_bits: u8,
        expected_bits: u32,
    },

    #[error("{table} range entry for count {count} is in use by cluster {cluster}")]
    RangeInUse {
        table: RangeTableKind,
        count: u16,
        cluster: ClusterId,
    },

    #[error("no directory entry for node {node} in cluster {cluster}")]
    UnknownDestination { cluster: ClusterId, node: NodeId },

    #[error("worker {worker} outside cluster address space of {max} ids")]
    WorkerOutOfRange { worker: NodeId, max: u16 },

    #[error("id {0:#06x} is reserved")]
    ReservedId(u16),

    #[error("invalid provisioning for cluster {cluster}: {reason}")]
    Provisioning { cluster: ClusterId, reason: String },

    #[error("leaf does not handle {0:?} packets")]
    Misrouted(MessageKind),
}

pub type LeafResult<T> = Result<T, LeafError>;
