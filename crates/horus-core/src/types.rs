//! Identifiers and sentinels shared across Horus crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved 16-bit value meaning "no id". Never assigned to a real node.
pub const INVALID_ID: u16 = 0x7FFF;

/// Reserved 8-bit value meaning "no length". Never reported as a real length.
pub const INVALID_LEN: u8 = 0x7F;

/// Largest queue length that can be carried in the 8-bit wire field.
pub const MAX_REPORTED_LEN: u8 = INVALID_LEN - 1;

/// Virtual cluster (tenant) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u16);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a node reachable from the leaf: a worker or a spine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u16);

/// A worker, addressed by its index inside the cluster's id space.
pub type WorkerId = NodeId;

/// An upstream spine.
pub type SpineId = NodeId;

impl NodeId {
    pub const INVALID: NodeId = NodeId(INVALID_ID);

    pub fn is_invalid(self) -> bool {
        self.0 == INVALID_ID
    }

    /// Register view of an optional id: `None` maps to the sentinel.
    pub fn or_invalid(id: Option<NodeId>) -> u16 {
        id.map_or(INVALID_ID, |id| id.0)
    }

    /// Inverse of [`NodeId::or_invalid`].
    pub fn from_register(raw: u16) -> Option<NodeId> {
        if raw == INVALID_ID {
            None
        } else {
            Some(NodeId(raw))
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            f.write_str("invalid")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Clamp a raw backlog value into the 8-bit wire field, keeping clear of
/// the sentinel.
pub fn clamp_reported_len(value: u64) -> u8 {
    u8::try_from(value).map_or(MAX_REPORTED_LEN, |v| v.min(MAX_REPORTED_LEN))
}
