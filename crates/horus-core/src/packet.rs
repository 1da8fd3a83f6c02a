//! The Horus packet header.
//!
//! Every task and control message exchanged between clients, leaves,
//! spines and workers carries the same fixed header, big-endian:
//!
//! ```text
//! kind u8 | cluster u16 | src u16 | dst u16 | qlen u8 | task u16 | seq u16
//! ```
//!
//! Anything after the header is task payload and is forwarded untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{ClusterId, NodeId};

/// Size of the encoded header in bytes.
pub const HEADER_LEN: usize = 12;

/// Message kinds understood by leaves and spines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MessageKind {
    NewTask = 0x00,
    NewTaskRandom = 0x01,
    TaskDone = 0x02,
    TaskDoneIdle = 0x03,
    QueueRemove = 0x04,
    ScanQueue = 0x05,
    IdleSignal = 0x06,
    QueueSignalUpdate = 0x07,
    ProbeIdleQueue = 0x08,
    ProbeIdleResponse = 0x09,
    IdleRemove = 0x0a,
    QueueSignalInit = 0x0b,
}

impl TryFrom<u8> for MessageKind {
    type Error = CoreError;

    fn try_from(raw: u8) -> CoreResult<Self> {
        let kind = match raw {
            0x00 => MessageKind::NewTask,
            0x01 => MessageKind::NewTaskRandom,
            0x02 => MessageKind::TaskDone,
            0x03 => MessageKind::TaskDoneIdle,
            0x04 => MessageKind::QueueRemove,
            0x05 => MessageKind::ScanQueue,
            0x06 => MessageKind::IdleSignal,
            0x07 => MessageKind::QueueSignalUpdate,
            0x08 => MessageKind::ProbeIdleQueue,
            0x09 => MessageKind::ProbeIdleResponse,
            0x0a => MessageKind::IdleRemove,
            0x0b => MessageKind::QueueSignalInit,
            other => return Err(CoreError::UnknownKind(other)),
        };
        Ok(kind)
    }
}

impl MessageKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Kinds a leaf only ever sends upward; receiving one is a misroute.
    pub fn is_spine_bound(self) -> bool {
        matches!(
            self,
            MessageKind::IdleSignal
                | MessageKind::QueueSignalUpdate
                | MessageKind::QueueSignalInit
                | MessageKind::ProbeIdleQueue
        )
    }
}

/// A decoded Horus packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HorusPacket {
    pub kind: MessageKind,
    pub cluster: ClusterId,
    pub src: NodeId,
    pub dst: NodeId,
    /// Reported queue length (completions, probe responses, queue signals).
    pub qlen: u8,
    pub task_id: u16,
    pub seq: u16,
    pub payload: Bytes,
}

impl HorusPacket {
    /// A header-only packet of `kind` for `cluster`; ids default to zero.
    pub fn new(kind: MessageKind, cluster: ClusterId) -> Self {
        Self {
            kind,
            cluster,
            src: NodeId(0),
            dst: NodeId(0),
            qlen: 0,
            task_id: 0,
            seq: 0,
            payload: Bytes::new(),
        }
    }

    pub fn from_node(mut self, src: NodeId) -> Self {
        self.src = src;
        self
    }

    pub fn to_node(mut self, dst: NodeId) -> Self {
        self.dst = dst;
        self
    }

    pub fn with_qlen(mut self, qlen: u8) -> Self {
        self.qlen = qlen;
        self
    }

    pub fn with_task(mut self, task_id: u16) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_seq(mut self, seq: u16) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Decode a packet from a datagram.
    pub fn decode(mut buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::Truncated {
                len: buf.len(),
                needed: HEADER_LEN,
            });
        }

        let kind = MessageKind::try_from(buf.get_u8())?;
        let cluster = ClusterId(buf.get_u16());
        let src = NodeId(buf.get_u16());
        let dst = NodeId(buf.get_u16());
        let qlen = buf.get_u8();
        let task_id = buf.get_u16();
        let seq = buf.get_u16();

        Ok(Self {
            kind,
            cluster,
            src,
            dst,
            qlen,
            task_id,
            seq,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// Encode header and payload into a single buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.kind.code());
        buf.put_u16(self.cluster.0);
        buf.put_u16(self.src.0);
        buf.put_u16(self.dst.0);
        buf.put_u8(self.qlen);
        buf.put_u16(self.task_id);
        buf.put_u16(self.seq);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
