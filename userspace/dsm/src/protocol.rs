// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: DSM wire contract (requests, replies, length-prefixed JSON frames)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! | Request      | Direction                  | Reply            |
//! |--------------|----------------------------|------------------|
//! | ReadRequest  | node -> manager            | Done             |
//! | ReadForward  | manager -> owner           | Done             |
//! | SendPage     | holder -> requester        | Done             |
//! | ReadConfirm  | node -> manager            | Confirm          |
//! | WriteRequest | node -> manager            | Done             |
//! | Invalidate   | manager -> copy holder     | Ack              |
//! | WriteForward | manager -> owner           | Done             |
//! | WriteConfirm | node -> manager            | Confirm          |
//! | ListPages    | any -> node                | Pages            |
//! | Ledger       | any -> manager             | Ledger           |
//! | Stats        | any -> manager             | Stats            |
//!
//! Any request may be answered with `Failed(Error)`.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::ledger::PageRecord;
use crate::manager::ManagerStats;
use crate::store::PageView;
use crate::{Clock, Error, NodeId, PageNum, Result};

/// Largest frame accepted on the wire.
pub const MAX_FRAME: usize = 1024 * 1024;

/// Requests exchanged between nodes and the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Node asks the manager for a read copy.
    ReadRequest {
        /// Requested page.
        page: PageNum,
        /// Asking node.
        requester: NodeId,
        /// Requester clock.
        clock: Clock,
    },
    /// Manager asks the owner to ship a read copy.
    ReadForward {
        /// Requested page.
        page: PageNum,
        /// Node to deliver to.
        requester: NodeId,
        /// Requester clock.
        clock: Clock,
    },
    /// Holder delivers page content to the requester.
    SendPage {
        /// Delivered page.
        page: PageNum,
        /// Page content.
        content: String,
        /// Node that shipped the page.
        owner: NodeId,
    },
    /// Requester closes a read transaction.
    ReadConfirm {
        /// Confirmed page.
        page: PageNum,
        /// Confirming node.
        requester: NodeId,
        /// Clock of the original request.
        clock: Clock,
    },
    /// Node asks the manager for exclusive ownership.
    WriteRequest {
        /// Requested page.
        page: PageNum,
        /// Content to store.
        content: String,
        /// Asking node.
        requester: NodeId,
        /// Requester clock.
        clock: Clock,
    },
    /// Manager revokes a read copy.
    Invalidate {
        /// Page to drop.
        page: PageNum,
    },
    /// Manager asks the owner to hand the page over.
    WriteForward {
        /// Requested page.
        page: PageNum,
        /// Content to deliver.
        content: String,
        /// Node to deliver to.
        requester: NodeId,
        /// Requester clock.
        clock: Clock,
    },
    /// Requester closes a write transaction.
    WriteConfirm {
        /// Confirmed page.
        page: PageNum,
        /// Confirming node.
        requester: NodeId,
        /// Clock of the original request.
        clock: Clock,
    },
    /// Lists a node's cached pages.
    ListPages,
    /// Dumps the manager's ownership ledger.
    Ledger,
    /// Reads the manager's counters.
    Stats,
}

impl Request {
    /// Short operation name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadRequest { .. } => "read_request",
            Self::ReadForward { .. } => "read_forward",
            Self::SendPage { .. } => "send_page",
            Self::ReadConfirm { .. } => "read_confirm",
            Self::WriteRequest { .. } => "write_request",
            Self::Invalidate { .. } => "invalidate",
            Self::WriteForward { .. } => "write_forward",
            Self::WriteConfirm { .. } => "write_confirm",
            Self::ListPages => "list_pages",
            Self::Ledger => "ledger",
            Self::Stats => "stats",
        }
    }
}

/// Replies to [`Request`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    /// Request accepted; no payload.
    Done,
    /// Outcome of a confirm.
    Confirm {
        /// `true` when the transaction was closed.
        confirm: bool,
    },
    /// Outcome of an invalidation.
    Ack {
        /// `true` when the copy was dropped.
        ack: bool,
    },
    /// Cached pages of a node.
    Pages {
        /// Pages ordered by number.
        pages: Vec<PageView>,
    },
    /// Manager ledger.
    Ledger {
        /// Records ordered by page.
        records: Vec<PageRecord>,
    },
    /// Manager counters.
    Stats {
        /// Counter snapshot.
        stats: ManagerStats,
    },
    /// The request failed.
    Failed {
        /// Failure reason.
        error: Error,
    },
}

impl Reply {
    /// Wraps a handler result, mapping errors to [`Reply::Failed`].
    pub fn from_result(result: Result<Reply>) -> Self {
        result.unwrap_or_else(|error| Self::Failed { error })
    }

    /// Converts [`Reply::Failed`] back into an error.
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Self::Failed { error } => Err(error),
            other => Ok(other),
        }
    }
}

/// Serializes `value` into a frame payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| Error::transport(format!("encode: {err}")))
}

/// Deserializes a frame payload.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|err| Error::transport(format!("decode: {err}")))
}

/// Reads one length-prefixed frame. Returns `None` on a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame exceeds maximum size",
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}

/// Writes one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> std::io::Result<()> {
    if payload.len() > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame exceeds maximum size",
        ));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}
