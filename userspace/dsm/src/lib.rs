// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: IVY-style distributed shared virtual memory (central-manager coherence)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, scenario tests in `userspace/dsm/tests/`,
//!   loopback TCP tests in `tests/dsm_e2e/`
//!
//! PUBLIC API:
//!   - `Node`: per-node page cache and request orchestration
//!   - `CentralManager`: page ownership ledger and transaction coordinator
//!   - `protocol`: request/reply contract and length-prefixed framing
//!   - `Transport` / `Service`: seams between components and the network
//!   - `config::ClusterConfig`: static address tables and initial page ownership
//!   - `console`: line commands used by the node daemon
//!
//! A node serves reads and writes from its [`PageStore`] while its access right permits.
//! Misses go to the manager, which forwards to the owner (and, for writes, invalidates
//! every copy holder first); the owner ships the page straight to the requester, and the
//! requester closes the transaction with a confirm.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod config;
pub mod console;
mod error;
pub mod gate;
pub mod inproc;
pub mod ledger;
pub mod manager;
pub mod node;
pub mod protocol;
pub mod store;
pub mod transport;

#[cfg(feature = "backend-host")]
pub mod host;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};
pub use gate::{GateMode, Transaction, TransactionGate};
pub use ledger::{PageLedger, PageRecord};
pub use manager::{CentralManager, ManagerStats};
pub use node::{Node, Outcome, PendingRequest};
pub use protocol::{Reply, Request};
pub use store::{AccessRight, Page, PageStore, PageView};
pub use transport::{AddressTable, Endpoint, Service, Transport};

#[cfg(feature = "backend-host")]
pub use host::{TcpServer, TcpTransport};
pub use inproc::InProcNetwork;

/// Identifier of a node or of the central manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of a shared page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageNum(pub u64);

impl fmt::Display for PageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical clock value stamped on requests and echoed by confirms.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Clock(pub u64);

impl Clock {
    /// Returns the following clock value.
    pub fn tick(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Kind of coherence transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Fetch a read-only copy.
    Read,
    /// Fetch exclusive ownership.
    Write,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}
