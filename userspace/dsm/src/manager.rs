// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: DSM central manager (ownership ledger + transaction coordination)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below, scenario tests in `userspace/dsm/tests/`
//!
//! Requests are admitted under one lock and acknowledged immediately. Forwarding runs on
//! a worker thread so the requester is free to receive the page while the manager waits
//! on the owner. The lock is never held across an outbound call.
//!
//! A forward that fails leaves its transaction installed; with the global gate this
//! stalls further transactions until restart.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::gate::{GateMode, Transaction, TransactionGate};
use crate::ledger::{PageLedger, PageRecord};
use crate::protocol::{Reply, Request};
use crate::transport::{call_checked, AddressTable, Service, Transport};
use crate::{Clock, Error, NodeId, PageNum, RequestKind, Result};

/// Manager counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    /// Read transactions closed by a matching confirm.
    pub reads_completed: u64,
    /// Write transactions closed by a matching confirm.
    pub writes_completed: u64,
    /// Requests refused because a transaction was outstanding.
    pub busy_rejections: u64,
    /// Copy holders that could not be invalidated.
    pub invalidation_failures: u64,
    /// Forwards to an owner that could not be delivered.
    pub forward_failures: u64,
}

struct ManagerState {
    ledger: PageLedger,
    gate: TransactionGate,
    stats: ManagerStats,
}

struct Shared {
    nodes: AddressTable,
    transport: Arc<dyn Transport>,
    state: Mutex<ManagerState>,
}

/// The central manager.
#[derive(Clone)]
pub struct CentralManager {
    shared: Arc<Shared>,
}

impl CentralManager {
    /// Creates a manager over `nodes` with the given initial ownership.
    pub fn new(
        nodes: AddressTable,
        seed: impl IntoIterator<Item = PageRecord>,
        mode: GateMode,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let state = ManagerState {
            ledger: PageLedger::new(seed),
            gate: TransactionGate::new(mode),
            stats: ManagerStats::default(),
        };
        Self { shared: Arc::new(Shared { nodes, transport, state: Mutex::new(state) }) }
    }

    /// Admits a read request and forwards it to the owner in the background.
    pub fn read_request(&self, page: PageNum, requester: NodeId, clock: Clock) -> Result<()> {
        let record = self.admit(Transaction { page, requester, clock, kind: RequestKind::Read })?;
        info!("managerd: read of page {page} by node {requester}, owner {}", record.owner);
        let shared = Arc::clone(&self.shared);
        self.spawn_forward(page, move || shared.forward_read(&record, requester, clock));
        Ok(())
    }

    /// Admits a write request; invalidation and forwarding run in the background.
    pub fn write_request(
        &self,
        page: PageNum,
        content: String,
        requester: NodeId,
        clock: Clock,
    ) -> Result<()> {
        let record = self.admit(Transaction { page, requester, clock, kind: RequestKind::Write })?;
        info!(
            "managerd: write of page {page} by node {requester}, owner {}, {} copies",
            record.owner,
            record.copy_set.len()
        );
        let shared = Arc::clone(&self.shared);
        self.spawn_forward(page, move || shared.forward_write(&record, content, requester, clock));
        Ok(())
    }

    fn admit(&self, txn: Transaction) -> Result<PageRecord> {
        self.shared.nodes.resolve(txn.requester)?;
        let mut state = self.shared.state.lock();
        let ManagerState { ledger, gate, stats } = &mut *state;
        match gate.admit(ledger, txn) {
            Err(Error::Busy) => {
                stats.busy_rejections += 1;
                debug!(
                    "managerd: {} of page {} by node {} refused, busy",
                    txn.kind, txn.page, txn.requester
                );
                Err(Error::Busy)
            }
            other => other,
        }
    }

    fn spawn_forward<F>(&self, page: PageNum, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let spawned = thread::Builder::new().name(format!("dsm-forward-{page}")).spawn(work);
        if let Err(err) = spawned {
            error!("managerd: cannot start forward for page {page}: {err}");
            self.shared.state.lock().stats.forward_failures += 1;
        }
    }

    /// Closes a read transaction and records the requester as a copy holder.
    pub fn read_confirm(&self, page: PageNum, requester: NodeId, clock: Clock) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.gate.complete(page, requester, clock, RequestKind::Read)?;
        state.ledger.add_copy(page, requester);
        state.stats.reads_completed += 1;
        info!("managerd: read of page {page} by node {requester} confirmed");
        Ok(())
    }

    /// Closes a write transaction and hands ownership to the requester.
    pub fn write_confirm(&self, page: PageNum, requester: NodeId, clock: Clock) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.gate.complete(page, requester, clock, RequestKind::Write)?;
        if let Some(previous) = state.ledger.transfer(page, requester) {
            info!("managerd: page {page} moved from node {previous} to node {requester}");
        }
        state.stats.writes_completed += 1;
        Ok(())
    }

    /// Returns the record for `page`.
    pub fn record(&self, page: PageNum) -> Option<PageRecord> {
        self.shared.state.lock().ledger.get(page).cloned()
    }

    /// Returns all records ordered by page.
    pub fn ledger(&self) -> Vec<PageRecord> {
        self.shared.state.lock().ledger.snapshot()
    }

    /// Returns outstanding transactions.
    pub fn pending(&self) -> Vec<Transaction> {
        self.shared.state.lock().gate.pending()
    }

    /// Returns the current counters.
    pub fn stats(&self) -> ManagerStats {
        self.shared.state.lock().stats
    }

    /// Configured gate granularity.
    pub fn mode(&self) -> GateMode {
        self.shared.state.lock().gate.mode()
    }
}

impl Shared {
    fn forward_read(&self, record: &PageRecord, requester: NodeId, clock: Clock) {
        let page = record.page;
        let request = Request::ReadForward { page, requester, clock };
        if let Err(err) = self.call(record.owner, request) {
            self.forward_failed(page, record.owner, &err);
        }
    }

    fn forward_write(&self, record: &PageRecord, content: String, requester: NodeId, clock: Clock) {
        let page = record.page;
        self.invalidate(page, &record.copy_set);
        self.state.lock().ledger.clear_copies(page);
        let request = Request::WriteForward { page, content, requester, clock };
        if let Err(err) = self.call(record.owner, request) {
            self.forward_failed(page, record.owner, &err);
        }
    }

    fn invalidate(&self, page: PageNum, copy_set: &BTreeSet<NodeId>) {
        let mut failures = 0;
        for &member in copy_set {
            match self.call(member, Request::Invalidate { page }) {
                Ok(Reply::Ack { ack: true }) => {
                    debug!("managerd: node {member} dropped page {page}")
                }
                Ok(reply) => {
                    warn!(
                        "managerd: node {member} refused invalidation of page {page}: {reply:?}"
                    );
                    failures += 1;
                }
                Err(err) => {
                    warn!("managerd: invalidation of page {page} at node {member} failed: {err}");
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            self.state.lock().stats.invalidation_failures += failures;
        }
    }

    fn call(&self, node: NodeId, request: Request) -> Result<Reply> {
        let endpoint = self.nodes.resolve(node)?;
        call_checked(self.transport.as_ref(), endpoint, request)
    }

    fn forward_failed(&self, page: PageNum, owner: NodeId, err: &Error) {
        error!(
            "managerd: forward of page {page} to owner {owner} failed: {err}; \
             transaction left pending"
        );
        self.state.lock().stats.forward_failures += 1;
    }
}

impl Service for CentralManager {
    fn handle(&self, request: Request) -> Reply {
        let result = match request {
            Request::ReadRequest { page, requester, clock } => {
                self.read_request(page, requester, clock).map(|()| Reply::Done)
            }
            Request::WriteRequest { page, content, requester, clock } => {
                self.write_request(page, content, requester, clock).map(|()| Reply::Done)
            }
            Request::ReadConfirm { page, requester, clock } => {
                self.read_confirm(page, requester, clock).map(|()| Reply::Confirm { confirm: true })
            }
            Request::WriteConfirm { page, requester, clock } => {
                self.write_confirm(page, requester, clock)
                    .map(|()| Reply::Confirm { confirm: true })
            }
            Request::Ledger => Ok(Reply::Ledger { records: self.ledger() }),
            Request::Stats => Ok(Reply::Stats { stats: self.stats() }),
            other => {
                debug!("managerd: unsupported request {}", other.name());
                Err(Error::Unsupported)
            }
        };
        Reply::from_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inproc::InProcNetwork;
    use crate::transport::Endpoint;

    const P1: PageNum = PageNum(1);

    fn manager(mode: GateMode) -> CentralManager {
        let nodes = AddressTable::new([
            (NodeId(1), Endpoint::from("node-1")),
            (NodeId(2), Endpoint::from("node-2")),
        ]);
        CentralManager::new(
            nodes,
            [PageRecord::new(P1, NodeId(1))],
            mode,
            Arc::new(InProcNetwork::new()),
        )
    }

    #[test]
    fn unknown_page_is_reported_without_transaction() {
        let manager = manager(GateMode::Global);
        let err = manager.read_request(PageNum(9), NodeId(2), Clock(1)).expect_err("missing");
        assert_eq!(err, Error::PageNotFound(PageNum(9)));
        assert!(manager.pending().is_empty());
    }

    #[test]
    fn unknown_requester_is_refused() {
        let manager = manager(GateMode::Global);
        let err = manager.read_request(P1, NodeId(7), Clock(1)).expect_err("unknown");
        assert_eq!(err, Error::UnknownNode(NodeId(7)));
        assert!(manager.pending().is_empty());
    }

    #[test]
    fn second_request_is_busy_and_counted() {
        let manager = manager(GateMode::Global);
        manager.read_request(P1, NodeId(2), Clock(1)).expect("admitted");
        let err = manager.write_request(P1, "x".into(), NodeId(1), Clock(1)).expect_err("busy");
        assert_eq!(err, Error::Busy);
        assert_eq!(manager.stats().busy_rejections, 1);
        assert_eq!(manager.pending().len(), 1);
    }

    #[test]
    fn read_confirm_adds_copy() {
        let manager = manager(GateMode::Global);
        manager.read_request(P1, NodeId(2), Clock(4)).expect("admitted");
        let confirm = Request::ReadConfirm { page: P1, requester: NodeId(2), clock: Clock(4) };
        let reply = manager.handle(confirm);
        assert_eq!(reply, Reply::Confirm { confirm: true });
        let record = manager.record(P1).expect("record");
        assert_eq!(record.owner, NodeId(1));
        assert!(record.copy_set.contains(&NodeId(2)));
        assert_eq!(manager.stats().reads_completed, 1);
        assert!(manager.pending().is_empty());
    }

    #[test]
    fn write_confirm_transfers_ownership() {
        let manager = manager(GateMode::Global);
        manager.write_request(P1, "x".into(), NodeId(2), Clock(2)).expect("admitted");
        manager.write_confirm(P1, NodeId(2), Clock(2)).expect("confirmed");
        let record = manager.record(P1).expect("record");
        assert_eq!(record.owner, NodeId(2));
        assert!(record.copy_set.is_empty());
        assert_eq!(manager.stats().writes_completed, 1);
    }

    #[test]
    fn mismatched_confirm_is_wrong_confirm() {
        let manager = manager(GateMode::Global);
        manager.read_request(P1, NodeId(2), Clock(1)).expect("admitted");
        let confirm = Request::ReadConfirm { page: P1, requester: NodeId(1), clock: Clock(1) };
        let reply = manager.handle(confirm);
        assert_eq!(
            reply,
            Reply::Failed { error: Error::WrongConfirm { page: P1, requester: NodeId(1) } }
        );
        assert_eq!(manager.pending().len(), 1);
        assert_eq!(manager.record(P1).expect("record").copy_set.len(), 0);
    }

    #[test]
    fn introspection_requests_report_state() {
        let manager = manager(GateMode::Global);
        manager.write_request(P1, "x".into(), NodeId(2), Clock(1)).expect("admitted");
        manager.write_confirm(P1, NodeId(2), Clock(1)).expect("confirmed");
        match manager.handle(Request::Stats) {
            Reply::Stats { stats } => assert_eq!(stats.writes_completed, 1),
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(
            manager.handle(Request::Ledger),
            Reply::Ledger { records: vec![PageRecord::new(P1, NodeId(2))] }
        );
    }

    #[test]
    fn node_only_requests_are_unsupported() {
        let manager = manager(GateMode::PerPage);
        assert_eq!(manager.handle(Request::ListPages), Reply::Failed { error: Error::Unsupported });
        assert_eq!(manager.mode(), GateMode::PerPage);
    }
}
