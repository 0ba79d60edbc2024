// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: DSM node (page cache + request orchestration)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below, scenario tests in `userspace/dsm/tests/`
//!
//! PUBLIC API:
//!   - `Node::read` / `Node::write`: local hit or request to the manager
//!   - `Node::wait_settled`: block until the outstanding request completes
//!   - `Service for Node`: read/write forwards, invalidations and page deliveries
//!
//! The page store and the pending-request slot share one lock. It is never held across
//! an outbound call; deliveries may arrive before the request call returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::protocol::{Reply, Request};
use crate::store::{AccessRight, PageStore, PageView};
use crate::transport::{call_checked, AddressTable, Endpoint, Service, Transport};
use crate::{Clock, Error, NodeId, PageNum, RequestKind, Result};

/// Static wiring of a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identifier of this node.
    pub id: NodeId,
    /// Manager endpoint.
    pub manager: Endpoint,
    /// Endpoints of every node, this one included.
    pub peers: AddressTable,
}

/// Result of a local read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Served from the local cache; carries the (updated) content.
    Local(String),
    /// A request went to the manager; the page arrives asynchronously.
    Requested,
}

/// The node's own outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Requested page.
    pub page: PageNum,
    /// This node.
    pub requester: NodeId,
    /// Clock stamped on the request.
    pub clock: Clock,
    /// Read or write.
    pub kind: RequestKind,
}

#[derive(Default)]
struct NodeState {
    store: PageStore,
    pending: Option<PendingRequest>,
    delivered: bool,
    clock: Clock,
    last: Option<Result<()>>,
}

impl NodeState {
    fn begin(
        &mut self,
        requester: NodeId,
        page: PageNum,
        kind: RequestKind,
    ) -> Result<PendingRequest> {
        if self.pending.is_some() {
            return Err(Error::Busy);
        }
        self.clock = self.clock.tick();
        let pending = PendingRequest { page, requester, clock: self.clock, kind };
        self.pending = Some(pending);
        self.delivered = false;
        Ok(pending)
    }

    /// Clears `pending` and records `outcome`. Returns false if the slot moved on.
    fn settle(&mut self, pending: PendingRequest, outcome: Result<()>) -> bool {
        if self.pending != Some(pending) {
            return false;
        }
        self.pending = None;
        self.delivered = false;
        self.last = Some(outcome);
        true
    }
}

/// A DSM node.
pub struct Node {
    id: NodeId,
    manager: Endpoint,
    peers: AddressTable,
    transport: Arc<dyn Transport>,
    state: Mutex<NodeState>,
    settled: Condvar,
}

impl Node {
    /// Creates a node with an empty cache.
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: config.id,
            manager: config.manager,
            peers: config.peers,
            transport,
            state: Mutex::new(NodeState::default()),
            settled: Condvar::new(),
        }
    }

    /// Seeds a page, typically the initial content of pages this node owns.
    pub fn seed(&self, page: PageNum, content: impl Into<String>, access: AccessRight) {
        self.state.lock().store.install(page, content.into(), access);
    }

    /// Identifier of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Reads `page` from cache, or asks the manager for a copy.
    pub fn read(&self, page: PageNum) -> Result<Outcome> {
        let pending = {
            let mut state = self.state.lock();
            if let Some(content) = state.store.readable(page) {
                return Ok(Outcome::Local(content.to_string()));
            }
            state.begin(self.id, page, RequestKind::Read)?
        };
        info!("node {}: read miss on page {page}, asking manager", self.id);
        let request = Request::ReadRequest { page, requester: self.id, clock: pending.clock };
        self.submit(pending, request)
    }

    /// Appends `content` when this node owns `page`, or asks the manager for ownership.
    ///
    /// A remote write replaces the page content with `content` once ownership arrives.
    pub fn write(&self, page: PageNum, content: &str) -> Result<Outcome> {
        let pending = {
            let mut state = self.state.lock();
            if let Some(updated) = state.store.append(page, content) {
                return Ok(Outcome::Local(updated.to_string()));
            }
            state.begin(self.id, page, RequestKind::Write)?
        };
        info!("node {}: write miss on page {page}, asking manager", self.id);
        let request = Request::WriteRequest {
            page,
            content: content.to_string(),
            requester: self.id,
            clock: pending.clock,
        };
        self.submit(pending, request)
    }

    fn submit(&self, pending: PendingRequest, request: Request) -> Result<Outcome> {
        match call_checked(self.transport.as_ref(), &self.manager, request) {
            Ok(_) => Ok(Outcome::Requested),
            Err(err) => {
                warn!("node {}: request for page {} failed: {err}", self.id, pending.page);
                let mut state = self.state.lock();
                // A delivery that already landed owns the slot now.
                if !state.delivered && state.settle(pending, Err(err.clone())) {
                    self.settled.notify_all();
                }
                Err(err)
            }
        }
    }

    /// Serves a read forward: downgrade to READ and ship the page to `requester`.
    pub fn read_forward(&self, page: PageNum, requester: NodeId, clock: Clock) -> Result<()> {
        let content =
            self.state.lock().store.downgrade(page).ok_or(Error::OwnerMissingPage(page))?;
        debug!(
            "node {}: read forward page {page} to node {requester} (clock {})",
            self.id, clock.0
        );
        self.send_page(page, content, requester)
    }

    /// Serves a write forward: drop the page and ship `content` to `requester`.
    pub fn write_forward(
        &self,
        page: PageNum,
        content: String,
        requester: NodeId,
        clock: Clock,
    ) -> Result<()> {
        if self.state.lock().store.remove(page).is_none() {
            warn!("node {}: write forward for uncached page {page}", self.id);
        }
        debug!(
            "node {}: write forward page {page} to node {requester} (clock {})",
            self.id, clock.0
        );
        self.send_page(page, content, requester)
    }

    fn send_page(&self, page: PageNum, content: String, requester: NodeId) -> Result<()> {
        let endpoint = self.peers.resolve(requester)?;
        let request = Request::SendPage { page, content, owner: self.id };
        call_checked(self.transport.as_ref(), endpoint, request).map(|_| ())
    }

    /// Drops a read copy. Absent pages are acknowledged too.
    pub fn invalidate(&self, page: PageNum) -> bool {
        if self.state.lock().store.remove(page).is_some() {
            debug!("node {}: invalidated page {page}", self.id);
        }
        true
    }

    /// Accepts a page delivery for the pending request and confirms it to the manager.
    ///
    /// Returns once the page is accepted. The confirm outcome is reported through
    /// [`Node::wait_settled`] and [`Node::last_outcome`], not to the sender.
    pub fn deliver(&self, page: PageNum, content: String, owner: NodeId) -> Result<()> {
        let pending = self.accept(page, content)?;
        debug!("node {}: page {page} delivered by node {owner}", self.id);

        let outcome = self.confirm(pending);
        let mut state = self.state.lock();
        if outcome.is_err() && pending.kind == RequestKind::Read {
            // The manager may not list this node as a copy holder.
            state.store.remove(page);
        }
        state.settle(pending, outcome.clone());
        self.settled.notify_all();
        drop(state);
        match &outcome {
            Ok(()) => info!("node {}: {} of page {page} confirmed", self.id, pending.kind),
            Err(err) => warn!("node {}: {} of page {page} failed: {err}", self.id, pending.kind),
        }
        Ok(())
    }

    fn accept(&self, page: PageNum, content: String) -> Result<PendingRequest> {
        let mut state = self.state.lock();
        let current = state.pending;
        let pending = match current {
            Some(pending) if pending.page == page && !state.delivered => pending,
            other => {
                let err =
                    Error::ProtocolMismatch { expected: other.map(|p| p.page), delivered: page };
                warn!("node {}: {err}", self.id);
                if let Some(abandoned) = other {
                    if state.settle(abandoned, Err(err.clone())) {
                        self.settled.notify_all();
                    }
                }
                return Err(err);
            }
        };
        let access = match pending.kind {
            RequestKind::Read => AccessRight::Read,
            RequestKind::Write => AccessRight::Write,
        };
        state.store.install(page, content, access);
        state.delivered = true;
        Ok(pending)
    }

    fn confirm(&self, pending: PendingRequest) -> Result<()> {
        let PendingRequest { page, requester, clock, kind } = pending;
        let request = match kind {
            RequestKind::Read => Request::ReadConfirm { page, requester, clock },
            RequestKind::Write => Request::WriteConfirm { page, requester, clock },
        };
        match call_checked(self.transport.as_ref(), &self.manager, request)? {
            Reply::Confirm { confirm: true } => Ok(()),
            Reply::Confirm { confirm: false } => Err(Error::ConfirmRejected(page)),
            other => Err(Error::transport(format!("unexpected confirm reply {other:?}"))),
        }
    }

    /// Returns the outstanding request, if any.
    pub fn pending(&self) -> Option<PendingRequest> {
        self.state.lock().pending
    }

    /// Returns the outcome of the last finished request.
    pub fn last_outcome(&self) -> Option<Result<()>> {
        self.state.lock().last.clone()
    }

    /// Blocks until no request is outstanding, then reports the last outcome.
    pub fn wait_settled(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let Some(pending) = state.pending else { break };
            let timed_out = self.settled.wait_until(&mut state, deadline).timed_out();
            if timed_out && state.pending.is_some() {
                return Err(Error::transport(format!(
                    "timed out waiting for {} of page {}",
                    pending.kind, pending.page
                )));
            }
        }
        state.last.clone().unwrap_or(Ok(()))
    }

    /// Access right currently held on `page`.
    pub fn access(&self, page: PageNum) -> AccessRight {
        self.state.lock().store.access(page)
    }

    /// Cached content of `page`, regardless of access right.
    pub fn cached(&self, page: PageNum) -> Option<String> {
        self.state.lock().store.get(page).map(|entry| entry.content().to_string())
    }

    /// Lists cached pages.
    pub fn pages(&self) -> Vec<PageView> {
        self.state.lock().store.views()
    }
}

impl Service for Node {
    fn handle(&self, request: Request) -> Reply {
        let result = match request {
            Request::ReadForward { page, requester, clock } => {
                self.read_forward(page, requester, clock).map(|()| Reply::Done)
            }
            Request::WriteForward { page, content, requester, clock } => {
                self.write_forward(page, content, requester, clock).map(|()| Reply::Done)
            }
            Request::Invalidate { page } => Ok(Reply::Ack { ack: self.invalidate(page) }),
            Request::SendPage { page, content, owner } => {
                self.deliver(page, content, owner).map(|()| Reply::Done)
            }
            Request::ListPages => Ok(Reply::Pages { pages: self.pages() }),
            other => {
                debug!("node {}: unsupported request {}", self.id, other.name());
                Err(Error::Unsupported)
            }
        };
        Reply::from_result(result)
    }
}
