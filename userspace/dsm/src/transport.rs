// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Transport seams between DSM components
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below; backends covered by `inproc` and `host` tests
//!
//! PUBLIC API:
//!   - `Transport`: outbound request/reply call to an endpoint
//!   - `Service`: inbound request handler (nodes and the manager)
//!   - `Endpoint` / `AddressTable`: static address resolution

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::protocol::{Reply, Request};
use crate::{Error, NodeId, Result};

/// Address a component listens on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint {
    address: String,
}

impl Endpoint {
    /// Creates a new endpoint wrapper from the provided address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into().trim().to_string() }
    }

    /// Returns the raw endpoint address.
    pub fn as_str(&self) -> &str {
        &self.address
    }
}

impl From<&str> for Endpoint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(value: std::net::SocketAddr) -> Self {
        Self::new(value.to_string())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Immutable node id to endpoint map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressTable {
    entries: BTreeMap<NodeId, Endpoint>,
}

impl AddressTable {
    /// Builds a table from `(id, endpoint)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (NodeId, Endpoint)>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Resolves the endpoint of `node`.
    pub fn resolve(&self, node: NodeId) -> Result<&Endpoint> {
        self.entries.get(&node).ok_or(Error::UnknownNode(node))
    }

    /// Iterates entries ordered by node id.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Endpoint)> {
        self.entries.iter().map(|(id, endpoint)| (*id, endpoint))
    }

    /// Number of addresses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outbound call to a remote component.
pub trait Transport: Send + Sync {
    /// Delivers `request` to `endpoint` and waits for the reply.
    ///
    /// Delivery failures are reported as [`Error::TransportFailure`]; a
    /// [`Reply::Failed`] is returned as a reply, not as an error.
    fn call(&self, endpoint: &Endpoint, request: Request) -> Result<Reply>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn call(&self, endpoint: &Endpoint, request: Request) -> Result<Reply> {
        (**self).call(endpoint, request)
    }
}

/// Inbound request handler.
pub trait Service: Send + Sync {
    /// Handles one request. Runs concurrently with other calls.
    fn handle(&self, request: Request) -> Reply;
}

impl<S: Service + ?Sized> Service for Arc<S> {
    fn handle(&self, request: Request) -> Reply {
        (**self).handle(request)
    }
}

/// Calls `endpoint` and folds [`Reply::Failed`] into the error channel.
pub(crate) fn call_checked(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    request: Request,
) -> Result<Reply> {
    transport.call(endpoint, request)?.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_whitespace() {
        assert_eq!(Endpoint::new(" localhost:1235\n").as_str(), "localhost:1235");
    }

    #[test]
    fn unknown_node_is_reported() {
        let table = AddressTable::new([(NodeId(1), Endpoint::from("a"))]);
        assert_eq!(table.resolve(NodeId(1)).map(Endpoint::as_str), Ok("a"));
        assert_eq!(table.resolve(NodeId(2)), Err(Error::UnknownNode(NodeId(2))));
    }
}
