// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host TCP backend for DSM (std sockets, one thread per connection)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below, loopback cluster tests in `tests/dsm_e2e/`
//!
//! Each outbound call opens a fresh connection, writes one request frame and waits for
//! one reply frame. Connect, read and write are bounded by the configured timeout, which
//! is the only place a stalled peer turns into `TransportFailure`.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};

use crate::protocol::{self, Reply, Request};
use crate::transport::{Endpoint, Service, Transport};
use crate::{Error, Result};

/// Default bound on connect, read and write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Outbound TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl TcpTransport {
    /// Creates a transport whose calls give up after `timeout` per step.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        let addrs = endpoint
            .as_str()
            .to_socket_addrs()
            .map_err(|err| Error::transport(format!("resolve {endpoint}: {err}")))?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => Error::transport(format!("connect {endpoint}: {err}")),
            None => Error::transport(format!("connect {endpoint}: no addresses")),
        })
    }
}

impl Transport for TcpTransport {
    fn call(&self, endpoint: &Endpoint, request: Request) -> Result<Reply> {
        let op = request.name();
        let mut stream = self.connect(endpoint)?;
        let frame = protocol::encode(&request)?;
        protocol::write_frame(&mut stream, &frame)
            .map_err(|err| Error::transport(format!("{op} to {endpoint}: send: {err}")))?;
        let reply = protocol::read_frame(&mut stream)
            .map_err(|err| Error::transport(format!("{op} to {endpoint}: recv: {err}")))?
            .ok_or_else(|| Error::transport(format!("{op} to {endpoint}: connection closed")))?;
        protocol::decode(&reply)
    }
}

/// Accept loop serving a [`Service`] over TCP.
pub struct TcpServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl TcpServer {
    /// Binds `addr` and starts serving `service`.
    pub fn bind(addr: &str, service: Arc<dyn Service>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|err| Error::transport(format!("bind {addr}: {err}")))?;
        Self::from_listener(listener, service)
    }

    /// Serves `service` on an already bound listener.
    pub fn from_listener(listener: TcpListener, service: Arc<dyn Service>) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&shutdown);
        let accept_thread = thread::Builder::new()
            .name(format!("dsm-accept-{}", local_addr.port()))
            .spawn(move || accept_loop(listener, service, stop_flag))?;
        Ok(Self { local_addr, shutdown, accept_thread: Some(accept_thread) })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint clients should dial.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.local_addr)
    }

    /// Blocks until the accept loop exits.
    pub fn wait(mut self) {
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            // Wake the blocking accept call by connecting once to the listener.
            let _ = TcpStream::connect_timeout(&self.local_addr, Duration::from_millis(200));
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, service: Arc<dyn Service>, shutdown: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let service = Arc::clone(&service);
                let spawned = thread::Builder::new()
                    .name("dsm-conn".into())
                    .spawn(move || serve_connection(stream, service));
                if let Err(err) = spawned {
                    error!("dsm: failed to spawn connection thread: {err}");
                }
            }
            Err(err) => {
                warn!("dsm: accept error: {err}");
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

fn serve_connection(mut stream: TcpStream, service: Arc<dyn Service>) {
    let peer = stream.peer_addr().map(|addr| addr.to_string()).unwrap_or_default();
    loop {
        let frame = match protocol::read_frame(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                debug!("dsm: connection {peer} closed: {err}");
                break;
            }
        };
        let reply = match protocol::decode::<Request>(&frame) {
            Ok(request) => service.handle(request),
            Err(error) => Reply::Failed { error },
        };
        let bytes = match protocol::encode(&reply) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("dsm: reply encode failed: {err}");
                break;
            }
        };
        if let Err(err) = protocol::write_frame(&mut stream, &bytes) {
            debug!("dsm: reply to {peer} failed: {err}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Static;

    impl Service for Static {
        fn handle(&self, request: Request) -> Reply {
            match request {
                Request::Invalidate { .. } => Reply::Ack { ack: true },
                _ => Reply::Failed { error: Error::Unsupported },
            }
        }
    }

    #[test]
    fn call_roundtrip_over_loopback() {
        let server = TcpServer::bind("127.0.0.1:0", Arc::new(Static)).expect("bind");
        let transport = TcpTransport::default();
        let reply = transport
            .call(&server.endpoint(), Request::Invalidate { page: crate::PageNum(1) })
            .expect("call");
        assert_eq!(reply, Reply::Ack { ack: true });
        let failed = transport.call(&server.endpoint(), Request::Ledger).expect("call");
        assert_eq!(failed.into_result(), Err(Error::Unsupported));
    }

    #[test]
    fn refused_connection_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let transport = TcpTransport::new(Duration::from_millis(200));
        let err = transport.call(&Endpoint::from(addr), Request::ListPages).expect_err("refused");
        assert!(matches!(err, Error::TransportFailure(_)));
    }

    #[test]
    fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let transport = TcpTransport::new(Duration::from_millis(100));
        let err = transport.call(&Endpoint::from(addr), Request::ListPages).expect_err("stalled");
        assert!(matches!(err, Error::TransportFailure(_)));
        drop(listener);
    }
}
