// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host-only DSM cluster harness over loopback TCP.
//!
//! Listeners are bound on ephemeral ports first, then a cluster description is rendered
//! with the real addresses and loaded through `ClusterConfig`, so components are wired
//! exactly the way `dsm-managerd` and `dsm-noded` wire them.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dsm::config::ClusterConfig;
use dsm::{
    AccessRight, AddressTable, CentralManager, Endpoint, GateMode, Node, NodeId, PageNum,
    PageRecord, PageView, Reply, Request, Service, TcpServer, TcpTransport, Transport,
};
use log::debug;

/// Id given to the manager in rendered descriptions.
pub const MANAGER_ID: NodeId = NodeId(0);

/// Describes a cluster before it is started.
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    gate: GateMode,
    timeout: Duration,
    nodes: Vec<NodeId>,
    pages: Vec<(PageNum, NodeId, String)>,
    stalled: Vec<NodeId>,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            gate: GateMode::Global,
            timeout: Duration::from_millis(2000),
            nodes: Vec::new(),
            pages: Vec::new(),
            stalled: Vec::new(),
        }
    }
}

impl ClusterBuilder {
    /// Empty cluster with the global gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the gate granularity.
    pub fn gate(mut self, gate: GateMode) -> Self {
        self.gate = gate;
        self
    }

    /// Transport timeout used by every component.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a node.
    pub fn node(mut self, id: u32) -> Self {
        self.nodes.push(NodeId(id));
        self
    }

    /// Seeds `page` at `owner` with `content`.
    pub fn page(mut self, page: u64, owner: u32, content: &str) -> Self {
        self.pages.push((PageNum(page), NodeId(owner), content.to_string()));
        self
    }

    /// Makes the manager reach `node` through a listener that never answers.
    ///
    /// Peers still reach the node normally, so it can fetch copies but cannot be
    /// invalidated.
    pub fn stall_at_manager(mut self, node: u32) -> Self {
        self.stalled.push(NodeId(node));
        self
    }

    fn render(&self, manager: &str, addresses: &BTreeMap<NodeId, String>) -> String {
        let mut text = String::new();
        let gate = match self.gate {
            GateMode::Global => "global",
            GateMode::PerPage => "per-page",
        };
        let _ = writeln!(
            text,
            "[manager]\nid = {MANAGER_ID}\naddress = \"{manager}\"\ngate = \"{gate}\"\n"
        );
        let _ = writeln!(text, "[transport]\ntimeout_ms = {}\n", self.timeout.as_millis());
        for (id, address) in addresses {
            let _ = writeln!(text, "[[nodes]]\nid = {id}\naddress = \"{address}\"\n");
        }
        for (page, owner, content) in &self.pages {
            let _ = writeln!(
                text,
                "[[pages]]\npage = {page}\nowner = {owner}\ncontent = {content:?}\n"
            );
        }
        text
    }

    /// Binds every listener and starts the cluster.
    pub fn start(self) -> Result<Cluster> {
        let manager_listener = bind_ephemeral()?;
        let manager_addr = manager_listener.local_addr()?.to_string();
        let mut listeners = BTreeMap::new();
        let mut addresses = BTreeMap::new();
        for &id in &self.nodes {
            let listener = bind_ephemeral()?;
            addresses.insert(id, listener.local_addr()?.to_string());
            listeners.insert(id, listener);
        }

        let text = self.render(&manager_addr, &addresses);
        debug!("dsm_e2e: cluster description\n{text}");
        let config = ClusterConfig::parse(&text, Path::new("dsm_e2e.toml"))
            .context("rendered cluster description")?;

        let black_hole = bind_ephemeral()?;
        let black_hole_addr = Endpoint::from(black_hole.local_addr()?);
        let manager_table = AddressTable::new(config.node_table().iter().map(|(id, endpoint)| {
            if self.stalled.contains(&id) {
                (id, black_hole_addr.clone())
            } else {
                (id, endpoint.clone())
            }
        }));
        let transport = Arc::new(TcpTransport::new(config.timeout()));
        let manager = Arc::new(CentralManager::new(
            manager_table,
            config.seed_records(),
            config.manager.gate,
            Arc::clone(&transport) as Arc<dyn Transport>,
        ));
        let manager_server =
            TcpServer::from_listener(manager_listener, Arc::clone(&manager) as Arc<dyn Service>)?;

        let mut nodes = BTreeMap::new();
        for (id, listener) in listeners {
            let wiring = config.node_config(id)?;
            let node = Arc::new(Node::new(wiring, Arc::clone(&transport) as Arc<dyn Transport>));
            for (page, content) in config.initial_pages(id) {
                node.seed(page, content, AccessRight::Write);
            }
            let server = TcpServer::from_listener(listener, Arc::clone(&node) as Arc<dyn Service>)?;
            nodes.insert(id, RunningNode { node, endpoint: server.endpoint(), _server: server });
        }

        Ok(Cluster {
            manager,
            manager_endpoint: Endpoint::new(manager_addr),
            transport,
            nodes,
            _manager_server: manager_server,
            _black_hole: black_hole,
        })
    }
}

fn bind_ephemeral() -> Result<TcpListener> {
    TcpListener::bind("127.0.0.1:0").context("bind loopback listener")
}

struct RunningNode {
    node: Arc<Node>,
    endpoint: Endpoint,
    _server: TcpServer,
}

/// A running loopback cluster. Dropping it stops every server.
pub struct Cluster {
    manager: Arc<CentralManager>,
    manager_endpoint: Endpoint,
    transport: Arc<TcpTransport>,
    nodes: BTreeMap<NodeId, RunningNode>,
    _manager_server: TcpServer,
    _black_hole: TcpListener,
}

impl Cluster {
    /// Returns node `id`.
    pub fn node(&self, id: u32) -> &Arc<Node> {
        match self.nodes.get(&NodeId(id)) {
            Some(running) => &running.node,
            None => panic!("node {id} is not part of the cluster"),
        }
    }

    /// Returns the in-process manager handle.
    pub fn manager(&self) -> &CentralManager {
        &self.manager
    }

    /// Fetches the manager ledger over TCP.
    pub fn remote_ledger(&self) -> Result<Vec<PageRecord>> {
        match self.transport.call(&self.manager_endpoint, Request::Ledger)? {
            Reply::Ledger { records } => Ok(records),
            other => Err(anyhow!("unexpected ledger reply {other:?}")),
        }
    }

    /// Lists node `id`'s cached pages over TCP.
    pub fn remote_pages(&self, id: u32) -> Result<Vec<PageView>> {
        let endpoint = match self.nodes.get(&NodeId(id)) {
            Some(running) => running.endpoint.clone(),
            None => return Err(anyhow!("node {id} is not part of the cluster")),
        };
        match self.transport.call(&endpoint, Request::ListPages)? {
            Reply::Pages { pages } => Ok(pages),
            other => Err(anyhow!("unexpected pages reply {other:?}")),
        }
    }
}
