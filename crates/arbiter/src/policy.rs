// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! In-memory policy rule storage
//!
//! Rules are kept per ptype in insertion order; the row order is what the
//! `priority` policy effect decides by. Readers load an atomically
//! published snapshot of all tables, writers serialize on a mutex and
//! publish a replacement.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// One policy rule as stored by an adapter: its section (`p` or `g`), its
/// ptype (`p`, `p2`, `g`, `g2`, ...) and the rule values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub section: String,
    pub ptype: String,
    pub values: Vec<String>,
}

impl PolicyRule {
    pub fn new(
        section: impl Into<String>,
        ptype: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            section: section.into(),
            ptype: ptype.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

type Row = Arc<[String]>;

#[derive(Debug, Clone, Default)]
struct Table {
    ordered: Vec<Row>,
    present: FxHashSet<Row>,
}

impl Table {
    fn insert(&mut self, row: Vec<String>) -> bool {
        let row: Row = row.into();
        if !self.present.insert(Arc::clone(&row)) {
            return false;
        }
        self.ordered.push(row);
        true
    }

    fn remove(&mut self, row: &[String]) -> bool {
        if !self.present.remove(row) {
            return false;
        }
        self.ordered.retain(|existing| &**existing != row);
        true
    }

    /// Removes every row whose values starting at `field_index` equal the
    /// given `field_values`; empty filter values match anything.
    fn remove_filtered(&mut self, field_index: usize, field_values: &[String]) -> bool {
        let row_matches = |row: &Row| {
            field_values.iter().enumerate().all(|(offset, wanted)| {
                wanted.is_empty()
                    || row
                        .get(field_index + offset)
                        .is_some_and(|value| value == wanted)
            })
        };

        let before = self.ordered.len();
        let present = &mut self.present;
        self.ordered.retain(|row| {
            if row_matches(row) {
                present.remove(row);
                false
            } else {
                true
            }
        });
        before != self.ordered.len()
    }
}

/// Insertion-ordered policy tables keyed by ptype
///
/// Readers obtain a coherent snapshot of all tables without locking.
#[derive(Debug, Default)]
pub struct PolicySet {
    tables: ArcSwap<FxHashMap<String, Table>>,
    write_lock: Mutex<()>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule under the given ptype. Duplicates are ignored.
    ///
    /// Returns false when the rule was already present.
    pub fn add(&self, ptype: &str, rule: Vec<String>) -> bool {
        self.mutate(|tables| tables.entry(ptype.to_owned()).or_default().insert(rule))
    }

    /// Removes a rule. Removing an absent rule is not an error.
    ///
    /// Returns false when the rule was not present.
    pub fn remove(&self, ptype: &str, rule: &[String]) -> bool {
        self.mutate(|tables| {
            tables
                .get_mut(ptype)
                .is_some_and(|table| table.remove(rule))
        })
    }

    /// Removes every rule of `ptype` matching the field filter.
    ///
    /// Returns false when nothing matched.
    pub fn remove_filtered(&self, ptype: &str, field_index: usize, field_values: &[String]) -> bool {
        self.mutate(|tables| {
            tables
                .get_mut(ptype)
                .is_some_and(|table| table.remove_filtered(field_index, field_values))
        })
    }

    /// Drops all rules of every ptype.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.tables.store(Arc::new(FxHashMap::default()));
    }

    /// Returns the rules stored under `ptype` in insertion order.
    pub fn rules(&self, ptype: &str) -> Vec<Vec<String>> {
        self.tables
            .load()
            .get(ptype)
            .map(|table| table.ordered.iter().map(|row| row.to_vec()).collect())
            .unwrap_or_default()
    }

    /// Checks whether the exact rule is stored under `ptype`.
    pub fn contains(&self, ptype: &str, rule: &[String]) -> bool {
        self.tables
            .load()
            .get(ptype)
            .is_some_and(|table| table.present.contains(rule))
    }

    /// Loads the current snapshot of all tables for iteration on the
    /// enforcement path.
    pub(crate) fn rows(&self, ptype: &str) -> Vec<Row> {
        self.tables
            .load()
            .get(ptype)
            .map(|table| table.ordered.clone())
            .unwrap_or_default()
    }

    fn mutate(&self, f: impl FnOnce(&mut FxHashMap<String, Table>) -> bool) -> bool {
        let _guard = self.write_lock.lock();
        let mut next = FxHashMap::clone(&self.tables.load());
        let changed = f(&mut next);
        if changed {
            self.tables.store(Arc::new(next));
        }
        changed
    }
}
