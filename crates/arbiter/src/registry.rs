// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Process-wide registry of published engine snapshots
//!
//! Every running [`Engine`](crate::Engine) publishes its current
//! [`Snapshot`](crate::Snapshot) here under its instance name. Reloads
//! replace the entry atomically, shutdown removes it.

use std::collections::hash_map::Entry;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::engine::Snapshot;
use crate::error::{InstanceExistsSnafu, Result};

static REGISTRY: LazyLock<RwLock<FxHashMap<String, Arc<Snapshot>>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

/// Returns the snapshot currently published under the given instance name.
pub fn snapshot(name: &str) -> Option<Arc<Snapshot>> {
    REGISTRY.read().get(name).cloned()
}

pub(crate) fn register(name: &str, snapshot: Arc<Snapshot>) -> Result<()> {
    match REGISTRY.write().entry(name.to_owned()) {
        Entry::Occupied(_) => InstanceExistsSnafu { name }.fail(),
        Entry::Vacant(entry) => {
            entry.insert(snapshot);
            Ok(())
        }
    }
}

pub(crate) fn replace(name: &str, snapshot: Arc<Snapshot>) {
    REGISTRY.write().insert(name.to_owned(), snapshot);
}

pub(crate) fn remove(name: &str) {
    REGISTRY.write().remove(name);
}
