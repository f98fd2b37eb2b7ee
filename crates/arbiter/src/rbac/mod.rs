// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Role inheritance graph with lock-free readers
//!
//! A [`RoleManager`] stores directed `subject -> role` edges, optionally
//! scoped to a domain, and answers transitive reachability queries.
//!
//! Readers never take a lock: the dual edge index and the matching
//! predicates are immutable snapshots behind atomically swappable handles,
//! loaded once per query. Writers serialize on a per-instance mutex and
//! publish a new snapshot, so they never block readers and are applied in
//! FIFO order.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

mod index;

use index::EdgeIndex;

/// A user-supplied matching predicate for role or domain names
pub type MatchingFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// The predicate slots consulted by the read path
///
/// Kept separate from the edge index so [`RoleManager::clear`] can drop all
/// edges while preserving installed predicates.
#[derive(Clone, Default)]
struct MatchingFns {
    role: Option<MatchingFn>,
    domain: Option<MatchingFn>,
}

/// The role-inheritance graph of one `g`-style grouping ptype
pub struct RoleManager {
    edges: ArcSwap<EdgeIndex>,
    matching: ArcSwap<MatchingFns>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for RoleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleManager")
            .field("edges", &self.edges.load())
            .finish_non_exhaustive()
    }
}

impl Default for RoleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleManager {
    /// Creates an empty role manager.
    pub fn new() -> Self {
        Self {
            edges: ArcSwap::from_pointee(EdgeIndex::default()),
            matching: ArcSwap::from_pointee(MatchingFns::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Adds the inheritance link `from -> to` in the given domain.
    ///
    /// Duplicate links are ignored. Self links are never stored since
    /// reachability treats `from == to` as trivially true.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn add_link(&self, from: &str, to: &str, domain: Option<&str>) {
        if from == to {
            return;
        }

        let _guard = self.write_lock.lock();
        let current = self.edges.load();

        let domain_key = domain.map(ToOwned::to_owned);
        if current.contains(from, to, &domain_key) {
            return;
        }

        let mut next = EdgeIndex::clone(&current);
        next.insert(from, to, domain);
        self.edges.store(Arc::new(next));
    }

    /// Removes the inheritance link `from -> to` in the given domain.
    ///
    /// Removing an absent link is not an error.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn delete_link(&self, from: &str, to: &str, domain: Option<&str>) {
        let _guard = self.write_lock.lock();
        let current = self.edges.load();

        if !current.contains(from, to, &domain.map(ToOwned::to_owned)) {
            return;
        }

        let mut next = EdgeIndex::clone(&current);
        next.remove(from, to, domain);
        self.edges.store(Arc::new(next));
    }

    /// Drops every stored link. Installed matching predicates survive.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.edges.store(Arc::new(EdgeIndex::default()));
    }

    /// Installs or replaces the role-name matching predicate.
    ///
    /// When present it replaces the equality comparison of traversal match
    /// checks, e.g. to treat `role::*` as covering every role.
    pub fn add_matching_func(&self, f: impl Fn(&str, &str) -> bool + Send + Sync + 'static) {
        let _guard = self.write_lock.lock();
        let mut next = MatchingFns::clone(&self.matching.load());
        next.role = Some(Arc::new(f));
        self.matching.store(Arc::new(next));
    }

    /// Installs or replaces the domain-name matching predicate.
    ///
    /// When present, lookups in a named domain widen from an exact probe to
    /// a scan over the subject's stored domains.
    pub fn add_domain_matching_func(&self, f: impl Fn(&str, &str) -> bool + Send + Sync + 'static) {
        let _guard = self.write_lock.lock();
        let mut next = MatchingFns::clone(&self.matching.load());
        next.domain = Some(Arc::new(f));
        self.matching.store(Arc::new(next));
    }

    /// Returns the roles directly inherited by `name` in the given domain.
    ///
    /// Order is unspecified.
    pub fn get_roles(&self, name: &str, domain: Option<&str>) -> Vec<String> {
        let edges = self.edges.load();
        let matching = self.matching.load();

        edges.roles_of(
            name,
            &domain.map(ToOwned::to_owned),
            matching.domain.as_ref(),
        )
    }

    /// Returns the subjects directly linked to the role `name` in the given
    /// domain. Order is unspecified.
    pub fn get_users(&self, name: &str, domain: Option<&str>) -> Vec<String> {
        let edges = self.edges.load();
        let matching = self.matching.load();

        edges.users_of(
            name,
            &domain.map(ToOwned::to_owned),
            matching.domain.as_ref(),
        )
    }

    /// Checks whether `to` is reachable from `from` within the given domain.
    ///
    /// `from == to` is trivially reachable. Otherwise this walks the graph
    /// depth-first against one coherent index snapshot; a visited set keeps
    /// the traversal bounded on cyclic graphs.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn has_link(&self, from: &str, to: &str, domain: Option<&str>) -> bool {
        if from == to {
            return true;
        }

        let edges = self.edges.load_full();
        let matching = self.matching.load_full();
        let domain_key = domain.map(ToOwned::to_owned);

        if matching.role.is_none() && edges.contains(from, to, &domain_key) {
            return true;
        }

        let mut visited = FxHashSet::default();
        visited.insert(from.to_owned());
        let mut stack = VecDeque::new();
        stack.push_front(from.to_owned());

        while let Some(current) = stack.pop_front() {
            let matched = match &matching.role {
                Some(matcher) => matcher.as_ref()(current.as_str(), to),
                None => current == to,
            };
            if matched {
                return true;
            }

            let roles = edges.roles_of(&current, &domain_key, matching.domain.as_ref());
            for role in roles.into_iter().rev() {
                if visited.insert(role.clone()) {
                    stack.push_front(role);
                }
            }
        }

        false
    }

    /// Enumerates every stored link as `(from, to, domain)`.
    pub fn links(&self) -> Vec<(String, String, Option<String>)> {
        self.edges
            .load()
            .iter_edges()
            .map(|(from, to, domain)| {
                (
                    from.to_owned(),
                    to.to_owned(),
                    domain.map(ToOwned::to_owned),
                )
            })
            .collect()
    }

    /// Logs a human-readable description of every stored link.
    pub fn print_roles(&self) {
        for (from, to, domain) in self.edges.load().iter_edges() {
            match domain {
                Some(domain) => log::info!("{from} < {to} (domain {domain})"),
                None => log::info!("{from} < {to}"),
            }
        }
    }
}
