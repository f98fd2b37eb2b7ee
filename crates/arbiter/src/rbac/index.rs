// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Dual-indexed edge storage backing the role manager
//!
//! The whole [`EdgeIndex`] value is cloned and replaced on every mutation,
//! so a reader holding one observes the forward and reverse tables in a
//! mutually consistent state.

use rustc_hash::FxHashMap;

use super::MatchingFn;

/// Small ordered collection for one index leaf
///
/// Per-subject fan-out is low in practice, so a vector with linear dedup
/// is used instead of a hash set. Insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RoleSet(Vec<String>);

impl RoleSet {
    /// Returns false when the name was already present.
    fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.0.push(name.to_owned());
        true
    }

    fn remove(&mut self, name: &str) -> bool {
        match self.0.iter().position(|existing| existing == name) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|existing| existing == name)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One traversal direction: subject, then domain, then the subject's
/// direct neighbors within that domain
type DirectedIndex = FxHashMap<String, FxHashMap<Option<String>, RoleSet>>;

/// Forward and reverse tables describing the same edge set
#[derive(Debug, Clone, Default)]
pub(crate) struct EdgeIndex {
    forward: DirectedIndex,
    reverse: DirectedIndex,
}

fn insert_into(index: &mut DirectedIndex, key: &str, value: &str, domain: Option<&str>) -> bool {
    index
        .entry(key.to_owned())
        .or_default()
        .entry(domain.map(ToOwned::to_owned))
        .or_default()
        .insert(value)
}

fn remove_from(index: &mut DirectedIndex, key: &str, value: &str, domain: Option<&str>) -> bool {
    let Some(domains) = index.get_mut(key) else {
        return false;
    };
    let domain_key = domain.map(ToOwned::to_owned);
    let Some(set) = domains.get_mut(&domain_key) else {
        return false;
    };

    let removed = set.remove(value);
    if set.is_empty() {
        domains.remove(&domain_key);
        if domains.is_empty() {
            index.remove(key);
        }
    }
    removed
}

/// Collects the direct neighbors of `name`, widening the probe to a scan
/// over the subject's domains when a domain matcher is installed.
fn collect(
    index: &DirectedIndex,
    name: &str,
    domain: &Option<String>,
    domain_matcher: Option<&MatchingFn>,
) -> Vec<String> {
    let Some(domains) = index.get(name) else {
        return Vec::new();
    };

    let exact = || -> Vec<String> {
        domains
            .get(domain)
            .map(|set| set.iter().map(ToOwned::to_owned).collect())
            .unwrap_or_default()
    };

    match (domain_matcher, domain) {
        // The global domain stays an exact probe even under a matcher.
        (None, _) | (Some(_), None) => exact(),
        (Some(matcher), Some(requested)) => {
            let matcher = matcher.as_ref();
            let mut result: Vec<String> = Vec::new();
            for (stored, set) in domains {
                let Some(stored) = stored else {
                    continue;
                };
                if matcher(requested.as_str(), stored.as_str()) {
                    for name in set.iter() {
                        if !result.iter().any(|existing| existing == name) {
                            result.push(name.to_owned());
                        }
                    }
                }
            }
            result
        }
    }
}

impl EdgeIndex {
    /// Inserts the edge into both tables.
    ///
    /// Returns false when it was already present.
    pub(crate) fn insert(&mut self, from: &str, to: &str, domain: Option<&str>) -> bool {
        if !insert_into(&mut self.forward, from, to, domain) {
            return false;
        }
        insert_into(&mut self.reverse, to, from, domain);
        true
    }

    /// Removes the edge from both tables, pruning emptied entries.
    ///
    /// Returns false when it was not present.
    pub(crate) fn remove(&mut self, from: &str, to: &str, domain: Option<&str>) -> bool {
        if !remove_from(&mut self.forward, from, to, domain) {
            return false;
        }
        remove_from(&mut self.reverse, to, from, domain);
        true
    }

    /// Exact forward probe for a single edge.
    pub(crate) fn contains(&self, from: &str, to: &str, domain: &Option<String>) -> bool {
        self.forward
            .get(from)
            .and_then(|domains| domains.get(domain))
            .is_some_and(|set| set.contains(to))
    }

    pub(crate) fn roles_of(
        &self,
        name: &str,
        domain: &Option<String>,
        domain_matcher: Option<&MatchingFn>,
    ) -> Vec<String> {
        collect(&self.forward, name, domain, domain_matcher)
    }

    pub(crate) fn users_of(
        &self,
        name: &str,
        domain: &Option<String>,
        domain_matcher: Option<&MatchingFn>,
    ) -> Vec<String> {
        collect(&self.reverse, name, domain, domain_matcher)
    }

    /// Enumerates every edge in the forward table.
    pub(crate) fn iter_edges(&self) -> impl Iterator<Item = (&str, &str, Option<&str>)> {
        self.forward.iter().flat_map(|(from, domains)| {
            domains.iter().flat_map(move |(domain, set)| {
                set.iter().map(move |to| (from.as_str(), to, domain.as_deref()))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_dual_and_deduped() {
        let mut index = EdgeIndex::default();

        assert!(index.insert("alice", "admin", None));
        assert!(!index.insert("alice", "admin", None));

        assert_eq!(index.roles_of("alice", &None, None), vec!["admin"]);
        assert_eq!(index.users_of("admin", &None, None), vec!["alice"]);
    }

    #[test]
    fn remove_prunes_both_tables() {
        let mut index = EdgeIndex::default();
        index.insert("alice", "admin", Some("d1"));

        assert!(index.remove("alice", "admin", Some("d1")));
        assert!(!index.remove("alice", "admin", Some("d1")));

        assert!(index.roles_of("alice", &Some("d1".into()), None).is_empty());
        assert!(index.users_of("admin", &Some("d1".into()), None).is_empty());
        assert_eq!(index.iter_edges().count(), 0);
    }

    #[test]
    fn domains_are_isolated() {
        let mut index = EdgeIndex::default();
        index.insert("alice", "admin", Some("d1"));

        assert!(index.contains("alice", "admin", &Some("d1".into())));
        assert!(!index.contains("alice", "admin", &Some("d2".into())));
        assert!(!index.contains("alice", "admin", &None));
    }

    #[test]
    fn domain_matcher_widens_the_scan() {
        use std::sync::Arc;

        let mut index = EdgeIndex::default();
        index.insert("alice", "global_admin", Some("*"));
        index.insert("alice", "local_admin", Some("d1"));
        index.insert("alice", "tenant_user", Some("d2"));

        let matcher: MatchingFn =
            Arc::new(|requested, stored| stored == "*" || requested == stored);

        let mut roles = index.roles_of("alice", &Some("d1".into()), Some(&matcher));
        roles.sort();
        assert_eq!(roles, vec!["global_admin", "local_admin"]);

        let roles = index.roles_of("alice", &Some("d3".into()), Some(&matcher));
        assert_eq!(roles, vec!["global_admin"]);
    }
}
