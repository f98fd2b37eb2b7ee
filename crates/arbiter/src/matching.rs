// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Built-in matching operators available to matcher expressions
//!
//! All operators are total: malformed patterns or addresses never match
//! instead of raising.

use std::net::IpAddr;
use std::sync::LazyLock;

use ipnetwork::IpNetwork;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;

/// Compiled patterns are cached so repeated enforcement against the same
/// policy rows does not recompile them. Patterns that fail to compile are
/// cached as never-matching.
static PATTERN_CACHE: LazyLock<Mutex<FxHashMap<String, Option<Regex>>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

fn cached_regex(pattern: &str) -> Option<Regex> {
    let mut cache = PATTERN_CACHE.lock();

    match cache.get(pattern) {
        Some(compiled) => compiled.clone(),
        None => {
            let compiled = Regex::new(pattern).ok();
            cache.insert(pattern.to_owned(), compiled.clone());
            compiled
        }
    }
}

/// Glob match of `key1` against `key2`
///
/// A `*` in `key2` matches any run of characters, every other character is
/// literal. The match is anchored to the whole string. Without a `*` this
/// is plain string equality.
///
/// ```
/// # use arbiter::matching::key_match;
/// assert!(key_match("/rooms/123", "/rooms/*"));
/// assert!(!key_match("/rooms/123", "/events/*"));
/// ```
pub fn key_match(key1: &str, key2: &str) -> bool {
    if !key2.contains('*') {
        return key1 == key2;
    }

    let mut pattern = String::with_capacity(key2.len() + 8);
    pattern.push('^');
    for (i, literal) in key2.split('*').enumerate() {
        if i > 0 {
            pattern.push_str(".*");
        }
        pattern.push_str(&regex::escape(literal));
    }
    pattern.push('$');

    match cached_regex(&pattern) {
        Some(re) => re.is_match(key1),
        None => false,
    }
}

/// Segment-wise match supporting `:param` placeholders
///
/// When `key2` contains a `:`, both keys are split on `/` and must have the
/// same number of segments; a `key2` segment starting with `:` matches any
/// `key1` segment, all others must be equal. Without a `:` this falls back
/// to [`key_match`].
///
/// ```
/// # use arbiter::matching::key_match2;
/// assert!(key_match2("/rooms/123", "/rooms/:id"));
/// assert!(!key_match2("/rooms/123/start", "/rooms/:id"));
/// ```
pub fn key_match2(key1: &str, key2: &str) -> bool {
    if !key2.contains(':') {
        return key_match(key1, key2);
    }

    let left: Vec<&str> = key1.split('/').collect();
    let right: Vec<&str> = key2.split('/').collect();

    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(l, r)| r.starts_with(':') || l == r)
}

/// Same contract as [`key_match`] at this revision.
pub fn key_match3(key1: &str, key2: &str) -> bool {
    key_match(key1, key2)
}

/// Regular expression match of `key1` against the pattern `key2`
///
/// Patterns that fail to compile never match.
pub fn regex_match(key1: &str, key2: &str) -> bool {
    match cached_regex(key2) {
        Some(re) => re.is_match(key1),
        None => false,
    }
}

/// CIDR-aware address match
///
/// `key2` may be a plain address or a network in CIDR notation; `key1` must
/// be a plain address. Returns true iff `key1` lies within `key2`.
/// Addresses of different families never match.
///
/// ```
/// # use arbiter::matching::ip_match;
/// assert!(ip_match("192.168.2.123", "192.168.2.0/24"));
/// assert!(!ip_match("192.168.3.1", "192.168.2.0/24"));
/// ```
pub fn ip_match(key1: &str, key2: &str) -> bool {
    match (key1.parse::<IpAddr>(), key2.parse::<IpNetwork>()) {
        (Ok(ip), Ok(network)) => network.contains(ip),
        _ => false,
    }
}
