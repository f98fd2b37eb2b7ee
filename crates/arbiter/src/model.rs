// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! INI-style PERM model parsing
//!
//! A model file consists of bracketed sections, each holding `key = value`
//! definitions:
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
//! ```
//!
//! Unknown sections are tolerated and ignored. Lines inside a recognized
//! section that carry no `=` (including malformed section headers) are
//! logged and skipped.

use std::{collections::BTreeMap, path::Path};

use crate::error::Result;

/// Definitions of one model section, keyed by their short name
/// (`r`, `p`, `g`, `g2`, `e`, `m`, ...)
pub type Assertions = BTreeMap<String, String>;

/// A parsed PERM model
///
/// Holds the raw definition strings of the five recognized sections.
/// Immutable after parse; the matcher compiler and the effector derive
/// their executable forms from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    /// `[request_definition]`
    pub request: Assertions,
    /// `[policy_definition]`
    pub policy: Assertions,
    /// `[role_definition]`
    pub role: Assertions,
    /// `[policy_effect]`
    pub effect: Assertions,
    /// `[matchers]`
    pub matchers: Assertions,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Request,
    Policy,
    Role,
    Effect,
    Matchers,
    /// An unrecognized section whose content is skipped
    Ignored,
}

impl Section {
    fn by_header(name: &str) -> Self {
        match name {
            "request_definition" => Self::Request,
            "policy_definition" => Self::Policy,
            "role_definition" => Self::Role,
            "policy_effect" => Self::Effect,
            "matchers" => Self::Matchers,
            _ => Self::Ignored,
        }
    }
}

impl Model {
    /// Parses a model from its textual form.
    ///
    /// Parsing is total: anomalies inside recognized sections are logged
    /// via [`log::warn!`] and skipped.
    pub fn parse(text: &str) -> Self {
        let mut model = Model::default();
        // Data lines before the first header behave like an unknown section.
        let mut current = Section::Ignored;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current = Section::by_header(line[1..line.len() - 1].trim());
                continue;
            }

            let section = match current {
                Section::Request => &mut model.request,
                Section::Policy => &mut model.policy,
                Section::Role => &mut model.role,
                Section::Effect => &mut model.effect,
                Section::Matchers => &mut model.matchers,
                Section::Ignored => continue,
            };

            match line.split_once('=') {
                Some((key, value)) => {
                    section.insert(key.trim().to_owned(), value.trim().to_owned());
                }
                None => {
                    log::warn!("skipping model line {} without `=`: `{line}`", number + 1);
                }
            }
        }

        model
    }

    /// Loads and parses a model file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }
}
