// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Lowering of matcher expressions into executable predicates
//!
//! [`compile`] resolves a model's `m` expression against its request and
//! policy definitions and the available role managers:
//!
//! - `r.<field>` / `p.<field>` become index accesses into the two value
//!   vectors handed to the predicate,
//! - `g`-style calls (`g`, `g2`, ...) bind the role manager registered
//!   under that name and turn into reachability checks,
//! - `keyMatch`, `keyMatch2`, `keyMatch3`, `regexMatch` and `ipMatch` bind
//!   the corresponding built-in operator.

use std::collections::HashMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{
    CompileError, MissingDefinitionSnafu, RoleManagerNotFoundSnafu, UnknownFieldSnafu,
    UnknownFunctionSnafu, UnknownIdentifierSnafu, WrongAritySnafu,
};
use crate::matching;
use crate::model::Model;
use crate::rbac::RoleManager;

mod ast;
mod lexer;

mod eval;

pub use eval::CompiledMatcher;

use ast::Ast;
use eval::{Node, Operator};

/// Compiles the model's matcher expression into an executable predicate.
///
/// `role_managers` maps each `g`-style name referenced by the expression to
/// the role manager answering its reachability checks.
pub fn compile(
    model: &Model,
    role_managers: &HashMap<String, Arc<RoleManager>>,
) -> Result<CompiledMatcher, CompileError> {
    let request_def = model
        .request
        .get("r")
        .ok_or_else(|| missing("request_definition", "r"))?;
    let policy_def = model
        .policy
        .get("p")
        .ok_or_else(|| missing("policy_definition", "p"))?;
    let matcher = model
        .matchers
        .get("m")
        .ok_or_else(|| missing("matchers", "m"))?;

    let binder = Binder {
        request_fields: field_indices(request_def),
        policy_fields: field_indices(policy_def),
        role_managers,
    };

    let tokens = lexer::tokenize(matcher)?;
    let parsed = ast::parse(&tokens)?;
    let program = binder.bind(parsed)?;

    Ok(CompiledMatcher { program })
}

fn missing(section: &'static str, key: &'static str) -> CompileError {
    MissingDefinitionSnafu { section, key }.build()
}

/// Splits a definition like `sub, obj, act` into a name-to-position map.
pub(crate) fn field_indices(definition: &str) -> FxHashMap<String, usize> {
    definition
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .enumerate()
        .map(|(index, field)| (field.to_owned(), index))
        .collect()
}

fn builtin(name: &str) -> Option<Operator> {
    match name {
        "keyMatch" => Some(matching::key_match),
        "keyMatch2" => Some(matching::key_match2),
        "keyMatch3" => Some(matching::key_match3),
        "regexMatch" => Some(matching::regex_match),
        "ipMatch" => Some(matching::ip_match),
        _ => None,
    }
}

fn is_grouping_name(name: &str) -> bool {
    match name.strip_prefix('g') {
        Some(rest) => rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

struct Binder<'a> {
    request_fields: FxHashMap<String, usize>,
    policy_fields: FxHashMap<String, usize>,
    role_managers: &'a HashMap<String, Arc<RoleManager>>,
}

impl Binder<'_> {
    fn bind(&self, ast: Ast) -> Result<Node, CompileError> {
        match ast {
            Ast::Access { base, field } => match base.as_str() {
                "r" => self
                    .request_fields
                    .get(&field)
                    .map(|index| Node::Request(*index))
                    .ok_or_else(|| UnknownFieldSnafu { base, field }.build()),
                "p" => self
                    .policy_fields
                    .get(&field)
                    .map(|index| Node::Policy(*index))
                    .ok_or_else(|| UnknownFieldSnafu { base, field }.build()),
                _ => UnknownIdentifierSnafu {
                    name: format!("{base}.{field}"),
                }
                .fail(),
            },
            Ast::Str(value) => Ok(Node::Str(value)),
            Ast::Num(value) => Ok(Node::Num(value)),
            Ast::Bool(value) => Ok(Node::Bool(value)),
            Ast::Not(inner) => Ok(Node::Not(Box::new(self.bind(*inner)?))),
            Ast::And(lhs, rhs) => Ok(Node::And(
                Box::new(self.bind(*lhs)?),
                Box::new(self.bind(*rhs)?),
            )),
            Ast::Or(lhs, rhs) => Ok(Node::Or(
                Box::new(self.bind(*lhs)?),
                Box::new(self.bind(*rhs)?),
            )),
            Ast::Eq(lhs, rhs) => Ok(Node::Eq(
                Box::new(self.bind(*lhs)?),
                Box::new(self.bind(*rhs)?),
            )),
            Ast::Ne(lhs, rhs) => Ok(Node::Ne(
                Box::new(self.bind(*lhs)?),
                Box::new(self.bind(*rhs)?),
            )),
            Ast::Call { name, args } => self.bind_call(name, args),
            Ast::Ident(name) => UnknownIdentifierSnafu { name }.fail(),
        }
    }

    fn bind_call(&self, name: String, args: Vec<Ast>) -> Result<Node, CompileError> {
        if let Some(operator) = builtin(&name) {
            let [lhs, rhs]: [Ast; 2] = args.try_into().map_err(|args: Vec<Ast>| {
                WrongAritySnafu {
                    name: name.clone(),
                    expected: 2usize,
                    found: args.len(),
                }
                .build()
            })?;

            return Ok(Node::Builtin {
                operator,
                lhs: Box::new(self.bind(lhs)?),
                rhs: Box::new(self.bind(rhs)?),
            });
        }

        if is_grouping_name(&name) {
            let role_manager = self
                .role_managers
                .get(&name)
                .cloned()
                .ok_or_else(|| RoleManagerNotFoundSnafu { name: name.clone() }.build())?;

            let found = args.len();
            let mut args = args.into_iter();
            let (user, role, domain) = match (args.next(), args.next(), args.next(), args.next()) {
                (Some(user), Some(role), domain, None) => (user, role, domain),
                _ => {
                    return WrongAritySnafu {
                        name,
                        expected: 2usize,
                        found,
                    }
                    .fail()
                }
            };

            return Ok(Node::HasLink {
                role_manager,
                user: Box::new(self.bind(user)?),
                role: Box::new(self.bind(role)?),
                domain: match domain {
                    Some(domain) => Some(Box::new(self.bind(domain)?)),
                    None => None,
                },
            });
        }

        UnknownFunctionSnafu { name }.fail()
    }
}
