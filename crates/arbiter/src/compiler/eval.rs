// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Resolved matcher programs and their evaluator
//!
//! A [`Node`] tree is the bound form of a matcher expression: field names
//! are replaced by vector indices, `g`-style calls carry their role manager
//! handle and built-in calls their operator function. Evaluation walks the
//! tree directly, logical operators short-circuit.

use std::sync::Arc;

use crate::error::{EvalError, PolicyFieldOutOfRangeSnafu, RequestFieldOutOfRangeSnafu};
use crate::rbac::RoleManager;

pub(crate) type Operator = fn(&str, &str) -> bool;

#[derive(Debug)]
pub(crate) enum Node {
    Request(usize),
    Policy(usize),
    Str(String),
    Num(f64),
    Bool(bool),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Eq(Box<Node>, Box<Node>),
    Ne(Box<Node>, Box<Node>),
    Builtin {
        operator: Operator,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    HasLink {
        role_manager: Arc<RoleManager>,
        user: Box<Node>,
        role: Box<Node>,
        domain: Option<Box<Node>>,
    },
}

/// An intermediate value produced while evaluating a matcher
#[derive(Debug, Clone, Copy, PartialEq)]
enum Value<'a> {
    Str(&'a str),
    Num(f64),
    Bool(bool),
}

impl Value<'_> {
    fn truthy(self) -> bool {
        match self {
            Value::Bool(value) => value,
            Value::Str(_) | Value::Num(_) => false,
        }
    }
}

fn values_equal(lhs: Value<'_>, rhs: Value<'_>) -> bool {
    match (lhs, rhs) {
        (Value::Str(l), Value::Str(r)) => l == r,
        (Value::Num(l), Value::Num(r)) => l == r,
        (Value::Bool(l), Value::Bool(r)) => l == r,
        _ => false,
    }
}

fn as_str(value: Value<'_>) -> Option<&str> {
    match value {
        Value::Str(s) => Some(s),
        Value::Num(_) | Value::Bool(_) => None,
    }
}

impl Node {
    fn eval<'a>(
        &'a self,
        request: &'a [String],
        policy: &'a [String],
    ) -> Result<Value<'a>, EvalError> {
        match self {
            Node::Request(index) => match request.get(*index) {
                Some(value) => Ok(Value::Str(value)),
                None => RequestFieldOutOfRangeSnafu {
                    index: *index,
                    len: request.len(),
                }
                .fail(),
            },
            Node::Policy(index) => match policy.get(*index) {
                Some(value) => Ok(Value::Str(value)),
                None => PolicyFieldOutOfRangeSnafu {
                    index: *index,
                    len: policy.len(),
                }
                .fail(),
            },
            Node::Str(value) => Ok(Value::Str(value)),
            Node::Num(value) => Ok(Value::Num(*value)),
            Node::Bool(value) => Ok(Value::Bool(*value)),
            Node::Not(inner) => Ok(Value::Bool(!inner.eval(request, policy)?.truthy())),
            Node::And(lhs, rhs) => {
                if !lhs.eval(request, policy)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(rhs.eval(request, policy)?.truthy()))
            }
            Node::Or(lhs, rhs) => {
                if lhs.eval(request, policy)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(rhs.eval(request, policy)?.truthy()))
            }
            Node::Eq(lhs, rhs) => Ok(Value::Bool(values_equal(
                lhs.eval(request, policy)?,
                rhs.eval(request, policy)?,
            ))),
            Node::Ne(lhs, rhs) => Ok(Value::Bool(!values_equal(
                lhs.eval(request, policy)?,
                rhs.eval(request, policy)?,
            ))),
            Node::Builtin { operator, lhs, rhs } => {
                let lhs = lhs.eval(request, policy)?;
                let rhs = rhs.eval(request, policy)?;
                let result = match (as_str(lhs), as_str(rhs)) {
                    (Some(l), Some(r)) => operator(l, r),
                    // operators only match strings
                    _ => false,
                };
                Ok(Value::Bool(result))
            }
            Node::HasLink {
                role_manager,
                user,
                role,
                domain,
            } => {
                let user = user.eval(request, policy)?;
                let role = role.eval(request, policy)?;
                let domain = match domain {
                    Some(node) => match as_str(node.eval(request, policy)?) {
                        Some(value) => Some(value),
                        None => return Ok(Value::Bool(false)),
                    },
                    None => None,
                };

                let result = match (as_str(user), as_str(role)) {
                    (Some(user), Some(role)) => role_manager.has_link(user, role, domain),
                    _ => false,
                };
                Ok(Value::Bool(result))
            }
        }
    }
}

/// An executable matcher predicate
///
/// Produced by [`compile`](super::compile); captures the resolved field
/// indices of the request and policy definitions, the role manager handles
/// bound to `g`-style calls and the built-in operator functions. Immutable
/// after compilation, evaluation is a pure function of the two value
/// vectors (and the bound role managers' current graphs).
#[derive(Debug)]
pub struct CompiledMatcher {
    pub(crate) program: Node,
}

impl CompiledMatcher {
    /// Evaluates one request against one policy rule.
    ///
    /// Fails only when a bound field index lies outside the given vectors,
    /// i.e. when the caller hands in fewer values than the model defines.
    pub fn eval(&self, request: &[String], policy: &[String]) -> Result<bool, EvalError> {
        Ok(self.program.eval(request, policy)?.truthy())
    }
}
