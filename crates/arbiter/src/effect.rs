// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Policy effect reduction
//!
//! The policy effect expression of a model decides how the per-rule
//! outcomes of an enforcement call collapse into the final boolean.
//! Three expressions are supported; anything else is rejected when the
//! model is compiled.

use std::fmt;

use crate::error::{CompileError, UnsupportedEffectSnafu};

/// Outcome of evaluating one policy rule against a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
    /// The rule did not match the request
    Indeterminate,
}

/// A compiled policy effect expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effector {
    /// `some(where (p.eft == allow))` — any allowing rule grants access
    AllowOverride,
    /// `some(where (p.eft == allow)) && !some(where (p.eft == deny))` —
    /// a denying rule always wins
    DenyOverride,
    /// `priority(p.eft) || deny` — the first matching rule decides
    Priority,
}

impl Effector {
    /// Stable name used in logs and metric attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllowOverride => "allow_override",
            Self::DenyOverride => "deny_override",
            Self::Priority => "priority",
        }
    }

    /// Compiles an effect expression. Whitespace is insignificant.
    pub fn compile(expr: &str) -> Result<Self, CompileError> {
        let normalized: String = expr.chars().filter(|c| !c.is_whitespace()).collect();

        match normalized.as_str() {
            "some(where(p.eft==allow))" => Ok(Self::AllowOverride),
            "some(where(p.eft==allow))&&!some(where(p.eft==deny))" => Ok(Self::DenyOverride),
            "priority(p.eft)||deny" => Ok(Self::Priority),
            _ => UnsupportedEffectSnafu { expr }.fail(),
        }
    }

    /// Collapses a stream of per-rule effects into the final decision.
    ///
    /// The stream is consumed lazily and only as far as needed:
    /// allow-override stops at the first `Allow`, deny-override at the
    /// first `Deny`, priority at the first effect that is not
    /// `Indeterminate`. An empty stream denies.
    pub fn reduce(self, effects: impl IntoIterator<Item = Effect>) -> bool {
        match self {
            Self::AllowOverride => effects.into_iter().any(|effect| effect == Effect::Allow),
            Self::DenyOverride => {
                let mut allowed = false;
                for effect in effects {
                    match effect {
                        Effect::Deny => return false,
                        Effect::Allow => allowed = true,
                        Effect::Indeterminate => {}
                    }
                }
                allowed
            }
            Self::Priority => {
                for effect in effects {
                    match effect {
                        Effect::Allow => return true,
                        Effect::Deny => return false,
                        Effect::Indeterminate => {}
                    }
                }
                false
            }
        }
    }
}

impl fmt::Display for Effector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// Wraps an effect stream and counts how many elements were pulled.
    fn counted<'a>(
        effects: &'a [Effect],
        pulled: &'a Cell<usize>,
    ) -> impl Iterator<Item = Effect> + 'a {
        effects.iter().copied().inspect(move |_| {
            pulled.set(pulled.get() + 1);
        })
    }

    #[test]
    fn compiles_the_three_supported_expressions() {
        assert_eq!(
            Effector::compile("some(where (p.eft == allow))").unwrap(),
            Effector::AllowOverride
        );
        assert_eq!(
            Effector::compile("some(where (p.eft == allow)) && !some(where (p.eft == deny))")
                .unwrap(),
            Effector::DenyOverride
        );
        assert_eq!(
            Effector::compile("priority(p.eft) || deny").unwrap(),
            Effector::Priority
        );
    }

    #[test]
    fn rejects_anything_else() {
        assert!(Effector::compile("some(where (p.eft == deny))").is_err());
        assert!(Effector::compile("").is_err());
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(Effector::AllowOverride.as_str(), "allow_override");
        assert_eq!(Effector::DenyOverride.as_str(), "deny_override");
        assert_eq!(Effector::Priority.to_string(), "priority");
    }

    #[test]
    fn allow_override() {
        use Effect::*;

        assert!(Effector::AllowOverride.reduce([Indeterminate, Allow]));
        assert!(!Effector::AllowOverride.reduce([Indeterminate, Deny]));
        assert!(!Effector::AllowOverride.reduce([]));
    }

    #[test]
    fn deny_override() {
        use Effect::*;

        assert!(Effector::DenyOverride.reduce([Allow, Indeterminate]));
        assert!(!Effector::DenyOverride.reduce([Allow, Deny, Allow]));
        assert!(!Effector::DenyOverride.reduce([Indeterminate]));
        assert!(!Effector::DenyOverride.reduce([]));
    }

    #[test]
    fn priority() {
        use Effect::*;

        assert!(Effector::Priority.reduce([Indeterminate, Allow, Deny]));
        assert!(!Effector::Priority.reduce([Indeterminate, Deny, Allow]));
        assert!(!Effector::Priority.reduce([]));
        assert!(!Effector::Priority.reduce([Indeterminate, Indeterminate]));
    }

    #[test]
    fn allow_override_stops_at_the_first_allow() {
        use Effect::*;

        let effects = [Indeterminate, Allow, Deny, Deny];
        let pulled = Cell::new(0);
        assert!(Effector::AllowOverride.reduce(counted(&effects, &pulled)));
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn deny_override_stops_at_the_first_deny() {
        use Effect::*;

        let effects = [Allow, Deny, Allow, Allow];
        let pulled = Cell::new(0);
        assert!(!Effector::DenyOverride.reduce(counted(&effects, &pulled)));
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn priority_stops_at_the_first_decisive_effect() {
        use Effect::*;

        let effects = [Indeterminate, Deny, Allow];
        let pulled = Cell::new(0);
        assert!(!Effector::Priority.reduce(counted(&effects, &pulled)));
        assert_eq!(pulled.get(), 2);
    }
}
