// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Policy persistence interface
//!
//! An [`Adapter`] connects the engine to wherever policy rules persist,
//! typically a database. The engine only requires the batched load; the
//! write-through hooks default to no-ops for read-only stores.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::BoxError;
use crate::policy::PolicyRule;

/// Batched source of policy rules
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Loads every stored rule.
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, BoxError>;

    /// Persists a newly added rule.
    async fn add_policy(&self, _rule: &PolicyRule) -> Result<(), BoxError> {
        Ok(())
    }

    /// Removes a rule from the store.
    async fn remove_policy(&self, _rule: &PolicyRule) -> Result<(), BoxError> {
        Ok(())
    }

    /// Replaces the whole stored rule set.
    async fn save_policy(&self, _rules: &[PolicyRule]) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Adapter keeping rules in process memory
///
/// Used by the tests and by embeddings that have no persistent store.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    rules: Mutex<Vec<PolicyRule>>,
}

impl MemoryAdapter {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, BoxError> {
        Ok(self.rules.lock().clone())
    }

    async fn add_policy(&self, rule: &PolicyRule) -> Result<(), BoxError> {
        let mut rules = self.rules.lock();
        if !rules.contains(rule) {
            rules.push(rule.clone());
        }
        Ok(())
    }

    async fn remove_policy(&self, rule: &PolicyRule) -> Result<(), BoxError> {
        self.rules.lock().retain(|existing| existing != rule);
        Ok(())
    }

    async fn save_policy(&self, rules: &[PolicyRule]) -> Result<(), BoxError> {
        *self.rules.lock() = rules.to_vec();
        Ok(())
    }
}
