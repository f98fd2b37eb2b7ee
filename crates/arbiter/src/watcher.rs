// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Cross-node change notification interface
//!
//! A [`Watcher`] broadcasts local policy mutations to peer nodes and feeds
//! their broadcasts back through the update callback. The transport is the
//! implementer's business (message queue, pub/sub, ...); the payload is
//! the serde-encoded [`PolicyChange`].

use async_trait::async_trait;

use crate::error::BoxError;
use crate::policy::PolicyRule;

/// One broadcast policy mutation
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PolicyChange {
    AddPolicy(String, String, Vec<String>),
    AddPolicies(String, String, Vec<Vec<String>>),
    RemovePolicy(String, String, Vec<String>),
    RemovePolicies(String, String, Vec<Vec<String>>),
    RemoveFilteredPolicy(String, String, usize, Vec<String>),
    SavePolicy(Vec<PolicyRule>),
    /// Peers should reload their full state from the adapter
    Reload,
}

/// Callback invoked for every change received from a peer
pub type UpdateCallback = Box<dyn Fn(PolicyChange) + Send + Sync>;

/// Broadcast channel for policy mutations
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Installs the callback invoked for changes broadcast by peers.
    fn set_update_callback(&mut self, callback: UpdateCallback);

    /// Broadcasts a generic change requiring peers to fully reload.
    async fn update(&self) -> Result<(), BoxError>;

    async fn update_for_add_policy(
        &self,
        section: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), BoxError>;

    async fn update_for_add_policies(
        &self,
        section: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<(), BoxError>;

    async fn update_for_remove_policy(
        &self,
        section: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), BoxError>;

    async fn update_for_remove_policies(
        &self,
        section: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<(), BoxError>;

    async fn update_for_remove_filtered_policy(
        &self,
        section: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<(), BoxError>;

    async fn update_for_save_policy(&self, rules: &[PolicyRule]) -> Result<(), BoxError>;

    /// Shuts the watcher down. Called once on engine shutdown.
    async fn close(&self);
}
