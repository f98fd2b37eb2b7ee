// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Engine assembly and request-time evaluation
//!
//! [`Engine::start`] wires a parsed model into its executable parts: one
//! role manager per declared grouping ptype, the matcher predicate bound
//! to those managers, the effect reducer and the policy tables. The result
//! is published as an immutable [`Snapshot`] in the process-wide registry;
//! reloads replace it atomically while in-flight enforcement calls keep
//! the snapshot they captured.
//!
//! Policy mutations take the ptype-dispatched write path: rules of a `g`
//! section become role manager links, `p` section rules land in the policy
//! tables. Local mutations are pushed to the configured watcher, inbound
//! watcher broadcasts are applied without re-broadcasting.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use arc_swap::ArcSwap;
use snafu::ResultExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::adapter::Adapter;
use crate::compiler::{self, CompiledMatcher};
use crate::effect::{Effect, Effector};
use crate::error::{AdapterSnafu, MissingDefinitionSnafu, Result, UnknownRoleManagerSnafu};
use crate::metrics::EngineMetrics;
use crate::model::Model;
use crate::policy::{PolicyRule, PolicySet};
use crate::rbac::RoleManager;
use crate::registry;
use crate::watcher::{PolicyChange, Watcher};

/// Configuration for one engine instance
pub struct EngineConfig {
    /// Registry name the snapshot is published under
    pub name: String,
    pub model: Model,
    pub adapter: Option<Arc<dyn Adapter>>,
    pub watcher: Option<Box<dyn Watcher>>,
    pub metrics: Option<Arc<EngineMetrics>>,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>, model: Model) -> Self {
        Self {
            name: name.into(),
            model,
            adapter: None,
            watcher: None,
            metrics: None,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_watcher(mut self, watcher: Box<dyn Watcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Instruments the instance; see [`EngineMetrics`].
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Frozen per-instance configuration record read by enforcement calls
///
/// The record itself never changes after construction; the role managers
/// and policy tables it points to are internally copy-on-write, so reads
/// through an old snapshot stay safe during and after a reload.
pub struct Snapshot {
    model: Model,
    matcher: CompiledMatcher,
    effector: Effector,
    role_managers: HashMap<String, Arc<RoleManager>>,
    policies: PolicySet,
    /// Position of the `eft` column in the `p` definition, when declared
    eft_index: Option<usize>,
}

impl Snapshot {
    fn build(model: Model) -> Result<Arc<Self>> {
        let mut role_managers = HashMap::new();
        for ptype in model.role.keys() {
            role_managers.insert(ptype.clone(), Arc::new(RoleManager::new()));
        }

        let matcher = compiler::compile(&model, &role_managers)?;

        let effector = match model.effect.get("e") {
            Some(expr) => Effector::compile(expr)?,
            None => {
                return Err(MissingDefinitionSnafu {
                    section: "policy_effect",
                    key: "e",
                }
                .build()
                .into())
            }
        };

        let eft_index = model
            .policy
            .get("p")
            .and_then(|definition| compiler::field_indices(definition).get("eft").copied());

        Ok(Arc::new(Self {
            model,
            matcher,
            effector,
            role_managers,
            policies: PolicySet::new(),
            eft_index,
        }))
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn matcher(&self) -> &CompiledMatcher {
        &self.matcher
    }

    pub fn effector(&self) -> Effector {
        self.effector
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Returns the role manager bound to the given grouping ptype.
    pub fn role_manager(&self, ptype: &str) -> Option<&Arc<RoleManager>> {
        self.role_managers.get(ptype)
    }

    /// Checks one request against the stored rules.
    ///
    /// Enumerates the candidate `p` rows, classifies each through the
    /// matcher predicate and reduces the resulting effect stream. The
    /// stream is evaluated lazily, so the effector's short-circuit also
    /// bounds how many rows are evaluated.
    pub fn enforce(&self, request: &[String]) -> Result<bool> {
        self.enforce_counted(request)
            .map(|(decision, _rules_evaluated)| decision)
    }

    /// Like [`enforce`](Self::enforce), additionally reporting how many
    /// rows the reducer consumed before settling.
    pub(crate) fn enforce_counted(&self, request: &[String]) -> Result<(bool, usize)> {
        let rows = self.policies.rows("p");

        let mut rules_evaluated = 0;
        let mut eval_error = None;
        let decision = self.effector.reduce(rows.iter().map_while(|row| {
            rules_evaluated += 1;
            match self.matcher.eval(request, row) {
                Ok(true) => Some(match self.eft_index.and_then(|index| row.get(index)) {
                    Some(eft) if eft == "deny" => Effect::Deny,
                    _ => Effect::Allow,
                }),
                Ok(false) => Some(Effect::Indeterminate),
                Err(error) => {
                    eval_error = Some(error);
                    None
                }
            }
        }));

        match eval_error {
            Some(error) => Err(error.into()),
            None => Ok((decision, rules_evaluated)),
        }
    }

    /// Routes one rule to its store. Grouping rules become role manager
    /// links, policy rules land in their ptype's table.
    fn apply_rule(&self, section: &str, ptype: &str, values: &[String]) -> Result<bool> {
        if section.starts_with('g') {
            let role_manager = self
                .role_manager(ptype)
                .ok_or_else(|| UnknownRoleManagerSnafu { ptype }.build())?;

            match values {
                [from, to] => role_manager.add_link(from, to, None),
                [from, to, domain, ..] => role_manager.add_link(from, to, Some(domain)),
                _ => snafu::whatever!("grouping rule for `{ptype}` needs at least two values"),
            }
            Ok(true)
        } else {
            Ok(self.policies.add(ptype, values.to_vec()))
        }
    }

    fn remove_rule(&self, section: &str, ptype: &str, values: &[String]) -> Result<bool> {
        if section.starts_with('g') {
            let role_manager = self
                .role_manager(ptype)
                .ok_or_else(|| UnknownRoleManagerSnafu { ptype }.build())?;

            match values {
                [from, to] => role_manager.delete_link(from, to, None),
                [from, to, domain, ..] => role_manager.delete_link(from, to, Some(domain)),
                _ => snafu::whatever!("grouping rule for `{ptype}` needs at least two values"),
            }
            Ok(true)
        } else {
            Ok(self.policies.remove(ptype, values))
        }
    }

    fn remove_filtered_rules(
        &self,
        section: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool> {
        if section.starts_with('g') {
            let role_manager = self
                .role_manager(ptype)
                .ok_or_else(|| UnknownRoleManagerSnafu { ptype }.build())?;

            let mut removed = false;
            for (from, to, domain) in role_manager.links() {
                let mut row = vec![from.clone(), to.clone()];
                if let Some(domain) = &domain {
                    row.push(domain.clone());
                }

                let matches = field_values.iter().enumerate().all(|(offset, wanted)| {
                    wanted.is_empty()
                        || row
                            .get(field_index + offset)
                            .is_some_and(|value| value == wanted)
                });
                if matches {
                    role_manager.delete_link(&from, &to, domain.as_deref());
                    removed = true;
                }
            }
            Ok(removed)
        } else {
            Ok(self
                .policies
                .remove_filtered(ptype, field_index, field_values))
        }
    }

    /// Replaces the whole rule set.
    ///
    /// Role manager clears preserve installed matching predicates.
    fn replace_rules(&self, rules: &[PolicyRule]) {
        self.policies.clear();
        for role_manager in self.role_managers.values() {
            role_manager.clear();
        }
        for rule in rules {
            if let Err(error) = self.apply_rule(&rule.section, &rule.ptype, &rule.values) {
                log::warn!("skipping malformed rule while replacing policies: {error}");
            }
        }
    }
}

struct EngineInner {
    name: String,
    snapshot: ArcSwap<Snapshot>,
    adapter: Option<Arc<dyn Adapter>>,
    watcher: OnceLock<Box<dyn Watcher>>,
    metrics: Option<Arc<EngineMetrics>>,
    reload_lock: AsyncMutex<()>,
}

/// Handle to a running engine instance
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Starts an engine instance.
    ///
    /// Compiles the model, loads the initial rule set from the adapter,
    /// publishes the snapshot under the configured name and subscribes to
    /// the watcher. Fails when an instance of that name is already
    /// registered.
    #[tracing::instrument(level = "debug", skip(config), fields(name = %config.name))]
    pub async fn start(config: EngineConfig) -> Result<Self> {
        let EngineConfig {
            name,
            model,
            adapter,
            watcher,
            metrics,
        } = config;

        let snapshot = Snapshot::build(model)?;

        let engine = Engine {
            inner: Arc::new(EngineInner {
                name,
                snapshot: ArcSwap::new(Arc::clone(&snapshot)),
                adapter,
                watcher: OnceLock::new(),
                metrics,
                reload_lock: AsyncMutex::new(()),
            }),
        };

        if let Some(adapter) = engine.inner.adapter.clone() {
            engine.load_from(adapter.as_ref(), &snapshot).await?;
        }

        registry::register(&engine.inner.name, snapshot)?;

        if let Some(mut watcher) = watcher {
            let weak = Arc::downgrade(&engine.inner);
            watcher.set_update_callback(Box::new(move |change| {
                if let Some(inner) = weak.upgrade() {
                    Engine { inner }.handle_remote_change(change);
                }
            }));
            let _ = engine.inner.watcher.set(watcher);
        }

        Ok(engine)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    /// Returns the role manager bound to the given grouping ptype.
    pub fn role_manager(&self, ptype: &str) -> Option<Arc<RoleManager>> {
        self.inner.snapshot.load().role_manager(ptype).cloned()
    }

    /// Checks a request against the current snapshot.
    #[tracing::instrument(level = "debug", skip(self, request))]
    pub fn enforce(&self, request: &[String]) -> Result<bool> {
        let snapshot = self.inner.snapshot.load();

        let Some(metrics) = &self.inner.metrics else {
            return snapshot.enforce(request);
        };

        let started = Instant::now();
        let (decision, rules_evaluated) = snapshot.enforce_counted(request)?;
        metrics.record_enforce(
            snapshot.effector(),
            decision,
            rules_evaluated,
            started.elapsed().as_secs_f64(),
        );

        Ok(decision)
    }

    /// Adds one rule through the ptype-dispatched write path.
    ///
    /// Returns false when an identical rule was already present.
    #[tracing::instrument(level = "debug", skip(self, rule))]
    pub async fn add_policy(&self, section: &str, ptype: &str, rule: Vec<String>) -> Result<bool> {
        let snapshot = self.inner.snapshot.load_full();
        let added = snapshot.apply_rule(section, ptype, &rule)?;

        if added {
            self.persist(&PolicyRule::new(section, ptype, rule.clone()), true)
                .await;
            if let Some(watcher) = self.inner.watcher.get() {
                if let Err(error) = watcher.update_for_add_policy(section, ptype, &rule).await {
                    log::error!("failed to broadcast added policy: {error}");
                }
            }
        }
        Ok(added)
    }

    /// Adds a batch of rules. Returns false when none of them was new.
    #[tracing::instrument(level = "debug", skip(self, rules))]
    pub async fn add_policies(
        &self,
        section: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        let snapshot = self.inner.snapshot.load_full();

        let mut any_added = false;
        for rule in &rules {
            if snapshot.apply_rule(section, ptype, rule)? {
                self.persist(&PolicyRule::new(section, ptype, rule.clone()), true)
                    .await;
                any_added = true;
            }
        }

        if any_added {
            if let Some(watcher) = self.inner.watcher.get() {
                if let Err(error) = watcher
                    .update_for_add_policies(section, ptype, &rules)
                    .await
                {
                    log::error!("failed to broadcast added policies: {error}");
                }
            }
        }
        Ok(any_added)
    }

    /// Removes one rule. Removing an absent rule is not an error.
    #[tracing::instrument(level = "debug", skip(self, rule))]
    pub async fn remove_policy(
        &self,
        section: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool> {
        let snapshot = self.inner.snapshot.load_full();
        let removed = snapshot.remove_rule(section, ptype, &rule)?;

        if removed {
            self.persist(&PolicyRule::new(section, ptype, rule.clone()), false)
                .await;
            if let Some(watcher) = self.inner.watcher.get() {
                if let Err(error) = watcher.update_for_remove_policy(section, ptype, &rule).await {
                    log::error!("failed to broadcast removed policy: {error}");
                }
            }
        }
        Ok(removed)
    }

    /// Removes a batch of rules.
    #[tracing::instrument(level = "debug", skip(self, rules))]
    pub async fn remove_policies(
        &self,
        section: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        let snapshot = self.inner.snapshot.load_full();

        let mut any_removed = false;
        for rule in &rules {
            if snapshot.remove_rule(section, ptype, rule)? {
                self.persist(&PolicyRule::new(section, ptype, rule.clone()), false)
                    .await;
                any_removed = true;
            }
        }

        if any_removed {
            if let Some(watcher) = self.inner.watcher.get() {
                if let Err(error) = watcher
                    .update_for_remove_policies(section, ptype, &rules)
                    .await
                {
                    log::error!("failed to broadcast removed policies: {error}");
                }
            }
        }
        Ok(any_removed)
    }

    /// Removes every rule matching the field filter, e.g. all rules naming
    /// a deleted resource.
    #[tracing::instrument(level = "debug", skip(self, field_values))]
    pub async fn remove_filtered_policy(
        &self,
        section: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> Result<bool> {
        let snapshot = self.inner.snapshot.load_full();
        let removed =
            snapshot.remove_filtered_rules(section, ptype, field_index, &field_values)?;

        if removed {
            if let Some(watcher) = self.inner.watcher.get() {
                if let Err(error) = watcher
                    .update_for_remove_filtered_policy(section, ptype, field_index, &field_values)
                    .await
                {
                    log::error!("failed to broadcast filtered policy removal: {error}");
                }
            }
        }
        Ok(removed)
    }

    /// Replaces the whole rule set and persists it through the adapter.
    #[tracing::instrument(level = "debug", skip(self, rules))]
    pub async fn save_policy(&self, rules: Vec<PolicyRule>) -> Result<()> {
        let snapshot = self.inner.snapshot.load_full();
        snapshot.replace_rules(&rules);

        if let Some(adapter) = &self.inner.adapter {
            if let Err(error) = adapter.save_policy(&rules).await {
                log::error!("failed to persist saved policies: {error}");
            }
        }
        if let Some(watcher) = self.inner.watcher.get() {
            if let Err(error) = watcher.update_for_save_policy(&rules).await {
                log::error!("failed to broadcast saved policies: {error}");
            }
        }
        Ok(())
    }

    /// Rebuilds the engine state from the adapter and publishes the new
    /// snapshot. In-flight enforcement calls keep the snapshot they
    /// already hold; on failure the previous snapshot stays published.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.inner.reload_lock.lock().await;

        let model = self.inner.snapshot.load().model().clone();
        let next = Snapshot::build(model)?;

        if let Some(adapter) = &self.inner.adapter {
            self.load_from(adapter.as_ref(), &next).await?;
        }

        self.inner.snapshot.store(Arc::clone(&next));
        registry::replace(&self.inner.name, next);
        Ok(())
    }

    /// Closes the watcher and removes the published snapshot.
    pub async fn shutdown(self) {
        if let Some(watcher) = self.inner.watcher.get() {
            watcher.close().await;
        }
        registry::remove(&self.inner.name);
    }

    async fn load_from(&self, adapter: &dyn Adapter, snapshot: &Snapshot) -> Result<()> {
        let started = Instant::now();

        let rules = adapter.load_policy().await.context(AdapterSnafu)?;
        for rule in rules {
            if let Err(error) = snapshot.apply_rule(&rule.section, &rule.ptype, &rule.values) {
                log::warn!("skipping malformed stored rule: {error}");
            }
        }

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_policy_load(started.elapsed().as_secs_f64());
        }
        Ok(())
    }

    /// Best-effort write-through to the adapter; failures are logged and
    /// the in-memory state keeps going.
    async fn persist(&self, rule: &PolicyRule, added: bool) {
        let Some(adapter) = &self.inner.adapter else {
            return;
        };

        let result = if added {
            adapter.add_policy(rule).await
        } else {
            adapter.remove_policy(rule).await
        };
        if let Err(error) = result {
            log::error!("failed to persist policy change: {error}");
        }
    }

    /// Entry point for watcher broadcasts; applies them off the callback.
    fn handle_remote_change(&self, change: PolicyChange) {
        let engine = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = engine.apply_remote_change(change).await {
                        log::error!("failed to apply remote policy change: {error}");
                    }
                });
            }
            Err(_) => log::error!("dropping remote policy change outside the async runtime"),
        }
    }

    /// Applies a change broadcast by a peer without re-broadcasting it.
    async fn apply_remote_change(&self, change: PolicyChange) -> Result<()> {
        let snapshot = self.inner.snapshot.load_full();

        match change {
            PolicyChange::AddPolicy(section, ptype, rule) => {
                snapshot.apply_rule(&section, &ptype, &rule)?;
            }
            PolicyChange::AddPolicies(section, ptype, rules) => {
                for rule in rules {
                    snapshot.apply_rule(&section, &ptype, &rule)?;
                }
            }
            PolicyChange::RemovePolicy(section, ptype, rule) => {
                snapshot.remove_rule(&section, &ptype, &rule)?;
            }
            PolicyChange::RemovePolicies(section, ptype, rules) => {
                for rule in rules {
                    snapshot.remove_rule(&section, &ptype, &rule)?;
                }
            }
            PolicyChange::RemoveFilteredPolicy(section, ptype, field_index, field_values) => {
                snapshot.remove_filtered_rules(&section, &ptype, field_index, &field_values)?;
            }
            PolicyChange::SavePolicy(rules) => {
                snapshot.replace_rules(&rules);
            }
            PolicyChange::Reload => {
                self.reload().await?;
            }
        }
        Ok(())
    }
}
