// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::sync::Arc;
use std::time::Duration;

use arbiter::{
    Adapter, BoxError, Engine, EngineConfig, Error, MemoryAdapter, Model, PolicyChange,
    PolicyRule, Watcher, watcher::UpdateCallback,
};
use async_trait::async_trait;
use parking_lot::Mutex;

fn init_log() {
    let _ = env_logger::try_init();
}

fn req(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}

const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
"#;

const DOMAIN_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && keyMatch(r.obj, p.obj) && r.act == p.act
"#;

#[tokio::test]
async fn rbac_with_pattern_matching() -> Result<(), Error> {
    init_log();

    let adapter = Arc::new(MemoryAdapter::new(vec![
        PolicyRule::new("p", "p", ["admin", "/data/*", "read"]),
        PolicyRule::new("p", "p", ["alice", "/profile", "write"]),
        PolicyRule::new("g", "g", ["alice", "admin"]),
    ]));

    let engine = Engine::start(
        EngineConfig::new("rbac_with_pattern_matching", Model::parse(RBAC_MODEL))
            .with_adapter(adapter),
    )
    .await?;

    assert!(engine.enforce(&req(&["alice", "/data/reports", "read"]))?);
    assert!(engine.enforce(&req(&["alice", "/profile", "write"]))?);
    assert!(!engine.enforce(&req(&["alice", "/data/reports", "write"]))?);
    assert!(!engine.enforce(&req(&["bob", "/data/reports", "read"]))?);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn domains_keep_roles_apart() -> Result<(), Error> {
    init_log();

    let adapter = Arc::new(MemoryAdapter::new(vec![
        PolicyRule::new("p", "p", ["admin", "tenant1", "/data/*", "read"]),
        PolicyRule::new("p", "p", ["admin", "tenant2", "/data/*", "read"]),
        PolicyRule::new("g", "g", ["alice", "admin", "tenant1"]),
    ]));

    let engine = Engine::start(
        EngineConfig::new("domains_keep_roles_apart", Model::parse(DOMAIN_MODEL))
            .with_adapter(adapter),
    )
    .await?;

    assert!(engine.enforce(&req(&["alice", "tenant1", "/data/x", "read"]))?);
    assert!(!engine.enforce(&req(&["alice", "tenant2", "/data/x", "read"]))?);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn deny_override_lets_a_deny_rule_win() -> Result<(), Error> {
    init_log();

    let model = Model::parse(
        r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
"#,
    );

    let adapter = Arc::new(MemoryAdapter::new(vec![
        PolicyRule::new("p", "p", ["alice", "/data/*", "read", "allow"]),
        PolicyRule::new("p", "p", ["alice", "/data/secret", "read", "deny"]),
    ]));

    let engine = Engine::start(
        EngineConfig::new("deny_override_lets_a_deny_rule_win", model).with_adapter(adapter),
    )
    .await?;

    assert!(engine.enforce(&req(&["alice", "/data/public", "read"]))?);
    assert!(!engine.enforce(&req(&["alice", "/data/secret", "read"]))?);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn priority_effect_decides_by_rule_order() -> Result<(), Error> {
    init_log();

    let model = Model::parse(
        r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[role_definition]
g = _, _

[policy_effect]
e = priority(p.eft) || deny

[matchers]
m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
"#,
    );

    let adapter = Arc::new(MemoryAdapter::new(vec![
        PolicyRule::new("p", "p", ["alice", "/data/1", "read", "deny"]),
        PolicyRule::new("p", "p", ["alice", "/data/*", "read", "allow"]),
    ]));

    let engine = Engine::start(
        EngineConfig::new("priority_effect_decides_by_rule_order", model).with_adapter(adapter),
    )
    .await?;

    assert!(!engine.enforce(&req(&["alice", "/data/1", "read"]))?);
    assert!(engine.enforce(&req(&["alice", "/data/2", "read"]))?);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn policies_can_be_mutated_at_runtime() -> Result<(), Error> {
    init_log();

    let engine = Engine::start(EngineConfig::new(
        "policies_can_be_mutated_at_runtime",
        Model::parse(RBAC_MODEL),
    ))
    .await?;

    assert!(!engine.enforce(&req(&["alice", "/rooms/1", "read"]))?);

    engine
        .add_policy("p", "p", req(&["viewer", "/rooms/*", "read"]))
        .await?;
    engine.add_policy("g", "g", req(&["alice", "viewer"])).await?;
    assert!(engine.enforce(&req(&["alice", "/rooms/1", "read"]))?);

    // removing the grouping rule revokes the inherited access
    engine
        .remove_policy("g", "g", req(&["alice", "viewer"]))
        .await?;
    assert!(!engine.enforce(&req(&["alice", "/rooms/1", "read"]))?);

    // direct grants can be removed by resource filter
    engine
        .add_policy("p", "p", req(&["alice", "/rooms/1", "read"]))
        .await?;
    assert!(engine.enforce(&req(&["alice", "/rooms/1", "read"]))?);
    engine
        .remove_filtered_policy("p", "p", 1, req(&["/rooms/1"]))
        .await?;
    assert!(!engine.enforce(&req(&["alice", "/rooms/1", "read"]))?);

    // grouping rules can be removed by filter as well
    engine.add_policy("g", "g", req(&["alice", "viewer"])).await?;
    assert!(engine.enforce(&req(&["alice", "/rooms/2", "read"]))?);
    engine
        .remove_filtered_policy("g", "g", 1, req(&["viewer"]))
        .await?;
    assert!(!engine.enforce(&req(&["alice", "/rooms/2", "read"]))?);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn reload_swaps_the_published_snapshot() -> Result<(), Error> {
    init_log();

    let adapter = Arc::new(MemoryAdapter::default());
    let engine = Engine::start(
        EngineConfig::new(
            "reload_swaps_the_published_snapshot",
            Model::parse(RBAC_MODEL),
        )
        .with_adapter(Arc::clone(&adapter) as Arc<dyn arbiter::Adapter>),
    )
    .await?;

    let before = engine.snapshot();
    assert!(!engine.enforce(&req(&["alice", "/data/x", "read"]))?);

    adapter
        .add_policy(&PolicyRule::new("p", "p", ["alice", "/data/*", "read"]))
        .await
        .unwrap();
    engine.reload().await?;

    assert!(engine.enforce(&req(&["alice", "/data/x", "read"]))?);

    // a reader holding the previous snapshot is unaffected
    assert!(!before.enforce(&req(&["alice", "/data/x", "read"]))?);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn snapshots_are_published_and_erased() -> Result<(), Error> {
    init_log();

    let engine = Engine::start(EngineConfig::new(
        "snapshots_are_published_and_erased",
        Model::parse(RBAC_MODEL),
    ))
    .await?;

    let snapshot = arbiter::registry::snapshot("snapshots_are_published_and_erased")
        .expect("snapshot should be published");
    assert!(!snapshot.enforce(&req(&["alice", "/data/x", "read"]))?);

    // a second instance under the same name is rejected
    let duplicate = Engine::start(EngineConfig::new(
        "snapshots_are_published_and_erased",
        Model::parse(RBAC_MODEL),
    ))
    .await;
    assert!(matches!(duplicate, Err(Error::InstanceExists { .. })));

    engine.shutdown().await;
    assert!(arbiter::registry::snapshot("snapshots_are_published_and_erased").is_none());
    Ok(())
}

#[tokio::test]
async fn unsupported_models_fail_at_start() {
    init_log();

    // matcher references a grouping ptype the model does not declare
    let model = Model::parse(
        "[request_definition]\nr = sub, obj, act\n\
         [policy_definition]\np = sub, obj, act\n\
         [policy_effect]\ne = some(where (p.eft == allow))\n\
         [matchers]\nm = g(r.sub, p.sub)",
    );
    let result = Engine::start(EngineConfig::new("unsupported_models_1", model)).await;
    assert!(result.is_err());

    // unsupported effect expression
    let model = Model::parse(
        "[request_definition]\nr = sub, obj, act\n\
         [policy_definition]\np = sub, obj, act\n\
         [policy_effect]\ne = some(where (p.eft == deny))\n\
         [matchers]\nm = r.sub == p.sub",
    );
    let result = Engine::start(EngineConfig::new("unsupported_models_2", model)).await;
    assert!(result.is_err());
}

/// Watcher capturing outbound broadcasts and exposing the engine's update
/// callback so tests can play the part of a peer node.
struct TestWatcher {
    broadcasts: Arc<Mutex<Vec<PolicyChange>>>,
    callback: Arc<Mutex<Option<UpdateCallback>>>,
    closed: Arc<Mutex<bool>>,
}

#[async_trait]
impl Watcher for TestWatcher {
    fn set_update_callback(&mut self, callback: UpdateCallback) {
        *self.callback.lock() = Some(callback);
    }

    async fn update(&self) -> Result<(), BoxError> {
        self.broadcasts.lock().push(PolicyChange::Reload);
        Ok(())
    }

    async fn update_for_add_policy(
        &self,
        section: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), BoxError> {
        self.broadcasts.lock().push(PolicyChange::AddPolicy(
            section.to_owned(),
            ptype.to_owned(),
            rule.to_vec(),
        ));
        Ok(())
    }

    async fn update_for_add_policies(
        &self,
        section: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<(), BoxError> {
        self.broadcasts.lock().push(PolicyChange::AddPolicies(
            section.to_owned(),
            ptype.to_owned(),
            rules.to_vec(),
        ));
        Ok(())
    }

    async fn update_for_remove_policy(
        &self,
        section: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), BoxError> {
        self.broadcasts.lock().push(PolicyChange::RemovePolicy(
            section.to_owned(),
            ptype.to_owned(),
            rule.to_vec(),
        ));
        Ok(())
    }

    async fn update_for_remove_policies(
        &self,
        section: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<(), BoxError> {
        self.broadcasts.lock().push(PolicyChange::RemovePolicies(
            section.to_owned(),
            ptype.to_owned(),
            rules.to_vec(),
        ));
        Ok(())
    }

    async fn update_for_remove_filtered_policy(
        &self,
        section: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<(), BoxError> {
        self.broadcasts
            .lock()
            .push(PolicyChange::RemoveFilteredPolicy(
                section.to_owned(),
                ptype.to_owned(),
                field_index,
                field_values.to_vec(),
            ));
        Ok(())
    }

    async fn update_for_save_policy(&self, rules: &[PolicyRule]) -> Result<(), BoxError> {
        self.broadcasts
            .lock()
            .push(PolicyChange::SavePolicy(rules.to_vec()));
        Ok(())
    }

    async fn close(&self) {
        *self.closed.lock() = true;
    }
}

#[tokio::test]
async fn watcher_sees_local_changes_and_peers_update_the_engine() -> Result<(), Error> {
    init_log();

    let broadcasts = Arc::new(Mutex::new(Vec::new()));
    let callback = Arc::new(Mutex::new(None));
    let closed = Arc::new(Mutex::new(false));

    let watcher = TestWatcher {
        broadcasts: Arc::clone(&broadcasts),
        callback: Arc::clone(&callback),
        closed: Arc::clone(&closed),
    };

    let engine = Engine::start(
        EngineConfig::new(
            "watcher_round_trip",
            Model::parse(RBAC_MODEL),
        )
        .with_watcher(Box::new(watcher)),
    )
    .await?;

    // local writes are broadcast
    engine
        .add_policy("p", "p", req(&["alice", "/data/1", "read"]))
        .await?;
    assert_eq!(
        *broadcasts.lock(),
        vec![PolicyChange::AddPolicy(
            "p".to_owned(),
            "p".to_owned(),
            req(&["alice", "/data/1", "read"])
        )]
    );

    // an inbound peer broadcast is applied without re-broadcasting
    {
        let callback = callback.lock();
        let callback = callback.as_ref().expect("callback should be installed");
        callback(PolicyChange::AddPolicy(
            "g".to_owned(),
            "g".to_owned(),
            req(&["bob", "alice"]),
        ));
    }

    let mut applied = false;
    for _ in 0..100 {
        if engine.enforce(&req(&["bob", "/data/1", "read"]))? {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(applied, "peer change should reach the engine");
    assert_eq!(broadcasts.lock().len(), 1);

    engine.shutdown().await;
    assert!(*closed.lock(), "shutdown should close the watcher");
    Ok(())
}
