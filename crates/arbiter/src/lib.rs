// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Arbiter
//!
//! An in-process authorization engine built on the PERM metamodel: a
//! configuration model declares the shape of requests and policy rules, a
//! matcher expression decides whether a rule covers a request, and a
//! policy effect expression collapses the per-rule outcomes into the final
//! allow/deny decision.
//!
//! The moving parts:
//!
//! * [`Model`] — the parsed INI-style configuration.
//! * [`RoleManager`](rbac::RoleManager) — the role-inheritance graph
//!   answering transitive membership queries, one per declared grouping
//!   ptype. Reads are lock-free and safe from any thread.
//! * [`compile`](compiler::compile) — lowers the matcher expression into an
//!   executable predicate over a request and a policy row.
//! * [`Effector`](effect::Effector) — the compiled policy effect reducer.
//! * [`Engine`] — wires the above together, loads rules through an
//!   [`Adapter`](adapter::Adapter), publishes an immutable [`Snapshot`]
//!   per instance and keeps peers in sync through a
//!   [`Watcher`](watcher::Watcher).
//!
//! Enforcement never takes a lock: a request-time reader captures the
//! published snapshot once and works against copy-on-write state, while
//! writers serialize per store and never block readers.
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use arbiter::{Engine, EngineConfig, MemoryAdapter, Model, PolicyRule};
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), arbiter::Error> {
//! let model = Model::parse(
//!     r#"
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
//! "#,
//! );
//!
//! let adapter = Arc::new(MemoryAdapter::new(vec![
//!     PolicyRule::new("p", "p", ["admin", "/data/*", "read"]),
//!     PolicyRule::new("g", "g", ["alice", "admin"]),
//! ]));
//!
//! let engine = Engine::start(EngineConfig::new("example", model).with_adapter(adapter)).await?;
//!
//! assert!(engine.enforce(&["alice".into(), "/data/reports".into(), "read".into()])?);
//! assert!(!engine.enforce(&["bob".into(), "/data/reports".into(), "read".into()])?);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod compiler;
pub mod effect;
pub mod matching;
pub mod policy;
pub mod prelude;
pub mod rbac;
pub mod registry;
pub mod watcher;

mod engine;
mod error;
mod metrics;
mod model;

pub use adapter::{Adapter, MemoryAdapter};
pub use engine::{Engine, EngineConfig, Snapshot};
pub use error::{BoxError, CompileError, Error, EvalError, Result};
pub use metrics::EngineMetrics;
pub use model::Model;
pub use policy::PolicyRule;
pub use rbac::RoleManager;
pub use watcher::{PolicyChange, Watcher};
