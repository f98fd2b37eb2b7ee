// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

pub use crate::{
    Engine, EngineConfig, Model,
    adapter::{Adapter, MemoryAdapter},
    effect::{Effect, Effector},
    policy::PolicyRule,
    rbac::RoleManager,
    watcher::{PolicyChange, Watcher},
};
