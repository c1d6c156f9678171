// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-instance access rights.
//!
//! Rights are u64 bitmasks grouped by [`RightsType`]. A user's rights on
//! an instance are a [`PermissionSet`]; every privileged operation names
//! the group and bit it demands.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The rights group an individual right belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RightsType {
    InstanceManager,
    Repository,
    Toolchain,
    Compiler,
    GameServer,
    Chat,
    Configuration,
    InstanceUser,
}

crate::simple_display! {
    RightsType {
        InstanceManager => "instance_manager",
        Repository => "repository",
        Toolchain => "toolchain",
        Compiler => "compiler",
        GameServer => "game_server",
        Chat => "chat",
        Configuration => "configuration",
        InstanceUser => "instance_user",
    }
}

impl RightsType {
    pub const ALL: [RightsType; 8] = [
        RightsType::InstanceManager,
        RightsType::Repository,
        RightsType::Toolchain,
        RightsType::Compiler,
        RightsType::GameServer,
        RightsType::Chat,
        RightsType::Configuration,
        RightsType::InstanceUser,
    ];
}

pub mod instance_manager {
    pub const READ: u64 = 1 << 0;
    pub const CREATE: u64 = 1 << 1;
    pub const RENAME: u64 = 1 << 2;
    pub const RELOCATE: u64 = 1 << 3;
    pub const SET_ONLINE: u64 = 1 << 4;
    pub const DELETE: u64 = 1 << 5;
    pub const LIST: u64 = 1 << 6;
    pub const SET_CONFIG: u64 = 1 << 7;
    pub const SET_AUTO_UPDATE: u64 = 1 << 8;
    pub const ALL: u64 = (1 << 9) - 1;
}

pub mod repository {
    pub const READ: u64 = 1 << 0;
    pub const CLONE: u64 = 1 << 1;
    pub const FETCH: u64 = 1 << 2;
    pub const CHECKOUT: u64 = 1 << 3;
    pub const RESET: u64 = 1 << 4;
    pub const MERGE_PULL_REQUEST: u64 = 1 << 5;
    pub const SYNCHRONIZE: u64 = 1 << 6;
    pub const CANCEL_PENDING: u64 = 1 << 7;
    pub const CHANGE_CREDENTIALS: u64 = 1 << 8;
    pub const ALL: u64 = (1 << 9) - 1;
}

pub mod toolchain {
    pub const READ: u64 = 1 << 0;
    pub const INSTALL: u64 = 1 << 1;
    pub const CANCEL_INSTALL: u64 = 1 << 2;
    pub const ALL: u64 = (1 << 3) - 1;
}

pub mod compiler {
    pub const READ: u64 = 1 << 0;
    pub const COMPILE: u64 = 1 << 1;
    pub const CANCEL_COMPILE: u64 = 1 << 2;
    pub const SET_PROJECT: u64 = 1 << 3;
    pub const ALL: u64 = (1 << 4) - 1;
}

pub mod game_server {
    pub const READ: u64 = 1 << 0;
    pub const START: u64 = 1 << 1;
    pub const STOP: u64 = 1 << 2;
    pub const RESTART: u64 = 1 << 3;
    pub const SOFT_RESTART: u64 = 1 << 4;
    pub const SOFT_SHUTDOWN: u64 = 1 << 5;
    pub const SET_PORTS: u64 = 1 << 6;
    pub const SET_SECURITY: u64 = 1 << 7;
    pub const SET_WEB_CLIENT: u64 = 1 << 8;
    pub const SET_STARTUP_TIMEOUT: u64 = 1 << 9;
    pub const SET_HEARTBEAT: u64 = 1 << 10;
    pub const ALL: u64 = (1 << 11) - 1;
}

pub mod chat {
    pub const READ: u64 = 1 << 0;
    pub const CREATE: u64 = 1 << 1;
    pub const DELETE: u64 = 1 << 2;
    pub const SET_CHANNELS: u64 = 1 << 3;
    pub const ALL: u64 = (1 << 4) - 1;
}

pub mod configuration {
    pub const READ: u64 = 1 << 0;
    pub const WRITE: u64 = 1 << 1;
    pub const DELETE: u64 = 1 << 2;
    pub const ALL: u64 = (1 << 3) - 1;
}

pub mod instance_user {
    pub const READ: u64 = 1 << 0;
    pub const CREATE: u64 = 1 << 1;
    pub const WRITE: u64 = 1 << 2;
    pub const DELETE: u64 = 1 << 3;
    pub const ALL: u64 = (1 << 4) - 1;
}

/// Full bitmask for a rights group.
pub fn all_bits(group: RightsType) -> u64 {
    match group {
        RightsType::InstanceManager => instance_manager::ALL,
        RightsType::Repository => repository::ALL,
        RightsType::Toolchain => toolchain::ALL,
        RightsType::Compiler => compiler::ALL,
        RightsType::GameServer => game_server::ALL,
        RightsType::Chat => chat::ALL,
        RightsType::Configuration => configuration::ALL,
        RightsType::InstanceUser => instance_user::ALL,
    }
}

/// A user's rights on one instance: group → bitmask.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(HashMap<RightsType, u64>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every bit in every group. Granted to the creator of an instance.
    pub fn full() -> Self {
        let mut set = Self::default();
        for group in RightsType::ALL {
            set.0.insert(group, all_bits(group));
        }
        set
    }

    pub fn grant(&mut self, group: RightsType, bits: u64) {
        *self.0.entry(group).or_insert(0) |= bits;
    }

    pub fn revoke(&mut self, group: RightsType, bits: u64) {
        if let Some(mask) = self.0.get_mut(&group) {
            *mask &= !bits;
        }
    }

    /// True when every bit of `bits` is held in `group`.
    pub fn allows(&self, group: RightsType, bits: u64) -> bool {
        self.0.get(&group).is_some_and(|mask| mask & bits == bits)
    }

    pub fn bits(&self, group: RightsType) -> u64 {
        self.0.get(&group).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "rights_tests.rs"]
mod tests;
