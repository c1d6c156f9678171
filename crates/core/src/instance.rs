// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance records and their nested settings.

use crate::event::ChannelClass;
use crate::session::LaunchParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for an instance.
    pub struct InstanceId("ins-");
}

/// Marker file left in a detached instance directory. Its presence is
/// what allows a later create-or-attach to adopt the directory.
pub const ATTACH_SENTINEL: &str = "TGS4_ALLOW_INSTANCE_ATTACH";

/// Version-control settings for an instance's repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Origin URL. None until the first clone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub committer_name: String,
    pub committer_email: String,
    /// Credentials for fetch/push. None disables synchronize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Push a copy of test-merge commits back to origin.
    #[serde(default)]
    pub push_test_merge_commits: bool,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            origin: None,
            committer_name: "Warden".into(),
            committer_email: "warden@localhost".into(),
            access_user: None,
            access_token: None,
            push_test_merge_commits: false,
        }
    }
}

impl RepositorySettings {
    pub fn has_credentials(&self) -> bool {
        self.access_user.is_some() && self.access_token.is_some()
    }
}

/// Compiler settings for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerSettings {
    /// Project base name (the `.dme` without extension). None = autodetect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// Security level compiled deployments demand at minimum.
    pub validation_security_level: crate::session::SecurityLevel,
    pub timeout_secs: u64,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            project_name: None,
            validation_security_level: crate::session::SecurityLevel::Safe,
            timeout_secs: 1800,
        }
    }
}

/// One chat channel an instance delivers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChannel {
    /// Provider-specific channel identifier.
    pub identifier: String,
    /// Which event classes this channel receives.
    pub classes: Vec<ChannelClass>,
}

/// One chat-provider connection for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub name: String,
    /// Provider kind, e.g. "discord" or "irc". Resolved by the adapter.
    pub provider: String,
    pub enabled: bool,
    pub channels: Vec<ChatChannel>,
}

/// One game-server deployment unit owned by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    /// Absolute path. Never inside the controller install directory,
    /// never nested with another instance's path.
    pub path: PathBuf,
    pub online: bool,
    /// Launch the watchdog when the instance comes online.
    pub auto_start: bool,
    /// Minutes between automatic updates. 0 disables.
    pub auto_update_minutes: u64,
    /// Toolchain version deployments compile with. None until set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain_version: Option<String>,
    pub repository: RepositorySettings,
    pub compiler: CompilerSettings,
    pub server: LaunchParams,
    #[serde(default)]
    pub chat: Vec<ChatSettings>,
}

impl Instance {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id: InstanceId::generate(),
            name: name.into(),
            path,
            online: false,
            auto_start: false,
            auto_update_minutes: 0,
            toolchain_version: None,
            repository: RepositorySettings::default(),
            compiler: CompilerSettings::default(),
            server: LaunchParams::default(),
            chat: Vec::new(),
        }
    }
}

/// Explicit change-record for instance updates. `None` fields are left
/// untouched (including `online` — there is no "clear" semantic).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_start: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_update_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositorySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<LaunchParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Vec<ChatSettings>>,
}

impl InstanceUpdate {
    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
