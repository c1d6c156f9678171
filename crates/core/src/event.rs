// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events fanned out to chat channels and interested components.

use crate::deployment::DeploymentId;
use crate::instance::InstanceId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Classification of chat channels; each event targets one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelClass {
    Watchdog,
    Dev,
    Admin,
    Game,
}

crate::simple_display! {
    ChannelClass {
        Watchdog => "watchdog",
        Dev => "dev",
        Admin => "admin",
        Game => "game",
    }
}

/// Something notable happened on an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RepoFetch { instance: InstanceId },
    RepoCheckout { instance: InstanceId, committish: String },
    RepoReset { instance: InstanceId, sha: String },
    /// A test merge hit conflicts and was rolled back.
    RepoMergeConflict {
        instance: InstanceId,
        head_sha: String,
        target: String,
        head_reference: String,
        branch: String,
    },
    RepoMergedPullRequest { instance: InstanceId, number: u64, sha: String },
    /// Fired before a push-back; a handler may veto.
    RepoPreSynchronize { instance: InstanceId },

    DeploymentStarted { instance: InstanceId },
    DeploymentComplete { instance: InstanceId, deployment: DeploymentId },
    DeploymentFailed { instance: InstanceId, message: String },

    WatchdogLaunched { instance: InstanceId },
    /// Session died without a pending graceful reboot.
    WatchdogCrashed { instance: InstanceId, message: String },
    WatchdogRelaunched { instance: InstanceId },
    /// A zero-downtime swap finished; the staged deployment is now active.
    WatchdogSwapComplete { instance: InstanceId, deployment: DeploymentId },
    WatchdogShutdown { instance: InstanceId },

    InstanceRenamed { instance: InstanceId, name: String },
    InstanceMoved { instance: InstanceId, path: PathBuf },
}

impl Event {
    /// Which channel class this event is delivered to.
    pub fn channel_class(&self) -> ChannelClass {
        use Event::*;
        match self {
            RepoFetch { .. }
            | RepoCheckout { .. }
            | RepoReset { .. }
            | RepoMergeConflict { .. }
            | RepoMergedPullRequest { .. }
            | RepoPreSynchronize { .. }
            | DeploymentStarted { .. }
            | DeploymentComplete { .. }
            | DeploymentFailed { .. } => ChannelClass::Dev,
            WatchdogLaunched { .. }
            | WatchdogCrashed { .. }
            | WatchdogRelaunched { .. }
            | WatchdogSwapComplete { .. }
            | WatchdogShutdown { .. } => ChannelClass::Watchdog,
            InstanceRenamed { .. } | InstanceMoved { .. } => ChannelClass::Admin,
        }
    }

    /// The instance the event belongs to.
    pub fn instance(&self) -> &InstanceId {
        use Event::*;
        match self {
            RepoFetch { instance }
            | RepoCheckout { instance, .. }
            | RepoReset { instance, .. }
            | RepoMergeConflict { instance, .. }
            | RepoMergedPullRequest { instance, .. }
            | RepoPreSynchronize { instance }
            | DeploymentStarted { instance }
            | DeploymentComplete { instance, .. }
            | DeploymentFailed { instance, .. }
            | WatchdogLaunched { instance }
            | WatchdogCrashed { instance, .. }
            | WatchdogRelaunched { instance }
            | WatchdogSwapComplete { instance, .. }
            | WatchdogShutdown { instance }
            | InstanceRenamed { instance, .. }
            | InstanceMoved { instance, .. } => instance,
        }
    }

    /// Short human text for chat delivery.
    pub fn message(&self) -> String {
        use Event::*;
        match self {
            RepoFetch { .. } => "Fetching origin".into(),
            RepoCheckout { committish, .. } => format!("Checking out {committish}"),
            RepoReset { sha, .. } => format!("Reset to {sha}"),
            RepoMergeConflict { target, .. } => {
                format!("Test merge of {target} hit conflicts and was rolled back")
            }
            RepoMergedPullRequest { number, sha, .. } => {
                format!("Merged pull request #{number} at {sha}")
            }
            RepoPreSynchronize { .. } => "Synchronizing with origin".into(),
            DeploymentStarted { .. } => "Deployment started".into(),
            DeploymentComplete { deployment, .. } => format!("Deployment {deployment} complete"),
            DeploymentFailed { message, .. } => format!("Deployment failed: {message}"),
            WatchdogLaunched { .. } => "Server launched".into(),
            WatchdogCrashed { message, .. } => format!("Server crashed: {message}"),
            WatchdogRelaunched { .. } => "Server relaunched after crash".into(),
            WatchdogSwapComplete { deployment, .. } => {
                format!("Server now running deployment {deployment}")
            }
            WatchdogShutdown { .. } => "Server shut down".into(),
            InstanceRenamed { name, .. } => format!("Instance renamed to {name}"),
            InstanceMoved { path, .. } => format!("Instance moved to {}", path.display()),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
