// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized controller state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use warden_core::{
    Clock, Deployment, DeploymentId, ErrorCode, Instance, InstanceId, Job, JobId, PermissionSet,
    ReattachRecord,
};

/// Everything the controller persists, keyed by id.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ControllerState {
    pub instances: HashMap<InstanceId, Instance>,
    pub jobs: HashMap<JobId, Job>,
    /// At most one per instance.
    #[serde(default)]
    pub reattach: HashMap<InstanceId, ReattachRecord>,
    #[serde(default)]
    pub deployments: HashMap<DeploymentId, Deployment>,
    /// Instance → its latest committed deployment.
    #[serde(default)]
    pub latest_deployment: HashMap<InstanceId, DeploymentId>,
    /// Instance → user → rights.
    #[serde(default)]
    pub permissions: HashMap<InstanceId, HashMap<String, PermissionSet>>,
}

impl ControllerState {
    pub fn instance_by_name(&self, name: &str) -> Option<&Instance> {
        self.instances.values().find(|i| i.name == name)
    }

    pub fn permissions_for(&self, instance: &InstanceId, user: &str) -> PermissionSet {
        self.permissions
            .get(instance)
            .and_then(|users| users.get(user))
            .cloned()
            .unwrap_or_default()
    }

    pub fn grant_full(&mut self, instance: &InstanceId, user: &str) {
        self.permissions
            .entry(instance.clone())
            .or_default()
            .insert(user.to_string(), PermissionSet::full());
    }

    /// Drop an instance and everything hanging off it.
    pub fn remove_instance(&mut self, id: &InstanceId) {
        self.instances.remove(id);
        self.reattach.remove(id);
        self.permissions.remove(id);
        self.latest_deployment.remove(id);
        self.deployments.retain(|_, d| d.instance != *id);
    }

    /// Jobs recorded as running (no terminal state) that no component
    /// can resume; finalised as cancelled-errored at startup.
    pub fn finalize_stale_jobs(&mut self, clock: &impl Clock) -> usize {
        let now = clock.now_utc();
        let mut finalized = 0;
        for job in self.jobs.values_mut() {
            if !job.is_finished() {
                job.finish_error(
                    ErrorCode::JobCancelled,
                    "controller restarted while the job was running",
                    now,
                );
                finalized += 1;
            }
        }
        finalized
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
