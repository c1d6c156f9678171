// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment store: compile-job results addressable by revision.
//!
//! A fresh deployment stages into parallel `primary`/`secondary`
//! directories under the instance's `Game/` tree. Committing sets the
//! *latest* pointer. Deletion is refcounted: directories of a claimed
//! deployment cannot be removed while any session holds them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use warden_core::{
    Clock, Deployment, DeploymentId, ErrorCode, InstanceId, RevisionInfo, SecurityLevel,
};
use warden_storage::{Store, StoreError};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("no deployment available")]
    NoDeployment,

    #[error("deployment {0} not found")]
    NotFound(DeploymentId),

    #[error("deployment {0} is in use")]
    InUse(DeploymentId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeployError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DeployError::NoDeployment | DeployError::NotFound(_) => ErrorCode::DeploymentMissing,
            DeployError::InUse(_) => ErrorCode::DeploymentInProgress,
            DeployError::Io(_) | DeployError::Store(_) => ErrorCode::InternalError,
        }
    }
}

pub struct DeploymentStore {
    instance: InstanceId,
    /// The instance's `Game/` directory.
    root: PathBuf,
    store: Arc<Store>,
    claims: Mutex<HashMap<DeploymentId, usize>>,
}

impl DeploymentStore {
    pub fn new(instance: InstanceId, root: PathBuf, store: Arc<Store>) -> Self {
        Self { instance, root, store, claims: Mutex::new(HashMap::new()) }
    }

    /// Allocate staging directories for a new deployment. Nothing is
    /// visible to other components until [`PendingDeployment::commit`].
    pub fn begin(
        self: &Arc<Self>,
        revision: RevisionInfo,
        toolchain_version: String,
        min_security: SecurityLevel,
        artifact_name: String,
        clock: &impl Clock,
    ) -> Result<PendingDeployment, DeployError> {
        let id = DeploymentId::generate();
        let base = self.root.join(id.as_str());
        let primary_dir = base.join("primary");
        let secondary_dir = base.join("secondary");
        std::fs::create_dir_all(&primary_dir)?;
        std::fs::create_dir_all(&secondary_dir)?;

        Ok(PendingDeployment {
            store: Arc::clone(self),
            deployment: Deployment {
                id,
                instance: self.instance.clone(),
                revision,
                min_security,
                toolchain_version,
                artifact_name,
                primary_dir,
                secondary_dir,
                created_at: clock.now_utc(),
            },
        })
    }

    /// The latest committed deployment, if any.
    pub fn latest(&self) -> Option<Deployment> {
        self.store.with(|s| {
            let id = s.latest_deployment.get(&self.instance)?;
            s.deployments.get(id).cloned()
        })
    }

    pub fn get(&self, id: &DeploymentId) -> Option<Deployment> {
        self.store.with(|s| {
            s.deployments.get(id).filter(|d| d.instance == self.instance).cloned()
        })
    }

    pub fn list(&self) -> Vec<Deployment> {
        let mut deployments: Vec<Deployment> = self.store.with(|s| {
            s.deployments.values().filter(|d| d.instance == self.instance).cloned().collect()
        });
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deployments
    }

    /// Claim a deployment for a session. The directories stay on disk
    /// until the returned provider (and every clone of the claim) drops.
    pub fn claim(self: &Arc<Self>, id: &DeploymentId) -> Result<DmbProvider, DeployError> {
        let deployment = self.get(id).ok_or_else(|| DeployError::NotFound(id.clone()))?;
        *self.claims.lock().entry(id.clone()).or_insert(0) += 1;
        Ok(DmbProvider { store: Arc::clone(self), deployment })
    }

    /// Claim the latest deployment.
    pub fn claim_latest(self: &Arc<Self>) -> Result<DmbProvider, DeployError> {
        let latest = self.latest().ok_or(DeployError::NoDeployment)?;
        self.claim(&latest.id)
    }

    pub fn claim_count(&self, id: &DeploymentId) -> usize {
        self.claims.lock().get(id).copied().unwrap_or(0)
    }

    fn release(&self, id: &DeploymentId) {
        let mut claims = self.claims.lock();
        if let Some(count) = claims.get_mut(id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                claims.remove(id);
            }
        }
    }

    /// Remove a deployment's record and directories. Refused while any
    /// session claims it.
    pub fn delete(&self, id: &DeploymentId) -> Result<(), DeployError> {
        if self.claim_count(id) > 0 {
            return Err(DeployError::InUse(id.clone()));
        }
        let deployment = self.get(id).ok_or_else(|| DeployError::NotFound(id.clone()))?;
        self.store.update(|s| {
            s.deployments.remove(id);
            if s.latest_deployment.get(&self.instance) == Some(id) {
                s.latest_deployment.remove(&self.instance);
            }
        })?;
        let _ = std::fs::remove_dir_all(self.root.join(deployment.id.as_str()));
        info!(instance = %self.instance, deployment = %id, "deployment deleted");
        Ok(())
    }

    /// Delete every unclaimed deployment except the latest. Returns how
    /// many were removed.
    pub fn cleanup_unclaimed(&self) -> usize {
        let latest = self.latest().map(|d| d.id);
        let mut removed = 0;
        for deployment in self.list() {
            if Some(&deployment.id) == latest.as_ref() || self.claim_count(&deployment.id) > 0 {
                continue;
            }
            match self.delete(&deployment.id) {
                Ok(()) => removed += 1,
                Err(e) => warn!(deployment = %deployment.id, error = %e, "cleanup failed"),
            }
        }
        removed
    }
}

/// A committed-in-progress deployment: directories exist, record does
/// not yet.
pub struct PendingDeployment {
    store: Arc<DeploymentStore>,
    deployment: Deployment,
}

impl PendingDeployment {
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// The artifact name is only known after the compile step.
    pub fn set_artifact_name(&mut self, name: impl Into<String>) {
        self.deployment.artifact_name = name.into();
    }

    pub fn primary_dir(&self) -> &Path {
        &self.deployment.primary_dir
    }

    pub fn secondary_dir(&self) -> &Path {
        &self.deployment.secondary_dir
    }

    /// Persist the record and advance the *latest* pointer.
    pub fn commit(self) -> Result<Deployment, DeployError> {
        let deployment = self.deployment.clone();
        self.store.store.update(|s| {
            s.deployments.insert(deployment.id.clone(), deployment.clone());
            s.latest_deployment.insert(deployment.instance.clone(), deployment.id.clone());
        })?;
        info!(
            instance = %deployment.instance,
            deployment = %deployment.id,
            sha = %deployment.revision.sha,
            "deployment committed"
        );
        Ok(deployment)
    }

    /// Drop the staging directories without committing.
    pub fn abort(self) {
        let _ = std::fs::remove_dir_all(self.store.root.join(self.deployment.id.as_str()));
    }
}

/// Claim on a deployment's artifact directories.
pub struct DmbProvider {
    store: Arc<DeploymentStore>,
    deployment: Deployment,
}

impl DmbProvider {
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn id(&self) -> &DeploymentId {
        &self.deployment.id
    }

    pub fn artifact_name(&self) -> &str {
        &self.deployment.artifact_name
    }

    /// The staging directory live for the given designation.
    pub fn live_dir(&self, is_primary: bool) -> &Path {
        self.deployment.live_dir(is_primary)
    }
}

impl Drop for DmbProvider {
    fn drop(&mut self) {
        self.store.release(&self.deployment.id);
    }
}

#[cfg(test)]
#[path = "deployments_tests.rs"]
mod tests;
