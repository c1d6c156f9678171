// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance manager: the global registry of deployment units.
//!
//! Owns path-collision validation, the attach sentinel protocol,
//! per-field rights on updates, the single-move-job rule, and the
//! online/offline transition with field rollback.

use crate::compile::Compiler;
use crate::events::EventBus;
use crate::instance::{InstanceError, InstanceHost};
use crate::jobs::{JobManager, JobManagerError};
use crate::session::{BridgeRegistrar, TopicClient};
use crate::toolchain::ToolchainManager;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use warden_core::rights::{instance_manager, RightsType};
use warden_core::{
    Clock, ErrorCode, Event, Instance, InstanceId, InstanceUpdate, Job, JobId, PermissionSet,
};
use warden_host::ioutil::{self, IoError};
use warden_host::paths;
use warden_storage::{Store, StoreError};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("instance name must not be empty")]
    NameEmpty,

    #[error("instance path must not be empty")]
    PathEmpty,

    #[error("instance name is already in use")]
    DuplicateName,

    #[error("path overlaps the controller installation or another instance")]
    ConflictingPath,

    #[error("directory is non-empty and carries no attach marker")]
    ExistingPath,

    #[error("path is not under any whitelisted root")]
    NotWhitelisted,

    #[error("instance limit reached")]
    LimitReached,

    #[error("instance not found")]
    Gone,

    #[error("instance must be offline to detach")]
    DetachOnline,

    #[error("instance must be offline to relocate")]
    RelocateOnline,

    #[error("insufficient rights")]
    AccessDenied,

    #[error("invalid launch parameters")]
    InvalidParams(ErrorCode),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Jobs(#[from] JobManagerError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ManagerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ManagerError::NameEmpty | ManagerError::PathEmpty | ManagerError::DuplicateName => {
                ErrorCode::ModelValidationFailure
            }
            ManagerError::ConflictingPath => ErrorCode::InstanceAtConflictingPath,
            ManagerError::ExistingPath => ErrorCode::InstanceAtExistingPath,
            ManagerError::NotWhitelisted => ErrorCode::InstanceNotAtWhitelistedPath,
            ManagerError::LimitReached => ErrorCode::InstanceLimitReached,
            ManagerError::Gone => ErrorCode::InstanceMissing,
            ManagerError::DetachOnline => ErrorCode::InstanceDetachOnline,
            ManagerError::RelocateOnline => ErrorCode::InstanceRelocateOnline,
            ManagerError::AccessDenied => ErrorCode::AccessDenied,
            ManagerError::InvalidParams(code) => *code,
            ManagerError::Instance(e) => e.code(),
            ManagerError::Jobs(e) => e.code(),
            ManagerError::Io(_) | ManagerError::Store(_) => ErrorCode::InternalError,
        }
    }
}

/// Identity stored inside the attach sentinel so a re-attach restores
/// the same instance id and name.
#[derive(Debug, Serialize, Deserialize)]
struct SentinelIdentity {
    id: InstanceId,
    name: String,
}

/// Result of create-or-attach; the variants only differ in whether an
/// attach marker was consumed.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Instance),
    Attached(Instance),
}

impl CreateOutcome {
    pub fn record(&self) -> &Instance {
        match self {
            CreateOutcome::Created(record) | CreateOutcome::Attached(record) => record,
        }
    }
}

/// Shared construction inputs for every instance host.
#[derive(Clone)]
pub struct EngineDeps<C: Clock> {
    pub store: Arc<Store>,
    pub jobs: Arc<JobManager<C>>,
    pub executor: Arc<dyn warden_host::ProcessExecutor>,
    pub registrar: Arc<BridgeRegistrar>,
    pub topic: Arc<dyn TopicClient>,
    pub toolchain: Arc<ToolchainManager>,
    pub compiler: Arc<dyn Compiler>,
    pub events: EventBus,
    pub clock: C,
    pub bridge_port: u16,
    /// The controller's own installation directory; no instance may
    /// overlap it.
    pub install_dir: PathBuf,
    pub instance_limit: usize,
    /// When set, instance paths must live under one of these roots.
    pub valid_instance_paths: Option<Vec<PathBuf>>,
}

type HostMap<C> = Arc<Mutex<HashMap<InstanceId, Arc<InstanceHost<C>>>>>;

pub struct InstanceManager<C: Clock> {
    deps: EngineDeps<C>,
    hosts: HostMap<C>,
    move_jobs: Mutex<HashMap<InstanceId, JobId>>,
}

impl<C: Clock + 'static> InstanceManager<C> {
    pub fn new(deps: EngineDeps<C>) -> Arc<Self> {
        Arc::new(Self {
            deps,
            hosts: Arc::new(Mutex::new(HashMap::new())),
            move_jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Rebuild hosts for every stored instance and hand watchdogs their
    /// reattach records. Called once at controller startup.
    pub async fn resume(self: &Arc<Self>) {
        let instances: Vec<Instance> =
            self.deps.store.with(|s| s.instances.values().cloned().collect());
        for record in instances {
            let host = match InstanceHost::assemble(&record, &self.deps) {
                Ok(host) => host,
                Err(e) => {
                    warn!(instance = %record.id, error = %e, "failed to assemble instance");
                    continue;
                }
            };
            self.hosts.lock().insert(record.id.clone(), Arc::clone(&host));

            let reattach =
                self.deps.store.with(|s| s.reattach.get(&record.id).cloned());
            if let Some(reattach) = reattach {
                match host.watchdog().reattach(reattach).await {
                    Ok(true) => info!(instance = %record.id, "session reattached"),
                    Ok(false) => info!(instance = %record.id, "stale reattach record cleared"),
                    Err(e) => warn!(instance = %record.id, error = %e, "reattach failed"),
                }
            }
        }
    }

    pub fn host(&self, id: &InstanceId) -> Option<Arc<InstanceHost<C>>> {
        self.hosts.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> =
            self.deps.store.with(|s| s.instances.values().cloned().collect());
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        instances
    }

    pub fn get(&self, id: &InstanceId) -> Option<Instance> {
        self.deps.store.with(|s| s.instances.get(id).cloned())
    }

    pub fn permissions_for(&self, id: &InstanceId, user: &str) -> PermissionSet {
        self.deps.store.with(|s| s.permissions_for(id, user))
    }

    fn normalized(&self, path: &Path) -> PathBuf {
        paths::normalize(path, &self.deps.install_dir)
    }

    /// Ordered path validation shared by create and relocate.
    fn validate_path(
        &self,
        normalized: &Path,
        ignore_instance: Option<&InstanceId>,
    ) -> Result<(), ManagerError> {
        if paths::paths_overlap(normalized, &self.deps.install_dir) {
            return Err(ManagerError::ConflictingPath);
        }
        let conflict = self.deps.store.with(|s| {
            s.instances
                .values()
                .filter(|i| Some(&i.id) != ignore_instance)
                .any(|i| paths::paths_overlap(normalized, &i.path))
        });
        if conflict {
            return Err(ManagerError::ConflictingPath);
        }
        if let Some(roots) = &self.deps.valid_instance_paths {
            if !roots.iter().any(|root| paths::is_descendant(root, normalized)) {
                return Err(ManagerError::NotWhitelisted);
            }
        }
        Ok(())
    }

    /// Create a new instance, or adopt a detached directory carrying
    /// the attach sentinel.
    pub fn create_or_attach(
        &self,
        user: &str,
        name: &str,
        path: &Path,
    ) -> Result<CreateOutcome, ManagerError> {
        if name.trim().is_empty() {
            return Err(ManagerError::NameEmpty);
        }
        if path.as_os_str().is_empty() {
            return Err(ManagerError::PathEmpty);
        }
        let normalized = self.normalized(path);
        self.validate_path(&normalized, None)?;

        let (count, name_taken) = self.deps.store.with(|s| {
            (s.instances.len(), s.instance_by_name(name).is_some())
        });
        if count >= self.deps.instance_limit {
            return Err(ManagerError::LimitReached);
        }
        if name_taken {
            return Err(ManagerError::DuplicateName);
        }

        let sentinel_present = ioutil::has_sentinel(&normalized);
        if !sentinel_present && !ioutil::is_empty_or_missing(&normalized)? {
            return Err(ManagerError::ExistingPath);
        }

        let mut record = Instance::new(name, normalized.clone());
        let mut attached = false;
        if sentinel_present {
            if let Some(contents) = ioutil::consume_sentinel(&normalized)? {
                attached = true;
                if let Ok(identity) = serde_json::from_str::<SentinelIdentity>(&contents) {
                    record.id = identity.id;
                    record.name = identity.name;
                }
            }
        }

        let host = InstanceHost::assemble(&record, &self.deps)?;
        self.deps.store.update(|s| {
            s.instances.insert(record.id.clone(), record.clone());
            s.grant_full(&record.id, user);
        })?;
        self.hosts.lock().insert(record.id.clone(), host);

        info!(instance = %record.id, name = %record.name, attached, "instance registered");
        Ok(if attached { CreateOutcome::Attached(record) } else { CreateOutcome::Created(record) })
    }

    /// Soft-remove: drop the record but leave the directory with an
    /// attach sentinel so it can be adopted again.
    pub fn detach(&self, user: &str, id: &InstanceId) -> Result<(), ManagerError> {
        let record = self.get(id).ok_or(ManagerError::Gone)?;
        self.require_right(id, user, instance_manager::DELETE)?;
        if record.online {
            return Err(ManagerError::DetachOnline);
        }
        if let Some(job) = self.move_jobs.lock().remove(id) {
            self.deps.jobs.cancel_system(&job);
        }

        let identity = SentinelIdentity { id: record.id.clone(), name: record.name.clone() };
        let contents = serde_json::to_vec(&identity).unwrap_or_default();
        ioutil::write_sentinel(&record.path, &contents)?;

        self.hosts.lock().remove(id);
        self.deps.store.update(|s| s.remove_instance(id))?;
        info!(instance = %id, "instance detached");
        Ok(())
    }

    fn require_right(&self, id: &InstanceId, user: &str, right: u64) -> Result<(), ManagerError> {
        if self.permissions_for(id, user).allows(RightsType::InstanceManager, right) {
            Ok(())
        } else {
            Err(ManagerError::AccessDenied)
        }
    }

    /// Apply an explicit change-record. Returns the updated record and,
    /// for relocations, the scheduled move job.
    pub async fn update(
        &self,
        user: &str,
        id: &InstanceId,
        update: InstanceUpdate,
    ) -> Result<(Instance, Option<Job>), ManagerError> {
        let record = self.get(id).ok_or(ManagerError::Gone)?;
        if update.is_empty() {
            return Ok((record, None));
        }

        // Per-field rights
        if update.name.is_some() {
            self.require_right(id, user, instance_manager::RENAME)?;
        }
        if update.path.is_some() {
            self.require_right(id, user, instance_manager::RELOCATE)?;
        }
        if update.online.is_some() {
            self.require_right(id, user, instance_manager::SET_ONLINE)?;
        }
        if update.auto_start.is_some() || update.auto_update_minutes.is_some() {
            self.require_right(id, user, instance_manager::SET_AUTO_UPDATE)?;
        }
        if update.toolchain_version.is_some()
            || update.repository.is_some()
            || update.compiler.is_some()
            || update.server.is_some()
            || update.chat.is_some()
        {
            self.require_right(id, user, instance_manager::SET_CONFIG)?;
        }

        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(ManagerError::NameEmpty);
            }
            let taken = self
                .deps
                .store
                .with(|s| s.instance_by_name(name).map(|i| i.id.clone()));
            if taken.is_some_and(|other| other != *id) {
                return Err(ManagerError::DuplicateName);
            }
        }
        if let Some(server) = &update.server {
            server
                .validate()
                .map_err(ManagerError::InvalidParams)?;
        }

        // Relocation preconditions come before any field is applied
        let move_target = match &update.path {
            Some(path) => {
                let will_be_online = update.online.unwrap_or(record.online);
                if record.online || will_be_online {
                    return Err(ManagerError::RelocateOnline);
                }
                let normalized = self.normalized(path);
                self.validate_path(&normalized, Some(id))?;
                if !ioutil::is_empty_or_missing(&normalized)? {
                    return Err(ManagerError::ExistingPath);
                }
                Some(normalized)
            }
            None => None,
        };

        // Apply simple fields, remembering the old record for rollback
        let previous = record.clone();
        let updated = self.deps.store.update(|s| {
            let Some(stored) = s.instances.get_mut(id) else { return None };
            if let Some(name) = &update.name {
                if *name != stored.name {
                    stored.name = name.clone();
                }
            }
            if let Some(online) = update.online {
                stored.online = online;
            }
            if let Some(auto_start) = update.auto_start {
                stored.auto_start = auto_start;
            }
            if let Some(minutes) = update.auto_update_minutes {
                stored.auto_update_minutes = minutes;
            }
            if let Some(version) = &update.toolchain_version {
                stored.toolchain_version = Some(version.clone());
            }
            if let Some(repository) = &update.repository {
                stored.repository = repository.clone();
            }
            if let Some(compiler) = &update.compiler {
                stored.compiler = compiler.clone();
            }
            if let Some(server) = &update.server {
                stored.server = server.clone();
            }
            if let Some(chat) = &update.chat {
                stored.chat = chat.clone();
            }
            Some(stored.clone())
        })?;
        let mut updated = updated.ok_or(ManagerError::Gone)?;

        if let Some(server) = &update.server {
            if let Some(host) = self.host(id) {
                let _ = host.watchdog().update_params(server.clone()).await;
            }
        }
        if updated.name != previous.name {
            self.deps.events.publish(Event::InstanceRenamed {
                instance: id.clone(),
                name: updated.name.clone(),
            });
        }

        // Online transition last, with rollback of every field on failure
        if let Some(online) = update.online {
            if online != previous.online {
                let host = self.host(id).ok_or(ManagerError::Gone)?;
                if let Err(e) = host.set_online(online).await {
                    let restore = previous.clone();
                    self.deps.store.update(move |s| {
                        s.instances.insert(restore.id.clone(), restore);
                    })?;
                    return Err(e.into());
                }
            }
        }

        let move_job = match move_target {
            Some(target) => Some(self.schedule_move(user, id, target)?),
            None => None,
        };
        if move_job.is_some() {
            // The record's path changes when the move job lands
            updated = self.get(id).ok_or(ManagerError::Gone)?;
        }
        Ok((updated, move_job))
    }

    /// Register the relocation job, superseding any pending move.
    fn schedule_move(
        &self,
        user: &str,
        id: &InstanceId,
        target: PathBuf,
    ) -> Result<Job, ManagerError> {
        {
            let mut moves = self.move_jobs.lock();
            if let Some(previous) = moves.remove(id) {
                info!(instance = %id, job = %previous, "superseding pending move job");
                self.deps.jobs.cancel_system(&previous);
            }
        }

        let record = self.get(id).ok_or(ManagerError::Gone)?;
        let job = Job::new(
            Some(id.clone()),
            format!("Move instance to {}", target.display()),
            user,
            RightsType::InstanceManager,
            instance_manager::RELOCATE,
            &self.deps.clock,
        );

        let store = Arc::clone(&self.deps.store);
        let events = self.deps.events.clone();
        let deps = self.deps.clone();
        let hosts = Arc::clone(&self.hosts);
        let id_for_task = id.clone();
        let source = record.path.clone();

        let registered = self.deps.jobs.register(job.clone(), move |ctx| async move {
            ctx.progress.report(5);
            if ctx.cancel.is_cancelled() {
                return Err(warden_core::JobError {
                    code: ErrorCode::JobCancelled,
                    message: "move cancelled".into(),
                });
            }
            let copy = ioutil::copy_dir(&source, &target, &[]);
            if let Err(e) = copy {
                let _ = ioutil::remove_dir_if_exists(&target);
                return Err(warden_core::JobError {
                    code: ErrorCode::InternalError,
                    message: e.to_string(),
                });
            }
            ctx.progress.report(70);
            if ctx.cancel.is_cancelled() {
                // Roll back: the old tree stays authoritative
                let _ = ioutil::remove_dir_if_exists(&target);
                return Err(warden_core::JobError {
                    code: ErrorCode::JobCancelled,
                    message: "move cancelled".into(),
                });
            }

            let updated = store
                .update(|s| {
                    if let Some(stored) = s.instances.get_mut(&id_for_task) {
                        stored.path = target.clone();
                        return Some(stored.clone());
                    }
                    None
                })
                .map_err(|e| warden_core::JobError {
                    code: ErrorCode::InternalError,
                    message: e.to_string(),
                })?;
            ctx.progress.report(85);

            // Rebuild the host against the new path
            if let Some(updated) = updated {
                if let Ok(host) = InstanceHost::assemble(&updated, &deps) {
                    hosts.lock().insert(updated.id.clone(), host);
                }
            }
            let _ = ioutil::remove_dir_if_exists(&source);
            events.publish(Event::InstanceMoved { instance: id_for_task, path: target });
            ctx.progress.report(100);
            Ok(())
        })?;

        self.move_jobs.lock().insert(id.clone(), registered.id.clone());
        Ok(registered)
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
