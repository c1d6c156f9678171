// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance composite: the components serving one deployment unit.
//!
//! Owns the repository engine, deployment store, watchdog, and chat
//! bridge for a single instance, and wires the chat fan-out to the
//! event bus. The record itself lives in the store; the host is rebuilt
//! from it on attach, relocation, and controller startup.

use crate::chat::ChatBridge;
use crate::compile::{CompileError, Compiler};
use crate::deployments::{DeployError, DeploymentStore};
use crate::events::EventBus;
use crate::manager::EngineDeps;
use crate::session::SessionDeps;
use crate::watchdog::{Watchdog, WatchdogDeps, WatchdogError, WatchdogState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use warden_core::{
    Clock, Deployment, ErrorCode, Event, Instance, InstanceId, JobError, ProgressReporter,
    RevisionInfo, TestMerge,
};
use warden_host::ioutil::{copy_dir, IoError};
use warden_repo::{PreSyncHook, RepoError, Repository};
use warden_storage::Store;

/// Directory names inside every instance tree. The toolchain directory
/// keeps its vendor name for compatibility with existing deployments.
pub const REPOSITORY_DIR: &str = "Repository";
pub const TOOLCHAIN_DIR: &str = "Byond";
pub const GAME_DIR: &str = "Game";
pub const CONFIGURATION_DIR: &str = "Configuration";

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance not found")]
    Gone,

    #[error("no toolchain version configured")]
    NoToolchainVersion,

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Watchdog(#[from] WatchdogError),

    #[error(transparent)]
    Io(#[from] IoError),
}

impl InstanceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            InstanceError::Gone => ErrorCode::InstanceMissing,
            InstanceError::NoToolchainVersion => ErrorCode::ToolchainVersionMissing,
            InstanceError::Repo(e) => e.code(),
            InstanceError::Deploy(e) => e.code(),
            InstanceError::Compile(e) => e.code(),
            InstanceError::Watchdog(e) => e.code(),
            InstanceError::Io(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_job_error(&self) -> JobError {
        JobError { code: self.code(), message: self.to_string() }
    }
}

pub struct InstanceHost<C: Clock> {
    id: InstanceId,
    store: Arc<Store>,
    clock: C,
    repository: Arc<Repository>,
    deployments: Arc<DeploymentStore>,
    watchdog: Watchdog,
    chat: Arc<ChatBridge>,
    compiler: Arc<dyn Compiler>,
    events: EventBus,
    pending_test_merges: Mutex<Vec<TestMerge>>,
    chat_task: tokio::task::JoinHandle<()>,
}

impl<C: Clock + 'static> InstanceHost<C> {
    /// Build the component tree for an instance record and create its
    /// directory layout.
    pub fn assemble(record: &Instance, deps: &EngineDeps<C>) -> Result<Arc<Self>, IoError> {
        for dir in [REPOSITORY_DIR, TOOLCHAIN_DIR, GAME_DIR, CONFIGURATION_DIR] {
            let path = record.path.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| IoError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        }

        let repository = Arc::new(Repository::new(
            record.id.clone(),
            record.path.join(REPOSITORY_DIR),
            deps.events.sink(),
        ));
        let deployments = Arc::new(DeploymentStore::new(
            record.id.clone(),
            record.path.join(GAME_DIR),
            Arc::clone(&deps.store),
        ));
        let watchdog = Watchdog::spawn(
            record.id.clone(),
            record.server.clone(),
            WatchdogDeps {
                session: SessionDeps {
                    executor: Arc::clone(&deps.executor),
                    registrar: Arc::clone(&deps.registrar),
                    topic: Arc::clone(&deps.topic),
                    toolchain: Arc::clone(&deps.toolchain),
                    bridge_port: deps.bridge_port,
                },
                deployments: Arc::clone(&deployments),
                store: Arc::clone(&deps.store),
                events: deps.events.clone(),
            },
        );
        let chat = Arc::new(ChatBridge::new());
        let chat_task = chat.spawn_fanout(&deps.events, record.id.clone());

        Ok(Arc::new(Self {
            id: record.id.clone(),
            store: Arc::clone(&deps.store),
            clock: deps.clock.clone(),
            repository,
            deployments,
            watchdog,
            chat,
            compiler: Arc::clone(&deps.compiler),
            events: deps.events.clone(),
            pending_test_merges: Mutex::new(Vec::new()),
            chat_task,
        }))
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn record(&self) -> Option<Instance> {
        self.store.with(|s| s.instances.get(&self.id).cloned())
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn deployments(&self) -> &Arc<DeploymentStore> {
        &self.deployments
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn chat(&self) -> &Arc<ChatBridge> {
        &self.chat
    }

    pub fn pending_test_merges(&self) -> Vec<TestMerge> {
        self.pending_test_merges.lock().clone()
    }

    /// Online/offline service transition. Autostart is not consulted
    /// again mid-transition; the watchdog starts here or not at all.
    pub async fn set_online(&self, online: bool) -> Result<(), InstanceError> {
        if online {
            let record = self.record().ok_or(InstanceError::Gone)?;
            if record.auto_start {
                self.watchdog.start().await?;
            }
        } else {
            self.watchdog.stop(true).await?;
        }
        Ok(())
    }

    /// Compile the current working tree into a new deployment. When the
    /// watchdog is online the staged deployment swaps in immediately.
    pub async fn deploy(
        &self,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Deployment, InstanceError> {
        self.events.publish(Event::DeploymentStarted { instance: self.id.clone() });
        let result = self.deploy_inner(reporter, token).await;
        match &result {
            Ok(deployment) => self.events.publish(Event::DeploymentComplete {
                instance: self.id.clone(),
                deployment: deployment.id.clone(),
            }),
            Err(e) => self.events.publish(Event::DeploymentFailed {
                instance: self.id.clone(),
                message: e.to_string(),
            }),
        }
        result
    }

    async fn deploy_inner(
        &self,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Deployment, InstanceError> {
        let record = self.record().ok_or(InstanceError::Gone)?;
        let version =
            record.toolchain_version.clone().ok_or(InstanceError::NoToolchainVersion)?;

        let sha = self.repository.head_sha().await?;
        let origin_sha =
            self.repository.origin_head_sha().await?.unwrap_or_else(|| sha.clone());
        let revision = RevisionInfo {
            sha,
            origin_sha,
            test_merges: self.pending_test_merges.lock().clone(),
        };
        reporter.report(10);

        let mut pending = self.deployments.begin(
            revision,
            version.clone(),
            record.compiler.validation_security_level,
            String::new(),
            &self.clock,
        )?;

        let staged = async {
            copy_dir(self.repository.path(), pending.primary_dir(), &[".git"])?;
            if token.is_cancelled() {
                return Err(InstanceError::Compile(CompileError::Cancelled));
            }
            reporter.report(40);

            let timeout = Duration::from_secs(record.compiler.timeout_secs);
            let artifact = self
                .compiler
                .compile(
                    &version,
                    pending.primary_dir(),
                    record.compiler.project_name.as_deref(),
                    timeout,
                    token,
                )
                .await?;
            reporter.report(70);

            copy_dir(pending.primary_dir(), pending.secondary_dir(), &[])?;
            reporter.report(90);
            Ok(artifact)
        }
        .await;

        match staged {
            Ok(artifact) => {
                pending.set_artifact_name(artifact);
                let deployment = pending.commit()?;
                self.chat.load_custom_commands(&deployment.primary_dir);
                self.deployments.cleanup_unclaimed();
                if self.watchdog.status().state == WatchdogState::Online {
                    self.watchdog.restart_cancellable(token.clone()).await?;
                }
                reporter.report(100);
                info!(instance = %self.id, deployment = %deployment.id, "deployed");
                Ok(deployment)
            }
            Err(e) => {
                pending.abort();
                Err(e)
            }
        }
    }

    /// Merge a pull request onto the working tree and remember it for
    /// the next deployment's revision info.
    pub async fn test_merge(
        &self,
        number: u64,
        target_sha: Option<&str>,
        merged_by: &str,
        comment: Option<String>,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Option<bool>, InstanceError> {
        let record = self.record().ok_or(InstanceError::Gone)?;
        let outcome = self
            .repository
            .merge_test_revision(number, target_sha, &record.repository, reporter, token)
            .await?;

        let Some(outcome) = outcome else { return Ok(None) };
        self.pending_test_merges.lock().push(TestMerge {
            number,
            target_sha: outcome.revision.clone(),
            merged_by: merged_by.to_string(),
            merged_at: self.clock.now_utc(),
            comment,
        });
        if record.repository.push_test_merge_commits {
            let hook: PreSyncHook = Arc::new(|| true);
            let _ = self
                .repository
                .synchronize(&record.repository, true, &hook, reporter, token)
                .await;
        }
        Ok(Some(outcome.fast_forward))
    }

    /// Discard the working tree back to origin, dropping any pending
    /// test merges.
    pub async fn reset_to_origin(
        &self,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), InstanceError> {
        self.repository.reset_to_origin(reporter, token).await?;
        self.pending_test_merges.lock().clear();
        Ok(())
    }

    pub async fn checkout(
        &self,
        committish: &str,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), InstanceError> {
        self.repository.checkout(committish, reporter, token).await?;
        self.pending_test_merges.lock().clear();
        Ok(())
    }

    /// Fetch, merge origin (reset on conflict), and deploy.
    pub async fn auto_update(
        &self,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), InstanceError> {
        let record = self.record().ok_or(InstanceError::Gone)?;

        let fetch_progress = reporter.stage(0, 30);
        self.repository.fetch_origin(&record.repository, &fetch_progress, token).await?;

        let merge_progress = reporter.stage(30, 50);
        let merged =
            self.repository.merge_origin(&record.repository, &merge_progress, token).await?;
        if merged.is_none() {
            // Conflicting local state loses to origin on auto-update
            self.repository.reset_to_origin(&merge_progress, token).await?;
            self.pending_test_merges.lock().clear();
        }

        let deploy_progress = reporter.stage(50, 100);
        self.deploy(&deploy_progress, token).await?;
        Ok(())
    }
}

impl<C: Clock> Drop for InstanceHost<C> {
    fn drop(&mut self) {
        self.chat_task.abort();
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
