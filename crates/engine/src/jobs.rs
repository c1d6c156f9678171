// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job manager: registration, progress, cooperative cancellation.
//!
//! Each job runs in its own spawned task. The framework never aborts
//! the task; cancellation sets the token and trusts the operation to
//! unwind. An operation that keeps running past the drain window is
//! abandoned: its job record is finalised as cancelled and the slot is
//! released, but the task itself is left to finish.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::{Clock, ErrorCode, InstanceId, Job, JobError, JobId, ProgressReporter};
use warden_storage::{Store, StoreError};

/// How long a cancelled operation may keep running before the job is
/// abandoned.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum JobManagerError {
    #[error("job not found")]
    Gone,

    #[error("insufficient rights to cancel this job")]
    AccessDenied,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobManagerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            JobManagerError::Gone => ErrorCode::JobGone,
            JobManagerError::AccessDenied => ErrorCode::AccessDenied,
            JobManagerError::Store(_) => ErrorCode::InternalError,
        }
    }
}

/// Handed to every job operation.
pub struct JobContext {
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

struct ActiveJob {
    cancel: CancellationToken,
    /// Fires when the job's terminal state has been written.
    done: CancellationToken,
    progress: watch::Receiver<u8>,
}

pub struct JobManager<C: Clock> {
    store: Arc<Store>,
    clock: C,
    active: Arc<Mutex<HashMap<JobId, Arc<ActiveJob>>>>,
    drain_timeout: Duration,
}

impl<C: Clock + 'static> JobManager<C> {
    pub fn new(store: Arc<Store>, clock: C) -> Self {
        Self {
            store,
            clock,
            active: Arc::new(Mutex::new(HashMap::new())),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Persist `job` and start `operation` in its own task. Returns the
    /// registered record immediately.
    pub fn register<F, Fut>(&self, job: Job, operation: F) -> Result<Job, JobManagerError>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let id = job.id.clone();
        self.store.update(|s| {
            s.jobs.insert(id.clone(), job.clone());
        })?;

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(0u8);
        self.active.lock().insert(
            id.clone(),
            Arc::new(ActiveJob {
                cancel: cancel.clone(),
                done: done.clone(),
                progress: progress_rx,
            }),
        );

        let reporter = ProgressReporter::new(move |value| {
            let _ = progress_tx.send(value);
        });
        let ctx = JobContext { progress: reporter.clone(), cancel: cancel.clone() };

        let store = Arc::clone(&self.store);
        let active = Arc::clone(&self.active);
        let clock = self.clock.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let result = operation(ctx).await;
            let now = clock.now_utc();
            let save = store.update(|s| {
                let Some(stored) = s.jobs.get_mut(&task_id) else { return };
                stored.report_progress(reporter.current());
                match &result {
                    Ok(()) => stored.finish_ok(now),
                    Err(e) if e.code == ErrorCode::JobCancelled => stored.finish_cancelled(now),
                    Err(e) => stored.finish_error(e.code, e.message.clone(), now),
                }
            });
            if let Err(e) = save {
                warn!(job = %task_id, error = %e, "failed to persist job completion");
            }
            active.lock().remove(&task_id);
            done.cancel();
            match result {
                Ok(()) => info!(job = %task_id, "job completed"),
                Err(e) => info!(job = %task_id, code = %e.code, "job finished with {}", e.message),
            }
        });

        Ok(job)
    }

    /// Request cancellation. A no-op on finished jobs (the terminal
    /// record is returned). Requires the caller to hold the job's
    /// cancel right on its instance, or to have started it.
    pub fn cancel(&self, id: &JobId, user: &str) -> Result<Job, JobManagerError> {
        let lookup = self.store.with(|s| {
            s.jobs.get(id).cloned().map(|job| {
                let rights = job
                    .instance
                    .as_ref()
                    .map(|instance| s.permissions_for(instance, user))
                    .unwrap_or_default();
                (job, rights)
            })
        });
        let (job, rights) = lookup.ok_or(JobManagerError::Gone)?;

        if job.is_finished() {
            return Ok(job);
        }
        if !job.may_cancel(user, &rights) {
            return Err(JobManagerError::AccessDenied);
        }

        self.store.update_unsaved(|s| {
            if let Some(stored) = s.jobs.get_mut(id) {
                stored.cancel_requested_by = Some(user.to_string());
            }
        });

        let handle = self.active.lock().get(id).cloned();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            self.spawn_abandon_monitor(id.clone(), handle);
        } else {
            // Running on record but not in this process: finalise directly
            let now = self.clock.now_utc();
            self.store.update(|s| {
                if let Some(stored) = s.jobs.get_mut(id) {
                    stored.finish_cancelled(now);
                }
            })?;
        }
        self.get(id).ok_or(JobManagerError::Gone)
    }

    /// Engine-internal cancellation that bypasses the rights check
    /// (e.g. superseding a pending move job). No-op on finished jobs.
    pub(crate) fn cancel_system(&self, id: &JobId) {
        let handle = self.active.lock().get(id).cloned();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            self.spawn_abandon_monitor(id.clone(), handle);
        }
    }

    /// Finalise the job as cancelled if the operation outlives the
    /// drain window. The task is never aborted.
    fn spawn_abandon_monitor(&self, id: JobId, handle: Arc<ActiveJob>) {
        let store = Arc::clone(&self.store);
        let active = Arc::clone(&self.active);
        let clock = self.clock.clone();
        let drain = self.drain_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.done.cancelled() => {}
                _ = tokio::time::sleep(drain) => {
                    warn!(job = %id, "operation ignored cancellation; abandoning job");
                    let now = clock.now_utc();
                    let _ = store.update(|s| {
                        if let Some(stored) = s.jobs.get_mut(&id) {
                            stored.finish_cancelled(now);
                        }
                    });
                    active.lock().remove(&id);
                }
            }
        });
    }

    /// The stored record with live progress merged in.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        let mut job = self.store.with(|s| s.jobs.get(id).cloned())?;
        if let Some(handle) = self.active.lock().get(id) {
            job.report_progress(*handle.progress.borrow());
        }
        Some(job)
    }

    /// Jobs, optionally filtered by instance, newest first.
    pub fn list(&self, instance: Option<&InstanceId>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.store.with(|s| {
            s.jobs
                .values()
                .filter(|j| instance.is_none() || j.instance.as_ref() == instance)
                .cloned()
                .collect()
        });
        let active = self.active.lock();
        for job in &mut jobs {
            if let Some(handle) = active.get(&job.id) {
                job.report_progress(*handle.progress.borrow());
            }
        }
        drop(active);
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// Live progress stream for a running job.
    pub fn subscribe_progress(&self, id: &JobId) -> Option<watch::Receiver<u8>> {
        self.active.lock().get(id).map(|handle| handle.progress.clone())
    }

    /// True while the job's operation still occupies a slot.
    pub fn is_active(&self, id: &JobId) -> bool {
        self.active.lock().contains_key(id)
    }

    /// Wait until the job writes its terminal state.
    pub async fn wait(&self, id: &JobId) {
        let handle = self.active.lock().get(id).cloned();
        if let Some(handle) = handle {
            handle.done.cancelled().await;
        }
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
