// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request dispatch: rights checks, job registration, error mapping.

use super::ListenCtx;
use crate::env::PROTOCOL_VERSION;
use crate::protocol::{RepoSummary, Request, Response};
use std::sync::Arc;
use warden_core::rights::{
    compiler, game_server, instance_manager, repository, toolchain, RightsType,
};
use warden_core::{Clock, ErrorCode, InstanceId, Job, JobError};
use warden_engine::InstanceHost;

/// Convert a domain failure into the single error response shape.
fn fail(code: ErrorCode, message: impl std::fmt::Display) -> Response {
    Response::error(code, message.to_string())
}

impl<C: Clock + 'static> ListenCtx<C> {
    fn require(
        &self,
        id: &InstanceId,
        user: &str,
        group: RightsType,
        bits: u64,
    ) -> Result<(), Response> {
        if self.manager.permissions_for(id, user).allows(group, bits) {
            Ok(())
        } else {
            Err(fail(ErrorCode::AccessDenied, "insufficient rights"))
        }
    }

    fn host(&self, id: &InstanceId) -> Result<Arc<InstanceHost<C>>, Response> {
        self.manager
            .host(id)
            .ok_or_else(|| fail(ErrorCode::InstanceMissing, "instance not found"))
    }

    fn new_job(
        &self,
        instance: &InstanceId,
        description: &str,
        user: &str,
        cancel_group: RightsType,
        cancel_bits: u64,
    ) -> Job {
        Job::new(
            Some(instance.clone()),
            description,
            user,
            cancel_group,
            cancel_bits,
            &self.clock,
        )
    }
}

/// Handle one request. Long-running operations come back immediately
/// as the registered job.
pub async fn dispatch<C: Clock + 'static>(ctx: &Arc<ListenCtx<C>>, request: Request) -> Response {
    match request {
        Request::Hello { .. } => Response::Hello { version: PROTOCOL_VERSION.to_string() },

        // ----- instances ---------------------------------------------------
        Request::InstanceCreate { user, name, path } => {
            match ctx.manager.create_or_attach(&user, &name, &path) {
                Ok(outcome) => {
                    let attached =
                        matches!(outcome, warden_engine::CreateOutcome::Attached(_));
                    Response::InstanceCreated {
                        instance: Box::new(outcome.record().clone()),
                        attached,
                    }
                }
                Err(e) => fail(e.code(), e),
            }
        }
        Request::InstanceList { user } => {
            let instances = ctx
                .manager
                .list()
                .into_iter()
                .filter(|i| {
                    ctx.manager
                        .permissions_for(&i.id, &user)
                        .allows(RightsType::InstanceManager, instance_manager::READ)
                })
                .collect();
            Response::Instances { instances }
        }
        Request::InstanceGet { user, id } => {
            let Some(instance) = ctx.manager.get(&id) else {
                return fail(ErrorCode::InstanceMissing, "instance not found");
            };
            if let Err(denied) = ctx.require(&id, &user, RightsType::InstanceManager, instance_manager::READ)
            {
                return denied;
            }
            Response::instance(instance)
        }
        Request::InstanceUpdate { user, id, update } => {
            match ctx.manager.update(&user, &id, update).await {
                Ok((_, Some(move_job))) => Response::job(move_job),
                Ok((instance, None)) => Response::instance(instance),
                Err(e) => fail(e.code(), e),
            }
        }
        Request::InstanceDetach { user, id } => match ctx.manager.detach(&user, &id) {
            Ok(()) => Response::Ok,
            Err(e) => fail(e.code(), e),
        },

        // ----- jobs --------------------------------------------------------
        Request::JobList { user: _, instance } => {
            Response::Jobs { jobs: ctx.jobs.list(instance.as_ref()) }
        }
        Request::JobGet { user: _, id } => match ctx.jobs.get(&id) {
            Some(job) => Response::job(job),
            None => fail(ErrorCode::JobGone, "job not found"),
        },
        Request::JobCancel { user, id } => match ctx.jobs.cancel(&id, &user) {
            Ok(job) => Response::job(job),
            Err(e) => fail(e.code(), e),
        },

        // ----- repository --------------------------------------------------
        Request::RepoClone { user, id, origin, reference } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::Repository, repository::CLONE) {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let Some(record) = host.record() else {
                return fail(ErrorCode::InstanceMissing, "instance not found");
            };
            let job = ctx.new_job(
                &id,
                &format!("Clone {origin}"),
                &user,
                RightsType::Repository,
                repository::CANCEL_PENDING,
            );
            let store = Arc::clone(&ctx.store);
            let settings = record.repository.clone();
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                warden_repo::Repository::clone_from(
                    host.repository(),
                    &origin,
                    reference.as_deref(),
                    &settings,
                    &jctx.progress,
                    &jctx.cancel,
                )
                    .await
                    .map_err(|e| JobError { code: e.code(), message: e.to_string() })?;
                store
                    .update(|s| {
                        if let Some(i) = s.instances.get_mut(host.id()) {
                            i.repository.origin = Some(origin.clone());
                        }
                    })
                    .map_err(|e| JobError {
                        code: ErrorCode::InternalError,
                        message: e.to_string(),
                    })?;
                Ok(())
            })
        }
        Request::RepoFetch { user, id } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::Repository, repository::FETCH) {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let Some(record) = host.record() else {
                return fail(ErrorCode::InstanceMissing, "instance not found");
            };
            let job = ctx.new_job(
                &id,
                "Fetch origin",
                &user,
                RightsType::Repository,
                repository::CANCEL_PENDING,
            );
            let settings = record.repository.clone();
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                host.repository()
                    .fetch_origin(&settings, &jctx.progress, &jctx.cancel)
                    .await
                    .map_err(|e| JobError { code: e.code(), message: e.to_string() })
            })
        }
        Request::RepoCheckout { user, id, committish } => {
            if let Err(denied) =
                ctx.require(&id, &user, RightsType::Repository, repository::CHECKOUT)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let job = ctx.new_job(
                &id,
                &format!("Checkout {committish}"),
                &user,
                RightsType::Repository,
                repository::CANCEL_PENDING,
            );
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                host.checkout(&committish, &jctx.progress, &jctx.cancel)
                    .await
                    .map_err(|e| e.to_job_error())
            })
        }
        Request::RepoResetOrigin { user, id } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::Repository, repository::RESET)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let job = ctx.new_job(
                &id,
                "Reset to origin",
                &user,
                RightsType::Repository,
                repository::CANCEL_PENDING,
            );
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                host.reset_to_origin(&jctx.progress, &jctx.cancel)
                    .await
                    .map_err(|e| e.to_job_error())
            })
        }
        Request::RepoResetSha { user, id, sha } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::Repository, repository::RESET)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let job = ctx.new_job(
                &id,
                &format!("Reset to {sha}"),
                &user,
                RightsType::Repository,
                repository::CANCEL_PENDING,
            );
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                host.repository()
                    .reset_to_sha(&sha, &jctx.progress, &jctx.cancel)
                    .await
                    .map_err(|e| JobError { code: e.code(), message: e.to_string() })
            })
        }
        Request::RepoSynchronize { user, id } => {
            if let Err(denied) =
                ctx.require(&id, &user, RightsType::Repository, repository::SYNCHRONIZE)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let Some(record) = host.record() else {
                return fail(ErrorCode::InstanceMissing, "instance not found");
            };
            let job = ctx.new_job(
                &id,
                "Synchronize with origin",
                &user,
                RightsType::Repository,
                repository::CANCEL_PENDING,
            );
            let settings = record.repository.clone();
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                let hook: warden_repo::PreSyncHook = Arc::new(|| true);
                host.repository()
                    .synchronize(&settings, false, &hook, &jctx.progress, &jctx.cancel)
                    .await
                    .map(|_| ())
                    .map_err(|e| JobError { code: e.code(), message: e.to_string() })
            })
        }
        Request::RepoTestMerge { user, id, number, target_sha, comment } => {
            if let Err(denied) =
                ctx.require(&id, &user, RightsType::Repository, repository::MERGE_PULL_REQUEST)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let job = ctx.new_job(
                &id,
                &format!("Test merge #{number}"),
                &user,
                RightsType::Repository,
                repository::CANCEL_PENDING,
            );
            let merged_by = user.clone();
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                host.test_merge(
                    number,
                    target_sha.as_deref(),
                    &merged_by,
                    comment,
                    &jctx.progress,
                    &jctx.cancel,
                )
                .await
                .map_err(|e| e.to_job_error())?;
                Ok(())
            })
        }
        Request::RepoStatus { user, id } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::Repository, repository::READ)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let repo = host.repository();
            let summary = if repo.exists() {
                RepoSummary {
                    origin: repo.origin_url().await.ok(),
                    head_sha: repo.head_sha().await.ok(),
                    reference: repo.reference_name().await.ok(),
                    tracking_branch: repo.tracking_branch().await.unwrap_or(false),
                    pending_test_merges: host.pending_test_merges(),
                }
            } else {
                RepoSummary {
                    origin: None,
                    head_sha: None,
                    reference: None,
                    tracking_branch: false,
                    pending_test_merges: Vec::new(),
                }
            };
            Response::Repo { repo: Box::new(summary) }
        }

        // ----- toolchain ---------------------------------------------------
        Request::ToolchainInstall { user, id, version } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::Toolchain, toolchain::INSTALL)
            {
                return denied;
            }
            if ctx.host(&id).is_err() {
                return fail(ErrorCode::InstanceMissing, "instance not found");
            }
            let job = ctx.new_job(
                &id,
                &format!("Install toolchain {version}"),
                &user,
                RightsType::Toolchain,
                toolchain::CANCEL_INSTALL,
            );
            let manager = Arc::clone(&ctx.toolchain);
            let store = Arc::clone(&ctx.store);
            let instance = id.clone();
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                manager
                    .install(&version, &jctx.progress, &jctx.cancel)
                    .await
                    .map_err(|e| JobError { code: e.code(), message: e.to_string() })?;
                store
                    .update(|s| {
                        if let Some(i) = s.instances.get_mut(&instance) {
                            i.toolchain_version = Some(version.clone());
                        }
                    })
                    .map_err(|e| JobError {
                        code: ErrorCode::InternalError,
                        message: e.to_string(),
                    })?;
                Ok(())
            })
        }

        // ----- deployments -------------------------------------------------
        Request::Deploy { user, id } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::Compiler, compiler::COMPILE) {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let job = ctx.new_job(
                &id,
                "Compile and deploy",
                &user,
                RightsType::Compiler,
                compiler::CANCEL_COMPILE,
            );
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                host.deploy(&jctx.progress, &jctx.cancel)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_job_error())
            })
        }

        // ----- game server -------------------------------------------------
        Request::ServerLaunch { user, id } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::GameServer, game_server::START)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let job = ctx.new_job(
                &id,
                "Launch server",
                &user,
                RightsType::GameServer,
                game_server::STOP,
            );
            let watchdog = host.watchdog().clone();
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                watchdog
                    .start_cancellable(jctx.cancel.clone())
                    .await
                    .map_err(|e| JobError { code: e.code(), message: e.to_string() })
            })
        }
        Request::ServerStop { user, id, graceful } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::GameServer, game_server::STOP)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            match host.watchdog().stop(graceful).await {
                Ok(()) => Response::Ok,
                Err(e) => fail(e.code(), e),
            }
        }
        Request::ServerRestart { user, id } => {
            if let Err(denied) =
                ctx.require(&id, &user, RightsType::GameServer, game_server::RESTART)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            let job = ctx.new_job(
                &id,
                "Restart server",
                &user,
                RightsType::GameServer,
                game_server::STOP,
            );
            let watchdog = host.watchdog().clone();
            register(ctx, job, move |jctx: warden_engine::JobContext| async move {
                watchdog
                    .restart_cancellable(jctx.cancel.clone())
                    .await
                    .map_err(|e| JobError { code: e.code(), message: e.to_string() })
            })
        }
        Request::ServerSoftRestart { user, id } => {
            if let Err(denied) =
                ctx.require(&id, &user, RightsType::GameServer, game_server::SOFT_RESTART)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            match host.watchdog().soft_restart().await {
                Ok(()) => Response::Ok,
                Err(e) => fail(e.code(), e),
            }
        }
        Request::ServerSoftShutdown { user, id } => {
            if let Err(denied) =
                ctx.require(&id, &user, RightsType::GameServer, game_server::SOFT_SHUTDOWN)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            match host.watchdog().soft_shutdown().await {
                Ok(()) => Response::Ok,
                Err(e) => fail(e.code(), e),
            }
        }
        Request::ServerStatus { user, id } => {
            if let Err(denied) = ctx.require(&id, &user, RightsType::GameServer, game_server::READ)
            {
                return denied;
            }
            let host = match ctx.host(&id) {
                Ok(host) => host,
                Err(e) => return e,
            };
            Response::Server { status: Box::new(host.watchdog().status()) }
        }
    }
}

/// Register a job operation, turning registration failures into error
/// responses and success into the accepted-job response.
fn register<C, F, Fut>(ctx: &Arc<ListenCtx<C>>, job: Job, operation: F) -> Response
where
    C: Clock + 'static,
    F: FnOnce(warden_engine::JobContext) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
{
    match ctx.jobs.register(job, operation) {
        Ok(job) => Response::job(job),
        Err(e) => fail(e.code(), e),
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
