// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::{Request, Response};
use std::path::Path;
use tempfile::TempDir;
use warden_core::{FakeClock, Instance, InstanceUpdate};
use warden_engine::{
    BridgeRegistrar, DirectoryInstaller, EngineDeps, EventBus, FakeCompiler, FakeTopicClient,
    InstanceManager, JobManager, ToolchainManager, WatchdogState,
};
use warden_host::FakeProcessExecutor;
use warden_storage::Store;

const TEST_TOOLCHAIN: &str = "514.1589";

struct Fix {
    tmp: TempDir,
    ctx: Arc<ListenCtx<FakeClock>>,
    executor: FakeProcessExecutor,
}

async fn fixture() -> Fix {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::load(tmp.path().join("state.json")).unwrap());

    let bin = tmp.path().join("mirror").join(TEST_TOOLCHAIN).join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::write(bin.join("dreamdaemon"), b"#!bin").unwrap();
    std::fs::write(bin.join("dreammaker"), b"#!bin").unwrap();
    let toolchain = Arc::new(ToolchainManager::new(
        tmp.path().join("cache"),
        Arc::new(DirectoryInstaller::new(tmp.path().join("mirror"))),
    ));
    toolchain
        .install(
            TEST_TOOLCHAIN,
            &warden_core::ProgressReporter::discard(),
            &tokio_util::sync::CancellationToken::new(),
        )
        .await
        .unwrap();

    let install_dir = tmp.path().join("controller");
    std::fs::create_dir_all(&install_dir).unwrap();

    let clock = FakeClock::new();
    let executor = FakeProcessExecutor::new();
    let jobs = Arc::new(
        JobManager::new(Arc::clone(&store), clock.clone())
            .with_drain_timeout(std::time::Duration::from_millis(100)),
    );
    let deps = EngineDeps {
        store: Arc::clone(&store),
        jobs: Arc::clone(&jobs),
        executor: Arc::new(executor.clone()),
        registrar: Arc::new(BridgeRegistrar::new()),
        topic: Arc::new(FakeTopicClient::new()),
        toolchain: Arc::clone(&toolchain),
        compiler: FakeCompiler::new(),
        events: EventBus::new(),
        clock: clock.clone(),
        bridge_port: 5580,
        install_dir,
        instance_limit: 10,
        valid_instance_paths: None,
    };
    let manager = InstanceManager::new(deps);
    let ctx = Arc::new(ListenCtx { manager, jobs, toolchain, store, clock });
    Fix { tmp, ctx, executor }
}

fn git(dir: &Path, args: &[&str]) {
    let out = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "t")
        .env("GIT_AUTHOR_EMAIL", "t@localhost")
        .env("GIT_COMMITTER_NAME", "t")
        .env("GIT_COMMITTER_EMAIL", "t@localhost")
        .output()
        .unwrap();
    assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
}

fn seed_repo(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    std::fs::write(dir.join("station.dme"), b"// project\n").unwrap();
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-m", "initial"]);
}

async fn create_instance(fix: &Fix, name: &str) -> Instance {
    let response = dispatch(
        &fix.ctx,
        Request::InstanceCreate {
            user: "alice".into(),
            name: name.into(),
            path: fix.tmp.path().join("instances").join(name),
        },
    )
    .await;
    match response {
        Response::InstanceCreated { instance, attached: false } => *instance,
        other => panic!("unexpected response: {other:?}"),
    }
}

fn error_parts(response: &Response) -> (warden_core::ErrorCode, u16, u16) {
    match response {
        Response::Error { code, value, status, .. } => (*code, *value, *status),
        other => panic!("expected an error, got {other:?}"),
    }
}

#[tokio::test]
async fn hello_reports_the_protocol_version() {
    let fix = fixture().await;
    let response = dispatch(&fix.ctx, Request::Hello { version: "x".into() }).await;
    assert!(matches!(response, Response::Hello { .. }));
}

#[tokio::test]
async fn instance_listing_respects_read_rights() {
    let fix = fixture().await;
    create_instance(&fix, "alpha").await;

    let mine = dispatch(&fix.ctx, Request::InstanceList { user: "alice".into() }).await;
    match mine {
        Response::Instances { instances } => assert_eq!(instances.len(), 1),
        other => panic!("unexpected {other:?}"),
    }

    let theirs = dispatch(&fix.ctx, Request::InstanceList { user: "mallory".into() }).await;
    match theirs {
        Response::Instances { instances } => assert!(instances.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn move_while_online_is_a_conflict_and_changes_nothing() {
    let fix = fixture().await;
    let record = create_instance(&fix, "alpha").await;

    let update = InstanceUpdate { online: Some(true), ..InstanceUpdate::default() };
    let response = dispatch(
        &fix.ctx,
        Request::InstanceUpdate { user: "alice".into(), id: record.id.clone(), update },
    )
    .await;
    assert!(matches!(response, Response::Instance { .. }));

    let update = InstanceUpdate {
        path: Some(fix.tmp.path().join("instances/beta")),
        ..InstanceUpdate::default()
    };
    let response = dispatch(
        &fix.ctx,
        Request::InstanceUpdate { user: "alice".into(), id: record.id.clone(), update },
    )
    .await;
    let (code, _, status) = error_parts(&response);
    assert_eq!(code, warden_core::ErrorCode::InstanceRelocateOnline);
    assert_eq!(status, 409);

    // Still at the old path, still online
    let after = dispatch(
        &fix.ctx,
        Request::InstanceGet { user: "alice".into(), id: record.id.clone() },
    )
    .await;
    match after {
        Response::Instance { instance } => {
            assert_eq!(instance.path, record.path);
            assert!(instance.online);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn attach_requires_the_sentinel() {
    let fix = fixture().await;
    let record = create_instance(&fix, "alpha").await;

    let response = dispatch(
        &fix.ctx,
        Request::InstanceDetach { user: "alice".into(), id: record.id.clone() },
    )
    .await;
    assert!(matches!(response, Response::Ok));
    assert!(record.path.join(warden_core::ATTACH_SENTINEL).is_file());

    // An operator deletes the marker by hand
    std::fs::remove_file(record.path.join(warden_core::ATTACH_SENTINEL)).unwrap();

    let response = dispatch(
        &fix.ctx,
        Request::InstanceCreate {
            user: "alice".into(),
            name: "alpha".into(),
            path: record.path.clone(),
        },
    )
    .await;
    let (code, value, status) = error_parts(&response);
    assert_eq!(code, warden_core::ErrorCode::InstanceAtExistingPath);
    assert_eq!(value, 11);
    assert_eq!(status, 409);
}

#[tokio::test]
async fn cancelled_launch_job_leaves_no_server() {
    let fix = fixture().await;
    let record = create_instance(&fix, "alpha").await;

    // A deployable instance: repository, toolchain version, fast params
    seed_repo(&record.path.join("Repository"));
    fix.ctx
        .store
        .update(|s| {
            if let Some(i) = s.instances.get_mut(&record.id) {
                i.toolchain_version = Some(TEST_TOOLCHAIN.into());
                i.compiler.project_name = Some("station".into());
                i.server.primary_port = 42410;
                i.server.secondary_port = 42411;
                // Long startup so the cancel lands first
                i.server.startup_timeout_secs = 30;
                i.server.heartbeat_secs = 0;
            }
        })
        .unwrap();
    let host = fix.ctx.manager.host(&record.id).unwrap();
    let server = fix.ctx.store.with(|s| s.instances[&record.id].server.clone());
    host.watchdog().update_params(server).await.unwrap();

    let deploy = dispatch(&fix.ctx, Request::Deploy { user: "alice".into(), id: record.id.clone() })
        .await;
    let deploy_job = match deploy {
        Response::Job { job } => job,
        other => panic!("unexpected {other:?}"),
    };
    fix.ctx.jobs.wait(&deploy_job.id).await;
    assert!(fix.ctx.jobs.get(&deploy_job.id).unwrap().error.is_none());

    // No handshaker is running: startup blocks on the bridge handshake
    // until the cancel lands.
    let launch = dispatch(
        &fix.ctx,
        Request::ServerLaunch { user: "alice".into(), id: record.id.clone() },
    )
    .await;
    let launch_job = match launch {
        Response::Job { job } => job,
        other => panic!("unexpected {other:?}"),
    };

    let cancel = dispatch(
        &fix.ctx,
        Request::JobCancel { user: "alice".into(), id: launch_job.id.clone() },
    )
    .await;
    assert!(matches!(cancel, Response::Job { .. }));

    fix.ctx.jobs.wait(&launch_job.id).await;
    let finished = fix.ctx.jobs.get(&launch_job.id).unwrap();
    assert!(finished.cancelled);

    // The watchdog wound down and no process remains
    let status = dispatch(
        &fix.ctx,
        Request::ServerStatus { user: "alice".into(), id: record.id.clone() },
    )
    .await;
    match status {
        Response::Server { status } => assert_eq!(status.state, WatchdogState::Offline),
        other => panic!("unexpected {other:?}"),
    }
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !fix.executor.running_pids().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn job_cancel_requires_rights() {
    let fix = fixture().await;
    let record = create_instance(&fix, "alpha").await;

    // A job that stays running until cancelled
    let job = warden_core::Job::new(
        Some(record.id.clone()),
        "long repository operation",
        "alice",
        warden_core::rights::RightsType::Repository,
        warden_core::rights::repository::CANCEL_PENDING,
        &fix.ctx.clock,
    );
    let id = job.id.clone();
    fix.ctx
        .jobs
        .register(job, |jctx| async move {
            jctx.cancel.cancelled().await;
            Err(warden_core::JobError {
                code: warden_core::ErrorCode::JobCancelled,
                message: "cancelled".into(),
            })
        })
        .unwrap();

    let denied =
        dispatch(&fix.ctx, Request::JobCancel { user: "mallory".into(), id: id.clone() }).await;
    let (code, _, status) = error_parts(&denied);
    assert_eq!(code, warden_core::ErrorCode::AccessDenied);
    assert_eq!(status, 403);

    // The user who started the job may always cancel it
    let cancelled =
        dispatch(&fix.ctx, Request::JobCancel { user: "alice".into(), id: id.clone() }).await;
    assert!(matches!(cancelled, Response::Job { .. }));
    fix.ctx.jobs.wait(&id).await;
    assert!(fix.ctx.jobs.get(&id).unwrap().cancelled);
}

#[tokio::test]
async fn repo_status_on_empty_repository() {
    let fix = fixture().await;
    let record = create_instance(&fix, "alpha").await;

    let response =
        dispatch(&fix.ctx, Request::RepoStatus { user: "alice".into(), id: record.id }).await;
    match response {
        Response::Repo { repo } => {
            assert!(repo.origin.is_none());
            assert!(repo.head_sha.is_none());
            assert!(!repo.tracking_branch);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn toolchain_install_sets_the_instance_version() {
    let fix = fixture().await;
    let record = create_instance(&fix, "alpha").await;

    let response = dispatch(
        &fix.ctx,
        Request::ToolchainInstall {
            user: "alice".into(),
            id: record.id.clone(),
            version: TEST_TOOLCHAIN.into(),
        },
    )
    .await;
    let job = match response {
        Response::Job { job } => job,
        other => panic!("unexpected {other:?}"),
    };
    fix.ctx.jobs.wait(&job.id).await;
    assert!(fix.ctx.jobs.get(&job.id).unwrap().error.is_none());

    let after = fix.ctx.store.with(|s| s.instances[&record.id].toolchain_version.clone());
    assert_eq!(after.as_deref(), Some(TEST_TOOLCHAIN));
}

#[tokio::test]
async fn unknown_job_is_gone() {
    let fix = fixture().await;
    let response = dispatch(
        &fix.ctx,
        Request::JobGet { user: "alice".into(), id: warden_core::JobId::from_string("job-x") },
    )
    .await;
    let (code, _, status) = error_parts(&response);
    assert_eq!(code, warden_core::ErrorCode::JobGone);
    assert_eq!(status, 410);
}
