// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: lock, recover, wire, listen.

use super::{DaemonState, LifecycleError};
use crate::config::Config;
use crate::env;
use crate::listener::ListenCtx;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UnixListener;
use tracing::{info, warn};
use warden_core::rights::{repository, RightsType};
use warden_core::{InstanceId, Job, SystemClock};
use warden_engine::{
    BridgeRegistrar, DirectoryInstaller, EngineDeps, EventBus, InstanceManager, JobManager,
    TcpTopicClient, ToolchainCompiler, ToolchainManager,
};
use warden_storage::Store;

/// How often the auto-update scheduler scans for due instances.
const AUTO_UPDATE_TICK: Duration = Duration::from_secs(60);

/// Result of daemon startup: the daemon state plus the socket to serve.
pub struct StartupResult {
    pub daemon: DaemonState,
    pub listener: UnixListener,
}

/// Bring the controller up. Reattach runs afterwards, in the
/// background, so the daemon is responsive immediately.
pub async fn startup(config: Config) -> Result<StartupResult, LifecycleError> {
    let state_dir = env::state_dir().ok_or(LifecycleError::NoStateDir)?;
    std::fs::create_dir_all(&state_dir)?;

    // One controller per state directory
    let lock_path = state_dir.join("daemon.pid");
    let mut lock_file = File::create(&lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| LifecycleError::AlreadyRunning(lock_path.clone()))?;
    let _ = writeln!(lock_file, "{}", std::process::id());

    let snapshot_path = config
        .database
        .path
        .clone()
        .unwrap_or_else(|| state_dir.join("state.json"));
    let store = Arc::new(Store::load(snapshot_path)?);

    // Jobs that were running when the previous controller died cannot
    // be resumed by anyone.
    let finalized = store.update_unsaved(|s| s.finalize_stale_jobs(&SystemClock));
    if finalized > 0 {
        warn!(count = finalized, "finalized jobs orphaned by the previous run");
        store.save()?;
    }

    let mirror = config
        .general
        .toolchain_mirror
        .clone()
        .unwrap_or_else(|| state_dir.join("toolchains"));
    let toolchain = Arc::new(ToolchainManager::new(
        state_dir.join("toolchain-cache"),
        Arc::new(DirectoryInstaller::new(mirror)),
    ));

    // Evict unreferenced toolchain versions, pinning everything a
    // record still points at.
    let pins: Vec<String> = store.with(|s| {
        s.instances
            .values()
            .filter_map(|i| i.toolchain_version.clone())
            .chain(s.deployments.values().map(|d| d.toolchain_version.clone()))
            .collect()
    });
    let evicted = toolchain.clean_cache(&pins);
    if !evicted.is_empty() {
        info!(count = evicted.len(), "evicted unreferenced toolchain versions");
    }

    let jobs = Arc::new(JobManager::new(Arc::clone(&store), SystemClock));
    let deps = EngineDeps {
        store: Arc::clone(&store),
        jobs: Arc::clone(&jobs),
        executor: Arc::new(warden_host::SystemProcessExecutor),
        registrar: Arc::new(BridgeRegistrar::new()),
        topic: Arc::new(TcpTopicClient),
        toolchain: Arc::clone(&toolchain),
        compiler: Arc::new(ToolchainCompiler::new(Arc::clone(&toolchain))),
        events: EventBus::new(),
        clock: SystemClock,
        bridge_port: config.session.bridge_port,
        install_dir: state_dir.clone(),
        instance_limit: config.general.instance_limit,
        valid_instance_paths: config.general.valid_instance_paths.clone(),
    };
    let manager = InstanceManager::new(deps);

    let socket_path = state_dir.join("daemon.sock");
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;

    let ctx = Arc::new(ListenCtx {
        manager,
        jobs,
        toolchain,
        store,
        clock: SystemClock,
    });
    info!(state_dir = %state_dir.display(), "controller started");

    Ok(StartupResult {
        daemon: DaemonState::new(config, state_dir, socket_path, ctx, lock_file),
        listener,
    })
}

/// Periodically register auto-update jobs for online instances whose
/// interval has elapsed.
pub fn spawn_auto_update_loop(
    ctx: Arc<ListenCtx<SystemClock>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_run: HashMap<InstanceId, Instant> = HashMap::new();
        let mut tick = tokio::time::interval(AUTO_UPDATE_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            for record in ctx.manager.list() {
                if !record.online || record.auto_update_minutes == 0 {
                    continue;
                }
                let interval = Duration::from_secs(record.auto_update_minutes * 60);
                let due = last_run
                    .get(&record.id)
                    .map(|t| t.elapsed() >= interval)
                    .unwrap_or(true);
                if !due {
                    continue;
                }
                let Some(host) = ctx.manager.host(&record.id) else { continue };
                last_run.insert(record.id.clone(), Instant::now());

                let job = Job::new(
                    Some(record.id.clone()),
                    "Automatic update",
                    "system",
                    RightsType::Repository,
                    repository::CANCEL_PENDING,
                    &ctx.clock,
                );
                let result = ctx.jobs.register(job, move |jctx| async move {
                    host.auto_update(&jctx.progress, &jctx.cancel)
                        .await
                        .map_err(|e| e.to_job_error())
                });
                if let Err(e) = result {
                    warn!(instance = %record.id, error = %e, "auto-update registration failed");
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
