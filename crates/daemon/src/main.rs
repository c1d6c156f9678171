// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wardend: the host-controller daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden_daemon::config::Config;
use warden_daemon::lifecycle::{self, LifecycleError, StartupResult};
use warden_daemon::env;
use warden_daemon::listener::Listener;

fn main() -> ExitCode {
    let config_path = std::env::args().nth(1).map(PathBuf::from).or_else(|| {
        env::state_dir().map(|dir| dir.join("config.json"))
    });
    let config = match config_path.as_deref().map(Config::load) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            eprintln!("wardend: {e}");
            return ExitCode::FAILURE;
        }
        None => Config::default(),
    };

    // Logging guard must outlive the runtime
    let _log_guard = init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "controller failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.file_logging.log_level.clone()));

    match (&config.file_logging.directory, config.file_logging.disable) {
        (Some(directory), false) => {
            let appender = tracing_appender::rolling::daily(directory, "warden.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn run(config: Config) -> Result<(), LifecycleError> {
    let StartupResult { daemon, listener } = lifecycle::startup(config).await?;

    let listener_task = tokio::spawn(Listener::new(listener, daemon.ctx.clone()).run());

    // Deferred recovery: reattach sessions after the socket is serving
    let manager = daemon.ctx.manager.clone();
    tokio::spawn(async move {
        manager.resume().await;
        info!("instance recovery complete");
    });
    let auto_update = lifecycle::spawn_auto_update_loop(daemon.ctx.clone());

    info!(version = env::PROTOCOL_VERSION, "READY");
    shutdown_signal().await;
    info!("shutdown requested");

    listener_task.abort();
    auto_update.abort();
    daemon.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
