// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

mod startup;
pub use startup::{spawn_auto_update_loop, startup, StartupResult};

use crate::config::{Config, ConfigError};
use crate::listener::ListenCtx;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use warden_core::SystemClock;
use warden_storage::StoreError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot determine a state directory")]
    NoStateDir,

    #[error("another controller already holds the lock at {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub ctx: Arc<ListenCtx<SystemClock>>,
    // NOTE(lifetime): held to maintain the exclusive pid-file lock;
    // released on drop
    #[allow(dead_code)]
    lock_file: File,
}

impl DaemonState {
    pub(crate) fn new(
        config: Config,
        state_dir: PathBuf,
        socket_path: PathBuf,
        ctx: Arc<ListenCtx<SystemClock>>,
        lock_file: File,
    ) -> Self {
        Self { config, state_dir, socket_path, ctx, lock_file }
    }

    /// Orderly shutdown: persist the snapshot and remove the socket.
    /// Game sessions stay running; their reattach records are already
    /// on disk.
    pub fn shutdown(&self) {
        if let Err(e) = self.ctx.store.save() {
            warn!(error = %e, "failed to save snapshot during shutdown");
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!("controller stopped; sessions left running for reattach");
    }
}
