// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Protocol version (from Cargo.toml)
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve state directory: WARDEN_STATE_DIR > XDG_STATE_HOME/warden >
/// ~/.local/state/warden
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("WARDEN_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("warden"));
    }
    dirs::home_dir().map(|home| home.join(".local/state/warden"))
}

/// Default IPC timeout
pub fn ipc_timeout() -> Duration {
    std::env::var("WARDEN_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
