// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compiler toolchain cache.
//!
//! Versions are installed into `cache_dir/<version>/` by an injected
//! installer (the real download/extract pipeline lives outside the
//! core). Installation holds the per-manager exclusive lock; sessions
//! take shared [`UseLock`]s which block eviction of their version.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::{ErrorCode, ProgressReporter};

/// Game-server binary name inside an installed version.
pub const SERVER_BINARY: &str = "dreamdaemon";

/// Compiler binary name inside an installed version.
pub const COMPILER_BINARY: &str = "dreammaker";

/// Interactive pager binary whose presence blocks launches.
pub const PAGER_BINARY: &str = "byond";

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("toolchain version {0} is not installed")]
    VersionMissing(String),

    #[error("toolchain version {0} is in use")]
    VersionInUse(String),

    #[error("install of {version} failed: {detail}")]
    InstallFailed { version: String, detail: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolchainError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ToolchainError::VersionMissing(_) => ErrorCode::ToolchainVersionMissing,
            ToolchainError::VersionInUse(_) => ErrorCode::ToolchainVersionInUse,
            ToolchainError::InstallFailed { .. } => ErrorCode::ToolchainInstallFailed,
            ToolchainError::Cancelled => ErrorCode::JobCancelled,
            ToolchainError::Io(_) => ErrorCode::InternalError,
        }
    }
}

/// Installs a version into an empty target directory.
///
/// The real implementation downloads and extracts the vendor archive;
/// it is injected so the cache logic stays testable.
#[async_trait]
pub trait ToolchainInstaller: Send + Sync {
    async fn install(
        &self,
        version: &str,
        target: &Path,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), ToolchainError>;
}

#[derive(Default)]
struct VersionEntry {
    users: usize,
}

pub struct ToolchainManager {
    cache_dir: PathBuf,
    installer: Arc<dyn ToolchainInstaller>,
    versions: Mutex<HashMap<String, VersionEntry>>,
    /// Serialises installs and uninstalls.
    install_lock: tokio::sync::Mutex<()>,
}

impl ToolchainManager {
    pub fn new(cache_dir: PathBuf, installer: Arc<dyn ToolchainInstaller>) -> Self {
        Self {
            cache_dir,
            installer,
            versions: Mutex::new(HashMap::new()),
            install_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn version_dir(&self, version: &str) -> PathBuf {
        self.cache_dir.join(version)
    }

    pub fn is_installed(&self, version: &str) -> bool {
        self.version_dir(version).is_dir()
    }

    /// Absolute path of a binary inside an installed version.
    pub fn binary_path(&self, version: &str, binary: &str) -> PathBuf {
        self.version_dir(version).join("bin").join(binary)
    }

    pub fn installed_versions(&self) -> Vec<String> {
        let mut versions = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.cache_dir) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        versions.push(name.to_string());
                    }
                }
            }
        }
        versions.sort();
        versions
    }

    /// Install `version` if absent. Holds the exclusive install lock.
    pub async fn install(
        self: &Arc<Self>,
        version: &str,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), ToolchainError> {
        let _exclusive = self.install_lock.lock().await;
        if self.is_installed(version) {
            reporter.report(100);
            return Ok(());
        }

        let target = self.version_dir(version);
        std::fs::create_dir_all(&target)?;
        match self.installer.install(version, &target, reporter, token).await {
            Ok(()) => {
                info!(version, "toolchain installed");
                reporter.report(100);
                Ok(())
            }
            Err(e) => {
                // Leave no partial install behind
                let _ = std::fs::remove_dir_all(&target);
                Err(e)
            }
        }
    }

    /// Remove an installed version. Refused while any session uses it.
    pub async fn uninstall(self: &Arc<Self>, version: &str) -> Result<(), ToolchainError> {
        let _exclusive = self.install_lock.lock().await;
        if self.versions.lock().get(version).map(|e| e.users).unwrap_or(0) > 0 {
            return Err(ToolchainError::VersionInUse(version.to_string()));
        }
        if !self.is_installed(version) {
            return Err(ToolchainError::VersionMissing(version.to_string()));
        }
        std::fs::remove_dir_all(self.version_dir(version))?;
        info!(version, "toolchain uninstalled");
        Ok(())
    }

    /// Take a shared lock on an installed version.
    pub fn use_version(self: &Arc<Self>, version: &str) -> Result<UseLock, ToolchainError> {
        if !self.is_installed(version) {
            return Err(ToolchainError::VersionMissing(version.to_string()));
        }
        self.versions.lock().entry(version.to_string()).or_default().users += 1;
        Ok(UseLock { manager: Arc::clone(self), version: version.to_string() })
    }

    pub fn users(&self, version: &str) -> usize {
        self.versions.lock().get(version).map(|e| e.users).unwrap_or(0)
    }

    /// Evict versions nobody uses and nothing pins. Run on daemon
    /// start. Returns the evicted version strings.
    pub fn clean_cache(&self, pins: &[String]) -> Vec<String> {
        let mut evicted = Vec::new();
        for version in self.installed_versions() {
            if pins.contains(&version) || self.users(&version) > 0 {
                continue;
            }
            match std::fs::remove_dir_all(self.version_dir(&version)) {
                Ok(()) => {
                    info!(version, "evicted unreferenced toolchain");
                    evicted.push(version);
                }
                Err(e) => warn!(version, error = %e, "failed to evict toolchain"),
            }
        }
        evicted
    }
}

/// Shared lock on a toolchain version. Blocks eviction and uninstall
/// while held.
pub struct UseLock {
    manager: Arc<ToolchainManager>,
    version: String,
}

impl UseLock {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn server_binary(&self) -> PathBuf {
        self.manager.binary_path(&self.version, SERVER_BINARY)
    }

    pub fn compiler_binary(&self) -> PathBuf {
        self.manager.binary_path(&self.version, COMPILER_BINARY)
    }
}

impl Drop for UseLock {
    fn drop(&mut self) {
        let mut versions = self.manager.versions.lock();
        if let Some(entry) = versions.get_mut(&self.version) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                versions.remove(&self.version);
            }
        }
    }
}

/// Installer that copies a pre-extracted version tree from a source
/// directory. The daemon uses this against a local archive mirror;
/// tests point it at fixtures.
pub struct DirectoryInstaller {
    source_root: PathBuf,
}

impl DirectoryInstaller {
    pub fn new(source_root: PathBuf) -> Self {
        Self { source_root }
    }
}

#[async_trait]
impl ToolchainInstaller for DirectoryInstaller {
    async fn install(
        &self,
        version: &str,
        target: &Path,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), ToolchainError> {
        if token.is_cancelled() {
            return Err(ToolchainError::Cancelled);
        }
        let source = self.source_root.join(version);
        if !source.is_dir() {
            return Err(ToolchainError::InstallFailed {
                version: version.to_string(),
                detail: format!("no archive at {}", source.display()),
            });
        }
        reporter.report(25);
        warden_host::ioutil::copy_dir(&source, target, &[]).map_err(|e| {
            ToolchainError::InstallFailed { version: version.to_string(), detail: e.to_string() }
        })?;
        reporter.report(90);
        Ok(())
    }
}

#[cfg(test)]
#[path = "toolchain_tests.rs"]
mod tests;
