// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compiler invocation for deployments.

use crate::toolchain::ToolchainManager;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use warden_core::ErrorCode;
use warden_host::subprocess::run_with_timeout;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("no project file found in {0}")]
    NoProject(String),

    #[error("compiler failed: {0}")]
    Failed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Toolchain(#[from] crate::toolchain::ToolchainError),
}

impl CompileError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CompileError::NoProject(_) | CompileError::Failed(_) => ErrorCode::CompileFailed,
            CompileError::Cancelled => ErrorCode::JobCancelled,
            CompileError::Toolchain(e) => e.code(),
        }
    }
}

/// Compiles a staged working tree into a deployable artifact.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile the project in `dir` with the given toolchain version.
    /// Returns the produced artifact's file name.
    async fn compile(
        &self,
        toolchain_version: &str,
        dir: &Path,
        project_name: Option<&str>,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<String, CompileError>;
}

/// Locate the project base name: the configured one, or the single
/// `.dme` in the directory root.
fn resolve_project(dir: &Path, configured: Option<&str>) -> Result<String, CompileError> {
    if let Some(name) = configured {
        return Ok(name.trim_end_matches(".dme").to_string());
    }
    let mut candidates = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if let Some(base) = name.strip_suffix(".dme") {
                    candidates.push(base.to_string());
                }
            }
        }
    }
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| CompileError::NoProject(dir.display().to_string()))
}

/// Runs the toolchain's compiler binary against the staged tree.
pub struct ToolchainCompiler {
    toolchain: Arc<ToolchainManager>,
}

impl ToolchainCompiler {
    pub fn new(toolchain: Arc<ToolchainManager>) -> Self {
        Self { toolchain }
    }
}

#[async_trait]
impl Compiler for ToolchainCompiler {
    async fn compile(
        &self,
        toolchain_version: &str,
        dir: &Path,
        project_name: Option<&str>,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<String, CompileError> {
        // Shared lock for the duration of the compile
        let lock = self.toolchain.use_version(toolchain_version)?;
        let base = resolve_project(dir, project_name)?;
        let project_file = format!("{base}.dme");

        let mut cmd = tokio::process::Command::new(lock.compiler_binary());
        cmd.arg(&project_file).current_dir(dir);

        let run = run_with_timeout(cmd, timeout, "compile");
        let output = tokio::select! {
            result = run => result.map_err(CompileError::Failed)?,
            _ = token.cancelled() => return Err(CompileError::Cancelled),
        };
        if !output.status.success() {
            let detail = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(CompileError::Failed(detail.trim().to_string()));
        }

        let artifact = format!("{base}.dmb");
        if !dir.join(&artifact).is_file() {
            return Err(CompileError::Failed(format!("{artifact} was not produced")));
        }
        info!(artifact, "compile succeeded");
        Ok(artifact)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeCompiler;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// Writes the artifact itself instead of running a real compiler.
    #[derive(Default)]
    pub struct FakeCompiler {
        fail_next: Mutex<bool>,
    }

    impl FakeCompiler {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn fail_next(&self) {
            *self.fail_next.lock() = true;
        }
    }

    #[async_trait]
    impl Compiler for FakeCompiler {
        async fn compile(
            &self,
            _toolchain_version: &str,
            dir: &Path,
            project_name: Option<&str>,
            _timeout: Duration,
            token: &CancellationToken,
        ) -> Result<String, CompileError> {
            if token.is_cancelled() {
                return Err(CompileError::Cancelled);
            }
            if std::mem::take(&mut *self.fail_next.lock()) {
                return Err(CompileError::Failed("scripted compile failure".into()));
            }
            let base = project_name.unwrap_or("station").trim_end_matches(".dme");
            let artifact = format!("{base}.dmb");
            std::fs::write(dir.join(&artifact), b"dmb")
                .map_err(|e| CompileError::Failed(e.to_string()))?;
            Ok(artifact)
        }
    }
}

#[cfg(test)]
#[path = "compile_tests.rs"]
mod tests;
