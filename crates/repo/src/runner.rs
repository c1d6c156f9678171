// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellable `git` subprocess runner.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use warden_core::ErrorCode;
use warden_host::subprocess::run_with_timeout;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("no repository at {}", .0.display())]
    Missing(PathBuf),

    #[error("repository already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("git {description} failed: {detail}")]
    GitFailed { description: String, detail: String },
}

impl RepoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RepoError::Missing(_) => ErrorCode::RepoMissing,
            RepoError::AlreadyExists(_) => ErrorCode::RepoExists,
            RepoError::Cancelled => ErrorCode::JobCancelled,
            RepoError::GitFailed { .. } => ErrorCode::RepoOperationFailed,
        }
    }
}

/// Run `git <args>` in `workdir`, killing the child if `token` fires.
///
/// Cancellation drops the in-flight future; the child is reaped through
/// `kill_on_drop`, which is what unblocks network waits promptly.
pub(crate) async fn run_git(
    workdir: &Path,
    args: &[&str],
    timeout: Duration,
    token: &CancellationToken,
    description: &str,
) -> Result<Output, RepoError> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(workdir)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE");

    let run = run_with_timeout(cmd, timeout, description);
    tokio::select! {
        result = run => result.map_err(|detail| RepoError::GitFailed {
            description: description.to_string(),
            detail,
        }),
        _ = token.cancelled() => Err(RepoError::Cancelled),
    }
}

/// Like [`run_git`] but non-zero exit is an error carrying stderr.
pub(crate) async fn run_git_checked(
    workdir: &Path,
    args: &[&str],
    timeout: Duration,
    token: &CancellationToken,
    description: &str,
) -> Result<Output, RepoError> {
    let output = run_git(workdir, args, timeout, token, description).await?;
    if !output.status.success() {
        return Err(RepoError::GitFailed {
            description: description.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Stdout of a successful git command, trimmed.
pub(crate) async fn git_stdout(
    workdir: &Path,
    args: &[&str],
    timeout: Duration,
    token: &CancellationToken,
    description: &str,
) -> Result<String, RepoError> {
    let output = run_git_checked(workdir, args, timeout, token, description).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
