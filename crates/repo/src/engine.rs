// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository operations.
//!
//! Mutating operations leave the working tree with no untracked files,
//! roll back to the recorded head on merge conflicts, and never leave a
//! temporary pull-request branch behind, including on failure.

use crate::runner::{git_stdout, run_git, run_git_checked, RepoError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::{Event, InstanceId, ProgressReporter, RepositorySettings};
use warden_host::subprocess::{GIT_LOCAL_TIMEOUT, GIT_NETWORK_TIMEOUT};

/// Receives repository events (conflict, merge, pre-synchronize).
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// Consulted before a push-back; returning false vetoes the push.
pub type PreSyncHook = Arc<dyn Fn() -> bool + Send + Sync>;

/// Temporary branch used to publish the exact working-tree state.
const SYNC_BRANCH: &str = "warden-tmp-sync";

/// Successful outcome of a test merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMergeResult {
    /// True when the target could have been fast-forwarded onto head.
    pub fast_forward: bool,
    /// The exact revision that was merged.
    pub revision: String,
}

/// What a merge points at.
struct MergeTarget<'a> {
    /// Branch name used in conflict events.
    branch: &'a str,
    /// The exact revision merged.
    revision: &'a str,
    /// Set for test merges; forces a merge commit and fires the
    /// merged-pull-request event.
    pull_request: Option<u64>,
}

/// One instance's working copy. All operations serialise on an internal
/// lock; readers queue behind mutators.
pub struct Repository {
    instance: InstanceId,
    path: PathBuf,
    lock: Mutex<()>,
    events: EventSink,
}

impl Repository {
    pub fn new(instance: InstanceId, path: PathBuf, events: EventSink) -> Self {
        Self { instance, path, lock: Mutex::new(()), events }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.join(".git").exists()
    }

    fn ensure_exists(&self) -> Result<(), RepoError> {
        if self.exists() {
            Ok(())
        } else {
            Err(RepoError::Missing(self.path.clone()))
        }
    }

    fn emit(&self, event: Event) {
        (self.events)(event);
    }

    /// Origin URL with embedded credentials, when both are usable.
    fn auth_url(origin: &str, settings: &RepositorySettings) -> Option<String> {
        if !settings.has_credentials() {
            return None;
        }
        let rest = origin.strip_prefix("https://")?;
        let user = settings.access_user.as_deref()?;
        let token = settings.access_token.as_deref()?;
        Some(format!("https://{user}:{token}@{rest}"))
    }

    async fn clean_untracked(&self, token: &CancellationToken) -> Result<(), RepoError> {
        run_git_checked(&self.path, &["clean", "-ffd"], GIT_LOCAL_TIMEOUT, token, "clean")
            .await
            .map(|_| ())
    }

    async fn head(&self, token: &CancellationToken) -> Result<String, RepoError> {
        git_stdout(&self.path, &["rev-parse", "HEAD"], GIT_LOCAL_TIMEOUT, token, "rev-parse")
            .await
    }

    /// Current branch name, or None when detached.
    async fn current_branch(&self, token: &CancellationToken) -> Result<Option<String>, RepoError> {
        let output = run_git(
            &self.path,
            &["symbolic-ref", "--short", "-q", "HEAD"],
            GIT_LOCAL_TIMEOUT,
            token,
            "symbolic-ref",
        )
        .await?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    // ----- snapshot reads -------------------------------------------------

    pub async fn head_sha(&self) -> Result<String, RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        self.head(&CancellationToken::new()).await
    }

    /// Friendly name of the current reference.
    pub async fn reference_name(&self) -> Result<String, RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        let branch = self.current_branch(&CancellationToken::new()).await?;
        Ok(branch.unwrap_or_else(|| "(detached)".to_string()))
    }

    pub async fn origin_url(&self) -> Result<String, RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        git_stdout(
            &self.path,
            &["remote", "get-url", "origin"],
            GIT_LOCAL_TIMEOUT,
            &CancellationToken::new(),
            "remote get-url",
        )
        .await
    }

    /// Head of the current branch's origin counterpart, when both the
    /// branch and its remote ref exist.
    pub async fn origin_head_sha(&self) -> Result<Option<String>, RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        let token = CancellationToken::new();
        let Some(branch) = self.current_branch(&token).await? else {
            return Ok(None);
        };
        let target = format!("origin/{branch}");
        let output = run_git(
            &self.path,
            &["rev-parse", "--verify", "--quiet", &target],
            GIT_LOCAL_TIMEOUT,
            &token,
            "rev-parse origin",
        )
        .await?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// True when HEAD is on a branch with a configured upstream.
    pub async fn tracking_branch(&self) -> Result<bool, RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        let output = run_git(
            &self.path,
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
            GIT_LOCAL_TIMEOUT,
            &CancellationToken::new(),
            "rev-parse upstream",
        )
        .await?;
        Ok(output.status.success())
    }

    /// True when `committish` resolves to a commit and is neither a
    /// branch nor a tag name.
    pub async fn is_sha(&self, committish: &str) -> Result<bool, RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        let token = CancellationToken::new();

        let commit_probe = format!("{committish}^{{commit}}");
        let is_commit = run_git(
            &self.path,
            &["rev-parse", "--verify", "--quiet", &commit_probe],
            GIT_LOCAL_TIMEOUT,
            &token,
            "rev-parse verify",
        )
        .await?
        .status
        .success();
        if !is_commit {
            return Ok(false);
        }

        for prefix in ["refs/heads/", "refs/tags/"] {
            let reference = format!("{prefix}{committish}");
            let named = run_git(
                &self.path,
                &["show-ref", "--verify", "--quiet", &reference],
                GIT_LOCAL_TIMEOUT,
                &token,
                "show-ref",
            )
            .await?
            .status
            .success();
            if named {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ----- mutating operations --------------------------------------------

    pub async fn clone_from(
        &self,
        origin: &str,
        reference: Option<&str>,
        settings: &RepositorySettings,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), RepoError> {
        let _guard = self.lock.lock().await;
        if self.exists() {
            return Err(RepoError::AlreadyExists(self.path.clone()));
        }
        let parent = self.path.parent().unwrap_or(Path::new("/")).to_path_buf();
        tokio::fs::create_dir_all(&parent).await.map_err(|e| RepoError::GitFailed {
            description: "clone".into(),
            detail: format!("creating {}: {e}", parent.display()),
        })?;
        reporter.report(10);

        let url = Self::auth_url(origin, settings).unwrap_or_else(|| origin.to_string());
        let path_str = self.path.display().to_string();
        let mut args = vec!["clone"];
        if let Some(reference) = reference {
            args.extend(["--branch", reference]);
        }
        args.extend([url.as_str(), path_str.as_str()]);
        run_git_checked(&parent, &args, GIT_NETWORK_TIMEOUT, token, "clone").await?;
        reporter.report(80);

        // Never persist credentials in the remote config
        if url != origin {
            run_git_checked(
                &self.path,
                &["remote", "set-url", "origin", origin],
                GIT_LOCAL_TIMEOUT,
                token,
                "remote set-url",
            )
            .await?;
        }
        self.clean_untracked(token).await?;
        reporter.report(100);
        info!(instance = %self.instance, origin, "repository cloned");
        Ok(())
    }

    pub async fn fetch_origin(
        &self,
        settings: &RepositorySettings,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        self.clean_untracked(token).await?;
        reporter.report(10);

        let origin = self.origin_url_locked(token).await?;
        match Self::auth_url(&origin, settings) {
            Some(url) => {
                run_git_checked(
                    &self.path,
                    &["fetch", &url, "+refs/heads/*:refs/remotes/origin/*"],
                    GIT_NETWORK_TIMEOUT,
                    token,
                    "fetch",
                )
                .await?
            }
            None => {
                run_git_checked(&self.path, &["fetch", "origin"], GIT_NETWORK_TIMEOUT, token, "fetch")
                    .await?
            }
        };
        self.emit(Event::RepoFetch { instance: self.instance.clone() });
        self.clean_untracked(token).await?;
        reporter.report(100);
        Ok(())
    }

    async fn origin_url_locked(&self, token: &CancellationToken) -> Result<String, RepoError> {
        git_stdout(
            &self.path,
            &["remote", "get-url", "origin"],
            GIT_LOCAL_TIMEOUT,
            token,
            "remote get-url",
        )
        .await
    }

    pub async fn checkout(
        &self,
        committish: &str,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        self.clean_untracked(token).await?;
        run_git_checked(
            &self.path,
            &["checkout", committish],
            GIT_LOCAL_TIMEOUT,
            token,
            "checkout",
        )
        .await?;
        self.emit(Event::RepoCheckout {
            instance: self.instance.clone(),
            committish: committish.to_string(),
        });
        self.clean_untracked(token).await?;
        reporter.report(100);
        Ok(())
    }

    pub async fn reset_to_sha(
        &self,
        sha: &str,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        run_git_checked(&self.path, &["reset", "--hard", sha], GIT_LOCAL_TIMEOUT, token, "reset")
            .await?;
        self.emit(Event::RepoReset { instance: self.instance.clone(), sha: sha.to_string() });
        self.clean_untracked(token).await?;
        reporter.report(100);
        Ok(())
    }

    /// Reset the current branch to its origin counterpart.
    pub async fn reset_to_origin(
        &self,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<(), RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        let branch = self.current_branch(token).await?.ok_or_else(|| RepoError::GitFailed {
            description: "reset to origin".into(),
            detail: "not on a branch".into(),
        })?;
        let target = format!("origin/{branch}");
        run_git_checked(
            &self.path,
            &["reset", "--hard", &target],
            GIT_LOCAL_TIMEOUT,
            token,
            "reset",
        )
        .await?;
        let sha = self.head(token).await?;
        self.emit(Event::RepoReset { instance: self.instance.clone(), sha });
        self.clean_untracked(token).await?;
        reporter.report(100);
        Ok(())
    }

    /// Merge the tracked origin branch into the working tree.
    ///
    /// `Some(true)`: fast-forward. `Some(false)`: merge commit.
    /// `None`: conflict, rolled back.
    pub async fn merge_origin(
        &self,
        settings: &RepositorySettings,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Option<bool>, RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        self.clean_untracked(token).await?;

        let head = self.head(token).await?;
        let branch = self.current_branch(token).await?.ok_or_else(|| RepoError::GitFailed {
            description: "merge origin".into(),
            detail: "not on a branch".into(),
        })?;
        let target = format!("origin/{branch}");
        reporter.report(20);

        let result = self
            .merge_into_head(
                &head,
                &branch,
                MergeTarget { branch: &target, revision: &target, pull_request: None },
                settings,
                token,
            )
            .await;
        self.clean_untracked(&CancellationToken::new()).await?;
        reporter.report(100);
        result
    }

    /// Merge a pull request's head (or an explicit revision of it) onto
    /// the current head. See the module docs for the rollback contract.
    pub async fn merge_test_revision(
        &self,
        number: u64,
        target_sha: Option<&str>,
        settings: &RepositorySettings,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Option<TestMergeResult>, RepoError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;
        self.clean_untracked(token).await?;

        let branch = format!("pr-{number}");
        let result = self
            .merge_test_inner(number, &branch, target_sha, settings, reporter, token)
            .await;

        // Cleanup runs on an uncancelled token so a cancelled merge
        // still deletes the temporary branch and the untracked files.
        let cleanup = CancellationToken::new();
        let _ = run_git(
            &self.path,
            &["branch", "-D", &branch],
            GIT_LOCAL_TIMEOUT,
            &cleanup,
            "branch delete",
        )
        .await;
        self.clean_untracked(&cleanup).await?;
        result
    }

    async fn merge_test_inner(
        &self,
        number: u64,
        branch: &str,
        target_sha: Option<&str>,
        settings: &RepositorySettings,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Option<TestMergeResult>, RepoError> {
        let head = self.head(token).await?;
        let head_reference =
            self.current_branch(token).await?.unwrap_or_else(|| "(detached)".to_string());

        let origin = self.origin_url_locked(token).await?;
        let remote = Self::auth_url(&origin, settings).unwrap_or_else(|| "origin".to_string());
        let refspec = format!("+pull/{number}/head:{branch}");
        let fetch_progress = reporter.stage(0, 50);
        fetch_progress.report(10);
        run_git_checked(
            &self.path,
            &["fetch", &remote, &refspec],
            GIT_NETWORK_TIMEOUT,
            token,
            "fetch pull request",
        )
        .await?;
        fetch_progress.report(100);

        let target = match target_sha {
            Some(sha) => sha.to_string(),
            None => {
                git_stdout(
                    &self.path,
                    &["rev-parse", branch],
                    GIT_LOCAL_TIMEOUT,
                    token,
                    "rev-parse",
                )
                .await?
            }
        };

        let merge_progress = reporter.stage(50, 100);
        merge_progress.report(10);
        let result = self
            .merge_into_head(
                &head,
                &head_reference,
                MergeTarget { branch, revision: &target, pull_request: Some(number) },
                settings,
                token,
            )
            .await?;
        merge_progress.report(100);
        Ok(result.map(|fast_forward| TestMergeResult { fast_forward, revision: target }))
    }

    /// Shared merge body: ff-detection, merge commit, conflict rollback.
    ///
    /// Pull-request merges forbid fast-forward so the test merge is
    /// always visible as its own commit; origin merges allow it.
    async fn merge_into_head(
        &self,
        head: &str,
        head_reference: &str,
        target: MergeTarget<'_>,
        settings: &RepositorySettings,
        token: &CancellationToken,
    ) -> Result<Option<bool>, RepoError> {
        let fast_forward = run_git(
            &self.path,
            &["merge-base", "--is-ancestor", "HEAD", target.revision],
            GIT_LOCAL_TIMEOUT,
            token,
            "merge-base",
        )
        .await?
        .status
        .success();

        let name_cfg = format!("user.name={}", settings.committer_name);
        let email_cfg = format!("user.email={}", settings.committer_email);
        let message;
        let mut args =
            vec!["-c", name_cfg.as_str(), "-c", email_cfg.as_str(), "merge", "--no-edit"];
        if let Some(number) = target.pull_request {
            message = format!("Merge pull request #{number} at {}", target.revision);
            args.extend(["--no-ff", "-m", message.as_str()]);
        }
        args.push(target.revision);
        let merge = run_git(&self.path, &args, GIT_LOCAL_TIMEOUT, token, "merge").await?;

        if !merge.status.success() {
            let detail = format!(
                "{}{}",
                String::from_utf8_lossy(&merge.stdout),
                String::from_utf8_lossy(&merge.stderr)
            );
            if detail.contains("CONFLICT") || detail.contains("Automatic merge failed") {
                self.rollback_merge(head, token).await?;
                self.emit(Event::RepoMergeConflict {
                    instance: self.instance.clone(),
                    head_sha: head.to_string(),
                    target: target.revision.to_string(),
                    head_reference: head_reference.to_string(),
                    branch: target.branch.to_string(),
                });
                warn!(instance = %self.instance, branch = target.branch, "merge conflict, rolled back");
                return Ok(None);
            }
            return Err(RepoError::GitFailed {
                description: "merge".into(),
                detail: detail.trim().to_string(),
            });
        }

        if let Some(number) = target.pull_request {
            let sha = self.head(token).await?;
            self.emit(Event::RepoMergedPullRequest {
                instance: self.instance.clone(),
                number,
                sha,
            });
        }
        Ok(Some(fast_forward))
    }

    async fn rollback_merge(&self, head: &str, token: &CancellationToken) -> Result<(), RepoError> {
        // Abort may fail when the merge never started; the reset is what matters
        let _ = run_git(&self.path, &["merge", "--abort"], GIT_LOCAL_TIMEOUT, token, "merge abort")
            .await;
        run_git_checked(&self.path, &["reset", "--hard", head], GIT_LOCAL_TIMEOUT, token, "reset")
            .await?;
        self.clean_untracked(token).await
    }

    /// Push the working state back to origin. Returns true only when a
    /// push actually happened; every failure path is logged and reported
    /// as false, never raised.
    pub async fn synchronize(
        &self,
        settings: &RepositorySettings,
        push_temp_branch: bool,
        hook: &PreSyncHook,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<bool, RepoError> {
        if !settings.has_credentials() {
            return Ok(false);
        }
        let _guard = self.lock.lock().await;
        self.ensure_exists()?;

        let head = self.head(token).await?;
        run_git_checked(
            &self.path,
            &["config", "user.name", &settings.committer_name],
            GIT_LOCAL_TIMEOUT,
            token,
            "config",
        )
        .await?;
        run_git_checked(
            &self.path,
            &["config", "user.email", &settings.committer_email],
            GIT_LOCAL_TIMEOUT,
            token,
            "config",
        )
        .await?;
        reporter.report(20);

        self.emit(Event::RepoPreSynchronize { instance: self.instance.clone() });
        if !hook() {
            run_git_checked(
                &self.path,
                &["reset", "--hard", &head],
                GIT_LOCAL_TIMEOUT,
                token,
                "reset",
            )
            .await?;
            self.clean_untracked(token).await?;
            return Ok(false);
        }

        let origin = self.origin_url_locked(token).await?;
        let remote = Self::auth_url(&origin, settings).unwrap_or_else(|| "origin".to_string());

        let pushed = if push_temp_branch {
            let refspec = format!("+HEAD:refs/heads/{SYNC_BRANCH}");
            let push = run_git(
                &self.path,
                &["push", &remote, &refspec],
                GIT_NETWORK_TIMEOUT,
                token,
                "push",
            )
            .await?;
            if push.status.success() {
                let delete = run_git(
                    &self.path,
                    &["push", &remote, "--delete", SYNC_BRANCH],
                    GIT_NETWORK_TIMEOUT,
                    token,
                    "push delete",
                )
                .await?;
                if !delete.status.success() {
                    warn!(instance = %self.instance, "failed to delete temporary sync branch");
                }
                true
            } else {
                warn!(
                    instance = %self.instance,
                    detail = %String::from_utf8_lossy(&push.stderr).trim(),
                    "synchronize push failed"
                );
                false
            }
        } else {
            match self.current_branch(token).await? {
                Some(branch) => {
                    let refspec = format!("HEAD:refs/heads/{branch}");
                    let push = run_git(
                        &self.path,
                        &["push", &remote, &refspec],
                        GIT_NETWORK_TIMEOUT,
                        token,
                        "push",
                    )
                    .await?;
                    if !push.status.success() {
                        warn!(
                            instance = %self.instance,
                            detail = %String::from_utf8_lossy(&push.stderr).trim(),
                            "synchronize push failed"
                        );
                    }
                    push.status.success()
                }
                None => {
                    warn!(instance = %self.instance, "synchronize skipped: detached HEAD");
                    false
                }
            }
        };
        self.clean_untracked(token).await?;
        reporter.report(100);
        Ok(pushed)
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
