// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn checked_run_surfaces_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();

    let err = run_git_checked(
        dir.path(),
        &["rev-parse", "HEAD"],
        Duration::from_secs(10),
        &token,
        "rev-parse",
    )
    .await
    .unwrap_err();

    match err {
        RepoError::GitFailed { description, detail } => {
            assert_eq!(description, "rev-parse");
            assert!(!detail.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_token_aborts_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = run_git(dir.path(), &["status"], Duration::from_secs(10), &token, "status")
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Cancelled));
}

#[tokio::test]
async fn stdout_helper_trims() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let version =
        git_stdout(dir.path(), &["--version"], Duration::from_secs(10), &token, "version")
            .await
            .unwrap();
    assert!(version.starts_with("git version"));
}

#[test]
fn error_codes_map_to_contract() {
    assert_eq!(RepoError::Missing(PathBuf::from("/x")).code(), ErrorCode::RepoMissing);
    assert_eq!(RepoError::Cancelled.code(), ErrorCode::JobCancelled);
}
