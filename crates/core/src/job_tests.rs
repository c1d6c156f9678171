// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::rights::game_server;
use crate::FakeClock;

fn test_job(clock: &FakeClock) -> Job {
    Job::new(
        Some(InstanceId::from_string("ins-1")),
        "Launch game server",
        "alice",
        RightsType::GameServer,
        game_server::STOP,
        clock,
    )
}

#[test]
fn new_job_is_running() {
    let clock = FakeClock::new();
    let job = test_job(&clock);

    assert!(!job.is_finished());
    assert_eq!(job.progress, 0);
    assert!(job.error.is_none());
    assert!(!job.cancelled);
}

#[test]
fn progress_is_monotonic() {
    let clock = FakeClock::new();
    let mut job = test_job(&clock);

    job.report_progress(40);
    assert_eq!(job.progress, 40);

    // Lower reports are floored
    job.report_progress(10);
    assert_eq!(job.progress, 40);

    job.report_progress(90);
    assert_eq!(job.progress, 90);
}

#[test]
fn progress_caps_at_100() {
    let clock = FakeClock::new();
    let mut job = test_job(&clock);
    job.report_progress(250);
    assert_eq!(job.progress, 100);
}

#[test]
fn finish_ok_sets_exactly_one_outcome() {
    let clock = FakeClock::new();
    let mut job = test_job(&clock);
    job.finish_ok(clock.now_utc());

    assert!(job.is_finished());
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());
    assert!(!job.cancelled);
}

#[test]
fn terminal_transitions_are_first_write_wins() {
    let clock = FakeClock::new();
    let mut job = test_job(&clock);
    job.finish_cancelled(clock.now_utc());

    // A late error report must not overwrite the cancelled outcome
    job.finish_error(ErrorCode::InternalError, "late", clock.now_utc());
    assert!(job.cancelled);
    assert!(job.error.is_none());
}

#[test]
fn finish_error_records_code_and_message() {
    let clock = FakeClock::new();
    let mut job = test_job(&clock);
    job.finish_error(ErrorCode::CompileFailed, "dm exited 1", clock.now_utc());

    assert!(job.is_finished());
    assert_eq!(
        job.error,
        Some(JobError { code: ErrorCode::CompileFailed, message: "dm exited 1".into() })
    );
    assert!(!job.cancelled);
}

#[test]
fn starter_may_always_cancel() {
    let clock = FakeClock::new();
    let job = test_job(&clock);
    assert!(job.may_cancel("alice", &PermissionSet::new()));
}

#[test]
fn cancel_right_grants_cancel() {
    let clock = FakeClock::new();
    let job = test_job(&clock);

    let mut rights = PermissionSet::new();
    assert!(!job.may_cancel("bob", &rights));

    rights.grant(RightsType::GameServer, game_server::STOP);
    assert!(job.may_cancel("bob", &rights));
}

#[test]
fn wrong_group_does_not_grant_cancel() {
    let clock = FakeClock::new();
    let job = test_job(&clock);

    let mut rights = PermissionSet::new();
    rights.grant(RightsType::Repository, game_server::STOP);
    assert!(!job.may_cancel("bob", &rights));
}
