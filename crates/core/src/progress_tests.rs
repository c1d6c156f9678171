// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex;

fn recording() -> (ProgressReporter, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let reporter = ProgressReporter::new(move |v| sink_seen.lock().push(v));
    (reporter, seen)
}

#[test]
fn reports_flow_to_sink() {
    let (reporter, seen) = recording();
    reporter.report(10);
    reporter.report(60);
    assert_eq!(*seen.lock(), vec![10, 60]);
    assert_eq!(reporter.current(), 60);
}

#[test]
fn lower_values_are_floored() {
    let (reporter, seen) = recording();
    reporter.report(50);
    reporter.report(20);
    assert_eq!(*seen.lock(), vec![50]);
    assert_eq!(reporter.current(), 50);
}

#[test]
fn values_cap_at_100() {
    let (reporter, _) = recording();
    reporter.report(200);
    assert_eq!(reporter.current(), 100);
}

#[test]
fn duplicate_reports_are_suppressed() {
    let (reporter, seen) = recording();
    reporter.report(30);
    reporter.report(30);
    assert_eq!(*seen.lock(), vec![30]);
}

#[test]
fn stage_scales_into_parent_window() {
    let (reporter, seen) = recording();
    let fetch = reporter.stage(0, 50);
    fetch.report(100);
    assert_eq!(reporter.current(), 50);

    let merge = reporter.stage(50, 100);
    merge.report(50);
    assert_eq!(reporter.current(), 75);
    merge.report(100);
    assert_eq!(reporter.current(), 100);

    assert_eq!(*seen.lock(), vec![50, 75, 100]);
}

#[test]
fn stage_cannot_regress_parent() {
    let (reporter, _) = recording();
    reporter.report(80);
    let late = reporter.stage(0, 50);
    late.report(100);
    assert_eq!(reporter.current(), 80);
}
