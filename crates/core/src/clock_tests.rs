// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advances() {
    let clock = FakeClock::new();
    let before = clock.now();
    let epoch_before = clock.epoch_ms();

    clock.advance(Duration::from_secs(5));

    assert_eq!(clock.now() - before, Duration::from_secs(5));
    assert_eq!(clock.epoch_ms() - epoch_before, 5_000);
}

#[test]
fn fake_clock_utc_tracks_epoch() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    assert_eq!(clock.now_utc().timestamp_millis(), 1_700_000_000_000);
}

#[test]
fn system_clock_epoch_is_sane() {
    let clock = SystemClock;
    // After 2020-01-01, before 2100-01-01
    assert!(clock.epoch_ms() > 1_577_836_800_000);
    assert!(clock.epoch_ms() < 4_102_444_800_000);
}
