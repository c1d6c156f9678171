// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn ipc_timeout_has_a_default() {
    assert!(ipc_timeout() >= Duration::from_millis(1));
}

#[test]
fn protocol_version_is_semverish() {
    assert!(PROTOCOL_VERSION.split('.').count() >= 2);
}
