// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    conflicting_path = { ErrorCode::InstanceAtConflictingPath, 10 },
    existing_path = { ErrorCode::InstanceAtExistingPath, 11 },
    not_whitelisted = { ErrorCode::InstanceNotAtWhitelistedPath, 12 },
    detach_online = { ErrorCode::InstanceDetachOnline, 13 },
    relocate_online = { ErrorCode::InstanceRelocateOnline, 14 },
    port_in_use = { ErrorCode::DreamDaemonPortInUse, 20 },
    duplicate_ports = { ErrorCode::DreamDaemonDuplicatePorts, 21 },
    pager_running = { ErrorCode::DeploymentPagerRunning, 23 },
)]
fn numeric_values_are_stable(code: ErrorCode, expected: u16) {
    assert_eq!(code.value(), expected);
}

#[yare::parameterized(
    validation = { ErrorCode::DreamDaemonDuplicatePorts, 400 },
    conflict = { ErrorCode::InstanceDetachOnline, 409 },
    gone = { ErrorCode::JobGone, 410 },
    forbidden = { ErrorCode::AccessDenied, 403 },
    not_supported = { ErrorCode::NotSupported, 422 },
    internal = { ErrorCode::InternalError, 500 },
)]
fn categories_map_to_status(code: ErrorCode, status: u16) {
    assert_eq!(code.category().status(), status);
}

#[test]
fn codes_serialize_by_name() {
    let json = serde_json::to_string(&ErrorCode::InstanceAtExistingPath).unwrap();
    assert_eq!(json, "\"InstanceAtExistingPath\"");
}
