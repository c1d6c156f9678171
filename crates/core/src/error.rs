// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable error codes for the control surface.
//!
//! Domain operations fail with an [`ErrorCode`]; the listener is the one
//! place that maps a code's [`ErrorCategory`] to a response status. The
//! numeric values are part of the wire contract and must never be
//! renumbered.

use serde::{Deserialize, Serialize};

/// Broad failure taxonomy, mapped to an HTTP-style status by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller supplied bad input.
    Validation,
    /// State-dependent refusal (invariant would be violated).
    Conflict,
    /// Referent disappeared or was detached.
    Gone,
    /// Missing or invalid credentials.
    Auth,
    /// Authenticated but lacking the required right.
    Forbidden,
    /// Feature not available on this platform or build.
    NotSupported,
    /// Retriable by the caller.
    Transient,
    /// Unexpected; logged with full context.
    Internal,
}

impl ErrorCategory {
    /// HTTP status the external adapter reports for this category.
    pub fn status(self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Gone => 410,
            ErrorCategory::Auth => 401,
            ErrorCategory::Forbidden => 403,
            ErrorCategory::NotSupported => 422,
            ErrorCategory::Transient => 503,
            ErrorCategory::Internal => 500,
        }
    }
}

/// Stable, semantic error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InternalError = 1,
    ModelValidationFailure = 2,
    AccessDenied = 3,
    NotSupported = 4,

    InstanceAtConflictingPath = 10,
    InstanceAtExistingPath = 11,
    InstanceNotAtWhitelistedPath = 12,
    InstanceDetachOnline = 13,
    InstanceRelocateOnline = 14,
    InstanceMoveInProgress = 15,
    InstanceLimitReached = 16,
    InstanceMissing = 17,
    InstanceOffline = 18,

    DreamDaemonPortInUse = 20,
    DreamDaemonDuplicatePorts = 21,
    DreamDaemonPortOutOfRange = 22,
    DeploymentPagerRunning = 23,
    WatchdogNotRunning = 24,
    SessionStartupTimeout = 25,

    RepoMissing = 30,
    RepoBusy = 31,
    RepoCloning = 32,
    RepoExists = 33,
    RepoOperationFailed = 34,

    ToolchainVersionMissing = 40,
    ToolchainInstallFailed = 41,
    ToolchainVersionInUse = 45,
    DeploymentMissing = 42,
    DeploymentInProgress = 43,
    CompileFailed = 44,

    JobGone = 50,
    JobCancelled = 51,
}

impl ErrorCode {
    /// The stable numeric value carried on the wire.
    pub fn value(self) -> u16 {
        self as u16
    }

    pub fn category(self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            InternalError => ErrorCategory::Internal,
            ModelValidationFailure
            | DreamDaemonDuplicatePorts
            | DreamDaemonPortOutOfRange => ErrorCategory::Validation,
            AccessDenied => ErrorCategory::Forbidden,
            NotSupported => ErrorCategory::NotSupported,
            InstanceAtConflictingPath
            | InstanceAtExistingPath
            | InstanceNotAtWhitelistedPath
            | InstanceDetachOnline
            | InstanceRelocateOnline
            | InstanceMoveInProgress
            | InstanceLimitReached
            | InstanceOffline
            | DreamDaemonPortInUse
            | DeploymentPagerRunning
            | WatchdogNotRunning
            | RepoBusy
            | RepoCloning
            | RepoExists
            | DeploymentInProgress
            | ToolchainVersionInUse => ErrorCategory::Conflict,
            InstanceMissing | RepoMissing | DeploymentMissing | JobGone => ErrorCategory::Gone,
            SessionStartupTimeout
            | RepoOperationFailed
            | ToolchainInstallFailed
            | CompileFailed
            | JobCancelled => ErrorCategory::Internal,
            ToolchainVersionMissing => ErrorCategory::Conflict,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
