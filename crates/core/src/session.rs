// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session launch parameters and reattach records.

use crate::deployment::DeploymentId;
use crate::error::ErrorCode;
use crate::instance::InstanceId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for one supervised game-server session.
    pub struct SessionId("ses-");
}

/// Sandbox level the game server runs at.
///
/// The derived ordering is the clamp order: `Ultrasafe < Safe < Trusted`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Ultrasafe,
    #[default]
    Safe,
    Trusted,
}

impl SecurityLevel {
    /// The word passed on the game-server command line.
    pub fn command_word(self) -> &'static str {
        match self {
            SecurityLevel::Ultrasafe => "ultrasafe",
            SecurityLevel::Safe => "safe",
            SecurityLevel::Trusted => "trusted",
        }
    }
}

crate::simple_display! {
    SecurityLevel {
        Ultrasafe => "ultrasafe",
        Safe => "safe",
        Trusted => "trusted",
    }
}

/// What a session should do at its next natural reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RebootState {
    #[default]
    Normal,
    Restart,
    Shutdown,
}

crate::simple_display! {
    RebootState {
        Normal => "normal",
        Restart => "restart",
        Shutdown => "shutdown",
    }
}

/// Configured launch parameters for an instance's game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub allow_web_client: bool,
    pub security_level: SecurityLevel,
    pub primary_port: u16,
    pub secondary_port: u16,
    pub startup_timeout_secs: u64,
    /// 0 disables the heartbeat.
    pub heartbeat_secs: u64,
    /// Applied symmetrically to topic send and receive.
    pub topic_timeout_secs: u64,
}

impl Default for LaunchParams {
    fn default() -> Self {
        Self {
            allow_web_client: false,
            security_level: SecurityLevel::Safe,
            primary_port: 1337,
            secondary_port: 1338,
            startup_timeout_secs: 60,
            heartbeat_secs: 60,
            topic_timeout_secs: 5,
        }
    }
}

impl LaunchParams {
    /// Write-time validation. Ports must be nonzero and distinct.
    pub fn validate(&self) -> Result<(), ErrorCode> {
        if self.primary_port == 0 || self.secondary_port == 0 {
            return Err(ErrorCode::DreamDaemonPortOutOfRange);
        }
        if self.primary_port == self.secondary_port {
            return Err(ErrorCode::DreamDaemonDuplicatePorts);
        }
        Ok(())
    }

    /// Security level actually used at launch: the configured level
    /// clamped up to the deployment's minimum.
    pub fn effective_security(&self, minimum: SecurityLevel) -> SecurityLevel {
        self.security_level.max(minimum)
    }
}

/// Persisted handle for rebinding to a running session after a
/// controller restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReattachRecord {
    pub instance: InstanceId,
    pub pid: u32,
    /// Opaque per-launch secret identifying the session on the bridge.
    pub access_identifier: String,
    pub port: u16,
    /// Which staging directory is live.
    pub is_primary: bool,
    pub reboot_state: RebootState,
    pub security_level: SecurityLevel,
    pub deployment: DeploymentId,
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
