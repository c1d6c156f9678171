// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration file.
//!
//! JSON with PascalCase sections. Every field has a default so a
//! missing file or an empty object is a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub general: GeneralConfig,
    pub file_logging: FileLoggingConfig,
    pub database: DatabaseConfig,
    pub control_panel: ControlPanelConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct GeneralConfig {
    pub instance_limit: usize,
    /// When set, instance paths must live under one of these roots.
    pub valid_instance_paths: Option<Vec<PathBuf>>,
    /// Local mirror of pre-extracted toolchain versions.
    pub toolchain_mirror: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { instance_limit: 10, valid_instance_paths: None, toolchain_mirror: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileLoggingConfig {
    pub directory: Option<PathBuf>,
    pub disable: bool,
    pub log_level: String,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self { directory: None, disable: false, log_level: "info".into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatabaseConfig {
    /// Snapshot location. Defaults to `<state dir>/state.json`.
    pub path: Option<PathBuf>,
}

/// Consumed by the external web control panel; carried here so one
/// file configures the whole deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ControlPanelConfig {
    pub enable: bool,
    pub port: u16,
}

impl Default for ControlPanelConfig {
    fn default() -> Self {
        Self { enable: false, port: 5579 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionConfig {
    /// Port the bridge adapter listens on; handed to every launch.
    pub bridge_port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { bridge_port: 5580 }
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read { path: path.display().to_string(), source: e }),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
