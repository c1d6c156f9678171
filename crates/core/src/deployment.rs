// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment records: the output of one compile job.

use crate::instance::InstanceId;
use crate::session::SecurityLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a deployment (one compile-job result).
    pub struct DeploymentId("dep-");
}

/// A provisional merge of an external change onto the working revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMerge {
    /// Pull-request number on the origin.
    pub number: u64,
    /// The exact revision that was merged.
    pub target_sha: String,
    pub merged_by: String,
    pub merged_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Where a deployment's code came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    /// Working-tree head at compile time.
    pub sha: String,
    /// Head of the tracked origin branch at compile time.
    pub origin_sha: String,
    #[serde(default)]
    pub test_merges: Vec<TestMerge>,
}

/// Artifacts produced by compiling an instance's repository at a
/// specific revision. Staged into two parallel directories so the
/// watchdog can hot-swap without downtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub instance: InstanceId,
    pub revision: RevisionInfo,
    /// Floor for the session security level.
    pub min_security: SecurityLevel,
    pub toolchain_version: String,
    /// Compiled artifact file name (e.g. `station.dmb`).
    pub artifact_name: String,
    pub primary_dir: PathBuf,
    pub secondary_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Directory that is live for the given designation.
    pub fn live_dir(&self, is_primary: bool) -> &PathBuf {
        if is_primary {
            &self.primary_dir
        } else {
            &self.secondary_dir
        }
    }
}
