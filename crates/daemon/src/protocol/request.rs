// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Requests from control-surface clients.
//!
//! Every request names the authenticated caller; token verification
//! happened in the adapter before the frame reaches us.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use warden_core::{InstanceId, InstanceUpdate, JobId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Version handshake.
    Hello { version: String },

    InstanceCreate { user: String, name: String, path: PathBuf },
    InstanceList { user: String },
    InstanceGet { user: String, id: InstanceId },
    InstanceUpdate { user: String, id: InstanceId, update: InstanceUpdate },
    InstanceDetach { user: String, id: InstanceId },

    JobList { user: String, instance: Option<InstanceId> },
    JobGet { user: String, id: JobId },
    JobCancel { user: String, id: JobId },

    RepoClone { user: String, id: InstanceId, origin: String, reference: Option<String> },
    RepoFetch { user: String, id: InstanceId },
    RepoCheckout { user: String, id: InstanceId, committish: String },
    RepoResetOrigin { user: String, id: InstanceId },
    RepoResetSha { user: String, id: InstanceId, sha: String },
    RepoSynchronize { user: String, id: InstanceId },
    RepoTestMerge {
        user: String,
        id: InstanceId,
        number: u64,
        target_sha: Option<String>,
        comment: Option<String>,
    },
    RepoStatus { user: String, id: InstanceId },

    ToolchainInstall { user: String, id: InstanceId, version: String },

    Deploy { user: String, id: InstanceId },

    ServerLaunch { user: String, id: InstanceId },
    ServerStop { user: String, id: InstanceId, graceful: bool },
    ServerRestart { user: String, id: InstanceId },
    ServerSoftRestart { user: String, id: InstanceId },
    ServerSoftShutdown { user: String, id: InstanceId },
    ServerStatus { user: String, id: InstanceId },
}
