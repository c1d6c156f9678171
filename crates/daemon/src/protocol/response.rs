// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Responses to control-surface clients.

use serde::{Deserialize, Serialize};
use warden_core::{ErrorCode, Instance, Job, TestMerge};
use warden_engine::WatchdogStatus;

/// Repository snapshot for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoSummary {
    pub origin: Option<String>,
    pub head_sha: Option<String>,
    pub reference: Option<String>,
    pub tracking_branch: bool,
    pub pending_test_merges: Vec<TestMerge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success
    Ok,

    /// Version handshake response
    Hello { version: String },

    /// Error response; `status` is the HTTP status the external
    /// adapter reports for this category.
    Error { code: ErrorCode, value: u16, status: u16, message: String },

    Instance { instance: Box<Instance> },
    InstanceCreated { instance: Box<Instance>, attached: bool },
    Instances { instances: Vec<Instance> },

    /// Long-running request accepted; poll the job.
    Job { job: Box<Job> },
    Jobs { jobs: Vec<Job> },

    Repo { repo: Box<RepoSummary> },

    Server { status: Box<WatchdogStatus> },
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            value: code.value(),
            status: code.category().status(),
            message: message.into(),
        }
    }

    pub fn job(job: Job) -> Self {
        Response::Job { job: Box::new(job) }
    }

    pub fn instance(instance: Instance) -> Self {
        Response::Instance { instance: Box::new(instance) }
    }
}
