// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job records: long-running operations with progress and cancellation.

use crate::clock::Clock;
use crate::error::ErrorCode;
use crate::instance::InstanceId;
use crate::rights::{PermissionSet, RightsType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a job.
    ///
    /// Each long-running operation gets one; jobs never restart.
    pub struct JobId("job-");
}

/// Terminal failure of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

/// A long-running operation tracked by the JobManager.
///
/// Lifecycle: registered → running → (completed | errored | cancelled).
/// Progress is monotonic non-decreasing; terminal transitions set
/// `stopped_at` together with exactly one outcome field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// None for daemon-scope jobs.
    pub instance: Option<InstanceId>,
    pub description: String,
    pub started_by: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Rights group of the cancel right.
    pub cancel_right_type: RightsType,
    /// Bit(s) within the group required to cancel this job.
    pub cancel_right: u64,
    /// 0–100.
    pub progress: u8,
    pub error: Option<JobError>,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_requested_by: Option<String>,
}

impl Job {
    pub fn new(
        instance: Option<InstanceId>,
        description: impl Into<String>,
        started_by: impl Into<String>,
        cancel_right_type: RightsType,
        cancel_right: u64,
        clock: &impl Clock,
    ) -> Self {
        Self {
            id: JobId::generate(),
            instance,
            description: description.into(),
            started_by: started_by.into(),
            started_at: clock.now_utc(),
            stopped_at: None,
            cancel_right_type,
            cancel_right,
            progress: 0,
            error: None,
            cancelled: false,
            cancel_requested_by: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stopped_at.is_some()
    }

    /// Record progress. Values above 100 are capped; values below the
    /// current progress are floored (progress never moves backwards).
    pub fn report_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    /// Terminal transition: success.
    pub fn finish_ok(&mut self, at: DateTime<Utc>) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(at);
            self.progress = 100;
        }
    }

    /// Terminal transition: failure.
    pub fn finish_error(&mut self, code: ErrorCode, message: impl Into<String>, at: DateTime<Utc>) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(at);
            self.error = Some(JobError { code, message: message.into() });
        }
    }

    /// Terminal transition: cancelled.
    pub fn finish_cancelled(&mut self, at: DateTime<Utc>) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(at);
            self.cancelled = true;
        }
    }

    /// Whether `user` may cancel this job: either they started it, or
    /// they hold the job's cancel right on its instance.
    pub fn may_cancel(&self, user: &str, rights: &PermissionSet) -> bool {
        self.started_by == user || rights.allows(self.cancel_right_type, self.cancel_right)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
