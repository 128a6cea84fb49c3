//! Run statuses, conditions and trigger policies

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// Lifecycle status of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created
    Created,
    /// Resuming a previous run
    Resuming,
    /// Waiting for its schedule
    OnSchedule,
    /// Compiled
    Compiled,
    /// Waiting for upstream runs
    WaitingUpstream,
    /// Queued
    Queued,
    /// Scheduled on the backend
    Scheduled,
    /// Pods starting
    Starting,
    /// Running
    Running,
    /// Post-processing
    Processing,
    /// Being stopped
    Stopping,
    /// Failed, recovery pending
    FailedRecovery,
    /// Running with warnings
    Warning,
    /// Cannot be scheduled
    Unschedulable,
    /// Unknown
    Unknown,
    /// Done (succeeded, failed or stopped)
    Done,
    /// Retrying after a failure
    Retrying,
    /// Succeeded
    Succeeded,
    /// Failed
    Failed,
    /// Stopped
    Stopped,
    /// Skipped
    Skipped,
    /// An upstream run failed
    UpstreamFailed,
}

impl Status {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Resuming => "resuming",
            Self::OnSchedule => "on_schedule",
            Self::Compiled => "compiled",
            Self::WaitingUpstream => "waiting_upstream",
            Self::Queued => "queued",
            Self::Scheduled => "scheduled",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Processing => "processing",
            Self::Stopping => "stopping",
            Self::FailedRecovery => "failed_recovery",
            Self::Warning => "warning",
            Self::Unschedulable => "unschedulable",
            Self::Unknown => "unknown",
            Self::Done => "done",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Skipped => "skipped",
            Self::UpstreamFailed => "upstream_failed",
        }
    }

    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Stopped | Self::Skipped | Self::UpstreamFailed
        )
    }

    /// Statuses in which pods may be running
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Scheduled
                | Self::Starting
                | Self::Running
                | Self::Processing
                | Self::Warning
                | Self::Unschedulable
                | Self::Retrying
        )
    }

    /// Statuses before submission to the backend
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::Resuming
                | Self::OnSchedule
                | Self::Compiled
                | Self::WaitingUpstream
                | Self::Queued
        )
    }

    /// Whether `self → next` is allowed by the lifecycle
    pub fn can_transition(&self, next: Status) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        match next {
            Self::Stopping | Self::Stopped => true,
            Self::Created => false,
            Self::WaitingUpstream => self.is_pending() && *self != Self::Queued,
            Self::Skipped | Self::UpstreamFailed => self.is_pending(),
            Self::Compiled => matches!(self, Self::Created | Self::Resuming | Self::OnSchedule),
            Self::Queued => self.is_pending(),
            Self::Retrying => self.is_running() || *self == Self::FailedRecovery,
            Self::Failed | Self::Unknown | Self::Done | Self::Warning => true,
            _ => *self != Self::Stopping,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| SchemaError::schema("status", "a known status", s.to_string()))
    }
}

/// One status transition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusCondition {
    /// New status
    #[serde(rename = "type")]
    pub type_: Status,
    /// Whether the condition holds (`"True"`)
    pub status: String,
    /// Machine reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last time the condition was refreshed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl StatusCondition {
    /// A true condition for `status` at `now`
    pub fn new(
        status: Status,
        reason: impl Into<String>,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: status,
            status: "True".to_string(),
            reason: Some(reason.into()),
            message,
            last_update_time: Some(now),
            last_transition_time: Some(now),
        }
    }
}

/// When a downstream run triggers relative to its upstreams
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Every upstream succeeded
    AllSucceeded,
    /// Every upstream failed
    AllFailed,
    /// Every upstream is done
    AllDone,
    /// At least one upstream succeeded
    OneSucceeded,
    /// At least one upstream failed
    OneFailed,
    /// At least one upstream is done
    OneDone,
}

impl TriggerPolicy {
    /// Statuses an upstream must reach for this policy
    pub fn statuses(&self) -> Vec<Status> {
        match self {
            Self::AllSucceeded | Self::OneSucceeded => vec![Status::Succeeded],
            Self::AllFailed | Self::OneFailed => vec![Status::Failed],
            Self::AllDone | Self::OneDone => vec![Status::Done],
        }
    }

    /// Whether every upstream must match
    pub fn requires_all(&self) -> bool {
        matches!(self, Self::AllSucceeded | Self::AllFailed | Self::AllDone)
    }
}
