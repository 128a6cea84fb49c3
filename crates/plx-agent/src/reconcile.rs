//! Run lifecycle reconciliation
//!
//! [`reconcile`] is the pure transition function: given the tracked state of
//! a run and one observation (a pod event, an executor outcome or a condition
//! reported by the API) it returns the next state. Transitions the status
//! machine forbids are ignored, so terminal statuses are sticky.
//!
//! [`Reconciler`] serializes observations per run uuid and pushes every new
//! condition to the control plane.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use plx_common::retry::{retry_with_backoff, RetryConfig};
use plx_schema::{RunKind, Status, StatusCondition};

use crate::control_plane::ControlPlane;
use crate::{AgentError, Result};

/// Something the agent learned about a run
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    /// The executor accepted the backend object
    Submitted,
    /// Pods exist but the main container has not started
    PodPending,
    /// The main container is running
    PodRunning,
    /// The main container exited zero
    PodSucceeded,
    /// The main container failed
    PodFailed {
        /// Machine reason
        reason: String,
        /// Details
        message: Option<String>,
    },
    /// The scheduler cannot place the pods
    Unschedulable {
        /// Scheduler message
        message: String,
    },
    /// The platform asked to stop the run
    StopRequested,
    /// The backend object no longer exists
    Gone,
    /// Conversion or submission failed for good
    BackendFatal {
        /// Original reason
        reason: String,
    },
    /// A condition reported by the API
    Condition(StatusCondition),
}

impl Observation {
    /// Observation carried by a backend object fetched with `Executor::get`.
    ///
    /// Operation resources report `status.conditions`, the latest true one
    /// wins. Local runs report `state.status`. `None` means the object is
    /// gone; an object with no status yet yields nothing.
    pub fn from_backend(object: Option<&Value>) -> Option<Self> {
        let Some(object) = object else {
            return Some(Self::Gone);
        };
        if let Some(state) = object.get("state") {
            return Self::from_local_state(state);
        }
        let condition = object
            .pointer("/status/conditions")?
            .as_array()?
            .iter()
            .rev()
            .find(|c| is_true(c.get("status")))?;
        let status: Status = condition.get("type")?.as_str()?.to_lowercase().parse().ok()?;
        let reason = text(condition, "reason");
        let message = text(condition, "message");
        Some(match status {
            Status::Scheduled => return None,
            Status::Starting => Self::PodPending,
            Status::Running => Self::PodRunning,
            Status::Succeeded => Self::PodSucceeded,
            Status::Failed => Self::PodFailed {
                reason: reason.unwrap_or_else(|| "Failed".to_string()),
                message,
            },
            Status::Unschedulable => Self::Unschedulable {
                message: message.unwrap_or_default(),
            },
            other => Self::Condition(StatusCondition::new(
                other,
                reason.unwrap_or_else(|| "OperationCondition".to_string()),
                message,
                Utc::now(),
            )),
        })
    }

    fn from_local_state(state: &Value) -> Option<Self> {
        match state.get("status")?.as_str()? {
            "running" => Some(Self::PodRunning),
            "succeeded" => Some(Self::PodSucceeded),
            "failed" => {
                let step = state.get("step").and_then(Value::as_str).unwrap_or("main");
                let message = match state.get("code").and_then(Value::as_i64) {
                    Some(code) => format!("step `{}` exited with code {}", step, code),
                    None => format!("step `{}` did not run to completion", step),
                };
                Some(Self::PodFailed {
                    reason: "StepFailed".to_string(),
                    message: Some(message),
                })
            }
            _ => None,
        }
    }
}

fn is_true(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn text(object: &Value, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Tracked lifecycle of one run
#[derive(Clone, Debug, PartialEq)]
pub struct RunState {
    /// Owner name
    pub owner: String,
    /// Project name
    pub project: String,
    /// Run uuid
    pub uuid: String,
    /// Run kind
    pub kind: RunKind,
    /// Current status
    pub status: Status,
    /// Every transition, oldest first
    pub conditions: Vec<StatusCondition>,
    /// Retries consumed
    pub retries: u32,
    /// Retry budget from `termination.maxRetries`
    pub max_retries: u32,
}

impl RunState {
    /// State of a run the platform queued
    pub fn queued(owner: impl Into<String>, project: impl Into<String>, uuid: impl Into<String>, kind: RunKind) -> Self {
        Self {
            owner: owner.into(),
            project: project.into(),
            uuid: uuid.into(),
            kind,
            status: Status::Queued,
            conditions: Vec::new(),
            retries: 0,
            max_retries: 0,
        }
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Latest condition
    pub fn last_condition(&self) -> Option<&StatusCondition> {
        self.conditions.last()
    }
}

fn target(state: &RunState, observation: &Observation) -> (Status, String, Option<String>) {
    match observation {
        Observation::Submitted => (Status::Scheduled, "Submitted".to_string(), None),
        Observation::PodPending => (Status::Starting, "PodPending".to_string(), None),
        Observation::PodRunning => (Status::Running, "PodRunning".to_string(), None),
        Observation::PodSucceeded => (Status::Succeeded, "PodSucceeded".to_string(), None),
        Observation::PodFailed { reason, message } => {
            let retry = state.retries < state.max_retries && state.status.can_transition(Status::Retrying);
            let status = if retry { Status::Retrying } else { Status::Failed };
            (status, reason.clone(), message.clone())
        }
        Observation::Unschedulable { message } => {
            (Status::Unschedulable, "Unschedulable".to_string(), Some(message.clone()))
        }
        Observation::StopRequested => (Status::Stopping, "StopRequested".to_string(), None),
        Observation::Gone if state.status == Status::Stopping => (Status::Stopped, "Deleted".to_string(), None),
        Observation::Gone => (
            Status::Failed,
            "OperationDeleted".to_string(),
            Some("the backend object disappeared".to_string()),
        ),
        Observation::BackendFatal { reason } => (Status::Failed, "BackendError".to_string(), Some(reason.clone())),
        Observation::Condition(condition) => (
            condition.type_,
            condition.reason.clone().unwrap_or_else(|| "ApiCondition".to_string()),
            condition.message.clone(),
        ),
    }
}

/// Next state of a run after an observation.
///
/// Repeating the current status is a no-op. Forbidden transitions, including
/// any transition out of a terminal status, leave the state untouched.
pub fn reconcile(state: &RunState, observation: &Observation, now: DateTime<Utc>) -> RunState {
    let (next, reason, message) = target(state, observation);
    if next == state.status || !state.status.can_transition(next) {
        debug!(
            run_uuid = %state.uuid,
            from = %state.status,
            to = %next,
            "ignoring transition"
        );
        return state.clone();
    }
    let mut updated = state.clone();
    if next == Status::Retrying {
        updated.retries += 1;
    }
    updated.status = next;
    updated.conditions.push(StatusCondition::new(next, reason, message, now));
    updated
}

/// Per-run serialized reconciliation
pub struct Reconciler {
    runs: DashMap<String, Arc<Mutex<RunState>>>,
    control_plane: Arc<dyn ControlPlane>,
    retry: RetryConfig,
}

impl Reconciler {
    /// Reconciler reporting to `control_plane`
    pub fn new(control_plane: Arc<dyn ControlPlane>, retry: RetryConfig) -> Self {
        Self {
            runs: DashMap::new(),
            control_plane,
            retry,
        }
    }

    /// Start tracking a run; an already tracked run keeps its state
    pub fn track(&self, state: RunState) {
        self.runs
            .entry(state.uuid.clone())
            .or_insert_with(|| Arc::new(Mutex::new(state)));
    }

    /// Whether a run is tracked
    pub fn is_tracked(&self, run_uuid: &str) -> bool {
        self.runs.contains_key(run_uuid)
    }

    /// Current state of a run
    pub async fn state(&self, run_uuid: &str) -> Option<RunState> {
        let lock = self.runs.get(run_uuid).map(|entry| Arc::clone(entry.value()))?;
        let state = lock.lock().await;
        Some(state.clone())
    }

    /// Snapshot of every tracked run not locked by an observation
    pub fn tracked(&self) -> Vec<RunState> {
        self.runs
            .iter()
            .filter_map(|entry| entry.value().try_lock().ok().map(|state| state.clone()))
            .collect()
    }

    /// Stop tracking terminal runs
    pub fn prune(&self) -> usize {
        let mut terminal = Vec::new();
        for entry in self.runs.iter() {
            if let Ok(state) = entry.value().try_lock() {
                if state.status.is_terminal() {
                    terminal.push(entry.key().clone());
                }
            }
        }
        for uuid in &terminal {
            self.runs.remove(uuid);
        }
        terminal.len()
    }

    /// Apply an observation and report the new condition, if any
    pub async fn observe(&self, run_uuid: &str, observation: Observation) -> Result<Status> {
        let lock = self
            .runs
            .get(run_uuid)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AgentError::Agent(format!("run `{}` is not tracked", run_uuid)))?;
        let mut state = lock.lock().await;
        let next = reconcile(&state, &observation, Utc::now());
        if next.conditions.len() == state.conditions.len() {
            return Ok(state.status);
        }
        info!(run_uuid = %run_uuid, from = %state.status, to = %next.status, "run transition");
        *state = next;
        if let Some(condition) = state.last_condition() {
            let plane = self.control_plane.as_ref();
            let (owner, project) = (state.owner.as_str(), state.project.as_str());
            retry_with_backoff(&self.retry, "create_run_status", move || {
                plane.create_run_status(owner, project, run_uuid, condition)
            })
            .await?;
        }
        Ok(state.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::MockControlPlane;
    use rstest::rstest;
    use serde_json::json;

    fn state(status: Status) -> RunState {
        RunState {
            status,
            ..RunState::queued("acme", "mnist", "abc", RunKind::Job)
        }
    }

    fn failed() -> Observation {
        Observation::PodFailed {
            reason: "Error".into(),
            message: Some("exit code 1".into()),
        }
    }

    #[rstest]
    #[case::submitted(Status::Queued, Observation::Submitted, Status::Scheduled)]
    #[case::pending(Status::Scheduled, Observation::PodPending, Status::Starting)]
    #[case::running(Status::Starting, Observation::PodRunning, Status::Running)]
    #[case::succeeded(Status::Running, Observation::PodSucceeded, Status::Succeeded)]
    #[case::stop(Status::Running, Observation::StopRequested, Status::Stopping)]
    #[case::stopped(Status::Stopping, Observation::Gone, Status::Stopped)]
    #[case::deleted(Status::Running, Observation::Gone, Status::Failed)]
    #[case::fatal(Status::Queued, Observation::BackendFatal { reason: "forbidden".into() }, Status::Failed)]
    #[case::unschedulable(Status::Scheduled, Observation::Unschedulable { message: "no gpu".into() }, Status::Unschedulable)]
    #[case::no_budget(Status::Running, failed(), Status::Failed)]
    fn transitions(#[case] from: Status, #[case] observation: Observation, #[case] to: Status) {
        let next = reconcile(&state(from), &observation, Utc::now());
        assert_eq!(next.status, to);
        assert_eq!(next.conditions.len(), 1);
        assert_eq!(next.conditions[0].type_, to);
    }

    #[rstest]
    #[case::succeeded(Status::Succeeded)]
    #[case::failed(Status::Failed)]
    #[case::stopped(Status::Stopped)]
    fn terminal_statuses_are_sticky(#[case] terminal: Status) {
        let current = state(terminal);
        for observation in [Observation::PodRunning, Observation::StopRequested, Observation::Gone, failed()] {
            assert_eq!(reconcile(&current, &observation, Utc::now()), current);
        }
    }

    #[test]
    fn failures_retry_within_budget() {
        let mut current = state(Status::Running).with_max_retries(1);
        current = reconcile(&current, &failed(), Utc::now());
        assert_eq!(current.status, Status::Retrying);
        assert_eq!(current.retries, 1);

        current = reconcile(&current, &Observation::PodRunning, Utc::now());
        assert_eq!(current.status, Status::Running);

        current = reconcile(&current, &failed(), Utc::now());
        assert_eq!(current.status, Status::Failed);
        assert_eq!(current.last_condition().unwrap().reason.as_deref(), Some("Error"));
    }

    #[test]
    fn repeated_status_adds_no_condition() {
        let current = state(Status::Running);
        assert_eq!(reconcile(&current, &Observation::PodRunning, Utc::now()), current);
    }

    #[test]
    fn api_conditions_drive_upstream_waits() {
        let current = state(Status::WaitingUpstream);
        let condition = StatusCondition::new(Status::UpstreamFailed, "UpstreamFailed", None, Utc::now());
        let next = reconcile(&current, &Observation::Condition(condition), Utc::now());
        assert_eq!(next.status, Status::UpstreamFailed);
    }

    #[tokio::test]
    async fn observe_reports_each_new_condition_once() {
        let mut plane = MockControlPlane::new();
        plane
            .expect_create_run_status()
            .withf(|owner, project, uuid, condition| {
                owner == "acme" && project == "mnist" && uuid == "abc" && condition.type_ == Status::Scheduled
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let reconciler = Reconciler::new(Arc::new(plane), RetryConfig::with_max_attempts(1));
        reconciler.track(state(Status::Queued));

        assert_eq!(reconciler.observe("abc", Observation::Submitted).await.unwrap(), Status::Scheduled);
        assert_eq!(reconciler.observe("abc", Observation::Submitted).await.unwrap(), Status::Scheduled);
        assert_eq!(reconciler.state("abc").await.unwrap().conditions.len(), 1);
    }

    #[rstest]
    #[case::gone(None, Some(Observation::Gone))]
    #[case::no_status(Some(json!({"kind": "Operation"})), None)]
    #[case::starting(
        Some(json!({"status": {"conditions": [{"type": "Starting", "status": "True"}]}})),
        Some(Observation::PodPending)
    )]
    #[case::latest_true_wins(
        Some(json!({"status": {"conditions": [
            {"type": "running", "status": "True"},
            {"type": "succeeded", "status": "True"},
            {"type": "warning", "status": "False"},
        ]}})),
        Some(Observation::PodSucceeded)
    )]
    #[case::failed(
        Some(json!({"status": {"conditions": [{"type": "Failed", "status": "True", "reason": "OOMKilled", "message": "out of memory"}]}})),
        Some(Observation::PodFailed { reason: "OOMKilled".into(), message: Some("out of memory".into()) })
    )]
    #[case::unschedulable(
        Some(json!({"status": {"conditions": [{"type": "unschedulable", "status": true, "message": "no gpu"}]}})),
        Some(Observation::Unschedulable { message: "no gpu".into() })
    )]
    #[case::local_running(Some(json!({"state": {"status": "running", "step": "main"}})), Some(Observation::PodRunning))]
    #[case::local_failed(
        Some(json!({"state": {"status": "failed", "step": "main", "code": 3}})),
        Some(Observation::PodFailed { reason: "StepFailed".into(), message: Some("step `main` exited with code 3".into()) })
    )]
    fn backend_objects_map_to_observations(#[case] object: Option<Value>, #[case] expected: Option<Observation>) {
        assert_eq!(Observation::from_backend(object.as_ref()), expected);
    }

    #[test]
    fn other_backend_statuses_become_conditions() {
        let object = json!({"status": {"conditions": [{"type": "processing", "status": "True"}]}});
        match Observation::from_backend(Some(&object)) {
            Some(Observation::Condition(condition)) => assert_eq!(condition.type_, Status::Processing),
            other => panic!("unexpected observation: {:?}", other),
        }
    }

    #[tokio::test]
    async fn untracked_runs_are_rejected() {
        let reconciler = Reconciler::new(Arc::new(MockControlPlane::new()), RetryConfig::with_max_attempts(1));
        assert!(reconciler.observe("nope", Observation::PodRunning).await.is_err());
    }

    #[tokio::test]
    async fn prune_drops_terminal_runs() {
        let reconciler = Reconciler::new(Arc::new(MockControlPlane::new()), RetryConfig::with_max_attempts(1));
        reconciler.track(state(Status::Succeeded));
        reconciler.track(RunState {
            uuid: "def".into(),
            ..state(Status::Running)
        });
        assert_eq!(reconciler.prune(), 1);
        assert!(!reconciler.is_tracked("abc"));
        assert!(reconciler.is_tracked("def"));
    }
}
