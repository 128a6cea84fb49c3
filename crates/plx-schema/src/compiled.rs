//! Compiled operations
//!
//! A [`CompiledOperation`] is the fully resolved form handed to converters:
//! the component run after presets and patches, params reduced to literal
//! values, templates rendered, per-replica contexts attached.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::IoSpec;
use crate::matrix::{EarlyStopping, Matrix};
use crate::policies::{Cache, Plugins, Termination};
use crate::run::{Run, RunKind};
use crate::schedule::{EventTrigger, Hook, Schedule};
use crate::statuses::{Status, TriggerPolicy};

/// Run metadata exposed to templates as `globals.*`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Globals {
    /// Owner (organization) name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    /// Project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// `<owner>.<project>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_unique_name: Option<String>,
    /// Project uuid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_uuid: Option<String>,
    /// `<owner>.<project>.runs.<uuid>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_info: Option<String>,
    /// Run name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Run uuid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Current status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Kubernetes namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Matrix iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// Context mount root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_path: Option<String>,
    /// Run artifacts path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_path: Option<String>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Compilation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_at: Option<DateTime<Utc>>,
    /// Scheduled time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_at: Option<DateTime<Utc>>,
    /// Start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// End time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Seconds between start and end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// `copy`, `restart` or `cache`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloning_kind: Option<String>,
    /// Uuid of the run this one was cloned from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_uuid: Option<String>,
    /// Not part of a pipeline
    #[serde(default = "default_true")]
    pub is_independent: bool,
}

fn default_true() -> bool {
    true
}

impl Globals {
    /// Globals for a run uuid
    pub fn for_run(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            is_independent: true,
            ..Default::default()
        }
    }
}

/// What a replica role sees when its templates are rendered
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaContext {
    /// Resolved pod count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    /// Init item kinds, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init: Vec<String>,
    /// Connections requested by the role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<String>,
}

/// A fully resolved operation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompiledOperation {
    /// Document version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<f64>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Cache behavior
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<Cache>,
    /// Termination limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
    /// Platform features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Plugins>,
    /// Declared inputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<IoSpec>,
    /// Declared outputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<IoSpec>,
    /// Literal param values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    /// Resolved run
    pub run: Run,
    /// Per-role contexts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contexts: BTreeMap<String, ReplicaContext>,
    /// Run metadata
    #[serde(default)]
    pub globals: Globals,
    /// Matrix iteration that produced this operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// Matrix still to expand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,
    /// Schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Hooks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
    /// Event triggers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventTrigger>,
    /// Upstream operations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Upstream status policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerPolicy>,
    /// Statuses upstreams must reach, flattened from `trigger`
    #[serde(default, alias = "trigger_statuses", skip_serializing_if = "Vec::is_empty")]
    pub trigger_statuses: Vec<Status>,
    /// Early stopping policies of the matrix
    #[serde(default, alias = "early_stopping", skip_serializing_if = "Vec::is_empty")]
    pub early_stopping: Vec<EarlyStopping>,
    /// Connections used by the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<String>,
    /// Approval flag
    #[serde(default, alias = "is_approved", skip_serializing_if = "Option::is_none")]
    pub is_approved: Option<bool>,
    /// Cost weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl CompiledOperation {
    /// Compiled operation around a bare run
    pub fn from_run(run: Run) -> Self {
        Self {
            version: None,
            name: None,
            description: None,
            tags: Vec::new(),
            queue: None,
            cache: None,
            termination: None,
            plugins: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: BTreeMap::new(),
            run,
            contexts: BTreeMap::new(),
            globals: Globals::default(),
            iteration: None,
            matrix: None,
            schedule: None,
            hooks: Vec::new(),
            events: Vec::new(),
            dependencies: Vec::new(),
            trigger: None,
            trigger_statuses: Vec::new(),
            early_stopping: Vec::new(),
            connections: Vec::new(),
            is_approved: None,
            cost: None,
        }
    }

    /// Kind of the run
    pub fn run_kind(&self) -> RunKind {
        self.run.kind()
    }

    /// Plugins, defaulted when unset
    pub fn plugins(&self) -> Plugins {
        self.plugins.clone().unwrap_or_default()
    }

    /// Run uuid from the globals
    pub fn uuid(&self) -> Option<&str> {
        self.globals.uuid.as_deref()
    }
}
