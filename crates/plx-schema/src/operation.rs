//! User-authored operations

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::Component;
use crate::io::Param;
use crate::matrix::Matrix;
use crate::policies::{Cache, Plugins, Termination};
use crate::schedule::{EventTrigger, Hook, Schedule};
use crate::statuses::TriggerPolicy;
use crate::SchemaError;

/// How `runPatch` and preset layers are applied to the component run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStrategy {
    /// Patch values replace base values
    Replace,
    /// Fields named by the patch are cleared
    Isnull,
    /// Patch wins; lists are `base + patch`
    #[default]
    PostMerge,
    /// Base wins; lists are `patch + base`
    PreMerge,
}

impl PatchStrategy {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Isnull => "isnull",
            Self::PostMerge => "post_merge",
            Self::PreMerge => "pre_merge",
        }
    }
}

impl fmt::Display for PatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an operation's component comes from
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentReference {
    /// Inline component
    Inline(Box<Component>),
    /// Hub component `name[:tag]`
    Hub(String),
    /// Local file
    Path(String),
    /// Remote URL
    Url(String),
    /// Another operation in the enclosing DAG
    Dag(String),
}

impl ComponentReference {
    /// Source name used in cycle detection
    pub fn source(&self) -> &'static str {
        match self {
            Self::Inline(_) => "inline",
            Self::Hub(_) => "hubRef",
            Self::Path(_) => "pathRef",
            Self::Url(_) => "urlRef",
            Self::Dag(_) => "dagRef",
        }
    }

    /// Identifier within the source
    pub fn identifier(&self) -> String {
        match self {
            Self::Inline(c) => c.name.clone().unwrap_or_default(),
            Self::Hub(s) | Self::Path(s) | Self::Url(s) | Self::Dag(s) => s.clone(),
        }
    }
}

/// A run request: a component plus params and orchestration settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
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
    /// Presets, applied in order before the operation's own settings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presets: Vec<String>,
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
    /// Inline component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Box<Component>>,
    /// Hub reference
    #[serde(default, alias = "hub_ref", skip_serializing_if = "Option::is_none")]
    pub hub_ref: Option<String>,
    /// Path reference
    #[serde(default, alias = "path_ref", skip_serializing_if = "Option::is_none")]
    pub path_ref: Option<String>,
    /// URL reference
    #[serde(default, alias = "url_ref", skip_serializing_if = "Option::is_none")]
    pub url_ref: Option<String>,
    /// DAG reference
    #[serde(default, alias = "dag_ref", skip_serializing_if = "Option::is_none")]
    pub dag_ref: Option<String>,
    /// Values for the component's inputs and outputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Param>,
    /// Hyperparameter search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,
    /// Recurring execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Operations started on status changes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
    /// Upstream event triggers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventTrigger>,
    /// Upstream operations in a DAG
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Upstream status policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerPolicy>,
    /// Extra start condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
    /// Skip when an upstream was skipped
    #[serde(default, alias = "skip_on_upstream_skip", skip_serializing_if = "Option::is_none")]
    pub skip_on_upstream_skip: Option<bool>,
    /// Partial run merged into the component's run
    #[serde(default, alias = "run_patch", skip_serializing_if = "Option::is_none")]
    pub run_patch: Option<Value>,
    /// How `runPatch` is merged
    #[serde(default, alias = "patch_strategy", skip_serializing_if = "Option::is_none")]
    pub patch_strategy: Option<PatchStrategy>,
    /// Whether this document is a preset
    #[serde(default, alias = "is_preset", skip_serializing_if = "Option::is_none")]
    pub is_preset: Option<bool>,
    /// Approval flag
    #[serde(default, alias = "is_approved", skip_serializing_if = "Option::is_none")]
    pub is_approved: Option<bool>,
    /// Cost weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Operation {
    /// The single component source
    pub fn component_reference(&self) -> Result<ComponentReference, SchemaError> {
        let mut found = Vec::new();
        if let Some(c) = &self.component {
            found.push(ComponentReference::Inline(c.clone()));
        }
        if let Some(s) = &self.hub_ref {
            found.push(ComponentReference::Hub(s.clone()));
        }
        if let Some(s) = &self.path_ref {
            found.push(ComponentReference::Path(s.clone()));
        }
        if let Some(s) = &self.url_ref {
            found.push(ComponentReference::Url(s.clone()));
        }
        if let Some(s) = &self.dag_ref {
            found.push(ComponentReference::Dag(s.clone()));
        }
        if found.len() == 1 {
            return Ok(found.remove(0));
        }
        Err(SchemaError::schema(
            "operation",
            "exactly one of component, hubRef, pathRef, urlRef, dagRef",
            format!(
                "[{}]",
                found.iter().map(|r| r.source()).collect::<Vec<_>>().join(", ")
            ),
        ))
    }

    /// Structural checks that serde cannot express
    pub fn validate(&self) -> Result<(), SchemaError> {
        self.component_reference()?;
        let orchestrated = self.matrix.is_some() || self.schedule.is_some();
        let reactive = !self.hooks.is_empty() || !self.events.is_empty();
        if orchestrated && reactive {
            return Err(SchemaError::schema(
                "operation",
                "matrix and schedule without hooks or events",
                "both",
            ));
        }
        if let Some(component) = &self.component {
            component.validate_io_names()?;
        }
        Ok(())
    }

    /// Operation wrapping an inline component
    pub fn from_component(component: Component) -> Self {
        Self {
            component: Some(Box::new(component)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Value {
        json!({"run": {"kind": "job", "container": {"image": "busybox"}}})
    }

    #[test]
    fn exactly_one_component_source() {
        let op: Operation = serde_json::from_value(json!({"hubRef": "mnist:v1"})).unwrap();
        assert_eq!(
            op.component_reference().unwrap(),
            ComponentReference::Hub("mnist:v1".to_string())
        );

        let op: Operation =
            serde_json::from_value(json!({"hub_ref": "mnist", "component": job()})).unwrap();
        let err = op.component_reference().unwrap_err();
        assert!(err.to_string().contains("hubRef"));

        let op = Operation::default();
        assert!(op.component_reference().is_err());
    }

    #[test]
    fn matrix_excludes_hooks() {
        let op: Operation = serde_json::from_value(json!({
            "component": job(),
            "matrix": {"kind": "mapping", "values": [{"a": 1}]},
            "hooks": [{"trigger": "succeeded", "hubRef": "slack"}],
        }))
        .unwrap();
        assert!(op.validate().is_err());
    }

    #[test]
    fn patch_strategy_wire_names() {
        let op: Operation = serde_json::from_value(json!({
            "component": job(),
            "patchStrategy": "pre_merge",
        }))
        .unwrap();
        assert_eq!(op.patch_strategy, Some(PatchStrategy::PreMerge));
        assert_eq!(PatchStrategy::default().to_string(), "post_merge");
    }
}
