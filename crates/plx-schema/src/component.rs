//! Reusable components

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::IoSpec;
use crate::policies::{Cache, Plugins, Termination};
use crate::run::Run;
use crate::SchemaError;

/// A typed, reusable unit: inputs, outputs and a run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
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
    /// Presets applied before the user's own patch
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
    /// Declared inputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<IoSpec>,
    /// Declared outputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<IoSpec>,
    /// What to run
    pub run: Run,
    /// Preset-only template settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
    /// Approval flag
    #[serde(default, alias = "is_approved", skip_serializing_if = "Option::is_none")]
    pub is_approved: Option<bool>,
    /// Cost weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Component {
    /// Component around a run with everything else unset
    pub fn from_run(run: Run) -> Self {
        Self {
            version: None,
            name: None,
            description: None,
            tags: Vec::new(),
            presets: Vec::new(),
            queue: None,
            cache: None,
            termination: None,
            plugins: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            run,
            template: None,
            is_approved: None,
            cost: None,
        }
    }

    /// Declared input or output by name
    pub fn io(&self, name: &str) -> Option<(&IoSpec, bool)> {
        self.inputs
            .iter()
            .find(|io| io.name == name)
            .map(|io| (io, false))
            .or_else(|| self.outputs.iter().find(|io| io.name == name).map(|io| (io, true)))
    }

    /// Reject duplicate names across inputs and outputs
    pub fn validate_io_names(&self) -> Result<(), SchemaError> {
        let mut seen: Vec<&str> = Vec::new();
        for (section, io) in self
            .inputs
            .iter()
            .map(|io| ("inputs", io))
            .chain(self.outputs.iter().map(|io| ("outputs", io)))
        {
            if seen.contains(&io.name.as_str()) {
                return Err(SchemaError::schema(
                    format!("component.{}.{}", section, io.name),
                    "unique io names",
                    format!("duplicate `{}`", io.name),
                ));
            }
            seen.push(&io.name);
        }
        Ok(())
    }
}
