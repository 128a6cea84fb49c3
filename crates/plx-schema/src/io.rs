//! Inputs, outputs and params

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::IoType;
use crate::SchemaError;

/// Declared input or output of a component
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IoSpec {
    /// Name, unique across inputs and outputs
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Logical type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub io_type: Option<IoType>,
    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// May be left unset
    #[serde(default, alias = "is_optional", skip_serializing_if = "Option::is_none")]
    pub is_optional: Option<bool>,
    /// Value is a list of `type`
    #[serde(default, alias = "is_list", skip_serializing_if = "Option::is_none")]
    pub is_list: Option<bool>,
    /// Rendered as a bare `--name` flag when true
    #[serde(default, alias = "is_flag", skip_serializing_if = "Option::is_none")]
    pub is_flag: Option<bool>,
    /// Template used to render `as_arg`, e.g. `--lr={{ lr }}`
    #[serde(default, alias = "arg_format", skip_serializing_if = "Option::is_none")]
    pub arg_format: Option<String>,
    /// Validate only when the run starts
    #[serde(default, alias = "delay_validation", skip_serializing_if = "Option::is_none")]
    pub delay_validation: Option<bool>,
    /// Accepted values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
    /// Connection whose content backs the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Materialize the value with an init container
    #[serde(default, alias = "to_init", skip_serializing_if = "Option::is_none")]
    pub to_init: Option<bool>,
    /// Expose the value as this env var in the main container
    #[serde(default, alias = "to_env", skip_serializing_if = "Option::is_none")]
    pub to_env: Option<String>,
}

impl IoSpec {
    /// Whether a value must be supplied
    pub fn is_required(&self) -> bool {
        !self.is_optional.unwrap_or(false) && self.value.is_none()
    }

    /// Effective type, wrapping in a list when `isList` is set
    pub fn effective_type(&self) -> IoType {
        let base = self.io_type.clone().unwrap_or(IoType::Any);
        match (self.is_list.unwrap_or(false), &base) {
            (true, IoType::List(_)) | (false, _) => base,
            (true, _) => IoType::List(Box::new(base)),
        }
    }

    /// Coerce and validate a value against this declaration
    pub fn validate(&self, value: &Value, path: &str) -> Result<Value, SchemaError> {
        if value.is_null() {
            if self.is_optional.unwrap_or(false) {
                return Ok(Value::Null);
            }
            return Err(SchemaError::missing_input(&self.name, path));
        }
        let coerced = self.effective_type().coerce(&self.name, value)?;
        if !self.options.is_empty() && !self.options.contains(&coerced) {
            return Err(SchemaError::schema(
                path,
                format!("one of {}", Value::Array(self.options.clone())),
                coerced.to_string(),
            ));
        }
        Ok(coerced)
    }
}

/// Value or reference bound to an input
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    /// Literal value, or a selector when `ref` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Reference the selector is resolved against
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Only available in the template context, never validated against inputs
    #[serde(default, alias = "context_only", skip_serializing_if = "Option::is_none")]
    pub context_only: Option<bool>,
    /// Connection override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Materialize with an init container
    #[serde(default, alias = "to_init", skip_serializing_if = "Option::is_none")]
    pub to_init: Option<bool>,
    /// Expose as this env var
    #[serde(default, alias = "to_env", skip_serializing_if = "Option::is_none")]
    pub to_env: Option<String>,
}

impl Param {
    /// Literal param
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    /// Parsed reference, if any
    pub fn param_ref(&self) -> Result<Option<ParamRef>, SchemaError> {
        self.reference.as_deref().map(str::parse).transpose()
    }

    /// Parsed selector, when the param is a reference
    pub fn selector(&self) -> Result<Option<Selector>, SchemaError> {
        if self.reference.is_none() {
            return Ok(None);
        }
        match &self.value {
            Some(Value::String(s)) => s.parse().map(Some),
            other => Err(SchemaError::schema(
                "param.value",
                "a selector string like `outputs.loss`",
                format!("{:?}", other),
            )),
        }
    }
}

/// Upstream a param reference points at
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamRef {
    /// Another operation of the same DAG
    Op(String),
    /// A run by uuid
    Run(String),
    /// The enclosing DAG
    Dag,
    /// A hub component
    Hub(String),
}

impl FromStr for ParamRef {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchemaError::parse(s, "expected `ops.<name>`, `runs.<uuid>`, `dag` or `hub.<ref>`");
        if s == "dag" {
            return Ok(Self::Dag);
        }
        let (prefix, rest) = s.split_once('.').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match prefix {
            "ops" => Ok(Self::Op(rest.to_string())),
            "runs" => Ok(Self::Run(rest.to_string())),
            "hub" => Ok(Self::Hub(rest.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Op(name) => write!(f, "ops.{}", name),
            Self::Run(uuid) => write!(f, "runs.{}", uuid),
            Self::Dag => f.write_str("dag"),
            Self::Hub(r) => write!(f, "hub.{}", r),
        }
    }
}

/// Section of an upstream a selector reads from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorSection {
    /// `inputs.<name>`
    Inputs,
    /// `outputs.<name>`
    Outputs,
    /// `artifacts.<name>`
    Artifacts,
    /// `globals.<name>`
    Globals,
}

impl SelectorSection {
    /// Key of the section in an upstream context
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inputs => "inputs",
            Self::Outputs => "outputs",
            Self::Artifacts => "artifacts",
            Self::Globals => "globals",
        }
    }
}

/// `<section>.<name>` selector of a referenced param
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    /// Section
    pub section: SelectorSection,
    /// Key inside the section
    pub name: String,
}

impl FromStr for Selector {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("{{")
            .and_then(|r| r.strip_suffix("}}"))
            .map(str::trim)
            .unwrap_or(s);
        let (section, name) = s
            .split_once('.')
            .filter(|(_, name)| !name.is_empty())
            .ok_or_else(|| SchemaError::parse(s, "expected `<section>.<name>`"))?;
        let section = match section {
            "inputs" => SelectorSection::Inputs,
            "outputs" => SelectorSection::Outputs,
            "artifacts" => SelectorSection::Artifacts,
            "globals" => SelectorSection::Globals,
            other => {
                return Err(SchemaError::parse(
                    s,
                    format!("unknown selector section `{}`", other),
                ))
            }
        };
        Ok(Self {
            section,
            name: name.to_string(),
        })
    }
}

/// A validated param paired with its declaration
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    /// Param name
    pub name: String,
    /// Canonical value
    pub value: Value,
    /// Declaration it was validated against (absent for context-only params)
    pub io: Option<IoSpec>,
    /// Declared as an output
    pub is_output: bool,
    /// Only exposed in the template context
    pub context_only: bool,
    /// Connection override
    pub connection: Option<String>,
    /// Materialize with an init container
    pub to_init: bool,
    /// Expose as an env var
    pub to_env: Option<String>,
}

impl ParamSpec {
    /// Value rendered as a plain string
    pub fn as_str(&self) -> String {
        value_as_str(&self.value)
    }

    /// Value rendered as a CLI argument
    pub fn as_arg(&self) -> String {
        if self.value.is_null() {
            return String::new();
        }
        let is_flag = self.io.as_ref().and_then(|io| io.is_flag).unwrap_or(false);
        if is_flag {
            return match self.value {
                Value::Bool(true) => format!("--{}", self.name),
                _ => String::new(),
            };
        }
        if let Some(format) = self.io.as_ref().and_then(|io| io.arg_format.as_deref()) {
            return format_arg(format, &self.name, &self.as_str());
        }
        format!("--{}={}", self.name, self.as_str())
    }

    /// Template context entry `{value, as_str, as_arg}`
    pub fn context(&self) -> Value {
        serde_json::json!({
            "value": self.value,
            "as_str": self.as_str(),
            "as_arg": self.as_arg(),
        })
    }
}

/// String form of a value: strings unquoted, scalars displayed, others as JSON
pub fn value_as_str(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Substitute `{{ name }}` / `{{name}}` in an `argFormat`
fn format_arg(format: &str, name: &str, value: &str) -> String {
    format
        .replace(&format!("{{{{ {} }}}}", name), value)
        .replace(&format!("{{{{{}}}}}", name), value)
}
