//! Top-level documents
//!
//! Reading goes through [`read`]: version gate, kind discrimination, a walk
//! over every nested discriminator so unknown kinds are reported with their
//! path, then the typed read.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::compiled::CompiledOperation;
use crate::component::Component;
use crate::matrix::{HP_PARAM_KINDS, MATRIX_KINDS};
use crate::operation::Operation;
use crate::run::{expected_run_kinds, RunKind};
use crate::version::{check_version, json_type};
use crate::SchemaError;

/// Kind of a top-level document
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecKind {
    /// Operation
    Operation,
    /// Component
    Component,
    /// Compiled operation
    CompiledOperation,
}

impl SpecKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operation => "operation",
            Self::Component => "component",
            Self::CompiledOperation => "compiled_operation",
        }
    }

    fn parse(s: &str) -> Result<Self, SchemaError> {
        match s {
            "operation" => Ok(Self::Operation),
            "component" => Ok(Self::Component),
            "compiled_operation" | "compiledOperation" => Ok(Self::CompiledOperation),
            other => Err(SchemaError::UnknownKind {
                got: other.to_string(),
                expected: "operation, component, compiled_operation".to_string(),
            }),
        }
    }
}

const REFERENCE_KEYS: &[&str] = &["component", "hubRef", "hub_ref", "pathRef", "path_ref", "urlRef", "url_ref", "dagRef", "dag_ref"];

/// Document kind; inferred from its shape when `kind` is absent
pub fn get_kind(doc: &Value) -> Result<SpecKind, SchemaError> {
    let Some(obj) = doc.as_object() else {
        return Err(SchemaError::schema("", "a mapping", json_type(doc)));
    };
    match obj.get("kind") {
        Some(Value::String(kind)) => SpecKind::parse(kind),
        Some(other) => Err(SchemaError::schema("kind", "a string", json_type(other))),
        None if REFERENCE_KEYS.iter().any(|k| obj.contains_key(*k)) => Ok(SpecKind::Operation),
        None if obj.contains_key("run") => Ok(SpecKind::Component),
        None => Err(SchemaError::UnknownKind {
            got: String::new(),
            expected: "operation, component, compiled_operation".to_string(),
        }),
    }
}

/// A typed top-level document
#[derive(Clone, Debug, PartialEq)]
pub enum Specification {
    /// Operation
    Operation(Box<Operation>),
    /// Component
    Component(Box<Component>),
    /// Compiled operation
    CompiledOperation(Box<CompiledOperation>),
}

impl Specification {
    /// Document kind
    pub fn kind(&self) -> SpecKind {
        match self {
            Self::Operation(_) => SpecKind::Operation,
            Self::Component(_) => SpecKind::Component,
            Self::CompiledOperation(_) => SpecKind::CompiledOperation,
        }
    }

    /// Canonical JSON form, `kind` first
    pub fn to_value(&self) -> Result<Value, SchemaError> {
        let body = match self {
            Self::Operation(op) => serde_json::to_value(op),
            Self::Component(c) => serde_json::to_value(c),
            Self::CompiledOperation(c) => serde_json::to_value(c),
        }
        .map_err(|e| SchemaError::schema("", "a serializable document", e.to_string()))?;
        let mut out = serde_json::Map::new();
        out.insert("kind".to_string(), Value::String(self.kind().as_str().to_string()));
        if let Value::Object(fields) = body {
            out.extend(fields);
        }
        Ok(Value::Object(out))
    }

    /// Operation view: components are wrapped inline
    pub fn into_operation(self) -> Result<Operation, SchemaError> {
        match self {
            Self::Operation(op) => Ok(*op),
            Self::Component(c) => Ok(Operation::from_component(*c)),
            Self::CompiledOperation(_) => Err(SchemaError::schema(
                "kind",
                "operation or component",
                SpecKind::CompiledOperation.as_str(),
            )),
        }
    }
}

impl Serialize for Specification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// Read a raw document into its typed form
pub fn read(mut doc: Value) -> Result<Specification, SchemaError> {
    check_version(&mut doc)?;
    let kind = get_kind(&doc)?;
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("kind");
    }
    match kind {
        SpecKind::Operation => {
            validate_operation_kinds(&doc, "")?;
            let op: Operation = typed(doc, kind)?;
            op.validate()?;
            Ok(Specification::Operation(Box::new(op)))
        }
        SpecKind::Component => {
            validate_component_kinds(&doc, "")?;
            let c: Component = typed(doc, kind)?;
            c.validate_io_names()?;
            Ok(Specification::Component(Box::new(c)))
        }
        SpecKind::CompiledOperation => {
            validate_run_kind(doc.get("run"), "run")?;
            validate_matrix_kinds(doc.get("matrix"), "matrix")?;
            let c: CompiledOperation = typed(doc, kind)?;
            Ok(Specification::CompiledOperation(Box::new(c)))
        }
    }
}

/// Read a YAML or JSON string
pub fn read_str(content: &str) -> Result<Specification, SchemaError> {
    let doc: Value = serde_yaml::from_str(content)
        .map_err(|e| SchemaError::parse("document", e.to_string()))?;
    read(doc)
}

fn typed<T: serde::de::DeserializeOwned>(doc: Value, kind: SpecKind) -> Result<T, SchemaError> {
    serde_json::from_value(doc)
        .map_err(|e| SchemaError::schema(kind.as_str(), format!("a valid {}", kind.as_str()), e.to_string()))
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn check_kind(node: &Value, path: &str, allowed: &[&str]) -> Result<(), SchemaError> {
    let expected = || format!("one of [{}]", allowed.join(", "));
    match node.get("kind") {
        Some(Value::String(k)) if allowed.contains(&k.as_str()) => Ok(()),
        Some(Value::String(k)) => Err(SchemaError::schema(join(path, "kind"), expected(), k.clone())),
        Some(other) => Err(SchemaError::schema(join(path, "kind"), expected(), json_type(other))),
        None => Err(SchemaError::schema(join(path, "kind"), expected(), "nothing")),
    }
}

fn validate_run_kind(run: Option<&Value>, path: &str) -> Result<(), SchemaError> {
    let Some(run) = run else {
        return Ok(());
    };
    match run.get("kind") {
        Some(Value::String(k)) => k
            .parse::<RunKind>()
            .map(|_| ())
            .map_err(|_| SchemaError::schema(join(path, "kind"), expected_run_kinds(), k.clone())),
        Some(other) => Err(SchemaError::schema(join(path, "kind"), expected_run_kinds(), json_type(other))),
        None => Err(SchemaError::schema(join(path, "kind"), expected_run_kinds(), "nothing")),
    }
}

fn validate_matrix_kinds(matrix: Option<&Value>, path: &str) -> Result<(), SchemaError> {
    let Some(matrix) = matrix.filter(|m| !m.is_null()) else {
        return Ok(());
    };
    check_kind(matrix, path, MATRIX_KINDS)?;
    if let Some(Value::Object(params)) = matrix.get("params") {
        for (name, param) in params {
            check_kind(param, &format!("{}.params.{}", path, name), HP_PARAM_KINDS)?;
        }
    }
    let stopping = matrix.get("earlyStopping").or_else(|| matrix.get("early_stopping"));
    if let Some(Value::Array(policies)) = stopping {
        for (i, policy) in policies.iter().enumerate() {
            check_kind(
                policy,
                &format!("{}.earlyStopping[{}]", path, i),
                &["metric_early_stopping", "failure_early_stopping"],
            )?;
        }
    }
    Ok(())
}

fn validate_component_kinds(doc: &Value, prefix: &str) -> Result<(), SchemaError> {
    if doc.get("run").is_none() {
        return Err(SchemaError::schema(join(prefix, "run"), "a run section", "nothing"));
    }
    validate_run_kind(doc.get("run"), &join(prefix, "run"))
}

fn validate_operation_kinds(doc: &Value, prefix: &str) -> Result<(), SchemaError> {
    if let Some(component) = doc.get("component").filter(|c| !c.is_null()) {
        validate_component_kinds(component, &join(prefix, "component"))?;
    }
    validate_matrix_kinds(doc.get("matrix"), &join(prefix, "matrix"))?;
    if let Some(schedule) = doc.get("schedule").filter(|s| !s.is_null()) {
        check_kind(schedule, &join(prefix, "schedule"), &["cron", "interval", "datetime"])?;
    }
    Ok(())
}
