//! Document version gate

use serde_json::Value;

use crate::SchemaError;

/// Oldest accepted document version
pub const MIN_VERSION: f64 = 1.0;
/// Current document version
pub const CURRENT_VERSION: f64 = 1.1;

/// Validate the `version` of a raw document and normalize it to a number.
///
/// Missing versions default to the current one. Versions may be written as
/// numbers or strings (`1.1`, `"1.1"`).
pub fn check_version(doc: &mut Value) -> Result<f64, SchemaError> {
    let Some(obj) = doc.as_object_mut() else {
        return Err(SchemaError::schema("", "a mapping", json_type(doc)));
    };

    let version = match obj.get("version") {
        None | Some(Value::Null) => CURRENT_VERSION,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| SchemaError::Version {
            version: s.clone(),
            min: MIN_VERSION.to_string(),
            max: CURRENT_VERSION.to_string(),
        })?,
        Some(other) => {
            return Err(SchemaError::schema("version", "a number", json_type(other)));
        }
    };

    if !(MIN_VERSION..=CURRENT_VERSION).contains(&version) {
        return Err(SchemaError::Version {
            version: version.to_string(),
            min: format!("{:.1}", MIN_VERSION),
            max: format!("{:.1}", CURRENT_VERSION),
        });
    }

    if let Some(number) = serde_json::Number::from_f64(version) {
        obj.insert("version".to_string(), Value::Number(number));
    }
    Ok(version)
}

/// Human name of a JSON value's type
pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::min(json!({"version": 1.0}), 1.0)]
    #[case::current(json!({"version": 1.1}), 1.1)]
    #[case::string(json!({"version": "1.1"}), 1.1)]
    #[case::missing(json!({"kind": "component"}), 1.1)]
    fn accepts_supported_versions(#[case] mut doc: Value, #[case] expected: f64) {
        assert_eq!(check_version(&mut doc).unwrap(), expected);
        assert_eq!(doc["version"], json!(expected));
    }

    #[rstest]
    #[case::too_old(json!({"version": 0.9}))]
    #[case::too_new(json!({"version": 1.2}))]
    #[case::garbage(json!({"version": "latest"}))]
    fn rejects_unsupported_versions(#[case] mut doc: Value) {
        let err = check_version(&mut doc).unwrap_err();
        assert_eq!(err.kind(), "VersionError");
    }
}
