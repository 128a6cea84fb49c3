//! CLI param parsing (`-P` and `-HP`)

use std::collections::BTreeMap;

use plx_schema::matrix::{HpParam, MatrixParams};
use plx_schema::{IoType, Param, SchemaError};
use serde_json::{json, Value};

/// Parse a scalar the way YAML would, falling back to the raw string
fn parse_scalar(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Null) if !raw.trim().is_empty() && raw.trim() != "null" && raw.trim() != "~" => {
            Value::String(raw.to_string())
        }
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

fn param_from_yaml(key: &str, value: Value) -> Result<Param, SchemaError> {
    match value {
        Value::Object(ref map) if map.contains_key("value") || map.contains_key("ref") => {
            serde_json::from_value(value.clone()).map_err(|e| SchemaError::parse(key, e.to_string()))
        }
        other => Ok(Param::value(other)),
    }
}

/// Parse `key=value`, `key:type=value` items or YAML mappings into params
pub fn parse_params(raw: &[String]) -> Result<BTreeMap<String, Param>, SchemaError> {
    let mut params = BTreeMap::new();
    for item in raw {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        match item.split_once('=') {
            Some((lhs, value)) if !lhs.contains(char::is_whitespace) && !lhs.contains('{') => {
                let (key, io_type) = match lhs.split_once(':') {
                    Some((key, ty)) => (key.trim(), Some(ty.parse::<IoType>()?)),
                    None => (lhs.trim(), None),
                };
                if key.is_empty() {
                    return Err(SchemaError::parse(item, "empty param name"));
                }
                let value = match io_type {
                    Some(ty) => ty.coerce(key, &Value::String(value.to_string()))?,
                    None => parse_scalar(value),
                };
                params.insert(key.to_string(), Param::value(value));
            }
            _ => {
                let doc: Value = serde_yaml::from_str(item)
                    .map_err(|e| SchemaError::parse(item, format!("expected `key=value` or a mapping: {}", e)))?;
                let Value::Object(map) = doc else {
                    return Err(SchemaError::parse(item, "expected `key=value` or a mapping"));
                };
                for (key, value) in map {
                    let param = param_from_yaml(&key, value)?;
                    params.insert(key, param);
                }
            }
        }
    }
    Ok(params)
}

/// Parse `key=kind:value` items into ordered matrix params
pub fn parse_hparams(raw: &[String]) -> Result<MatrixParams, SchemaError> {
    let mut params: Vec<(String, HpParam)> = Vec::new();
    for item in raw {
        let (key, spec) = item
            .split_once('=')
            .ok_or_else(|| SchemaError::parse(item, "expected `key=kind:value`"))?;
        let (kind, value) = spec
            .split_once(':')
            .ok_or_else(|| SchemaError::parse(key, "expected `kind:value`"))?;
        let kind = kind.trim();
        let value = match kind {
            "choice" | "pchoice" => match parse_scalar(value) {
                Value::Array(items) => Value::Array(items),
                _ => Value::Array(value.split(',').map(|v| parse_scalar(v.trim())).collect()),
            },
            _ => match parse_scalar(value) {
                Value::Array(items) => Value::Array(items),
                Value::Object(map) => Value::Object(map),
                _ => Value::String(value.trim().to_string()),
            },
        };
        let param: HpParam = serde_json::from_value(json!({"kind": kind, "value": value}))
            .map_err(|e| SchemaError::parse(key, e.to_string()))?;
        let key = key.trim().to_string();
        if params.iter().any(|(name, _)| name == &key) {
            return Err(SchemaError::parse(key, "declared twice"));
        }
        params.push((key, param));
    }
    Ok(MatrixParams(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case::int("epochs=10", "epochs", json!(10))]
    #[case::float("lr=0.01", "lr", json!(0.01))]
    #[case::string("opt=adam", "opt", json!("adam"))]
    #[case::typed("lr:float=1", "lr", json!(1.0))]
    #[case::typed_list("xs:list[int]=1,2", "xs", json!([1, 2]))]
    #[case::value_with_equals("flags=--a=b", "flags", json!("--a=b"))]
    fn key_value_forms(#[case] raw: &str, #[case] key: &str, #[case] expected: Value) {
        let params = parse_params(&strings(&[raw])).unwrap();
        assert_eq!(params[key].value, Some(expected));
    }

    #[test]
    fn yaml_mapping_form() {
        let params = parse_params(&strings(&["{lr: 0.1, loss: {ref: ops.train, value: outputs.loss}}"])).unwrap();
        assert_eq!(params["lr"].value, Some(json!(0.1)));
        assert_eq!(params["loss"].reference.as_deref(), Some("ops.train"));
    }

    #[test]
    fn bad_type_is_parse_error() {
        let err = parse_params(&strings(&["lr:float=fast"])).unwrap_err();
        assert_eq!(err.kind(), "ParseError");
    }

    #[test]
    fn hparams_keep_order_and_forms() {
        let params = parse_hparams(&strings(&[
            "lr=choice:0.1,0.01",
            "bs=choice:[16, 32]",
            "dropout=uniform:0.1:0.5",
            "steps=range:0:10:2",
        ]))
        .unwrap();
        assert_eq!(params.names(), vec!["lr", "bs", "dropout", "steps"]);
        match &params.0[0].1 {
            HpParam::Choice { value } => assert_eq!(value, &vec![json!(0.1), json!(0.01)]),
            other => panic!("unexpected {:?}", other),
        }
        match &params.0[2].1 {
            HpParam::Uniform { value } => assert_eq!((value.low, value.high), (0.1, 0.5)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn hparam_unknown_kind() {
        let err = parse_hparams(&strings(&["lr=gaussian:0:1"])).unwrap_err();
        assert_eq!(err.path().as_deref(), Some("lr"));
    }
}
