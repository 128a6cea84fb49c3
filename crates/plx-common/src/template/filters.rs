//! Filters exposed to operation templates
//!
//! The sandbox only registers `map_format` on top of minijinja's builtins.

use minijinja::{Error, ErrorKind, Value};

/// Format every element of a sequence with a `{}` pattern.
///
/// Usage: `{{ params.files | map_format('--file={}') }}`
///
/// Undefined or none inputs produce an empty list so optional params can be
/// expanded without guards.
pub fn map_format(values: Value, pattern: &str) -> Result<Value, Error> {
    if values.is_undefined() || values.is_none() {
        return Ok(Value::from(Vec::<Value>::new()));
    }
    if !pattern.contains("{}") {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("map_format pattern '{}' has no '{{}}' placeholder", pattern),
        ));
    }

    let formatted: Vec<Value> = values
        .try_iter()?
        .map(|v| Value::from(pattern.replace("{}", &v.to_string())))
        .collect();
    Ok(Value::from(formatted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_element() {
        let values = Value::from(vec![Value::from("a"), Value::from(2)]);
        let result = map_format(values, "--x={}").unwrap();
        let items: Vec<String> = result
            .try_iter()
            .unwrap()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(items, vec!["--x=a", "--x=2"]);
    }

    #[test]
    fn undefined_yields_empty_list() {
        let result = map_format(Value::UNDEFINED, "--x={}").unwrap();
        assert_eq!(result.len(), Some(0));
    }

    #[test]
    fn pattern_without_placeholder_fails() {
        let values = Value::from(vec![Value::from("a")]);
        assert!(map_format(values, "--x").is_err());
    }
}
