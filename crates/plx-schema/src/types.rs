//! Logical IO types and value coercion
//!
//! Every declared input/output has an [`IoType`]. [`IoType::coerce`] parses
//! a raw value (often a string from the CLI or a rendered template) and
//! returns its canonical JSON form, so coercing twice is a no-op.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::image::validate_image;
use crate::init::{ArtifactsInit, DockerfileInit, FileInit, GitInit, TensorboardInit};
use crate::version::json_type;
use crate::SchemaError;

/// Logical type of an input or output
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IoType {
    /// Integer
    Int,
    /// Float
    Float,
    /// Boolean
    Bool,
    /// String
    Str,
    /// `YYYY-MM-DD`
    Date,
    /// RFC 3339 timestamp
    Datetime,
    /// Seconds, accepts `1h30m` style strings
    Duration,
    /// UUID, canonical as 32 hex chars
    Uuid,
    /// Homogeneous list
    List(Box<IoType>),
    /// String-keyed mapping
    Dict(Box<IoType>),
    /// Connection name
    Connection,
    /// Artifacts selection
    Artifacts,
    /// Event reference
    Event,
    /// Inline file
    File,
    /// Generated dockerfile
    Dockerfile,
    /// Git repository
    Git,
    /// Tensorboard context
    Tensorboard,
    /// `gs://bucket/blob`
    Gcs,
    /// `s3://bucket/key`
    S3,
    /// `wasb[s]://container@account.blob.core.windows.net/path`
    Wasb,
    /// `user:password@host`
    Uri,
    /// Docker image reference
    Image,
    /// Filesystem path
    Path,
    /// Untyped
    Any,
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Bool => f.write_str("bool"),
            Self::Str => f.write_str("str"),
            Self::Date => f.write_str("date"),
            Self::Datetime => f.write_str("datetime"),
            Self::Duration => f.write_str("duration"),
            Self::Uuid => f.write_str("uuid"),
            Self::List(inner) if **inner == Self::Any => f.write_str("list"),
            Self::List(inner) => write!(f, "list[{}]", inner),
            Self::Dict(inner) if **inner == Self::Any => f.write_str("dict"),
            Self::Dict(inner) => write!(f, "dict[str, {}]", inner),
            Self::Connection => f.write_str("connection"),
            Self::Artifacts => f.write_str("artifacts"),
            Self::Event => f.write_str("event"),
            Self::File => f.write_str("file"),
            Self::Dockerfile => f.write_str("dockerfile"),
            Self::Git => f.write_str("git"),
            Self::Tensorboard => f.write_str("tensorboard"),
            Self::Gcs => f.write_str("gcs"),
            Self::S3 => f.write_str("s3"),
            Self::Wasb => f.write_str("wasb"),
            Self::Uri => f.write_str("uri"),
            Self::Image => f.write_str("image"),
            Self::Path => f.write_str("path"),
            Self::Any => f.write_str("any"),
        }
    }
}

impl FromStr for IoType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if let Some(inner) = lower.strip_prefix("list[").and_then(|r| r.strip_suffix(']')) {
            return Ok(Self::List(Box::new(inner.parse()?)));
        }
        if let Some(inner) = lower.strip_prefix("dict[").and_then(|r| r.strip_suffix(']')) {
            let value_type = match inner.split_once(',') {
                Some((key, value)) => {
                    let key = key.trim();
                    if key != "str" {
                        return Err(SchemaError::parse(s, "dict keys must be `str`"));
                    }
                    value
                }
                None => inner,
            };
            return Ok(Self::Dict(Box::new(value_type.parse()?)));
        }

        let io_type = match lower.as_str() {
            "int" | "integer" => Self::Int,
            "float" | "number" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            "str" | "string" => Self::Str,
            "date" => Self::Date,
            "datetime" => Self::Datetime,
            "duration" => Self::Duration,
            "uuid" => Self::Uuid,
            "list" => Self::List(Box::new(Self::Any)),
            "dict" => Self::Dict(Box::new(Self::Any)),
            "connection" => Self::Connection,
            "artifacts" => Self::Artifacts,
            "event" => Self::Event,
            "file" => Self::File,
            "dockerfile" => Self::Dockerfile,
            "git" => Self::Git,
            "tensorboard" => Self::Tensorboard,
            "gcs" => Self::Gcs,
            "s3" => Self::S3,
            "wasb" => Self::Wasb,
            "uri" => Self::Uri,
            "image" => Self::Image,
            "path" => Self::Path,
            "any" => Self::Any,
            _ => {
                return Err(SchemaError::schema(
                    "type",
                    "a known io type",
                    s.to_string(),
                ))
            }
        };
        Ok(io_type)
    }
}

impl Serialize for IoType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IoType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl IoType {
    /// Whether values of this type are materialized by an init container
    pub fn is_init(&self) -> bool {
        matches!(
            self,
            Self::Artifacts | Self::File | Self::Dockerfile | Self::Git | Self::Tensorboard
        )
    }

    /// Parse `value` for the input named `key` and return its canonical form
    pub fn coerce(&self, key: &str, value: &Value) -> Result<Value, SchemaError> {
        let fail = |reason: String| SchemaError::parse(key, reason);
        let expected = |what: &str| fail(format!("expected {}, got {}", what, describe(value)));

        match self {
            Self::Any => Ok(value.clone()),
            Self::Int => coerce_int(value).ok_or_else(|| expected("an int")),
            Self::Float => coerce_float(value).ok_or_else(|| expected("a float")),
            Self::Bool => coerce_bool(value).ok_or_else(|| expected("a bool")),
            Self::Str => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(expected("a string")),
            },
            Self::Date => {
                let s = value.as_str().ok_or_else(|| expected("a date string"))?;
                parse_date(s)
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .map_err(fail)
            }
            Self::Datetime => {
                let s = value.as_str().ok_or_else(|| expected("a datetime string"))?;
                parse_datetime(s)
                    .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
                    .map_err(fail)
            }
            Self::Duration => {
                let seconds = match value {
                    Value::Number(n) => n.as_f64().ok_or_else(|| expected("a duration"))?,
                    Value::String(s) => parse_duration(s).map_err(fail)?,
                    _ => return Err(expected("a duration")),
                };
                Ok(number(seconds))
            }
            Self::Uuid => {
                let s = value.as_str().ok_or_else(|| expected("a uuid string"))?;
                uuid::Uuid::parse_str(s.trim())
                    .map(|u| Value::String(u.simple().to_string()))
                    .map_err(|e| fail(e.to_string()))
            }
            Self::List(inner) => {
                let items = match value {
                    Value::Array(items) => items.clone(),
                    Value::String(s) => split_list(s),
                    _ => return Err(expected("a list")),
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| inner.coerce(&format!("{}[{}]", key, i), item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Self::Dict(inner) => {
                let map = match value {
                    Value::Object(map) => map.clone(),
                    Value::String(s) => match serde_json::from_str::<Value>(s) {
                        Ok(Value::Object(map)) => map,
                        _ => return Err(expected("a mapping")),
                    },
                    _ => return Err(expected("a mapping")),
                };
                let mut out = Map::new();
                for (k, v) in map {
                    let coerced = inner.coerce(&format!("{}.{}", key, k), &v)?;
                    out.insert(k, coerced);
                }
                Ok(Value::Object(out))
            }
            Self::Connection | Self::Path => match value.as_str() {
                Some(s) if !s.trim().is_empty() => Ok(Value::String(s.trim().to_string())),
                _ => Err(expected("a non-empty string")),
            },
            Self::Image => {
                let s = value.as_str().ok_or_else(|| expected("an image string"))?;
                validate_image(s)?;
                Ok(Value::String(s.to_string()))
            }
            Self::Gcs => coerce_bucket(value, &["gs://"]).ok_or_else(|| expected("a gs:// url")),
            Self::S3 => coerce_bucket(value, &["s3://"]).ok_or_else(|| expected("an s3:// url")),
            Self::Wasb => match coerce_bucket(value, &["wasb://", "wasbs://"]) {
                Some(Value::String(s)) if s.contains('@') => Ok(Value::String(s)),
                _ => Err(expected("a wasb[s]://container@account url")),
            },
            Self::Uri => coerce_uri(value).ok_or_else(|| expected("`user:password@host`")),
            Self::Event => coerce_event(value).ok_or_else(|| expected("an event `kind:name`")),
            Self::Artifacts => {
                let init = match value {
                    Value::Array(_) => ArtifactsInit {
                        files: typed::<Vec<String>>(value).map_err(fail)?,
                        ..Default::default()
                    },
                    _ => typed::<ArtifactsInit>(value).map_err(fail)?,
                };
                canonical(&init, key)
            }
            Self::Git => {
                let init = match value {
                    Value::String(url) if !url.trim_start().starts_with('{') => GitInit {
                        url: Some(url.clone()),
                        ..Default::default()
                    },
                    _ => typed::<GitInit>(value).map_err(fail)?,
                };
                canonical(&init, key)
            }
            Self::File => canonical(&typed::<FileInit>(value).map_err(fail)?, key),
            Self::Dockerfile => canonical(&typed::<DockerfileInit>(value).map_err(fail)?, key),
            Self::Tensorboard => canonical(&typed::<TensorboardInit>(value).map_err(fail)?, key),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("`{}`", s),
        other => json_type(other).to_string(),
    }
}

fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Value::Number(Number::from(v as i64))
    } else {
        Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn coerce_int(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| Value::Number(Number::from(f as i64))),
        Value::String(s) => s.trim().parse::<i64>().ok().map(|i| Value::Number(i.into())),
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<Value> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Number::from_f64(f).map(Value::Number)
}

fn coerce_bool(value: &Value) -> Option<Value> {
    let b = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => match n.as_i64()? {
            0 => false,
            1 => true,
            _ => return None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" => true,
            "false" | "no" | "n" | "0" | "off" => false,
            _ => return None,
        },
        _ => return None,
    };
    Some(Value::Bool(b))
}

fn coerce_bucket(value: &Value, schemes: &[&str]) -> Option<Value> {
    let s = value.as_str()?.trim();
    schemes
        .iter()
        .find_map(|scheme| s.strip_prefix(scheme))
        .filter(|rest| !rest.is_empty() && !rest.starts_with('/'))
        .map(|_| Value::String(s.to_string()))
}

fn coerce_uri(value: &Value) -> Option<Value> {
    let (user, password, host) = match value {
        Value::String(s) => {
            let (creds, host) = s.rsplit_once('@')?;
            let (user, password) = creds.split_once(':')?;
            (user.to_string(), password.to_string(), host.to_string())
        }
        Value::Object(map) => (
            map.get("user")?.as_str()?.to_string(),
            map.get("password")?.as_str()?.to_string(),
            map.get("host")?.as_str()?.to_string(),
        ),
        _ => return None,
    };
    if user.is_empty() || host.is_empty() {
        return None;
    }
    Some(Value::String(format!("{}:{}@{}", user, password, host)))
}

fn coerce_event(value: &Value) -> Option<Value> {
    let (kind, name) = match value {
        Value::String(s) => {
            let (kind, name) = s.split_once(':')?;
            (kind.trim().to_string(), name.trim().to_string())
        }
        Value::Object(map) => (
            map.get("kind")?.as_str()?.to_string(),
            map.get("name")?.as_str()?.to_string(),
        ),
        _ => return None,
    };
    if kind.is_empty() || name.is_empty() {
        return None;
    }
    Some(serde_json::json!({"kind": kind, "name": name}))
}

fn typed<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    let value = match value {
        Value::String(s) => serde_json::from_str::<Value>(s).map_err(|e| e.to_string())?,
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn canonical<T: Serialize>(value: &T, key: &str) -> Result<Value, SchemaError> {
    serde_json::to_value(value).map_err(|e| SchemaError::parse(key, e.to_string()))
}

fn split_list(s: &str) -> Vec<Value> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(s) {
        return items;
    }
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| Value::String(item.to_string()))
        .collect()
}

/// Parse a `YYYY-MM-DD` date (a datetime is truncated to its date)
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| parse_datetime(s).map(|dt| dt.date_naive()))
        .map_err(|_| format!("invalid date `{}`", s))
}

/// Parse an RFC 3339 or `YYYY-MM-DD[ HH:MM[:SS]]` timestamp as UTC
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format!("invalid datetime `{}`", s))
}

/// Parse `90`, `90s`, `1h30m`, `2d` or `1.5h` into seconds
pub fn parse_duration(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(seconds) = s.parse::<f64>() {
        return Ok(seconds);
    }

    let mut total = 0.0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() || c == '.' {
            digits.push(c);
            continue;
        }
        let factor = match c {
            's' => 1.0,
            'm' => 60.0,
            'h' => 3600.0,
            'd' => 86400.0,
            'w' => 604800.0,
            _ => return Err(format!("invalid duration `{}`", s)),
        };
        let amount: f64 = digits
            .parse()
            .map_err(|_| format!("invalid duration `{}`", s))?;
        total += amount * factor;
        digits.clear();
    }
    if !digits.is_empty() || s.is_empty() {
        return Err(format!("invalid duration `{}`", s));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::int("int", json!("3"), json!(3))]
    #[case::int_from_float("int", json!(4.0), json!(4))]
    #[case::float("float", json!("0.01"), json!(0.01))]
    #[case::bool_yes("bool", json!("yes"), json!(true))]
    #[case::bool_zero("bool", json!(0), json!(false))]
    #[case::str_from_number("str", json!(12), json!("12"))]
    #[case::date("date", json!("2024-02-03"), json!("2024-02-03"))]
    #[case::datetime("datetime", json!("2024-02-03 10:00:00"), json!("2024-02-03T10:00:00Z"))]
    #[case::duration("duration", json!("1h30m"), json!(5400))]
    #[case::uuid("uuid", json!("8f0b7f3e-4a3b-4c3e-9d1a-1b2c3d4e5f60"), json!("8f0b7f3e4a3b4c3e9d1a1b2c3d4e5f60"))]
    #[case::list_csv("list[int]", json!("1, 2,3"), json!([1, 2, 3]))]
    #[case::dict("dict[str, float]", json!({"a": "1.5"}), json!({"a": 1.5}))]
    #[case::gcs("gcs", json!("gs://bucket/data"), json!("gs://bucket/data"))]
    #[case::wasb("wasb", json!("wasbs://c@acct.blob.core.windows.net/p"), json!("wasbs://c@acct.blob.core.windows.net/p"))]
    #[case::uri("uri", json!({"user": "u", "password": "p", "host": "h:80"}), json!("u:p@h:80"))]
    #[case::event("event", json!("metric:loss"), json!({"kind": "metric", "name": "loss"}))]
    #[case::git_url("git", json!("https://github.com/a/b"), json!({"url": "https://github.com/a/b"}))]
    #[case::artifacts_list("artifacts", json!(["a.txt"]), json!({"files": ["a.txt"]}))]
    #[case::image("image", json!("python:3.11"), json!("python:3.11"))]
    fn coerces_to_canonical(#[case] io_type: &str, #[case] raw: Value, #[case] expected: Value) {
        let io_type: IoType = io_type.parse().unwrap();
        let coerced = io_type.coerce("x", &raw).unwrap();
        assert_eq!(coerced, expected);
        assert_eq!(io_type.coerce("x", &coerced).unwrap(), expected);
    }

    #[rstest]
    #[case::int("int", json!("1.5"))]
    #[case::bool("bool", json!("maybe"))]
    #[case::date("date", json!("03/02/2024"))]
    #[case::s3("s3", json!("gs://bucket"))]
    #[case::image("image", json!("a:b:c"))]
    #[case::path("path", json!(""))]
    #[case::dockerfile("dockerfile", json!({"run": ["ls"]}))]
    fn rejects_invalid_values(#[case] io_type: &str, #[case] raw: Value) {
        let io_type: IoType = io_type.parse().unwrap();
        let err = io_type.coerce("x", &raw).unwrap_err();
        assert_eq!(err.kind(), "ParseError");
    }

    #[test]
    fn type_names_roundtrip() {
        for name in ["int", "list[float]", "dict[str, int]", "list", "tensorboard"] {
            let parsed: IoType = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        assert!("tensor".parse::<IoType>().is_err());
    }
}
