//! Ref-or-value fields
//!
//! A field typed `RefOr<T>` accepts either a literal `T` or an unevaluated
//! `{{ expr }}` template. After context substitution, templates become
//! strings which are coerced into `T` (`"2"` → `2`).

use serde::de::{DeserializeOwned, Error as DeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::SchemaError;

/// A literal value or a pending template expression
#[derive(Clone, Debug, PartialEq)]
pub enum RefOr<T> {
    /// Literal value
    Value(T),
    /// Unevaluated `{{ ... }}` expression
    Ref(String),
}

impl<T> RefOr<T> {
    /// Literal value, if already resolved
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Ref(_) => None,
        }
    }

    /// Whether the field still holds a template
    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    /// Literal value, or a missing-input error naming the pending expression
    pub fn resolved(&self, path: &str) -> Result<&T, SchemaError> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Ref(expr) => Err(SchemaError::missing_input(expr.clone(), path)),
        }
    }
}

impl<T> From<T> for RefOr<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

/// Whether a string is a `{{ ... }}` template
pub fn is_template(s: &str) -> bool {
    s.contains("{{") && s.contains("}}")
}

impl<T: Serialize> Serialize for RefOr<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => v.serialize(serializer),
            Self::Ref(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for RefOr<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        if let Value::String(s) = &raw {
            if is_template(s) {
                return Ok(Self::Ref(s.clone()));
            }
            if let Ok(v) = serde_json::from_value::<T>(raw.clone()) {
                return Ok(Self::Value(v));
            }
            return serde_json::from_str::<T>(s.trim())
                .map(Self::Value)
                .map_err(|_| D::Error::custom(format!("invalid value `{}`", s)));
        }
        serde_json::from_value::<T>(raw)
            .map(Self::Value)
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_template() {
        let v: RefOr<u32> = serde_json::from_value(serde_json::json!(3)).unwrap();
        assert_eq!(v, RefOr::Value(3));

        let r: RefOr<u32> = serde_json::from_value(serde_json::json!("{{ workers }}")).unwrap();
        assert!(r.is_ref());
        assert!(r.resolved("replicas").is_err());
    }

    #[test]
    fn rendered_strings_coerce() {
        let v: RefOr<u32> = serde_json::from_value(serde_json::json!("2")).unwrap();
        assert_eq!(v.value(), Some(&2));
        let b: RefOr<bool> = serde_json::from_value(serde_json::json!("true")).unwrap();
        assert_eq!(b.value(), Some(&true));
    }

    #[test]
    fn empty_string_is_rejected_for_typed_fields() {
        let res: Result<RefOr<u32>, _> = serde_json::from_value(serde_json::json!(""));
        assert!(res.is_err());
    }

    #[test]
    fn serializes_transparently() {
        let v: RefOr<u32> = RefOr::Value(4);
        assert_eq!(serde_json::to_value(&v).unwrap(), serde_json::json!(4));
        let r: RefOr<u32> = RefOr::Ref("{{ n }}".into());
        assert_eq!(serde_json::to_value(&r).unwrap(), serde_json::json!("{{ n }}"));
    }
}
