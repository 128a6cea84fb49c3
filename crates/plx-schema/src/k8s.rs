//! Kubernetes core types used by documents and generated manifests
//!
//! Hand-written serde models of the subset of `core/v1` that operations can
//! declare (containers, volumes, scheduling fields). Fields without a model
//! here (affinity, probes, security contexts) pass through as JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =============================================================================
// Lenient scalars
// =============================================================================

fn scalar_to_string<E: DeError>(value: Value) -> Result<String, E> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(E::custom(format!("expected a scalar, got {}", other))),
    }
}

/// Deserialize an optional string that may be written as a number or bool
pub fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(v) => scalar_to_string(v).map(Some),
    }
}

/// Deserialize a list of strings whose items may be numbers or bools
pub fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.into_iter().map(scalar_to_string).collect(),
        Some(Value::String(s)) => Ok(vec![s]),
        Some(other) => Err(D::Error::custom(format!("expected a list, got {}", other))),
    }
}

/// Deserialize a string map whose values may be numbers or bools
pub fn lenient_string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<BTreeMap<String, Value>>::deserialize(deserializer)? {
        None => Ok(BTreeMap::new()),
        Some(map) => map
            .into_iter()
            .map(|(k, v)| scalar_to_string(v).map(|v| (k, v)))
            .collect(),
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Resource quantity (`500m`, `60Mi`, `1`)
///
/// Accepts numbers on input; always serializes as a string.
#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(pub String);

impl Quantity {
    /// Create a quantity from its string form
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Numeric value with SI/binary suffixes applied, `None` if unparseable
    pub fn as_f64(&self) -> Option<f64> {
        let s = self.0.trim();
        const SUFFIXES: &[(&str, f64)] = &[
            ("Ki", 1024.0),
            ("Mi", 1024.0 * 1024.0),
            ("Gi", 1024.0 * 1024.0 * 1024.0),
            ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
            ("m", 0.001),
            ("k", 1e3),
            ("M", 1e6),
            ("G", 1e9),
            ("T", 1e12),
        ];
        for (suffix, factor) in SUFFIXES {
            if let Some(num) = s.strip_suffix(suffix) {
                return num.parse::<f64>().ok().map(|n| n * factor);
            }
        }
        s.parse::<f64>().ok()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Quantity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        scalar_to_string(raw).map(Quantity)
    }
}

/// Compute resource requirements
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    /// Upper bounds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
    /// Requested amounts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,
}

impl ResourceRequirements {
    /// Build from `(key, value)` requests and limits
    pub fn new(requests: &[(&str, &str)], limits: &[(&str, &str)]) -> Self {
        Self {
            requests: requests
                .iter()
                .map(|(k, v)| (k.to_string(), Quantity::from(*v)))
                .collect(),
            limits: limits
                .iter()
                .map(|(k, v)| (k.to_string(), Quantity::from(*v)))
                .collect(),
        }
    }

    /// Whether neither requests nor limits are set
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }

    /// Iterate over requests then limits
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Quantity)> {
        self.requests.iter().chain(self.limits.iter())
    }
}

// =============================================================================
// Env
// =============================================================================

/// Environment variable
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
    /// Value source
    #[serde(default, alias = "value_from", skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// Literal env var
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Env var read from a secret key
    pub fn from_secret(name: impl Into<String>, secret: &str, key: &str) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(KeySelector {
                    name: secret.to_string(),
                    key: key.to_string(),
                }),
                ..Default::default()
            }),
        }
    }

    /// Env var read from a config map key
    pub fn from_config_map(name: impl Into<String>, config_map: &str, key: &str) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                config_map_key_ref: Some(KeySelector {
                    name: config_map.to_string(),
                    key: key.to_string(),
                }),
                ..Default::default()
            }),
        }
    }

    /// Env var read from a pod field
    pub fn from_field(name: impl Into<String>, field_path: &str) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(FieldSelector {
                    field_path: field_path.to_string(),
                }),
                ..Default::default()
            }),
        }
    }
}

/// Source of an env var value
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Secret key
    #[serde(default, alias = "secret_key_ref", skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,
    /// ConfigMap key
    #[serde(default, alias = "config_map_key_ref", skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,
    /// Pod field
    #[serde(default, alias = "field_ref", skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<FieldSelector>,
}

/// Selects a key of a secret or config map
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KeySelector {
    /// Object name
    pub name: String,
    /// Key inside the object
    pub key: String,
}

/// Selects a pod field
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldSelector {
    /// Field path, e.g. `metadata.name`
    #[serde(alias = "field_path")]
    pub field_path: String,
}

/// Load all keys of a secret or config map as env vars
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    /// ConfigMap reference
    #[serde(default, alias = "config_map_ref", skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<LocalObjectReference>,
    /// Secret reference
    #[serde(default, alias = "secret_ref", skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
}

/// Reference to an object by name in the same namespace
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocalObjectReference {
    /// Object name
    pub name: String,
}

// =============================================================================
// Container
// =============================================================================

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port number
    #[serde(alias = "container_port")]
    pub container_port: u16,
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Volume mount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Mount path
    #[serde(alias = "mount_path")]
    pub mount_path: String,
    /// Mount read-only
    #[serde(default, alias = "read_only", skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    /// Sub path inside the volume
    #[serde(default, alias = "sub_path", skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

impl VolumeMount {
    /// Create a mount
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>, read_only: bool) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            read_only: read_only.then_some(true),
            sub_path: None,
        }
    }
}

/// Container spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Image pull policy
    #[serde(default, alias = "image_pull_policy", skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// Entrypoint
    #[serde(
        default,
        deserialize_with = "lenient_string_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub command: Vec<String>,
    /// Arguments
    #[serde(
        default,
        deserialize_with = "lenient_string_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub args: Vec<String>,
    /// Working directory
    #[serde(default, alias = "working_dir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Bulk env sources
    #[serde(default, alias = "env_from", skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    /// Exposed ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Volume mounts
    #[serde(default, alias = "volume_mounts", skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    /// Security context
    #[serde(default, alias = "security_context", skip_serializing_if = "Option::is_none")]
    pub security_context: Option<Value>,
    /// Liveness probe
    #[serde(default, alias = "liveness_probe", skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Value>,
    /// Readiness probe
    #[serde(default, alias = "readiness_probe", skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Value>,
}

impl Container {
    /// Container with an image and nothing else
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Default::default()
        }
    }

    /// Resource map for a key (`requests` then `limits`)
    pub fn resource_keys(&self) -> Vec<(&String, &Quantity)> {
        self.resources
            .as_ref()
            .map(|r| r.entries().collect())
            .unwrap_or_default()
    }
}

// =============================================================================
// Volumes
// =============================================================================

/// Host path volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HostPathVolumeSource {
    /// Path on the node
    pub path: String,
    /// Host path type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Empty dir volume source
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirVolumeSource {
    /// Storage medium (`Memory` for tmpfs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    /// Size limit
    #[serde(default, alias = "size_limit", skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<Quantity>,
}

/// Persistent volume claim volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimVolumeSource {
    /// Claim name
    #[serde(alias = "claim_name")]
    pub claim_name: String,
    /// Mount read-only
    #[serde(default, alias = "read_only", skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

/// Projection of a key into a file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KeyToPath {
    /// Key in the object
    pub key: String,
    /// Relative file path
    pub path: String,
}

/// Secret volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeSource {
    /// Secret name
    #[serde(alias = "secret_name")]
    pub secret_name: String,
    /// Selected keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

/// ConfigMap volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfigMapVolumeSource {
    /// ConfigMap name
    pub name: String,
    /// Selected keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

/// Pod volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// Host path source
    #[serde(default, alias = "host_path", skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
    /// Empty dir source
    #[serde(default, alias = "empty_dir", skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
    /// PVC source
    #[serde(default, alias = "persistent_volume_claim", skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,
    /// Secret source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretVolumeSource>,
    /// ConfigMap source
    #[serde(default, alias = "config_map", skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapVolumeSource>,
}

impl Volume {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host_path: None,
            empty_dir: None,
            persistent_volume_claim: None,
            secret: None,
            config_map: None,
        }
    }

    /// Host path volume
    pub fn host_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host_path: Some(HostPathVolumeSource {
                path: path.into(),
                type_: None,
            }),
            ..Self::named(name)
        }
    }

    /// Empty dir volume, optionally memory-backed
    pub fn empty_dir(name: impl Into<String>, memory: bool) -> Self {
        Self {
            empty_dir: Some(EmptyDirVolumeSource {
                medium: memory.then(|| "Memory".to_string()),
                size_limit: None,
            }),
            ..Self::named(name)
        }
    }

    /// PVC volume
    pub fn claim(name: impl Into<String>, claim: impl Into<String>, read_only: bool) -> Self {
        Self {
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.into(),
                read_only: read_only.then_some(true),
            }),
            ..Self::named(name)
        }
    }

    /// Secret volume
    pub fn secret(name: impl Into<String>, secret: impl Into<String>, keys: &[String]) -> Self {
        Self {
            secret: Some(SecretVolumeSource {
                secret_name: secret.into(),
                items: keys
                    .iter()
                    .map(|k| KeyToPath {
                        key: k.clone(),
                        path: k.clone(),
                    })
                    .collect(),
            }),
            ..Self::named(name)
        }
    }

    /// ConfigMap volume
    pub fn config_map(name: impl Into<String>, config_map: impl Into<String>, keys: &[String]) -> Self {
        Self {
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.into(),
                items: keys
                    .iter()
                    .map(|k| KeyToPath {
                        key: k.clone(),
                        path: k.clone(),
                    })
                    .collect(),
            }),
            ..Self::named(name)
        }
    }
}

// =============================================================================
// Pod
// =============================================================================

/// Pod toleration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    /// Taint key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// `Exists` or `Equal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Taint value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Taint effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    /// Toleration window
    #[serde(default, alias = "toleration_seconds", skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Object metadata
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    /// Object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Init containers, in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    /// Main container followed by sidecars
    pub containers: Vec<Container>,
    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    /// Service account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Node name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Affinity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Value>,
    /// Tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Host aliases
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_aliases: Vec<Value>,
    /// Pod security context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<Value>,
    /// Image pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Use the host network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
    /// Use the host PID namespace
    #[serde(rename = "hostPID", default, skip_serializing_if = "Option::is_none")]
    pub host_pid: Option<bool>,
    /// DNS policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    /// DNS config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<Value>,
    /// Scheduler name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,
    /// Priority class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    /// Priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// Pod template
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PodTemplateSpec {
    /// Pod labels and annotations
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Pod spec
    pub spec: PodSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::millis("500m", 0.5)]
    #[case::mebi("60Mi", 60.0 * 1024.0 * 1024.0)]
    #[case::plain("2", 2.0)]
    #[case::fraction("0.1", 0.1)]
    fn quantity_values(#[case] raw: &str, #[case] expected: f64) {
        let q = Quantity::from(raw);
        assert!((q.as_f64().unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn quantity_accepts_numbers() {
        let r: ResourceRequirements =
            serde_json::from_value(json!({"limits": {"nvidia.com/gpu": 1, "cpu": 0.5}})).unwrap();
        assert_eq!(r.limits["nvidia.com/gpu"], Quantity::from("1"));
        assert_eq!(r.limits["cpu"], Quantity::from("0.5"));
        assert_eq!(Quantity::from("two").as_f64(), None);
    }

    #[test]
    fn container_accepts_snake_case_and_numbers() {
        let c: Container = serde_json::from_value(json!({
            "image": "busybox",
            "image_pull_policy": "Always",
            "command": ["sleep", 10],
            "env": [{"name": "N", "value": 3}],
        }))
        .unwrap();
        assert_eq!(c.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(c.command, vec!["sleep", "10"]);
        assert_eq!(c.env[0].value.as_deref(), Some("3"));

        let out = serde_json::to_value(&c).unwrap();
        assert_eq!(out["imagePullPolicy"], "Always");
        assert!(out.get("args").is_none());
    }

    #[test]
    fn host_pid_uses_kubernetes_casing() {
        let spec = PodSpec {
            host_pid: Some(true),
            ..Default::default()
        };
        let out = serde_json::to_value(&spec).unwrap();
        assert_eq!(out["hostPID"], true);
    }
}
