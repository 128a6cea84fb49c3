//! Converter inputs that come from the agent rather than the operation
//!
//! Everything here is plain data loaded once by the agent (or the `convert`
//! command) and borrowed by every conversion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use plx_schema::k8s::{EnvVar, ResourceRequirements, Toleration};
use plx_schema::Connection;

/// Default image of generated init containers
pub const DEFAULT_INIT_IMAGE: &str = "polyaxon/polyaxon-init";

/// Image, pull policy and resources of an auxiliary container
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTemplate {
    /// Image reference
    pub image: String,
    /// Image pull policy
    #[serde(default, alias = "image_pull_policy", skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// Resources replacing the built-in defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

impl ContainerTemplate {
    /// Template with an image and nothing else
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

fn default_init() -> ContainerTemplate {
    ContainerTemplate {
        image: DEFAULT_INIT_IMAGE.to_string(),
        image_pull_policy: Some("IfNotPresent".to_string()),
        resources: None,
    }
}

/// Templates of the containers the platform adds around user code
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Auxiliaries {
    /// Generated init containers
    #[serde(default = "default_init")]
    pub init: ContainerTemplate,
    /// Log and artifact sidecar; no sidecar is injected when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<ContainerTemplate>,
    /// Cleaner runs without a container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaner: Option<ContainerTemplate>,
    /// Notifier runs without a container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier: Option<ContainerTemplate>,
    /// Tuner runs without a container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuner: Option<ContainerTemplate>,
}

impl Default for Auxiliaries {
    fn default() -> Self {
        Self {
            init: default_init(),
            sidecar: None,
            cleaner: None,
            notifier: None,
            tuner: None,
        }
    }
}

/// Scheduling added only when an accelerator is requested
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorDefaults {
    /// Node selector entries
    #[serde(default, alias = "node_selector", skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations appended to the pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Env vars injected into the main container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Agent-wide scheduling applied under each replica's environment
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingDefaults {
    /// Default node selector
    #[serde(default, alias = "node_selector", skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Default tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Default affinity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Value>,
    /// Default image pull secrets
    #[serde(default, alias = "image_pull_secrets", skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
    /// Default service account
    #[serde(default, alias = "service_account_name", skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// GPU-gated defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<AcceleratorDefaults>,
    /// TPU-gated defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpu: Option<AcceleratorDefaults>,
}

/// Identity of the run being converted
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    /// Run uuid
    pub uuid: String,
    /// Run name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Owner (organization)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl RunMeta {
    /// `<owner>.<project>.runs.<uuid>` when owner and project are known
    pub fn instance(&self) -> Option<String> {
        match (&self.owner, &self.project) {
            (Some(owner), Some(project)) => Some(format!("{}.{}.runs.{}", owner, project, self.uuid)),
            _ => None,
        }
    }
}

/// Everything a conversion needs besides the compiled operation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConverterConfig {
    /// Target namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Auxiliary container templates
    #[serde(default)]
    pub auxiliaries: Auxiliaries,
    /// Scheduling defaults
    #[serde(default)]
    pub scheduling: SchedulingDefaults,
    /// Run identity
    #[serde(default)]
    pub run: RunMeta,
    /// Connection that stores run artifacts
    #[serde(default, alias = "artifacts_store", skip_serializing_if = "Option::is_none")]
    pub artifacts_store: Option<Connection>,
    /// Connections available to runs, by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connections: BTreeMap<String, Connection>,
    /// Whether the agent hands credentials to runs through the auth init
    #[serde(default, alias = "auth_context")]
    pub auth_context: bool,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            auxiliaries: Auxiliaries::default(),
            scheduling: SchedulingDefaults::default(),
            run: RunMeta::default(),
            artifacts_store: None,
            connections: BTreeMap::new(),
            auth_context: false,
        }
    }
}

impl ConverterConfig {
    /// Config for a run in a namespace
    pub fn new(namespace: impl Into<String>, run: RunMeta) -> Self {
        Self {
            namespace: namespace.into(),
            run,
            ..Default::default()
        }
    }

    /// Set the artifacts store
    pub fn with_artifacts_store(mut self, store: Connection) -> Self {
        self.artifacts_store = Some(store);
        self
    }

    /// Add connections to the table
    pub fn with_connections(mut self, connections: impl IntoIterator<Item = Connection>) -> Self {
        for connection in connections {
            self.connections.insert(connection.name.clone(), connection);
        }
        self
    }

    /// Set the auxiliary templates
    pub fn with_auxiliaries(mut self, auxiliaries: Auxiliaries) -> Self {
        self.auxiliaries = auxiliaries;
        self
    }

    /// Set the scheduling defaults
    pub fn with_scheduling(mut self, scheduling: SchedulingDefaults) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// Enable the auth init container
    pub fn with_auth_context(mut self, enabled: bool) -> Self {
        self.auth_context = enabled;
        self
    }

    /// Look up a connection, the artifacts store included
    pub fn connection(&self, name: &str) -> Option<&Connection> {
        self.connections.get(name).or_else(|| {
            self.artifacts_store
                .as_ref()
                .filter(|store| store.name == name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults() {
        let config: ConverterConfig = serde_yaml::from_str("namespace: plx\n").unwrap();
        assert_eq!(config.namespace, "plx");
        assert_eq!(config.auxiliaries.init.image, DEFAULT_INIT_IMAGE);
        assert!(config.auxiliaries.sidecar.is_none());
        assert!(!config.auth_context);
    }

    #[test]
    fn artifacts_store_is_a_connection() {
        let config: ConverterConfig = serde_yaml::from_str(
            r#"
artifactsStore:
  name: store
  kind: host_path
  schema: {hostPath: /data, mountPath: /artifacts}
"#,
        )
        .unwrap();
        assert_eq!(config.connection("store").unwrap().mount_path(), Some("/artifacts"));
        assert!(config.connection("other").is_none());
    }

    #[test]
    fn run_instance() {
        let mut run = RunMeta {
            uuid: "abc".into(),
            ..Default::default()
        };
        assert_eq!(run.instance(), None);
        run.owner = Some("acme".into());
        run.project = Some("mnist".into());
        assert_eq!(run.instance().as_deref(), Some("acme.mnist.runs.abc"));
    }
}
