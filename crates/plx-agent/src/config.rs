//! Agent configuration
//!
//! Loaded once from a YAML or JSON file and then overridden by the explicit
//! [`Context`]: the namespace comes from `POLYAXON_K8S_NAMESPACE` and the
//! artifacts store must match `POLYAXON_ARTIFACTS_STORE_NAME` when set.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use plx_common::retry::RetryConfig;
use plx_common::Context;
use plx_converter::{Auxiliaries, Backend, ConverterConfig, RunMeta, SchedulingDefaults};
use plx_schema::Connection;

use crate::{AgentError, Result};

fn default_namespace() -> String {
    "default".to_string()
}

fn default_backend() -> String {
    Backend::K8s.to_string()
}

fn default_sleep_interval() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_backoff() -> u64 {
    60
}

/// Everything the agent needs besides the control plane
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Namespace runs are submitted to
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Backend name: `k8s`, `docker` or `process`
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Auxiliary container templates
    #[serde(default)]
    pub auxiliaries: Auxiliaries,
    /// Scheduling defaults
    #[serde(default)]
    pub scheduling: SchedulingDefaults,
    /// Artifacts store connection
    #[serde(default, alias = "artifacts_store", skip_serializing_if = "Option::is_none")]
    pub artifacts_store: Option<Connection>,
    /// Connections available to runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
    /// Hand credentials to runs through the auth init
    #[serde(default, alias = "auth_context")]
    pub auth_context: bool,
    /// Seconds between two polls of the control plane
    #[serde(default = "default_sleep_interval", alias = "sleep_interval")]
    pub sleep_interval: u64,
    /// Attempts for transient backend and API failures
    #[serde(default = "default_max_retries", alias = "max_retries")]
    pub max_retries: u32,
    /// Cap of the quadratic backoff, in seconds
    #[serde(default = "default_max_backoff", alias = "max_backoff")]
    pub max_backoff: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            backend: default_backend(),
            auxiliaries: Auxiliaries::default(),
            scheduling: SchedulingDefaults::default(),
            artifacts_store: None,
            connections: Vec::new(),
            auth_context: false,
            sleep_interval: default_sleep_interval(),
            max_retries: default_max_retries(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl AgentConfig {
    /// Parse YAML (or JSON, which is valid YAML)
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| AgentError::Agent(format!("invalid agent config: {}", e)))
    }

    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| plx_common::Error::io(path, e))?;
        debug!(path = %path.display(), "loading agent config");
        Self::parse(&content)
    }

    /// Apply context overrides and check the result
    pub fn with_context(mut self, ctx: &Context) -> Result<Self> {
        if let Some(namespace) = &ctx.client.namespace {
            self.namespace = namespace.clone();
        }
        if let Some(expected) = &ctx.connection.artifacts_store_name {
            match &self.artifacts_store {
                Some(store) if &store.name == expected => {}
                Some(store) => {
                    return Err(AgentError::Agent(format!(
                        "artifacts store `{}` does not match `{}`",
                        store.name, expected
                    )))
                }
                None => {
                    self.artifacts_store = self.connections.iter().find(|c| &c.name == expected).cloned();
                    if self.artifacts_store.is_none() {
                        return Err(AgentError::Agent(format!("artifacts store `{}` is not configured", expected)));
                    }
                }
            }
        }
        self.backend()?;
        Ok(self)
    }

    /// Parsed backend
    pub fn backend(&self) -> Result<Backend> {
        Ok(self.backend.parse()?)
    }

    /// Converter inputs for one run
    pub fn converter_config(&self, run: RunMeta) -> ConverterConfig {
        let mut config = ConverterConfig::new(self.namespace.clone(), run)
            .with_auxiliaries(self.auxiliaries.clone())
            .with_scheduling(self.scheduling.clone())
            .with_connections(self.connections.iter().cloned())
            .with_auth_context(self.auth_context);
        if let Some(store) = &self.artifacts_store {
            config = config.with_artifacts_store(store.clone());
        }
        config
    }

    /// Backoff for transient failures
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            max_delay: Duration::from_secs(self.max_backoff),
            ..Default::default()
        }
    }

    /// Poll interval
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONFIG: &str = r#"
namespace: plx
auxiliaries:
  sidecar:
    image: polyaxon/polyaxon-sidecar
connections:
  - name: store
    kind: host_path
    schema: {hostPath: /mnt/store, mountPath: /store}
  - name: repo
    kind: git
    schema: {url: "https://github.com/acme/repo"}
maxRetries: 3
"#;

    fn context(env: &[(&str, &str)]) -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let mut map: HashMap<String, String> = env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        map.insert("POLYAXON_HOME".into(), dir.path().display().to_string());
        let ctx = Context::from_env(&map).unwrap();
        (dir, ctx)
    }

    #[test]
    fn defaults() {
        let config = AgentConfig::parse("{}").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.backend().unwrap(), Backend::K8s);
        assert_eq!(config.sleep_interval(), Duration::from_secs(10));
    }

    #[test]
    fn converter_config_carries_agent_inputs() {
        let config = AgentConfig::parse(CONFIG).unwrap();
        let converter = config.converter_config(RunMeta {
            uuid: "abc".into(),
            ..Default::default()
        });
        assert_eq!(converter.namespace, "plx");
        assert_eq!(converter.connections.len(), 2);
        assert!(converter.auxiliaries.sidecar.is_some());
        assert_eq!(converter.run.uuid, "abc");
        assert_eq!(config.retry_config().max_attempts, 3);
    }

    #[test]
    fn context_picks_the_artifacts_store() {
        let (_dir, ctx) = context(&[
            ("POLYAXON_ARTIFACTS_STORE_NAME", "store"),
            ("POLYAXON_K8S_NAMESPACE", "runs"),
        ]);
        let config = AgentConfig::parse(CONFIG).unwrap().with_context(&ctx).unwrap();
        assert_eq!(config.namespace, "runs");
        assert_eq!(config.artifacts_store.unwrap().name, "store");
    }

    #[test]
    fn unknown_artifacts_store_is_rejected() {
        let (_dir, ctx) = context(&[("POLYAXON_ARTIFACTS_STORE_NAME", "missing")]);
        let err = AgentConfig::parse(CONFIG).unwrap().with_context(&ctx).unwrap_err();
        assert!(matches!(err, AgentError::Agent(_)));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let (_dir, ctx) = context(&[]);
        let config = AgentConfig::parse("backend: slurm").unwrap();
        assert!(config.with_context(&ctx).is_err());
    }
}
