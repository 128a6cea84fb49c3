//! Explicit configuration context
//!
//! A [`Context`] is built once by the binary and passed by reference into
//! every core call. Resolution order for each value (highest first):
//! 1. Environment variable (`POLYAXON_*`)
//! 2. `<home>/.client` or `<home>/.cli` JSON file
//! 3. Built-in default
//!
//! `<home>` is `$POLYAXON_HOME` or `~/.polyaxon`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::*;
use crate::{Error, Result};

/// Client-side settings for talking to the control plane
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Control-plane host, e.g. `https://cloud.polyaxon.com`
    pub host: Option<String>,
    /// API token
    pub token: Option<String>,
    /// Username the token belongs to
    pub username: Option<String>,
    /// Verify TLS certificates
    pub verify_ssl: bool,
    /// Request timeout in seconds
    pub timeout: u64,
    /// Process runs inside a managed cluster
    pub is_managed: bool,
    /// Process runs inside a pod
    pub in_cluster: bool,
    /// Service mode reported in `X-POLYAXON-SERVICE`
    pub service_mode: Option<String>,
    /// Kubernetes namespace for agent and sidecar
    pub namespace: Option<String>,
    /// Log level
    pub log_level: Option<String>,
}

/// CLI bookkeeping persisted between invocations
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CliConfig {
    /// Number of commands since the last compatibility check
    pub check_count: u64,
    /// Version recorded at the last check
    pub current_version: Option<String>,
    /// Time of the last compatibility check
    pub last_check: Option<DateTime<Utc>>,
    /// Seconds between compatibility checks
    pub interval_compatibility_check: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            check_count: 0,
            current_version: None,
            last_check: None,
            interval_compatibility_check: 30 * 60,
        }
    }
}

impl CliConfig {
    /// Whether a compatibility check is due at `now`
    pub fn should_check(&self, now: DateTime<Utc>) -> bool {
        match self.last_check {
            None => true,
            Some(last) => {
                (now - last).num_seconds() >= self.interval_compatibility_check as i64
            }
        }
    }
}

/// Identity of the agent, parsed from `<org>.agents.<name>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentInstance {
    /// Owning organization
    pub owner: String,
    /// Agent name
    pub name: String,
}

impl FromStr for AgentInstance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [owner, "agents", name] if !owner.is_empty() && !name.is_empty() => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(Error::config(
                ENV_AGENT_INSTANCE,
                format!("expected `<org>.agents.<name>`, got `{}`", s),
            )),
        }
    }
}

impl fmt::Display for AgentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.agents.{}", self.owner, self.name)
    }
}

/// Identity of a run, parsed from `<owner>.<project>.runs.<uuid>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunInstance {
    /// Owner name
    pub owner: String,
    /// Project name
    pub project: String,
    /// Run uuid (hex, no dashes)
    pub uuid: String,
}

impl FromStr for RunInstance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [owner, project, "runs", uuid]
                if !owner.is_empty() && !project.is_empty() && !uuid.is_empty() =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    project: project.to_string(),
                    uuid: uuid.to_string(),
                })
            }
            _ => Err(Error::config(
                ENV_RUN_INSTANCE,
                format!("expected `<owner>.<project>.runs.<uuid>`, got `{}`", s),
            )),
        }
    }
}

impl fmt::Display for RunInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.runs.{}", self.owner, self.project, self.uuid)
    }
}

/// Agent/run connection details, when running in-cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionContext {
    /// Agent identity (`POLYAXON_AGENT_INSTANCE`)
    pub agent: Option<AgentInstance>,
    /// Run identity (`POLYAXON_RUN_INSTANCE`)
    pub run: Option<RunInstance>,
    /// Artifacts store connection name
    pub artifacts_store_name: Option<String>,
}

/// Process-wide configuration, passed explicitly
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    /// Config root
    pub home: PathBuf,
    /// Client settings
    pub client: ClientConfig,
    /// CLI settings
    pub cli: CliConfig,
    /// In-cluster identities
    pub connection: ConnectionContext,
}

impl Context {
    /// Load from the process environment and the config root
    pub fn load() -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_env(&env)
    }

    /// Load from an explicit environment map
    pub fn from_env(env: &HashMap<String, String>) -> Result<Self> {
        let home = resolve_home(env)?;
        debug!(home = %home.display(), "Resolved config root");

        let mut client: ClientConfig = read_json_or_default(&home.join(CLIENT_CONFIG_FILE))?;
        let mut cli: CliConfig = read_json_or_default(&home.join(CLI_CONFIG_FILE))?;

        let get = |key: &str| env.get(key).filter(|v| !v.is_empty()).cloned();

        if let Some(host) = get(ENV_PLATFORM_HOST) {
            client.host = Some(host);
        }
        if let Some(token) = get(ENV_AUTH_TOKEN) {
            client.token = Some(token);
        }
        if let Some(username) = get(ENV_AUTH_USERNAME) {
            client.username = Some(username);
        }
        if let Some(mode) = get(ENV_SERVICE_MODE) {
            client.service_mode = Some(mode);
        }
        if let Some(namespace) = get(ENV_K8S_NAMESPACE) {
            client.namespace = Some(namespace);
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            client.log_level = Some(level);
        }
        if let Some(interval) = get(ENV_INTERVALS_COMPATIBILITY_CHECK) {
            cli.interval_compatibility_check = interval.parse().map_err(|_| {
                Error::config(
                    ENV_INTERVALS_COMPATIBILITY_CHECK,
                    format!("expected seconds, got `{}`", interval),
                )
            })?;
        }

        let connection = ConnectionContext {
            agent: get(ENV_AGENT_INSTANCE).map(|v| v.parse()).transpose()?,
            run: get(ENV_RUN_INSTANCE).map(|v| v.parse()).transpose()?,
            artifacts_store_name: get(ENV_ARTIFACTS_STORE_NAME),
        };
        client.in_cluster = connection.agent.is_some() || connection.run.is_some();

        Ok(Self {
            home,
            client,
            cli,
            connection,
        })
    }

    /// Namespace for cluster calls, defaulting to `default`
    pub fn namespace(&self) -> &str {
        self.client.namespace.as_deref().unwrap_or("default")
    }

    /// Persist the CLI bookkeeping to `<home>/.cli`
    pub fn save_cli(&self) -> Result<()> {
        let path = self.home.join(CLI_CONFIG_FILE);
        std::fs::create_dir_all(&self.home).map_err(|e| Error::io(&self.home, e))?;
        let data = serde_json::to_string_pretty(&self.cli)?;
        std::fs::write(&path, data).map_err(|e| Error::io(&path, e))
    }
}

fn resolve_home(env: &HashMap<String, String>) -> Result<PathBuf> {
    if let Some(home) = env.get(ENV_HOME).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let base = dirs::home_dir()
        .ok_or_else(|| Error::config(ENV_HOME, "could not determine home directory"))?;
    Ok(base.join(DEFAULT_HOME_DIR))
}

fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let data = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&data).map_err(|e| {
        Error::serialization(format!("failed to parse {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn env_with_home(home: &Path) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(ENV_HOME.to_string(), home.display().to_string());
        env
    }

    #[test]
    fn home_comes_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::from_env(&env_with_home(dir.path())).unwrap();
        assert_eq!(ctx.home, dir.path());
        assert_eq!(ctx.client, ClientConfig::default());
        assert_eq!(ctx.connection, ConnectionContext::default());
    }

    #[test]
    fn env_overrides_client_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CLIENT_CONFIG_FILE),
            r#"{"host": "http://file-host", "token": "file-token", "timeout": 20}"#,
        )
        .unwrap();

        let mut env = env_with_home(dir.path());
        env.insert(ENV_PLATFORM_HOST.to_string(), "http://env-host".to_string());

        let ctx = Context::from_env(&env).unwrap();
        assert_eq!(ctx.client.host.as_deref(), Some("http://env-host"));
        assert_eq!(ctx.client.token.as_deref(), Some("file-token"));
        assert_eq!(ctx.client.timeout, 20);
    }

    #[test]
    fn agent_instance_sets_in_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_home(dir.path());
        env.insert(ENV_AGENT_INSTANCE.to_string(), "acme.agents.gpu".to_string());

        let ctx = Context::from_env(&env).unwrap();
        let agent = ctx.connection.agent.unwrap();
        assert_eq!(agent.owner, "acme");
        assert_eq!(agent.name, "gpu");
        assert!(ctx.client.in_cluster);
    }

    #[rstest]
    #[case::missing_segment("acme.gpu")]
    #[case::wrong_marker("acme.agent.gpu")]
    #[case::empty_owner(".agents.gpu")]
    fn invalid_agent_instance(#[case] raw: &str) {
        assert!(raw.parse::<AgentInstance>().is_err());
    }

    #[test]
    fn run_instance_roundtrip() {
        let raw = "acme.mnist.runs.0123abcd";
        let run: RunInstance = raw.parse().unwrap();
        assert_eq!(run.project, "mnist");
        assert_eq!(run.uuid, "0123abcd");
        assert_eq!(run.to_string(), raw);
    }

    #[test]
    fn invalid_interval_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_home(dir.path());
        env.insert(
            ENV_INTERVALS_COMPATIBILITY_CHECK.to_string(),
            "soon".to_string(),
        );
        let err = Context::from_env(&env).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn save_cli_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::from_env(&env_with_home(dir.path())).unwrap();
        ctx.cli.check_count = 3;
        ctx.save_cli().unwrap();

        let reloaded = Context::from_env(&env_with_home(dir.path())).unwrap();
        assert_eq!(reloaded.cli.check_count, 3);
    }

    #[test]
    fn compatibility_check_interval() {
        let now = Utc::now();
        let mut cli = CliConfig::default();
        assert!(cli.should_check(now));
        cli.last_check = Some(now);
        assert!(!cli.should_check(now));
    }
}
