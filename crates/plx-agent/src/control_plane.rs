//! Control-plane client
//!
//! The agent pulls its work (runs to start, runs to stop) from the platform
//! and pushes status conditions back. Every request carries the client
//! version header; in-cluster requests are marked internal and tagged with
//! the service mode.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use plx_common::config::{AgentInstance, ClientConfig};
use plx_common::constants::{HEADER_CLIENT_VERSION, HEADER_INTERNAL, HEADER_SERVICE};
use plx_schema::{RunKind, StatusCondition};

use crate::{AgentError, Result};

/// A run the platform wants the agent to act on
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Owner name
    pub owner: String,
    /// Project name
    pub project: String,
    /// Run uuid
    pub uuid: String,
    /// Run name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Run kind
    pub kind: RunKind,
    /// Compiled operation, for runs to start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// Work assigned to the agent
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentState {
    /// Runs to submit
    pub queued: Vec<RunRequest>,
    /// Runs to stop
    pub stopping: Vec<RunRequest>,
    /// Runs whose backend objects must be removed
    pub deleting: Vec<RunRequest>,
}

/// Platform API used by the agent
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Work currently assigned to the agent
    async fn get_agent_state(&self) -> Result<AgentState>;

    /// Record a status transition of a run
    async fn create_run_status(&self, owner: &str, project: &str, run_uuid: &str, condition: &StatusCondition)
        -> Result<()>;
}

/// Control plane over HTTP
pub struct HttpControlPlane {
    host: String,
    token: Option<String>,
    service_mode: Option<String>,
    internal: bool,
    agent: Option<AgentInstance>,
    http: reqwest::Client,
}

impl HttpControlPlane {
    /// Client using the client settings; `agent` is needed to pull work
    pub fn new(client: &ClientConfig, agent: Option<AgentInstance>) -> Result<Self> {
        let host = client
            .host
            .clone()
            .ok_or_else(|| AgentError::Agent("no platform host configured".to_string()))?;
        let mut builder = reqwest::Client::builder();
        if client.timeout > 0 {
            builder = builder.timeout(std::time::Duration::from_secs(client.timeout));
        }
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            token: client.token.clone(),
            service_mode: client.service_mode.clone(),
            internal: client.in_cluster,
            agent,
            http: builder.build()?,
        })
    }

    fn with_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        request = request.header(HEADER_CLIENT_VERSION, plx_common::VERSION);
        if self.internal {
            request = request.header(HEADER_INTERNAL, "true");
        }
        if let Some(mode) = &self.service_mode {
            request = request.header(HEADER_SERVICE, mode);
        }
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }
        request
    }

    fn state_url(&self) -> Result<String> {
        let agent = self
            .agent
            .as_ref()
            .ok_or_else(|| AgentError::Agent("no agent instance configured".to_string()))?;
        Ok(format!("{}/api/v1/orgs/{}/agents/{}/state", self.host, agent.owner, agent.name))
    }

    fn statuses_url(&self, owner: &str, project: &str, run_uuid: &str) -> String {
        format!("{}/api/v1/{}/{}/runs/{}/statuses", self.host, owner, project, run_uuid)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn get_agent_state(&self) -> Result<AgentState> {
        let url = self.state_url()?;
        debug!(url = %url, "fetching agent state");
        let state = self
            .with_headers(self.http.get(&url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(state)
    }

    async fn create_run_status(
        &self,
        owner: &str,
        project: &str,
        run_uuid: &str,
        condition: &StatusCondition,
    ) -> Result<()> {
        let url = self.statuses_url(owner, project, run_uuid);
        self.with_headers(self.http.post(&url))
            .json(&serde_json::json!({ "condition": condition }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientConfig {
        ClientConfig {
            host: Some("https://plx.example.com/".into()),
            token: Some("secret".into()),
            in_cluster: true,
            service_mode: Some("agent".into()),
            ..Default::default()
        }
    }

    fn agent() -> Option<AgentInstance> {
        Some("acme.agents.gpu".parse().unwrap())
    }

    #[test]
    fn urls_are_built_from_the_host() {
        let api = HttpControlPlane::new(&client(), agent()).unwrap();
        assert_eq!(api.state_url().unwrap(), "https://plx.example.com/api/v1/orgs/acme/agents/gpu/state");
        assert_eq!(
            api.statuses_url("acme", "mnist", "abc"),
            "https://plx.example.com/api/v1/acme/mnist/runs/abc/statuses"
        );
    }

    #[test]
    fn headers_follow_the_client_config() {
        let api = HttpControlPlane::new(&client(), agent()).unwrap();
        let request = api.with_headers(api.http.get(api.state_url().unwrap())).build().unwrap();
        let headers = request.headers();
        assert_eq!(headers[HEADER_CLIENT_VERSION], plx_common::VERSION);
        assert_eq!(headers[HEADER_INTERNAL], "true");
        assert_eq!(headers[HEADER_SERVICE], "agent");
        assert_eq!(headers["Authorization"], "token secret");
    }

    #[test]
    fn missing_host_is_an_agent_error() {
        let err = HttpControlPlane::new(&ClientConfig::default(), agent()).err().unwrap();
        assert!(matches!(err, AgentError::Agent(_)));
    }

    #[tokio::test]
    async fn pulling_work_needs_an_agent_instance() {
        let api = HttpControlPlane::new(&client(), None).unwrap();
        let err = api.get_agent_state().await.unwrap_err();
        assert!(matches!(err, AgentError::Agent(_)));
    }

    #[test]
    fn agent_state_defaults_to_empty() {
        let state: AgentState = serde_json::from_str(r#"{"queued": [{"owner": "acme", "project": "mnist", "uuid": "abc", "kind": "job"}]}"#).unwrap();
        assert_eq!(state.queued.len(), 1);
        assert!(state.stopping.is_empty());
        assert_eq!(state.queued[0].kind, RunKind::Job);
    }
}
