//! Component reference resolution
//!
//! An operation names its component inline or through `hubRef`, `pathRef`,
//! `urlRef` or `dagRef`. A fetched document may itself be an operation with
//! its own reference, so resolution walks a chain. Every hop is keyed by
//! `(source, identifier)` in a visited set; meeting a key twice is a cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use plx_common::constants::{HEADER_CLIENT_VERSION, HEADER_INTERNAL};
use plx_schema::{Component, ComponentReference, Operation, SchemaError, SpecKind, Specification};
use serde_json::Value;
use tracing::{debug, info};

use crate::loader::{parse_document, read_file};
use crate::{CompileError, Result};

/// Fetches raw documents for component references and presets
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComponentResolver: Send + Sync {
    /// Raw document a non-inline reference points at
    async fn fetch(&self, reference: &ComponentReference) -> Result<Value>;

    /// Raw preset document by name
    async fn fetch_preset(&self, name: &str) -> Result<Value>;
}

/// Access to the component hub
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Raw component document for `[owner/]name[:version]`
    async fn get_component(&self, reference: &str) -> Result<Value>;
}

/// Hub reference split into its parts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubRef {
    /// Owner, `polyaxon` for public components
    pub owner: String,
    /// Component name
    pub name: String,
    /// Version tag
    pub version: String,
}

impl HubRef {
    /// Parse `[owner/]name[:version]`
    pub fn parse(reference: &str) -> Result<Self> {
        let (owner, rest) = match reference.split_once('/') {
            Some((owner, rest)) => (owner.to_string(), rest),
            None => ("polyaxon".to_string(), reference),
        };
        let (name, version) = match rest.split_once(':') {
            Some((name, version)) => (name.to_string(), version.to_string()),
            None => (rest.to_string(), "latest".to_string()),
        };
        if name.is_empty() || owner.is_empty() || version.is_empty() {
            return Err(SchemaError::parse(reference, "expected `[owner/]name[:version]`").into());
        }
        Ok(Self { owner, name, version })
    }
}

/// Hub client backed by the platform API
pub struct HttpHubClient {
    host: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpHubClient {
    /// Client for `host` authenticating with `token`
    pub fn new(host: impl Into<String>, token: Option<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn get_component(&self, reference: &str) -> Result<Value> {
        let hub = HubRef::parse(reference)?;
        let url = format!(
            "{}/api/v1/{}/hub/{}/versions/{}",
            self.host, hub.owner, hub.name, hub.version
        );
        let mut request = self
            .http
            .get(&url)
            .header(HEADER_CLIENT_VERSION, plx_common::VERSION)
            .header(HEADER_INTERNAL, "true");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }
        let fail = |e: reqwest::Error| CompileError::resolve(format!("hubRef:{}", reference), e.to_string());
        let body: Value = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fail)?
            .json()
            .await
            .map_err(fail)?;
        match body.get("content").and_then(Value::as_str) {
            Some(content) => parse_document(content),
            None => Err(CompileError::resolve(
                format!("hubRef:{}", reference),
                "response has no `content`",
            )),
        }
    }
}

/// Resolver over local files, URLs, the hub, DAG siblings and named presets
#[derive(Default)]
pub struct DefaultResolver {
    base_dir: PathBuf,
    hub: Option<Arc<dyn HubClient>>,
    dag: BTreeMap<String, Value>,
    presets: BTreeMap<String, Value>,
    http: reqwest::Client,
}

impl DefaultResolver {
    /// Resolver reading relative paths from `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Use a hub client for `hubRef`
    pub fn with_hub(mut self, hub: Arc<dyn HubClient>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Operations of the enclosing DAG, by name
    pub fn with_dag(mut self, dag: BTreeMap<String, Value>) -> Self {
        self.dag = dag;
        self
    }

    /// Named presets
    pub fn with_presets(mut self, presets: BTreeMap<String, Value>) -> Self {
        self.presets = presets;
        self
    }
}

#[async_trait]
impl ComponentResolver for DefaultResolver {
    async fn fetch(&self, reference: &ComponentReference) -> Result<Value> {
        let label = || format!("{}:{}", reference.source(), reference.identifier());
        match reference {
            ComponentReference::Inline(component) => Ok(serde_json::to_value(component)?),
            ComponentReference::Path(path) => read_file(&self.base_dir.join(path)),
            ComponentReference::Url(url) => {
                let fail = |e: reqwest::Error| CompileError::resolve(label(), e.to_string());
                let body = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(fail)?
                    .text()
                    .await
                    .map_err(fail)?;
                parse_document(&body)
            }
            ComponentReference::Hub(name) => match &self.hub {
                Some(hub) => hub.get_component(name).await,
                None => Err(CompileError::resolve(label(), "no hub client configured")),
            },
            ComponentReference::Dag(name) => self
                .dag
                .get(name)
                .cloned()
                .ok_or_else(|| CompileError::resolve(label(), "no such operation in the dag")),
        }
    }

    async fn fetch_preset(&self, name: &str) -> Result<Value> {
        self.presets
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::resolve(format!("preset:{}", name), "unknown preset"))
    }
}

/// A component together with the operations met on the way to it
#[derive(Clone, Debug)]
pub struct Resolution {
    /// The inline component
    pub component: Component,
    /// Referenced operations, outermost first
    pub chain: Vec<(String, Operation)>,
}

/// Follow references until an inline component is reached
pub async fn resolve_component(
    operation: &Operation,
    resolver: &dyn ComponentResolver,
) -> Result<Resolution> {
    let mut visited: BTreeSet<(String, String)> = BTreeSet::new();
    let mut trail: Vec<String> = Vec::new();
    let mut chain = Vec::new();
    let mut reference = operation.component_reference()?;

    loop {
        let (source, identifier) = (reference.source().to_string(), reference.identifier());
        if let ComponentReference::Inline(component) = reference {
            debug!(hops = chain.len(), "component resolved");
            return Ok(Resolution {
                component: *component,
                chain,
            });
        }

        let label = format!("{}:{}", source, identifier);
        trail.push(label.clone());
        if !visited.insert((source, identifier)) {
            return Err(CompileError::Cycle {
                path: trail.join(" -> "),
            });
        }

        info!(reference = %label, "resolving component reference");
        let doc = resolver.fetch(&reference).await?;
        match plx_schema::read(doc)? {
            Specification::Component(component) => {
                return Ok(Resolution {
                    component: *component,
                    chain,
                });
            }
            Specification::Operation(op) => {
                reference = op.component_reference()?;
                chain.push((label, *op));
            }
            Specification::CompiledOperation(_) => {
                return Err(SchemaError::schema(
                    label,
                    "an operation or component",
                    SpecKind::CompiledOperation.as_str(),
                )
                .into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn component_doc() -> Value {
        json!({"kind": "component", "run": {"kind": "job", "container": {"image": "busybox"}}})
    }

    #[tokio::test]
    async fn inline_needs_no_fetch() {
        let op: Operation = serde_json::from_value(json!({"component": component_doc()})).unwrap();
        let resolver = MockComponentResolver::new();
        let resolved = resolve_component(&op, &resolver).await.unwrap();
        assert!(resolved.chain.is_empty());
    }

    #[tokio::test]
    async fn follows_operation_chain() {
        let op: Operation = serde_json::from_value(json!({"hubRef": "trainer"})).unwrap();
        let mut resolver = MockComponentResolver::new();
        resolver.expect_fetch().returning(|reference| match reference {
            ComponentReference::Hub(name) if name == "trainer" => Ok(json!({
                "kind": "operation",
                "pathRef": "train.yaml",
                "params": {"lr": {"value": 0.1}},
            })),
            ComponentReference::Path(_) => Ok(component_doc()),
            other => panic!("unexpected {:?}", other),
        });
        let resolved = resolve_component(&op, &resolver).await.unwrap();
        assert_eq!(resolved.chain.len(), 1);
        assert_eq!(resolved.chain[0].0, "hubRef:trainer");
        assert!(resolved.chain[0].1.params.contains_key("lr"));
    }

    #[tokio::test]
    async fn self_reference_is_a_cycle() {
        let op: Operation = serde_json::from_value(json!({"hubRef": "loop"})).unwrap();
        let mut resolver = MockComponentResolver::new();
        resolver
            .expect_fetch()
            .returning(|_| Ok(json!({"kind": "operation", "hubRef": "loop"})));
        let err = resolve_component(&op, &resolver).await.unwrap_err();
        match err {
            CompileError::Cycle { path } => assert_eq!(path, "hubRef:loop -> hubRef:loop"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn hub_refs_go_through_the_hub_client() {
        let mut hub = MockHubClient::new();
        hub.expect_get_component()
            .withf(|r| r == "acme/trainer:v2")
            .returning(|_| Ok(component_doc()));
        let resolver = DefaultResolver::new(".").with_hub(Arc::new(hub));
        let doc = resolver
            .fetch(&ComponentReference::Hub("acme/trainer:v2".into()))
            .await
            .unwrap();
        assert_eq!(doc["kind"], json!("component"));
    }

    #[tokio::test]
    async fn path_refs_read_relative_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.yaml"), "run:\n  kind: job\n").unwrap();
        let resolver = DefaultResolver::new(dir.path());
        let doc = resolver
            .fetch(&ComponentReference::Path("c.yaml".into()))
            .await
            .unwrap();
        assert_eq!(doc["run"]["kind"], json!("job"));
        assert!(resolver.fetch_preset("gpu").await.is_err());
    }

    #[test]
    fn hub_ref_parts() {
        assert_eq!(
            HubRef::parse("acme/trainer:v2").unwrap(),
            HubRef { owner: "acme".into(), name: "trainer".into(), version: "v2".into() }
        );
        assert_eq!(HubRef::parse("tensorboard").unwrap().version, "latest");
        assert!(HubRef::parse("acme/:v1").is_err());
    }
}
