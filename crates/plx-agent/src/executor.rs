//! Backend executors
//!
//! An executor owns nothing but the mapping `(namespace, run uuid, run kind)`
//! to a backend object. Submission is idempotent by resource name, `get`
//! reports absence as `None` and `delete` treats a missing object as done.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::{debug, info};

use plx_common::constants::{
    OPERATION_API_VERSION, OPERATION_GROUP, OPERATION_KIND, OPERATION_PLURAL, OPERATION_VERSION,
};
use plx_converter::{operation_name, Converted};
use plx_schema::RunKind;

use crate::{AgentError, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "polyaxon-agent";

/// Submits, observes and deletes backend objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    /// Create the backend object for a run; submitting twice is a no-op
    async fn submit(&self, namespace: &str, run_uuid: &str, run_kind: RunKind, manifest: &Converted) -> Result<()>;

    /// Current backend object, `None` once it is gone
    async fn get(&self, namespace: &str, run_uuid: &str, run_kind: RunKind) -> Result<Option<Value>>;

    /// Best-effort removal
    async fn delete(&self, namespace: &str, run_uuid: &str, run_kind: RunKind) -> Result<()>;
}

/// `ApiResource` of the Operation custom resource
pub fn operation_api_resource() -> ApiResource {
    ApiResource {
        group: OPERATION_GROUP.to_string(),
        version: OPERATION_VERSION.to_string(),
        api_version: OPERATION_API_VERSION.to_string(),
        kind: OPERATION_KIND.to_string(),
        plural: OPERATION_PLURAL.to_string(),
    }
}

/// Executor creating Operation custom resources
pub struct KubeExecutor {
    client: Client,
    resource: ApiResource,
}

impl KubeExecutor {
    /// Executor over an existing client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: operation_api_resource(),
        }
    }

    /// Executor from the in-cluster or kubeconfig environment
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl Executor for KubeExecutor {
    async fn submit(&self, namespace: &str, run_uuid: &str, run_kind: RunKind, manifest: &Converted) -> Result<()> {
        let Converted::K8s(resource) = manifest else {
            return Err(AgentError::fatal(format!(
                "the kubernetes executor cannot run a non-kubernetes manifest for `{}`",
                run_kind
            )));
        };
        let name = operation_name(run_uuid);
        let object: DynamicObject = serde_json::from_value(serde_json::to_value(resource.as_ref())?)?;
        self.api(namespace)
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&object))
            .await?;
        info!(run_uuid = %run_uuid, kind = %run_kind, namespace = %namespace, "submitted operation");
        Ok(())
    }

    async fn get(&self, namespace: &str, run_uuid: &str, run_kind: RunKind) -> Result<Option<Value>> {
        let name = operation_name(run_uuid);
        match self.api(namespace).get(&name).await {
            Ok(object) => Ok(Some(serde_json::to_value(object)?)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(run_uuid = %run_uuid, kind = %run_kind, "operation not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, run_uuid: &str, run_kind: RunKind) -> Result<()> {
        let name = operation_name(run_uuid);
        match self.api(namespace).delete(&name, &DeleteParams::background()).await {
            Ok(_) => {
                info!(run_uuid = %run_uuid, kind = %run_kind, "deleted operation");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_resource_matches_the_generated_resource() {
        let resource = operation_api_resource();
        assert_eq!(resource.api_version, "core.polyaxon.com/v1");
        assert_eq!(resource.plural, "operations");
        assert_eq!(resource.kind, "Operation");
    }
}
