//! Pod-level environment of a replica

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::k8s::{lenient_string_map, Toleration};

/// Scheduling and pod settings applied to every pod of a replica
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Extra pod labels
    #[serde(default, deserialize_with = "lenient_string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Extra pod annotations
    #[serde(default, deserialize_with = "lenient_string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Node selector
    #[serde(
        default,
        alias = "node_selector",
        deserialize_with = "lenient_string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub node_selector: BTreeMap<String, String>,
    /// Affinity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Value>,
    /// Tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Node name
    #[serde(default, alias = "node_name", skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Service account
    #[serde(default, alias = "service_account_name", skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Host aliases
    #[serde(default, alias = "host_aliases", skip_serializing_if = "Vec::is_empty")]
    pub host_aliases: Vec<Value>,
    /// Pod security context
    #[serde(default, alias = "security_context", skip_serializing_if = "Option::is_none")]
    pub security_context: Option<Value>,
    /// Image pull secret names
    #[serde(default, alias = "image_pull_secrets", skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
    /// Use the host network
    #[serde(default, alias = "host_network", skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
    /// Use the host PID namespace
    #[serde(default, rename = "hostPID", alias = "host_pid", skip_serializing_if = "Option::is_none")]
    pub host_pid: Option<bool>,
    /// DNS policy
    #[serde(default, alias = "dns_policy", skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    /// DNS config
    #[serde(default, alias = "dns_config", skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<Value>,
    /// Scheduler name
    #[serde(default, alias = "scheduler_name", skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,
    /// Priority class
    #[serde(default, alias = "priority_class_name", skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    /// Priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Restart policy (`Always`, `OnFailure`, `Never`)
    #[serde(default, alias = "restart_policy", skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
}

impl Environment {
    /// Overlay `other` on top of `self`: maps merge, set scalars win
    pub fn overlay(&self, other: &Environment) -> Environment {
        let mut merged = self.clone();
        merged.labels.extend(other.labels.clone());
        merged.annotations.extend(other.annotations.clone());
        merged.node_selector.extend(other.node_selector.clone());
        if !other.tolerations.is_empty() {
            merged.tolerations = other.tolerations.clone();
        }
        if !other.host_aliases.is_empty() {
            merged.host_aliases = other.host_aliases.clone();
        }
        if !other.image_pull_secrets.is_empty() {
            merged.image_pull_secrets = other.image_pull_secrets.clone();
        }
        macro_rules! take {
            ($($field:ident),+) => {
                $(if other.$field.is_some() {
                    merged.$field = other.$field.clone();
                })+
            };
        }
        take!(
            affinity,
            node_name,
            service_account_name,
            security_context,
            host_network,
            host_pid,
            dns_policy,
            dns_config,
            scheduler_name,
            priority_class_name,
            priority,
            restart_policy
        );
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_merges_maps_and_overrides_scalars() {
        let base: Environment = serde_json::from_value(json!({
            "nodeSelector": {"pool": "cpu"},
            "labels": {"a": "1"},
            "restartPolicy": "Never",
        }))
        .unwrap();
        let over: Environment = serde_json::from_value(json!({
            "node_selector": {"pool": "gpu"},
            "labels": {"b": 2},
            "serviceAccountName": "runner",
        }))
        .unwrap();

        let merged = base.overlay(&over);
        assert_eq!(merged.node_selector["pool"], "gpu");
        assert_eq!(merged.labels.len(), 2);
        assert_eq!(merged.labels["b"], "2");
        assert_eq!(merged.restart_policy.as_deref(), Some("Never"));
        assert_eq!(merged.service_account_name.as_deref(), Some("runner"));
    }
}
