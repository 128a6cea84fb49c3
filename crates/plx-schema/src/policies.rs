//! Cache, termination and plugin sections

use serde::{Deserialize, Serialize};

use crate::refs::RefOr;

/// Cache behavior of a run
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cache {
    /// Disable caching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable: Option<bool>,
    /// Seconds a cached result stays valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Inputs considered for the cache key (all when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub io: Vec<String>,
}

/// Termination limits of a run
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Termination {
    /// Retries before the run fails
    #[serde(default, alias = "max_retries", skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<RefOr<u32>>,
    /// Seconds to keep resources after completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<RefOr<u64>>,
    /// Seconds before the run is stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<RefOr<u64>>,
}

impl Termination {
    /// Resolved retry budget, 0 when unset or still templated
    pub fn retries(&self) -> u32 {
        self.max_retries
            .as_ref()
            .and_then(|r| r.value().copied())
            .unwrap_or(0)
    }
}

/// Sidecar tuning
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarPlugin {
    /// Seconds between container inspections
    #[serde(default, alias = "sleep_interval", skip_serializing_if = "Option::is_none")]
    pub sleep_interval: Option<i64>,
    /// Seconds between syncs (≤ 0 syncs only at the end)
    #[serde(default, alias = "sync_interval", skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<i64>,
    /// Sidecar image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Default seconds between sidecar inspections
pub const DEFAULT_SLEEP_INTERVAL: i64 = 10;
/// Default seconds between sidecar syncs
pub const DEFAULT_SYNC_INTERVAL: i64 = 10;

/// Platform features enabled for a run
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plugins {
    /// Mount the auth context (default on)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<bool>,
    /// Mount the docker socket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<bool>,
    /// Mount a memory-backed `/dev/shm`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shm: Option<bool>,
    /// Mount the artifacts store in the main container
    #[serde(default, alias = "mount_artifacts_store", skip_serializing_if = "Option::is_none")]
    pub mount_artifacts_store: Option<bool>,
    /// Upload outputs (default on)
    #[serde(default, alias = "collect_artifacts", skip_serializing_if = "Option::is_none")]
    pub collect_artifacts: Option<bool>,
    /// Collect logs (default on)
    #[serde(default, alias = "collect_logs", skip_serializing_if = "Option::is_none")]
    pub collect_logs: Option<bool>,
    /// Collect resource usage (default on)
    #[serde(default, alias = "collect_resources", skip_serializing_if = "Option::is_none")]
    pub collect_resources: Option<bool>,
    /// Report statuses (default on)
    #[serde(default, alias = "sync_statuses", skip_serializing_if = "Option::is_none")]
    pub sync_statuses: Option<bool>,
    /// Resume from the previous run's outputs
    #[serde(default, alias = "auto_resume", skip_serializing_if = "Option::is_none")]
    pub auto_resume: Option<bool>,
    /// Log level injected in the main container
    #[serde(default, alias = "log_level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Expose the service externally
    #[serde(default, alias = "external_host", skip_serializing_if = "Option::is_none")]
    pub external_host: Option<bool>,
    /// Sidecar tuning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<SidecarPlugin>,
}

impl Plugins {
    /// Auth init container enabled
    pub fn auth_enabled(&self) -> bool {
        self.auth.unwrap_or(true)
    }

    /// Docker socket mounted
    pub fn docker_enabled(&self) -> bool {
        self.docker.unwrap_or(false)
    }

    /// Shared memory mounted
    pub fn shm_enabled(&self) -> bool {
        self.shm.unwrap_or(false)
    }

    /// Artifacts uploaded by the sidecar
    pub fn collect_artifacts_enabled(&self) -> bool {
        self.collect_artifacts.unwrap_or(true)
    }

    /// Logs collected by the sidecar
    pub fn collect_logs_enabled(&self) -> bool {
        self.collect_logs.unwrap_or(true)
    }

    /// Sidecar is injected when it has anything to collect
    pub fn sidecar_enabled(&self) -> bool {
        self.collect_artifacts_enabled() || self.collect_logs_enabled()
    }

    /// Sidecar `(sleep_interval, sync_interval)` with defaults applied
    pub fn sidecar_intervals(&self) -> (i64, i64) {
        let sidecar = self.sidecar.clone().unwrap_or_default();
        (
            sidecar.sleep_interval.unwrap_or(DEFAULT_SLEEP_INTERVAL),
            sidecar.sync_interval.unwrap_or(DEFAULT_SYNC_INTERVAL),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plugin_defaults() {
        let plugins = Plugins::default();
        assert!(plugins.auth_enabled());
        assert!(!plugins.docker_enabled());
        assert!(plugins.sidecar_enabled());
        assert_eq!(plugins.sidecar_intervals(), (10, 10));
    }

    #[test]
    fn sidecar_disabled_when_nothing_collected() {
        let plugins: Plugins =
            serde_json::from_value(json!({"collect_logs": false, "collectArtifacts": false}))
                .unwrap();
        assert!(!plugins.sidecar_enabled());
    }

    #[test]
    fn termination_accepts_rendered_strings() {
        let t: Termination = serde_json::from_value(json!({"maxRetries": "3"})).unwrap();
        assert_eq!(t.retries(), 3);
    }
}
