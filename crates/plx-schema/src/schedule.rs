//! Schedules, hooks and event triggers

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::io::Param;
use crate::statuses::Status;

/// Cron schedule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    /// Cron expression
    pub cron: String,
    /// First eligible time
    #[serde(default, alias = "start_at", skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// Last eligible time
    #[serde(default, alias = "end_at", skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    /// Maximum number of runs
    #[serde(default, alias = "max_runs", skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
    /// Wait for the previous run to finish
    #[serde(default, alias = "depends_on_past", skip_serializing_if = "Option::is_none")]
    pub depends_on_past: Option<bool>,
}

/// Fixed-interval schedule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntervalSchedule {
    /// Seconds between runs
    pub frequency: u64,
    /// First eligible time
    #[serde(default, alias = "start_at", skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// Last eligible time
    #[serde(default, alias = "end_at", skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    /// Maximum number of runs
    #[serde(default, alias = "max_runs", skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
    /// Wait for the previous run to finish
    #[serde(default, alias = "depends_on_past", skip_serializing_if = "Option::is_none")]
    pub depends_on_past: Option<bool>,
}

/// One-off schedule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeSchedule {
    /// Run time
    #[serde(alias = "start_at")]
    pub start_at: DateTime<Utc>,
}

/// Schedule, discriminated by `kind`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schedule {
    /// Cron
    Cron(CronSchedule),
    /// Interval
    Interval(IntervalSchedule),
    /// Datetime
    Datetime(DateTimeSchedule),
}

/// Operation started when the run reaches a status
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// Status that fires the hook (`succeeded`, `failed`, `stopped`, `done`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Status>,
    /// Notification connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Component to run
    #[serde(default, alias = "hub_ref", skip_serializing_if = "Option::is_none")]
    pub hub_ref: Option<String>,
    /// Extra condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
    /// Params of the hook operation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Param>,
    /// Presets applied to the hook
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presets: Vec<String>,
    /// Queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Skip project default hooks
    #[serde(default, alias = "disable_defaults", skip_serializing_if = "Option::is_none")]
    pub disable_defaults: Option<bool>,
}

/// Start when upstream runs emit events
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventTrigger {
    /// Event kinds listened to
    pub kinds: Vec<String>,
    /// Upstream reference (`ops.<name>`, `runs.<uuid>`)
    #[serde(rename = "ref")]
    pub reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_kinds() {
        let cron: Schedule = serde_json::from_value(json!({
            "kind": "cron", "cron": "0 * * * *", "max_runs": 3,
        }))
        .unwrap();
        assert!(matches!(cron, Schedule::Cron(ref c) if c.max_runs == Some(3)));

        let interval: Schedule =
            serde_json::from_value(json!({"kind": "interval", "frequency": 60})).unwrap();
        assert_eq!(serde_json::to_value(&interval).unwrap()["frequency"], 60);

        let at: Schedule = serde_json::from_value(json!({
            "kind": "datetime", "startAt": "2024-01-01T00:00:00Z",
        }))
        .unwrap();
        assert!(matches!(at, Schedule::Datetime(_)));
    }

    #[test]
    fn hook_and_event() {
        let hook: Hook = serde_json::from_value(json!({
            "trigger": "failed", "connection": "slack", "hubRef": "notifier",
        }))
        .unwrap();
        assert_eq!(hook.trigger, Some(Status::Failed));

        let event: EventTrigger =
            serde_json::from_value(json!({"kinds": ["run_status_done"], "ref": "ops.train"}))
                .unwrap();
        assert_eq!(event.reference, "ops.train");
    }
}
