//! Log collection
//!
//! Kubelet lines come prefixed with an RFC 3339 timestamp. The collector
//! remembers the newest timestamp it has written and drops anything at or
//! before it, so overlapping `since_seconds` windows never duplicate lines.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use plx_common::Error;

use crate::Result;

/// One log line as stored in `logs/<pod>.jsonl`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    /// Kubelet timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Pod name
    pub pod: String,
    /// Container name
    pub container: String,
    /// Line content
    pub value: String,
}

/// Split a `<timestamp> <message>` line; lines without a timestamp keep
/// their full content
pub fn parse_line(raw: &str, pod: &str, container: &str) -> LogLine {
    let (timestamp, value) = match raw.split_once(' ') {
        Some((ts, rest)) => match DateTime::parse_from_rfc3339(ts) {
            Ok(ts) => (Some(ts.with_timezone(&Utc)), rest),
            Err(_) => (None, raw),
        },
        None => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => (Some(ts.with_timezone(&Utc)), ""),
            Err(_) => (None, raw),
        },
    };
    LogLine {
        timestamp,
        pod: pod.to_string(),
        container: container.to_string(),
        value: value.to_string(),
    }
}

/// Tracks which lines of a container were already written
#[derive(Clone, Debug)]
pub struct LogCollector {
    pod: String,
    container: String,
    last_time: Option<DateTime<Utc>>,
}

impl LogCollector {
    /// Collector for `container` in `pod`
    pub fn new(pod: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            container: container.into(),
            last_time: None,
        }
    }

    /// Pod name
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Newest timestamp written so far
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.last_time
    }

    /// Window to request from the API: everything on the first call, then a
    /// second more than the time since the last line
    pub fn since_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_time
            .map(|last| (now - last).num_seconds().max(0) + 1)
    }

    /// Parse raw lines and keep only the ones newer than the last write
    pub fn accept(&mut self, raw: &[String]) -> Vec<LogLine> {
        let mut fresh = Vec::new();
        for line in raw.iter().filter(|l| !l.is_empty()) {
            let line = parse_line(line, &self.pod, &self.container);
            match (line.timestamp, self.last_time) {
                (Some(ts), Some(last)) if ts <= last => continue,
                (Some(ts), _) => self.last_time = Some(ts),
                (None, _) => {}
            }
            fresh.push(line);
        }
        fresh
    }
}

/// Append lines to a JSONL file, creating it and its parents
pub async fn append_jsonl(path: &Path, lines: &[LogLine]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    let mut buffer = Vec::new();
    for line in lines {
        serde_json::to_writer(&mut buffer, line)?;
        buffer.push(b'\n');
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    file.write_all(&buffer).await.map_err(|e| Error::io(path, e))?;
    file.flush().await.map_err(|e| Error::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn timestamps_are_split_off() {
        let line = parse_line("2024-05-01T10:00:00.5Z epoch 1 loss=0.3", "pod", "main");
        assert_eq!(line.value, "epoch 1 loss=0.3");
        assert_eq!(
            line.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::milliseconds(500))
        );

        let bare = parse_line("no timestamp here", "pod", "main");
        assert_eq!(bare.timestamp, None);
        assert_eq!(bare.value, "no timestamp here");
    }

    #[test]
    fn already_written_lines_are_dropped() {
        let mut collector = LogCollector::new("pod", "main");
        let first = collector.accept(&raw(&[
            "2024-05-01T10:00:00Z a",
            "2024-05-01T10:00:01Z b",
        ]));
        assert_eq!(first.len(), 2);

        let second = collector.accept(&raw(&[
            "2024-05-01T10:00:01Z b",
            "2024-05-01T10:00:02Z c",
            "",
        ]));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].value, "c");
        assert_eq!(collector.last_time(), Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 2).unwrap()));
    }

    #[test]
    fn since_window_covers_the_last_line() {
        let mut collector = LogCollector::new("pod", "main");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 30).unwrap();
        assert_eq!(collector.since_seconds(now), None);
        collector.accept(&raw(&["2024-05-01T10:00:00Z a"]));
        assert_eq!(collector.since_seconds(now), Some(31));
    }

    #[tokio::test]
    async fn lines_are_appended_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("pod.jsonl");
        let mut collector = LogCollector::new("pod", "main");
        append_jsonl(&path, &collector.accept(&raw(&["2024-05-01T10:00:00Z a"]))).await.unwrap();
        append_jsonl(&path, &collector.accept(&raw(&["2024-05-01T10:00:01Z b"]))).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<LogLine> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].value, "b");
        assert_eq!(lines[1].container, "main");
    }
}
