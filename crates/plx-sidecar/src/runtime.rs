//! The sidecar loop
//!
//! Every `sleep_interval` seconds the sidecar checks the main container.
//! Every [`get_sync_interval`] ticks it writes new log lines, snapshots the
//! operation spec and uploads changed outputs. When the main container
//! finishes it flushes once more and reports the final status, even when
//! that flush fails. Cancellation
//! triggers a flush bounded by `flush_timeout`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plx_agent::ControlPlane;
use plx_common::config::RunInstance;
use plx_common::error::Retryable;
use plx_common::retry::{retry_with_backoff, RetryConfig};
use plx_schema::{Status, StatusCondition};

use crate::inspector::{ContainerState, PodInspector};
use crate::logs::{append_jsonl, LogCollector};
use crate::store::ArtifactStore;
use crate::{Result, SidecarError};

/// Ticks between two syncs.
///
/// `-1` when `interval <= 0` (sync only at the end), `0` when the interval
/// is shorter than a tick (sync every tick), else `interval / sleep + 1`.
pub fn get_sync_interval(interval: i64, sleep_interval: i64) -> i64 {
    if interval <= 0 {
        -1
    } else if interval < sleep_interval {
        0
    } else {
        interval / sleep_interval.max(1) + 1
    }
}

/// Loop settings
#[derive(Clone, Debug)]
pub struct SidecarConfig {
    /// Seconds between two checks of the main container
    pub sleep_interval: u64,
    /// Seconds between two syncs, see [`get_sync_interval`]
    pub sync_interval: i64,
    /// Grace window for the flush after cancellation
    pub flush_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            sleep_interval: 10,
            sync_interval: 10,
            flush_timeout: Duration::from_secs(30),
        }
    }
}

/// Reports the run's final status to the control plane
pub struct StatusReporter {
    control_plane: Arc<dyn ControlPlane>,
    run: RunInstance,
    retry: RetryConfig,
}

impl StatusReporter {
    /// Reporter for `run`
    pub fn new(control_plane: Arc<dyn ControlPlane>, run: RunInstance, retry: RetryConfig) -> Self {
        Self {
            control_plane,
            run,
            retry,
        }
    }

    async fn report(&self, state: &ContainerState) -> Result<()> {
        let condition = match state {
            ContainerState::Succeeded => {
                StatusCondition::new(Status::Succeeded, "ContainerSucceeded", None, Utc::now())
            }
            ContainerState::Failed { reason, exit_code } => StatusCondition::new(
                Status::Failed,
                reason.clone(),
                exit_code.map(|code| format!("main container exited with code {}", code)),
                Utc::now(),
            ),
            _ => return Ok(()),
        };
        let plane = self.control_plane.as_ref();
        let run = &self.run;
        let condition = &condition;
        retry_with_backoff(&self.retry, "create_run_status", move || {
            plane.create_run_status(&run.owner, &run.project, &run.uuid, condition)
        })
        .await?;
        Ok(())
    }
}

/// Sidecar for one main container
pub struct Sidecar {
    inspector: Arc<dyn PodInspector>,
    store: ArtifactStore,
    logs: LogCollector,
    reporter: Option<StatusReporter>,
    config: SidecarConfig,
}

impl Sidecar {
    /// Sidecar writing into `store`
    pub fn new(
        inspector: Arc<dyn PodInspector>,
        store: ArtifactStore,
        logs: LogCollector,
        config: SidecarConfig,
    ) -> Self {
        Self {
            inspector,
            store,
            logs,
            reporter: None,
            config,
        }
    }

    /// Report the final status when the main container finishes
    pub fn with_reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Write new logs, the spec snapshot and changed outputs
    pub async fn sync(&mut self) -> Result<()> {
        let since = self.logs.since_seconds(Utc::now());
        let raw = self.inspector.logs_since(since).await?;
        let lines = self.logs.accept(&raw);
        append_jsonl(&self.store.logs_path(self.logs.pod()), &lines).await?;

        if let Some(spec) = self.inspector.operation_spec().await? {
            self.store.write_spec(&spec).await?;
        }
        let uploaded = self.store.sync_outputs().await?;
        debug!(lines = lines.len(), uploaded, "synced");
        Ok(())
    }

    /// Run until the main container finishes or `cancel` fires.
    ///
    /// Returns the final state of the main container. Cancellation ends with
    /// [`SidecarError::Cancelled`] once flushed, or [`SidecarError::Timeout`]
    /// when the flush outlives the grace window.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ContainerState> {
        let every = get_sync_interval(self.config.sync_interval, self.config.sleep_interval as i64);
        let sleep = Duration::from_secs(self.config.sleep_interval.max(1));
        info!(sleep_secs = sleep.as_secs(), sync_every = every, "sidecar started");
        let mut ticks: i64 = 0;
        loop {
            match self.inspector.container_state().await {
                Ok(state) if state.is_done() => {
                    info!(state = ?state, "main container finished");
                    let flushed = self.sync().await;
                    if let Some(reporter) = &self.reporter {
                        if let Err(e) = reporter.report(&state).await {
                            warn!(error = %e, "could not report the final status");
                        }
                    }
                    flushed?;
                    return Ok(state);
                }
                Ok(state) => debug!(state = ?state, "main container active"),
                Err(e) if e.is_retryable() => warn!(error = %e, "could not inspect the pod"),
                Err(e) => return Err(e),
            }

            ticks += 1;
            if every == 0 || (every > 0 && ticks % every == 0) {
                if let Err(e) = self.sync().await {
                    warn!(error = %e, "sync failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("termination requested, flushing");
                    let timeout = self.config.flush_timeout;
                    return match tokio::time::timeout(timeout, self.sync()).await {
                        Ok(Ok(())) => Err(SidecarError::Cancelled),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(SidecarError::Timeout(timeout)),
                    };
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }
}
