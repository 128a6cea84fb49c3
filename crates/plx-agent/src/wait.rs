//! Waiting for a run's backend object to disappear

use tracing::{debug, info, warn};

use plx_common::retry::RetryConfig;
use plx_schema::RunKind;

use crate::executor::Executor;

/// Poll `get` until the object is gone.
///
/// The first poll is followed by at most `max_retries` more; after the n-th
/// poll that still sees the object the loop sleeps `n²` units (capped by the
/// config). Returns the process exit code: `0` once the object is gone, `1`
/// when it outlives every retry. Errors from `get` count as a poll that still
/// sees the object.
pub async fn wait(
    executor: &dyn Executor,
    namespace: &str,
    run_uuid: &str,
    run_kind: RunKind,
    max_retries: u32,
    backoff: &RetryConfig,
) -> i32 {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match executor.get(namespace, run_uuid, run_kind).await {
            Ok(None) => {
                info!(run_uuid = %run_uuid, kind = %run_kind, attempt, "operation is gone");
                return 0;
            }
            Ok(Some(_)) => debug!(run_uuid = %run_uuid, attempt, "operation still present"),
            Err(e) => warn!(run_uuid = %run_uuid, attempt, error = %e, "could not fetch operation"),
        }
        if attempt > max_retries {
            warn!(run_uuid = %run_uuid, kind = %run_kind, attempts = attempt, "operation still present after retries");
            return 1;
        }
        tokio::time::sleep(backoff.delay_for(attempt)).await;
    }
}
