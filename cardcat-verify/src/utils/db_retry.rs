//! Lock-contention retry for learning writes
//!
//! Learning writes race with each other and with API reads; SQLite answers
//! the loser with a busy/locked error that is worth waiting out.

use cardcat_common::{Error, Result};
use std::time::{Duration, Instant};

/// Default total time a learning write may spend retrying
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(1000);

/// Run `operation`, retrying while SQLite reports lock contention
///
/// Backoff starts at 10 ms and doubles up to 1 s; no sleep runs past the
/// `max_wait_ms` deadline. Errors other than lock contention return at once.
/// Running out of time yields `Error::Internal`.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let deadline = started + Duration::from_millis(max_wait_ms);
    let mut backoff = FIRST_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempts,
                        waited_ms = started.elapsed().as_millis(),
                        "Write went through after lock contention"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let now = Instant::now();
        if now >= deadline {
            tracing::error!(
                operation = operation_name,
                attempts,
                max_wait_ms,
                error = %err,
                "Giving up on locked database"
            );
            return Err(Error::Internal(format!(
                "Database locked: {} gave up after {} attempts in {} ms",
                operation_name,
                attempts,
                started.elapsed().as_millis()
            )));
        }

        let pause = backoff.min(deadline - now);
        tracing::warn!(operation = operation_name, attempts, pause_ms = pause.as_millis(), "Database locked, backing off");
        tokio::time::sleep(pause).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
