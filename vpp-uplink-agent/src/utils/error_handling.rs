//! Polling helpers for conditions the kernel settles asynchronously.
//!
//! Restore steps are never retried, but some of them start work the kernel
//! completes on its own schedule (a PCI device re-probed after a driver
//! rebind shows up as a netdev a little later). [`poll_async`] waits for such
//! a condition with exponential backoff and gives up after a fixed number of
//! attempts.

use std::time::Duration;
use tracing::{debug, warn};

/// Polls `operation` until it succeeds, sleeping between attempts.
///
/// # Returns
///
/// * `Ok(T)` - The first successful result
/// * `Err(E)` - The error of the last attempt
pub async fn poll_async<F, Fut, T, E>(
    operation: F,
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f32,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "'{}' succeeded after {} attempts",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(
                    "'{}' still failing after {} attempts: {}",
                    operation_name, attempt, err
                );
                return Err(err);
            }
            Err(err) => {
                debug!(
                    "'{}' not ready (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, err
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f32(delay.as_secs_f32() * backoff_multiplier);
                attempt += 1;
            }
        }
    }
}
