//! Bounded polling
//!
//! Every readiness check in bosun goes through `poll_until`, so the
//! interval/timeout/cancellation semantics are implemented exactly once.
//! Cancellation interrupts an in-flight inter-tick sleep, not merely the
//! next iteration.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Why a poll loop stopped without the predicate being satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// Deadline exceeded. Returned at or after `timeout`, and never later
    /// than `timeout` plus one interval.
    TimedOut { elapsed: Duration },
    /// The caller's token was cancelled.
    Cancelled,
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::TimedOut { elapsed } => write!(f, "timed out after {:?}", elapsed),
            PollError::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl std::error::Error for PollError {}

/// Run `tick` once per `interval` until it yields `Some`, the deadline
/// passes, or `cancel` fires. The tick itself is not raced against the
/// deadline; a tick that is in flight when the deadline passes finishes
/// first and its result wins.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut tick: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = tokio::time::Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        if let Some(value) = tick().await {
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(PollError::TimedOut { elapsed });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
