//! Bounded polling against eventually-consistent control planes.
//!
//! Every external state transition in this system is only observable by
//! polling, so every mutation is paired with a deadline-bounded loop with
//! exponential backoff. There are no unbounded waits: exceeding the deadline
//! raises [`DeployError::Timeout`] with the configured bound, and transient
//! describe failures consume a small budget before escalating.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{DeployError, Result};

/// Timing parameters for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay before the second and subsequent polls (the first poll fires
    /// immediately). Doubles on each iteration up to `max_interval`.
    pub initial_interval: Duration,
    /// Cap on the backoff interval.
    pub max_interval: Duration,
    /// Absolute deadline for the whole loop.
    pub deadline: Duration,
    /// How many transient poll failures to tolerate before escalating.
    pub max_transient_errors: u32,
}

impl PollConfig {
    /// Change-set computation: usually seconds, occasionally minutes.
    pub const CHANGE_SET: Self = Self {
        initial_interval: Duration::from_secs(5),
        max_interval: Duration::from_secs(300),
        deadline: Duration::from_secs(30 * 60),
        max_transient_errors: 5,
    };

    /// Stack create/update execution: can take a long time on stateful
    /// resources.
    pub const STACK: Self = Self {
        initial_interval: Duration::from_secs(15),
        max_interval: Duration::from_secs(300),
        deadline: Duration::from_secs(60 * 60),
        max_transient_errors: 5,
    };

    /// Stack deletion during self-heal.
    pub const STACK_DELETE: Self = Self {
        initial_interval: Duration::from_secs(15),
        max_interval: Duration::from_secs(60),
        deadline: Duration::from_secs(30 * 60),
        max_transient_errors: 5,
    };

    /// Stack-set operations poll at a fixed short interval for a long time
    /// (multi-region fan-out is slow but the operation status is cheap to
    /// read).
    pub const STACK_SET: Self = Self {
        initial_interval: Duration::from_secs(15),
        max_interval: Duration::from_secs(15),
        deadline: Duration::from_secs(300 * 15),
        max_transient_errors: 5,
    };
}

/// One observation of the polled state.
pub enum Poll<T> {
    /// Terminal state reached.
    Ready(T),
    /// Still in progress, keep polling.
    Pending,
}

/// Drive `op` until it reports [`Poll::Ready`], the deadline expires, or a
/// non-transient error surfaces.
///
/// `waiting_for` names the awaited transition for logs and the timeout error.
pub async fn poll_until<T, F, Fut>(config: &PollConfig, waiting_for: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>>>,
{
    let start = Instant::now();
    let mut interval = config.initial_interval;
    let mut transient_errors = 0u32;

    loop {
        if start.elapsed() > config.deadline {
            return Err(DeployError::Timeout {
                waiting_for: waiting_for.to_string(),
                bound: config.deadline,
            });
        }

        match op().await {
            Ok(Poll::Ready(value)) => return Ok(value),
            Ok(Poll::Pending) => {}
            Err(error) if error.is_transient() => {
                transient_errors += 1;
                if transient_errors > config.max_transient_errors {
                    tracing::error!(
                        waiting_for,
                        transient_errors,
                        "Exhausted transient error budget while polling"
                    );
                    return Err(error);
                }
                tracing::warn!(
                    waiting_for,
                    transient_errors,
                    error = %error,
                    "Transient failure while polling, will retry"
                );
            }
            Err(error) => return Err(error),
        }

        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(config.max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            deadline: Duration::from_millis(50),
            max_transient_errors: 2,
        }
    }

    #[tokio::test]
    async fn test_ready_after_pending() {
        let calls = AtomicU32::new(0);
        let result = poll_until(&fast_config(), "test transition", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(Poll::Pending)
            } else {
                Ok(Poll::Ready(42))
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deadline_raises_timeout_with_bound() {
        let config = fast_config();
        let calls = AtomicU32::new(0);
        let error = poll_until(&config, "stack svc-test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<Poll<()>, DeployError>(Poll::Pending)
        })
        .await
        .unwrap_err();

        let calls_at_timeout = calls.load(Ordering::SeqCst);
        match error {
            DeployError::Timeout { waiting_for, bound } => {
                assert_eq!(waiting_for, "stack svc-test");
                assert_eq!(bound, config.deadline);
            }
            other => panic!("expected timeout, got {other}"),
        }
        // No further polls happen once the timeout is raised.
        assert_eq!(calls.load(Ordering::SeqCst), calls_at_timeout);
    }

    #[tokio::test]
    async fn test_transient_budget_then_escalate() {
        let calls = AtomicU32::new(0);
        let error = poll_until(&fast_config(), "test transition", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<Poll<()>, _>(DeployError::Transient {
                operation: "describe".to_string(),
                reason: "throttled".to_string(),
            })
        })
        .await
        .unwrap_err();

        assert!(error.is_transient());
        // budget of 2 tolerated failures, escalate on the third
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_hard_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let error = poll_until(&fast_config(), "test transition", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<Poll<()>, _>(DeployError::validation("bad input"))
        })
        .await
        .unwrap_err();

        assert!(matches!(error, DeployError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
