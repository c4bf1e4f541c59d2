/// Supervised background loops
///
/// Runs one iteration of a long-lived task after another, backing off
/// exponentially while it keeps failing so a broken dependency (say, the
/// database) is not hammered.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Failures in a row after which the task is reported as degraded
    pub degraded_after: u32,
    /// Initial delay between retries
    pub initial_retry_delay: Duration,
    /// Maximum delay between retries
    pub max_retry_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            degraded_after: 5,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BackoffState {
    consecutive_failures: u32,
    current_retry_delay: Duration,
}

impl BackoffState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current_retry_delay: initial_delay,
        }
    }

    /// Returns the delay to wait before the next attempt.
    fn record_failure(&mut self, max_delay: Duration) -> Duration {
        self.consecutive_failures += 1;
        let delay = self.current_retry_delay;
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, max_delay);
        delay
    }

    fn reset(&mut self, initial_delay: Duration) {
        self.consecutive_failures = 0;
        self.current_retry_delay = initial_delay;
    }
}

/// Run `task_fn` forever, backing off after failures.
///
/// Each call is one iteration; the task decides its own pacing on success
/// (for example by sleeping until its next deadline before returning).
/// Abort the surrounding tokio task to stop it.
pub async fn run_supervised<F, Fut>(task_name: &str, config: BackoffConfig, mut task_fn: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let mut state = BackoffState::new(config.initial_retry_delay);

    loop {
        match task_fn().await {
            Ok(()) => {
                if state.consecutive_failures > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name, state.consecutive_failures
                    );
                }
                state.reset(config.initial_retry_delay);
            }
            Err(e) => {
                let delay = state.record_failure(config.max_retry_delay);
                if state.consecutive_failures >= config.degraded_after {
                    error!(
                        task = task_name,
                        failures = state.consecutive_failures,
                        "Task degraded, still retrying: {}",
                        e
                    );
                } else {
                    warn!(
                        "Task '{}' failed (attempt {}): {}, retrying in {:?}",
                        task_name, state.consecutive_failures, e, delay
                    );
                }
                sleep(delay).await;
            }
        }
    }
}
