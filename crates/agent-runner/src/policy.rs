//! Execution policy: timeout, retries and cancellation around one attempt

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};

/// Limits applied to one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Per-attempt time budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Extra attempts after the first failure
    #[serde(default)]
    pub retries: u32,
    /// Stop the running attempt as soon as the caller cancels
    #[serde(default = "default_propagate")]
    pub propagate_cancellation: bool,
    /// Hard cap on tool executions per attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<usize>,
}

fn default_propagate() -> bool {
    true
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 0,
            propagate_cancellation: true,
            max_tool_calls: None,
        }
    }
}

impl ExecutionPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_propagate_cancellation(mut self, propagate: bool) -> Self {
        self.propagate_cancellation = propagate;
        self
    }

    pub fn with_max_tool_calls(mut self, max: usize) -> Self {
        self.max_tool_calls = Some(max);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Final result plus the number of attempts it took
#[derive(Debug)]
pub struct PolicyOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Run `attempt` under `policy`.
///
/// Each attempt starts from scratch and receives its 1-based number and a
/// token that is cancelled when the attempt is abandoned. Timeouts and
/// retryable errors are retried; the last failure is returned unchanged.
pub async fn enforce<T, F, Fut>(
    policy: &ExecutionPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> PolicyOutcome<T>
where
    F: FnMut(u32, CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut number = 0;

    loop {
        number += 1;
        if policy.propagate_cancellation && cancel.is_cancelled() {
            return PolicyOutcome {
                result: Err(RuntimeError::Cancelled),
                attempts: number - 1,
            };
        }

        let token = if policy.propagate_cancellation {
            cancel.child_token()
        } else {
            CancellationToken::new()
        };
        debug!(attempt = number, max_attempts, "Starting attempt");

        let timed = with_timeout(policy.timeout, attempt(number, token.clone()));
        let result = if policy.propagate_cancellation {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RuntimeError::Cancelled),
                result = timed => result,
            }
        } else {
            timed.await
        };
        token.cancel();

        let err = match result {
            Ok(value) => {
                return PolicyOutcome {
                    result: Ok(value),
                    attempts: number,
                }
            }
            Err(err) => err,
        };

        let done = |result| PolicyOutcome {
            result: Err(result),
            attempts: number,
        };
        if err.is_cancelled() || !err.is_retryable() {
            return done(err);
        }
        if cancel.is_cancelled() {
            // Cancellation was held back until the attempt finished.
            return done(RuntimeError::Cancelled);
        }
        if number >= max_attempts {
            return done(err);
        }
        warn!(attempt = number, error = %err, "Attempt failed, retrying");
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    attempt: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .unwrap_or(Err(RuntimeError::Timeout { timeout: limit })),
        None => attempt.await,
    }
}
