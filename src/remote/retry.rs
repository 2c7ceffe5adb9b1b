// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry with exponential backoff for remote calls.

use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A failed remote attempt, tagged with whether trying again could help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    pub message: String,
    pub transient: bool,
}

impl RemoteFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    /// Classifies a non-success HTTP status. Rate limits and server errors are transient.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }

    /// Classifies a transport error. Timeouts and connection failures are transient.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::transient(err.to_string())
        } else {
            Self::permanent(err.to_string())
        }
    }
}

impl std::fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Retry policy: `max_retries` extra attempts, doubling the delay each time.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Runs `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RemoteFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteFailure>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(failure) if failure.transient && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        request = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    /// Blocking counterpart of [`RetryPolicy::run`] for synchronous clients.
    pub fn run_blocking<T, F>(&self, label: &str, mut op: F) -> Result<T, RemoteFailure>
    where
        F: FnMut() -> Result<T, RemoteFailure>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(failure) if failure.transient && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        request = label,
                        attempt = attempt + 1,
                        error = %failure,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(40), MAX_BACKOFF);
    }

    #[test]
    fn status_classification() {
        assert!(RemoteFailure::from_status(StatusCode::BAD_GATEWAY, "").transient);
        assert!(RemoteFailure::from_status(StatusCode::TOO_MANY_REQUESTS, "").transient);
        assert!(!RemoteFailure::from_status(StatusCode::UNAUTHORIZED, "bad creds").transient);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result = policy
            .run("test", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(RemoteFailure::transient("flaky"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(1, Duration::ZERO);
        let result: Result<(), _> = policy
            .run("test", || {
                calls.set(calls.get() + 1);
                async { Err(RemoteFailure::transient("down")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result: Result<(), _> = policy.run_blocking("test", || {
            calls.set(calls.get() + 1);
            Err(RemoteFailure::permanent("404"))
        });
        assert_eq!(result.unwrap_err().message, "404");
        assert_eq!(calls.get(), 1);
    }
}
