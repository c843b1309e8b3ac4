//! # Retry Policy
//!
//! Re-issues a request while the decorated status it produced is retryable, waiting with
//! exponential backoff between attempts.
//!
//! A request attempt resolves to one of three outcomes:
//!
//! * `Ok(Reply::Message(_))`: success, returned as is.
//! * `Ok(Reply::Status(_))`: a decorated failure. Retried while `should_retry_fn` accepts it
//!   and attempts remain; otherwise returned to the caller.
//! * `Err(_)`: a failure that could not be decorated. Returned immediately, never retried.
use crate::status::ResponseStatus;
use std::{future::Future, time::Duration};
use tracing::debug;

/// `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(64),
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// What a single attempt produced.
#[derive(Debug)]
pub enum Reply<T> {
    Message(T),
    Status(ResponseStatus),
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries on top of the first attempt.
    pub retries: u32,
    pub current_retry_attempt: u32,
    /// Whether stream items are delivered as objects rather than serialized bytes.
    pub object_mode: bool,
    pub should_retry_fn: fn(&ResponseStatus) -> bool,
    pub backoff: Backoff,
}

/// Runs `request` until it succeeds, fails with an error, or retrying is no longer allowed.
///
/// `request` is handed the number of the attempt it performs, starting at
/// `config.current_retry_attempt`.
pub async fn retry_request<T, E, F, Fut>(
    config: &RetryConfig,
    mut request: F,
) -> Result<Reply<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Reply<T>, E>>,
{
    let mut attempt = config.current_retry_attempt;

    loop {
        match request(attempt).await? {
            Reply::Status(status)
                if attempt < config.retries && (config.should_retry_fn)(&status) =>
            {
                let delay = config.backoff.delay(attempt);
                debug!(
                    attempt,
                    code = status.code,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            reply => return Ok(reply),
        }
    }
}
