//! Bounded retry loop across the key pool
//!
//! Each attempt takes the current key, issues the caller's request with it,
//! and reacts to the outcome:
//! - Success: returned immediately
//! - RateLimited / Unauthorized: key blocked, next attempt
//! - OtherHttpError: rotate without blocking, surfaced if it was the last attempt
//! - NetworkError: rotate, fixed backoff, next attempt
//!
//! Only one request is in flight per call; the backoff sleep is dropped with
//! the caller's future.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::outcome::{Outcome, UpstreamResponse, classify};
use crate::rotator::Rotator;

/// Block windows and backoff used by the retry driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How long a key stays blocked after a 429
    pub rate_limit_block: Duration,
    /// How long a key stays blocked after a 403
    pub unauthorized_block: Duration,
    /// Wait after a network failure before the next attempt
    pub network_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_block: Duration::from_secs(60 * 60),
            unauthorized_block: Duration::from_secs(24 * 60 * 60),
            network_backoff: Duration::from_secs(1),
        }
    }
}

/// Runs requests against the upstream API, rotating keys on failure.
#[derive(Clone)]
pub struct RetryDriver {
    rotator: Arc<Rotator>,
    policy: RetryPolicy,
}

impl RetryDriver {
    pub fn new(rotator: Arc<Rotator>) -> Self {
        Self::with_policy(rotator, RetryPolicy::default())
    }

    pub fn with_policy(rotator: Arc<Rotator>, policy: RetryPolicy) -> Self {
        Self { rotator, policy }
    }

    pub fn rotator(&self) -> &Arc<Rotator> {
        &self.rotator
    }

    /// Issue `build_request` with up to `max_attempts` keys.
    ///
    /// Returns the first successful response. A non-quota HTTP error on the
    /// final attempt is returned as `Error::Http`; otherwise running out of
    /// attempts yields `PoolExhausted` wrapping the last failure, or
    /// `NoCredentials` when `max_attempts` is zero.
    pub async fn execute_with_rotation<F, Fut, R, E>(
        &self,
        build_request: F,
        max_attempts: u32,
    ) -> Result<R>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        R: UpstreamResponse,
        E: Display,
    {
        let mut last_error: Option<Error> = None;

        for attempt in 0..max_attempts {
            let is_last = attempt + 1 == max_attempts;
            let credential = self.rotator.current_credential().await;
            let result = build_request(credential.clone()).await;
            let outcome = classify(&result);

            metrics::counter!("key_pool_attempts_total", "outcome" => outcome.label())
                .increment(1);
            debug!(
                attempt = attempt + 1,
                max_attempts,
                key = %credential,
                outcome = outcome.label(),
                "upstream attempt finished"
            );

            let error = match (outcome, result) {
                (Outcome::Success, Ok(response)) => return Ok(response),
                (Outcome::RateLimited, _) => {
                    warn!(key = %credential, "API key rate limited, blocking");
                    self.block(&credential, self.policy.rate_limit_block, outcome)
                        .await;
                    Error::RateLimited
                }
                (Outcome::Unauthorized, _) => {
                    warn!(key = %credential, "API key rejected, blocking");
                    self.block(&credential, self.policy.unauthorized_block, outcome)
                        .await;
                    Error::Unauthorized
                }
                (_, Ok(response)) => {
                    self.rotator.advance().await;
                    let status = response.status();
                    let body = response.into_text().await;
                    warn!(status, attempt = attempt + 1, "upstream HTTP error");
                    let error = Error::Http { status, body };
                    if is_last {
                        return Err(error);
                    }
                    error
                }
                (_, Err(e)) => {
                    self.rotator.advance().await;
                    warn!(error = %e, attempt = attempt + 1, "upstream request failed");
                    if !is_last {
                        tokio::time::sleep(self.policy.network_backoff).await;
                    }
                    Error::Network(e.to_string())
                }
            };
            last_error = Some(error);
        }

        metrics::counter!("key_pool_exhausted_total").increment(1);
        match last_error {
            Some(last) => {
                warn!(attempts = max_attempts, error = %last, "all attempts exhausted");
                Err(Error::PoolExhausted {
                    attempts: max_attempts,
                    last: Box::new(last),
                })
            }
            None => Err(Error::NoCredentials),
        }
    }

    async fn block(&self, credential: &Credential, duration: Duration, outcome: Outcome) {
        metrics::counter!("key_pool_blocks_total", "reason" => outcome.label()).increment(1);
        self.rotator.block(credential, duration).await;
    }
}
