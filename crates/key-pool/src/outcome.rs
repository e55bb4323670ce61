//! Classification of upstream call results
//!
//! Maps the result of one outbound attempt to the action the retry driver
//! takes. Quota and auth failures are the key's fault and get it blocked;
//! other HTTP errors and network failures are not, and only rotate the cursor.

use std::future::Future;
use std::pin::Pin;

/// Outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx, returned to the caller
    Success,
    /// 429, key blocked for the rate-limit window
    RateLimited,
    /// 403, key blocked for the auth window
    Unauthorized,
    /// Any other HTTP status, rotate without blocking
    OtherHttpError,
    /// No response at all (connect, timeout, DNS), rotate and back off
    NetworkError,
}

impl Outcome {
    /// Label for metrics and logging.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::RateLimited => "rate_limited",
            Outcome::Unauthorized => "unauthorized",
            Outcome::OtherHttpError => "http_error",
            Outcome::NetworkError => "network_error",
        }
    }
}

/// A response from the upstream API as seen by the retry driver.
///
/// Uses a `Pin<Box<dyn Future>>` return so implementors don't need async-trait.
pub trait UpstreamResponse: Send {
    fn status(&self) -> u16;

    /// Consume the response and read its body for error reporting.
    fn into_text(self) -> Pin<Box<dyn Future<Output = String> + Send>>;
}

impl UpstreamResponse for reqwest::Response {
    fn status(&self) -> u16 {
        reqwest::Response::status(self).as_u16()
    }

    fn into_text(self) -> Pin<Box<dyn Future<Output = String> + Send>> {
        Box::pin(async move { self.text().await.unwrap_or_default() })
    }
}

/// Classify a received HTTP status.
pub fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        429 => Outcome::RateLimited,
        403 => Outcome::Unauthorized,
        _ => Outcome::OtherHttpError,
    }
}

/// Classify the result of an attempt: a response, or an error meaning no
/// response was obtained.
pub fn classify<R: UpstreamResponse, E>(result: &Result<R, E>) -> Outcome {
    match result {
        Ok(response) => classify_status(response.status()),
        Err(_) => Outcome::NetworkError,
    }
}
