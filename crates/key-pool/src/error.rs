//! Error types for key rotation

/// Errors from the key pool and the retry driver.
///
/// Per-key failures (`RateLimited`, `Unauthorized`, `Network`) are handled by
/// rotation inside the retry driver and only reach the caller wrapped in
/// `PoolExhausted`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("API key rate limited (HTTP 429)")]
    RateLimited,

    #[error("API key rejected (HTTP 403)")]
    Unauthorized,

    #[error("API request failed: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("all {attempts} attempts exhausted: {last}")]
    PoolExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("no API keys available")]
    NoCredentials,
}

/// Result alias for key pool operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn exhausted_message_names_last_cause() {
        let err = Error::PoolExhausted {
            attempts: 3,
            last: Box::new(Error::RateLimited),
        };
        assert_eq!(
            err.to_string(),
            "all 3 attempts exhausted: API key rate limited (HTTP 429)"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn http_error_includes_status_and_body() {
        let err = Error::Http {
            status: 500,
            body: "upstream down".into(),
        };
        assert_eq!(err.to_string(), "API request failed: 500 - upstream down");
    }
}
