//! Rotating pool of rate-limited API keys
//!
//! Holds an ordered set of credentials for a third-party API, hands out the
//! next usable one, quarantines keys that hit their quota or get rejected,
//! and drives a bounded retry loop across the pool.
//!
//! Key lifecycle:
//! 1. Keys are loaded once at startup, all unblocked, cursor on the first key
//! 2. `current_credential` keeps returning the key under the cursor while it is usable
//! 3. Upstream returns 429 → key blocked for an hour, cursor rotates
//! 4. Upstream returns 403 → key blocked for a day, cursor rotates
//! 5. 5xx or network failure → cursor rotates, key left alone
//! 6. Block expires → key is unblocked the next time the scan reaches it

pub mod clock;
pub mod credential;
pub mod error;
pub mod outcome;
pub mod retry;
pub mod rotator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::Credential;
pub use error::{Error, Result};
pub use outcome::{Outcome, UpstreamResponse, classify, classify_status};
pub use retry::{RetryDriver, RetryPolicy};
pub use rotator::{CredentialSnapshot, PoolSnapshot, Rotator};
