//! API key handle

use std::fmt;
use std::sync::Arc;

use common::Secret;

/// An opaque API key, immutable once loaded.
///
/// Clones share the same allocation. `Debug` and `Display` print the masked
/// form so a credential can be passed to `tracing` fields safely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<Secret<String>>);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Arc::new(Secret::new(key.into())))
    }

    /// The raw key, for injecting into the outbound request.
    pub fn expose(&self) -> &str {
        self.0.expose()
    }

    /// First and last four characters with the middle redacted.
    pub fn masked(&self) -> String {
        self.0.masked()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}
