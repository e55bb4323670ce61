//! Credential pool and cursor-based key selection
//!
//! The pool holds the keys in load order, one state per key, and a cursor.
//! Selection sticks to the key under the cursor until it is blocked or the
//! caller rotates; blocked keys are skipped. Blocks expire lazily: a key
//! whose block has run out is released when the scan reaches it.
//!
//! Keys and cursor live behind one `RwLock` so every read-modify-write is
//! atomic with respect to concurrent requests sharing the rotator.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock, epoch_millis};
use crate::credential::Credential;
use crate::error::{Error, Result};

/// Longest block window. Longer requests are clamped so `now + duration`
/// stays representable.
const MAX_BLOCK: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Per-key runtime state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialState {
    pub blocked: bool,
    pub blocked_until: Option<SystemTime>,
    pub use_count: u64,
    pub last_used_at: Option<SystemTime>,
}

impl CredentialState {
    /// Whether a block is in effect at `now`.
    fn is_blocked_at(&self, now: SystemTime) -> bool {
        match (self.blocked, self.blocked_until) {
            (true, Some(until)) => now < until,
            (true, None) => true,
            (false, _) => false,
        }
    }

    /// Clear an expired block. Returns true if the key was released.
    fn release_if_expired(&mut self, now: SystemTime) -> bool {
        if self.blocked && !self.is_blocked_at(now) {
            self.clear_block();
            return true;
        }
        false
    }

    fn clear_block(&mut self) {
        self.blocked = false;
        self.blocked_until = None;
    }
}

struct Entry {
    credential: Credential,
    state: CredentialState,
}

struct PoolState {
    entries: Vec<Entry>,
    cursor: usize,
}

/// Read-only view of one key for the status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSnapshot {
    pub index: usize,
    pub masked: String,
    pub is_blocked: bool,
    /// Unix epoch millis
    pub blocked_until: Option<u64>,
    pub request_count: u64,
    /// Unix epoch millis
    pub last_used_at: Option<u64>,
    pub is_current: bool,
}

/// Read-only view of the whole pool.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub total_credentials: usize,
    pub current_index: usize,
    /// Unix epoch millis at which the snapshot was taken
    pub timestamp: u64,
    pub credentials: Vec<CredentialSnapshot>,
}

impl PoolSnapshot {
    pub fn available(&self) -> usize {
        self.credentials.iter().filter(|c| !c.is_blocked).count()
    }

    pub fn blocked(&self) -> usize {
        self.total_credentials - self.available()
    }

    /// Pool health label: all keys available → healthy, some → degraded,
    /// none → unhealthy.
    pub fn status(&self) -> &'static str {
        let available = self.available();
        if available == self.total_credentials && self.total_credentials > 0 {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        }
    }
}

/// Shared pool of API keys.
///
/// Construct once at startup and share via `Arc`. No operation fails after
/// construction.
pub struct Rotator {
    state: RwLock<PoolState>,
    size: usize,
    clock: Arc<dyn Clock>,
}

impl Rotator {
    /// Build a pool from keys in rotation order.
    ///
    /// Blank entries are dropped and duplicates collapse to their first
    /// occurrence. Fails with `Configuration` if no key remains.
    pub fn new<I, S>(keys: I, clock: Arc<dyn Clock>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries: Vec<Entry> = Vec::new();
        for key in keys {
            let key = key.into();
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let credential = Credential::new(key);
            if entries.iter().any(|e| e.credential == credential) {
                warn!(key = %credential, "duplicate API key ignored");
                continue;
            }
            entries.push(Entry {
                credential,
                state: CredentialState::default(),
            });
        }

        if entries.is_empty() {
            return Err(Error::Configuration(
                "at least one non-empty API key is required".into(),
            ));
        }

        let size = entries.len();
        info!(keys = size, "API key pool initialized");
        Ok(Self {
            state: RwLock::new(PoolState { entries, cursor: 0 }),
            size,
            clock,
        })
    }

    /// Build a pool backed by the wall clock.
    pub fn with_system_clock<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, Arc::new(SystemClock))
    }

    /// Number of keys in the pool.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Always false: construction rejects empty pools.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Return a usable key, scanning forward from the cursor.
    ///
    /// Scans at most one full lap. A usable hit has its request count and
    /// last-used time updated and stays under the cursor. If every key is
    /// blocked, the key under the cursor is returned anyway so the caller
    /// still attempts the call.
    pub async fn current_credential(&self) -> Credential {
        let now = self.clock.now();
        let mut guard = self.state.write().await;
        let pool = &mut *guard;
        let n = pool.entries.len();

        for _ in 0..n {
            let index = pool.cursor;
            let entry = &mut pool.entries[index];

            if entry.state.release_if_expired(now) {
                info!(key = %entry.credential, index, "API key unblocked");
            }

            if !entry.state.blocked {
                entry.state.use_count += 1;
                entry.state.last_used_at = Some(now);
                debug!(
                    key = %entry.credential,
                    index,
                    requests = entry.state.use_count,
                    "using API key"
                );
                return entry.credential.clone();
            }

            pool.cursor = (index + 1) % n;
        }

        let fallback = &pool.entries[pool.cursor];
        warn!(
            key = %fallback.credential,
            index = pool.cursor,
            "all API keys are blocked, using fallback"
        );
        fallback.credential.clone()
    }

    /// Move the cursor to the next key. Blocks are untouched.
    pub async fn advance(&self) {
        let mut pool = self.state.write().await;
        Self::advance_locked(&mut pool);
    }

    fn advance_locked(pool: &mut PoolState) {
        let from = pool.cursor;
        pool.cursor = (from + 1) % pool.entries.len();
        debug!(from, to = pool.cursor, "rotated API key cursor");
    }

    /// Block `credential` for `duration` from now, then rotate.
    ///
    /// Re-blocking overwrites the previous window. Unknown keys are ignored.
    /// Windows longer than a century are clamped.
    pub async fn block(&self, credential: &Credential, duration: Duration) {
        let now = self.clock.now();
        let duration = duration.min(MAX_BLOCK);
        let mut pool = self.state.write().await;

        let Some(entry) = pool
            .entries
            .iter_mut()
            .find(|e| &e.credential == credential)
        else {
            warn!(key = %credential, "block requested for unknown API key");
            return;
        };

        entry.state.blocked = true;
        entry.state.blocked_until = Some(now.checked_add(duration).unwrap_or(now));
        info!(
            key = %credential,
            minutes = duration.as_secs() / 60,
            "API key blocked"
        );

        Self::advance_locked(&mut pool);
    }

    /// Clear every block. Request counts and the cursor are kept.
    pub async fn reset_all(&self) {
        let mut pool = self.state.write().await;
        for entry in pool.entries.iter_mut() {
            entry.state.clear_block();
        }
        info!(keys = pool.entries.len(), "all API keys reset");
    }

    /// Current cursor position.
    pub async fn cursor(&self) -> usize {
        self.state.read().await.cursor
    }

    /// State of one key, if it belongs to the pool.
    pub async fn state_of(&self, credential: &Credential) -> Option<CredentialState> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .find(|e| &e.credential == credential)
            .map(|e| e.state.clone())
    }

    /// Masked view of the pool for observability.
    ///
    /// Blocks that have already expired are reported as lifted even if the
    /// scan has not reached the key yet.
    pub async fn snapshot(&self) -> PoolSnapshot {
        let now = self.clock.now();
        let pool = self.state.read().await;

        let credentials = pool
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let is_blocked = entry.state.is_blocked_at(now);
                CredentialSnapshot {
                    index,
                    masked: entry.credential.masked(),
                    is_blocked,
                    blocked_until: if is_blocked {
                        entry.state.blocked_until.map(epoch_millis)
                    } else {
                        None
                    },
                    request_count: entry.state.use_count,
                    last_used_at: entry.state.last_used_at.map(epoch_millis),
                    is_current: index == pool.cursor,
                }
            })
            .collect();

        PoolSnapshot {
            total_credentials: pool.entries.len(),
            current_index: pool.cursor,
            timestamp: epoch_millis(now),
            credentials,
        }
    }
}
