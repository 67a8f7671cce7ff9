//! Idempotency ledger for claims
//!
//! Clients that retry a claim send the same `Idempotency-Key`. The ledger
//! reserves the key before the increment and records the outcome after it,
//! so a replay returns the stored outcome instead of awarding points twice.
//!
//! Key states:
//!
//! ```text
//!   reserve ──► InFlight ──► Completed(outcome)   replay returns outcome
//!                   │
//!                   ├──────► Indeterminate         store timed out mid-write
//!                   │
//!                   └──────► (released)            nothing was written
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::ClaimOutcome;
use crate::store::UserId;
use crate::types::{LeaderboardError, Result};

/// Longest idempotency key accepted
pub const MAX_KEY_LEN: usize = 128;

#[derive(Debug, Clone)]
enum KeyState {
    InFlight,
    Completed(ClaimOutcome),
    Indeterminate,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    user_id: UserId,
    state: KeyState,
    recorded_at: Instant,
}

/// Result of reserving a key
#[derive(Debug)]
pub enum Reservation {
    /// Key is new; the caller must run the claim and settle the key
    Fresh,
    /// Key already completed; return this outcome without a new increment
    Replay(ClaimOutcome),
}

/// Tracks idempotency keys for a bounded retention window
pub struct ClaimLedger {
    entries: DashMap<String, LedgerEntry>,
    retention: Duration,
}

impl ClaimLedger {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reserve `key` for a claim on `user_id`
    pub fn reserve(&self, key: &str, user_id: &UserId) -> Result<Reservation> {
        validate_key(key)?;

        match self.entries.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(LedgerEntry {
                    user_id: user_id.clone(),
                    state: KeyState::InFlight,
                    recorded_at: Instant::now(),
                });
                Ok(Reservation::Fresh)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().recorded_at.elapsed() >= self.retention
                    && !matches!(slot.get().state, KeyState::InFlight)
                {
                    // Expired but not yet swept: treat as new
                    slot.insert(LedgerEntry {
                        user_id: user_id.clone(),
                        state: KeyState::InFlight,
                        recorded_at: Instant::now(),
                    });
                    return Ok(Reservation::Fresh);
                }

                let entry = slot.get();
                if &entry.user_id != user_id {
                    return Err(LeaderboardError::InvalidRequest(
                        "Idempotency-Key was already used for a different user".to_string(),
                    ));
                }
                match &entry.state {
                    KeyState::Completed(outcome) => Ok(Reservation::Replay(outcome.clone())),
                    KeyState::InFlight => Err(LeaderboardError::DuplicateClaim(
                        "A claim with this Idempotency-Key is already in progress".to_string(),
                    )),
                    KeyState::Indeterminate => Err(LeaderboardError::DuplicateClaim(
                        "Outcome of the claim with this Idempotency-Key is unknown; check history before retrying with a new key".to_string(),
                    )),
                }
            }
        }
    }

    /// Record a committed claim
    pub fn complete(&self, key: &str, outcome: ClaimOutcome) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.state = KeyState::Completed(outcome);
            entry.recorded_at = Instant::now();
        }
    }

    /// Forget a key whose claim wrote nothing
    pub fn release(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Mark a key whose write may or may not have been applied
    pub fn mark_indeterminate(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.state = KeyState::Indeterminate;
            entry.recorded_at = Instant::now();
        }
    }

    /// Drop settled keys older than the retention window.
    ///
    /// A key still in flight after a whole window was never settled, so its
    /// outcome is unknown: it becomes indeterminate for one more window
    /// before it is dropped.
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        let retention = self.retention;
        self.entries.retain(|_, entry| {
            if entry.recorded_at.elapsed() < retention {
                return true;
            }
            if matches!(entry.state, KeyState::InFlight) {
                entry.state = KeyState::Indeterminate;
                entry.recorded_at = Instant::now();
                return true;
            }
            false
        });
        before.saturating_sub(self.entries.len())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || !key.is_ascii() {
        return Err(LeaderboardError::InvalidRequest(format!(
            "Idempotency-Key must be 1-{} ASCII characters",
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

/// Spawn a background task to periodically drop expired keys
pub fn spawn_cleanup_task(
    ledger: Arc<ClaimLedger>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = ledger.cleanup();
            if removed > 0 {
                debug!("Claim ledger cleanup: removed {} expired keys", removed);
            }
        }
    })
}
