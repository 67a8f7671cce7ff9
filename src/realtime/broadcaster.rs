//! Subscriber registry and fan-out
//!
//! Each connected client owns a bounded queue. `broadcast` never waits: a
//! queue that is full or closed counts as a failed delivery and its
//! subscriber is evicted. Evicted clients see their socket close and pick up
//! the current snapshot again when they reconnect.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::RealtimeEvent;
use crate::store::RankedEntry;
use crate::types::{LeaderboardError, Result};

/// Default maximum number of concurrent subscribers
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 10_000;

/// Default per-subscriber queue depth
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

pub type SubscriberId = Uuid;

/// Broadcaster limits
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub max_subscribers: usize,
    pub buffer: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Registry entry for one connected client
struct SubscriberEntry {
    tx: mpsc::Sender<Arc<RealtimeEvent>>,
    addr: Option<SocketAddr>,
    connected_at: Instant,
}

/// Handle returned to a newly connected client
pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<Arc<RealtimeEvent>>,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the snapshot was queued for
    pub delivered: usize,
    /// Subscribers whose queue was full or closed
    pub failed: usize,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Fan-out hub for ranking snapshots
pub struct Broadcaster {
    subscribers: DashMap<SubscriberId, SubscriberEntry>,
    count: AtomicUsize,
    broadcasts: AtomicU64,
    config: BroadcasterConfig,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            subscribers: DashMap::new(),
            count: AtomicUsize::new(0),
            broadcasts: AtomicU64::new(0),
            config,
        }
    }

    /// Current subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Number of broadcasts issued since startup
    pub fn broadcast_count(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Check if a subscriber is registered
    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.contains_key(id)
    }

    /// Register a newly connected client
    pub fn subscribe(&self, addr: Option<SocketAddr>) -> Result<Subscription> {
        let max = self.config.max_subscribers;
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |c| {
                (c < max).then_some(c + 1)
            })
            .map_err(|_| {
                LeaderboardError::Capacity(format!("subscriber limit of {} reached", max))
            })?;

        let (tx, events) = mpsc::channel(self.config.buffer.max(1));
        let id = Uuid::new_v4();
        self.subscribers.insert(
            id,
            SubscriberEntry {
                tx,
                addr,
                connected_at: Instant::now(),
            },
        );

        info!(
            subscriber = %id,
            addr = ?addr,
            count = self.subscriber_count(),
            "Subscriber connected"
        );
        Ok(Subscription { id, events })
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        match self.subscribers.remove(id) {
            Some((_, entry)) => {
                self.count.fetch_sub(1, Ordering::AcqRel);
                info!(
                    subscriber = %id,
                    addr = ?entry.addr,
                    connected_secs = entry.connected_at.elapsed().as_secs(),
                    count = self.subscriber_count(),
                    "Subscriber disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Push a ranking snapshot to every subscriber.
    ///
    /// Delivery failures are logged here and never returned as errors.
    pub fn broadcast(&self, rankings: Vec<RankedEntry>) -> BroadcastReport {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(RealtimeEvent::UpdateRankings(rankings));

        let mut report = BroadcastReport::default();
        let mut evicted = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.tx.try_send(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.failed += 1;
                    warn!(
                        subscriber = %entry.key(),
                        error = %LeaderboardError::BroadcastFailed("subscriber queue full".into()),
                        "Evicting lagging subscriber"
                    );
                    evicted.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => {
                    report.failed += 1;
                    debug!(subscriber = %entry.key(), "Subscriber queue closed");
                    evicted.push(*entry.key());
                }
            }
        }

        // Removal must happen after iteration releases the shard locks
        for id in evicted {
            self.unsubscribe(&id);
        }

        if !report.is_complete() {
            warn!(
                delivered = report.delivered,
                failed = report.failed,
                "Broadcast partially failed"
            );
        }
        report
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}
