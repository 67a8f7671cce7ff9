//! Ranking service
//!
//! Orchestrates a claim:
//!
//! 1. validate the user id (no store access on failure)
//! 2. roll an award in `[MIN_AWARD, MAX_AWARD]`
//! 3. atomically increment the user and append history
//! 4. read the ranked snapshot (strictly after the increment committed)
//! 5. hand the snapshot to the broadcaster
//! 6. return the updated user and the snapshot
//!
//! Once step 3 succeeds nothing is rolled back. The broadcast happens
//! before the caller gets its response, and each snapshot reflects at least
//! the claim that triggered it.
//!
//! A claim runs on its own task, so a caller that goes away mid-claim does
//! not stop the broadcast or leave its idempotency key in flight. Ranked
//! reads and their broadcasts are serialized: subscribers never see an
//! older snapshot after a newer one.

pub mod ledger;

use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::realtime::Broadcaster;
use crate::store::{RankedEntry, ScoreStore, User, UserHistory, UserId};
use crate::types::{LeaderboardError, Result};

pub use ledger::{spawn_cleanup_task, ClaimLedger, Reservation};

/// Smallest award per claim
pub const MIN_AWARD: u32 = 1;

/// Largest award per claim
pub const MAX_AWARD: u32 = 10;

/// Default bound on a single store operation
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default retention of idempotency keys
pub const DEFAULT_CLAIM_KEY_TTL: Duration = Duration::from_secs(600);

/// Pick an award uniformly from `[MIN_AWARD, MAX_AWARD]`
pub fn roll_award<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.gen_range(MIN_AWARD..=MAX_AWARD)
}

/// Result of a successful claim
#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub user: User,
    pub awarded: u32,
    pub rankings: Vec<RankedEntry>,
}

#[derive(Debug, Clone)]
pub struct RankingConfig {
    pub store_timeout: Duration,
    pub claim_key_ttl: Duration,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            claim_key_ttl: DEFAULT_CLAIM_KEY_TTL,
        }
    }
}

/// Claim orchestration plus read-only queries
#[derive(Clone)]
pub struct RankingService {
    store: Arc<dyn ScoreStore>,
    broadcaster: Arc<Broadcaster>,
    ledger: Arc<ClaimLedger>,
    /// Held from the ranked read until its snapshot is handed off
    publish: Arc<Mutex<()>>,
    store_timeout: Duration,
}

impl RankingService {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        broadcaster: Arc<Broadcaster>,
        config: RankingConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            ledger: Arc::new(ClaimLedger::new(config.claim_key_ttl)),
            publish: Arc::new(Mutex::new(())),
            store_timeout: config.store_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn ScoreStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn ledger(&self) -> &Arc<ClaimLedger> {
        &self.ledger
    }

    /// Award random points to a user and broadcast the new rankings
    pub async fn claim(&self, user_id: Option<&str>) -> Result<ClaimOutcome> {
        let id = parse_user_id(user_id)?;
        self.spawn_claim(id, None).await
    }

    /// Like `claim`, but a repeated `key` replays the first outcome
    pub async fn claim_with_key(&self, user_id: Option<&str>, key: &str) -> Result<ClaimOutcome> {
        let id = parse_user_id(user_id)?;

        match self.ledger.reserve(key, &id)? {
            Reservation::Replay(outcome) => {
                info!(
                    target: "leaderboard::claims",
                    user_id = %id,
                    awarded = outcome.awarded,
                    "Replayed claim for repeated Idempotency-Key"
                );
                Ok(outcome)
            }
            Reservation::Fresh => self.spawn_claim(id, Some(key.to_string())).await,
        }
    }

    /// Current ranked snapshot
    pub async fn get_rankings(&self) -> Result<Vec<RankedEntry>> {
        self.bounded(self.store.list_ranked()).await
    }

    /// Award history of one user
    pub async fn get_history(&self, user_id: Option<&str>) -> Result<UserHistory> {
        let id = parse_user_id(user_id)?;
        self.bounded(self.store.get_history(&id)).await
    }

    /// Run a claim to completion even if the caller is dropped
    async fn spawn_claim(&self, id: UserId, key: Option<String>) -> Result<ClaimOutcome> {
        let service = self.clone();
        tokio::spawn(async move { service.run_claim(&id, key.as_deref()).await })
            .await
            .map_err(|e| LeaderboardError::Internal(format!("claim task failed: {}", e)))?
    }

    async fn run_claim(&self, id: &UserId, key: Option<&str>) -> Result<ClaimOutcome> {
        let awarded = roll_award(&mut rand::thread_rng());

        let user = match self.bounded(self.store.increment(id, awarded)).await {
            Ok(user) => user,
            Err(err) => {
                if let Some(key) = key {
                    match err {
                        // A timed out write may still land
                        LeaderboardError::StoreUnavailable(_) => self.ledger.mark_indeterminate(key),
                        _ => self.ledger.release(key),
                    }
                }
                return Err(err);
            }
        };

        info!(
            target: "leaderboard::claims",
            user_id = %id,
            awarded,
            points = user.points,
            "Points claimed"
        );

        let publish = self.publish.lock().await;

        let rankings = match self.bounded(self.store.list_ranked()).await {
            Ok(rankings) => rankings,
            Err(err) => {
                error!(
                    user_id = %id,
                    awarded,
                    error = %err,
                    "Ranked read failed after committed increment, broadcast skipped"
                );
                if let Some(key) = key {
                    self.ledger.mark_indeterminate(key);
                }
                return Err(err);
            }
        };

        let report = self.broadcaster.broadcast(rankings.clone());
        drop(publish);
        if !report.is_complete() {
            warn!(
                user_id = %id,
                delivered = report.delivered,
                failed = report.failed,
                "Claim broadcast reached only part of the subscribers"
            );
        }

        let outcome = ClaimOutcome {
            user,
            awarded,
            rankings,
        };
        if let Some(key) = key {
            self.ledger.complete(key, outcome.clone());
        }
        Ok(outcome)
    }

    /// Bound a store operation by the configured timeout
    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(LeaderboardError::StoreUnavailable(format!(
                "store operation timed out after {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }
}

fn parse_user_id(user_id: Option<&str>) -> Result<UserId> {
    match user_id {
        Some(raw) => UserId::parse(raw),
        None => Err(LeaderboardError::InvalidRequest("UserId is required".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryScoreStore;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps a store, counting calls and optionally stalling or failing them
    struct StubStore {
        inner: MemoryScoreStore,
        calls: AtomicUsize,
        increment_delay: Option<Duration>,
        ranked_delay: Option<Duration>,
        fail_ranked: bool,
    }

    impl StubStore {
        fn new() -> Self {
            Self {
                inner: MemoryScoreStore::new(),
                calls: AtomicUsize::new(0),
                increment_delay: None,
                ranked_delay: None,
                fail_ranked: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScoreStore for StubStore {
        fn kind(&self) -> &'static str {
            "stub"
        }

        async fn increment(&self, id: &UserId, amount: u32) -> Result<User> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.increment_delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.increment(id, amount).await
        }

        async fn list_ranked(&self) -> Result<Vec<RankedEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.ranked_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_ranked {
                return Err(LeaderboardError::StoreUnavailable("ranked read failed".into()));
            }
            self.inner.list_ranked().await
        }

        async fn get_history(&self, id: &UserId) -> Result<UserHistory> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_history(id).await
        }

        async fn create_user(&self, name: &str) -> Result<User> {
            self.inner.create_user(name).await
        }

        async fn find_by_name(&self, name: &str) -> Result<Option<User>> {
            self.inner.find_by_name(name).await
        }
    }

    fn service_with(store: Arc<StubStore>, timeout: Duration) -> RankingService {
        RankingService::new(
            store,
            Arc::new(Broadcaster::default()),
            RankingConfig {
                store_timeout: timeout,
                claim_key_ttl: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn test_roll_award_covers_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = [false; (MAX_AWARD + 1) as usize];
        for _ in 0..2000 {
            let award = roll_award(&mut rng);
            assert!((MIN_AWARD..=MAX_AWARD).contains(&award));
            seen[award as usize] = true;
        }
        assert!(seen[MIN_AWARD as usize..].iter().all(|s| *s));
    }

    #[tokio::test]
    async fn test_invalid_input_skips_store() {
        let store = Arc::new(StubStore::new());
        let service = service_with(Arc::clone(&store), DEFAULT_STORE_TIMEOUT);

        for input in [None, Some(""), Some("  "), Some("bad id!")] {
            assert!(matches!(
                service.claim(input).await,
                Err(LeaderboardError::InvalidRequest(_))
            ));
        }
        assert!(service.get_history(None).await.is_err());
        assert_eq!(store.calls(), 0);
        assert_eq!(service.broadcaster().broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_claim_broadcasts_post_increment_snapshot() {
        let store = Arc::new(StubStore::new());
        let user = store.create_user("Alice").await.unwrap();
        let service = service_with(Arc::clone(&store), DEFAULT_STORE_TIMEOUT);
        let mut sub = service.broadcaster().subscribe(None).unwrap();

        let outcome = service.claim(Some(user.id.as_str())).await.unwrap();
        assert_eq!(outcome.user.points, outcome.awarded as u64);
        assert_eq!(outcome.rankings[0].points, outcome.awarded as u64);

        let event = sub.events.recv().await.unwrap();
        assert_eq!(
            *event,
            crate::realtime::RealtimeEvent::UpdateRankings(outcome.rankings.clone())
        );
        assert_eq!(service.broadcaster().broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_store_timeout_surfaces_as_unavailable() {
        let mut stub = StubStore::new();
        stub.increment_delay = Some(Duration::from_millis(200));
        let store = Arc::new(stub);
        let user = store.create_user("Alice").await.unwrap();
        let service = service_with(Arc::clone(&store), Duration::from_millis(20));

        let result = service
            .claim_with_key(Some(user.id.as_str()), "retry-1")
            .await;
        assert!(matches!(result, Err(LeaderboardError::StoreUnavailable(_))));
        assert_eq!(service.broadcaster().broadcast_count(), 0);

        // The key stays blocked because the write may have landed
        assert!(matches!(
            service.claim_with_key(Some(user.id.as_str()), "retry-1").await,
            Err(LeaderboardError::DuplicateClaim(_))
        ));
    }

    #[tokio::test]
    async fn test_ranked_read_failure_keeps_increment() {
        let mut stub = StubStore::new();
        stub.fail_ranked = true;
        let store = Arc::new(stub);
        let user = store.create_user("Alice").await.unwrap();
        let service = service_with(Arc::clone(&store), DEFAULT_STORE_TIMEOUT);

        let result = service.claim(Some(user.id.as_str())).await;
        assert!(matches!(result, Err(LeaderboardError::StoreUnavailable(_))));

        let history = store.inner.get_history(&user.id).await.unwrap();
        assert_eq!(history.history.len(), 1);
        assert_eq!(service.broadcaster().broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_idempotent_replay_does_not_double_award() {
        let store = Arc::new(StubStore::new());
        let user = store.create_user("Alice").await.unwrap();
        let service = service_with(Arc::clone(&store), DEFAULT_STORE_TIMEOUT);

        let first = service
            .claim_with_key(Some(user.id.as_str()), "abc")
            .await
            .unwrap();
        let second = service
            .claim_with_key(Some(user.id.as_str()), "abc")
            .await
            .unwrap();

        assert_eq!(first.awarded, second.awarded);
        assert_eq!(first.user, second.user);
        let history = store.inner.get_history(&user.id).await.unwrap();
        assert_eq!(history.history.len(), 1);
        assert_eq!(service.broadcaster().broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_releases_key() {
        let store = Arc::new(StubStore::new());
        let service = service_with(Arc::clone(&store), DEFAULT_STORE_TIMEOUT);

        for _ in 0..2 {
            assert!(matches!(
                service
                    .claim_with_key(Some("000000000000000000000000"), "k")
                    .await,
                Err(LeaderboardError::UserNotFound)
            ));
        }
        assert!(service.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_caller_still_finishes_claim() {
        let mut stub = StubStore::new();
        stub.ranked_delay = Some(Duration::from_millis(200));
        let store = Arc::new(stub);
        let user = store.create_user("Alice").await.unwrap();
        let service = Arc::new(service_with(Arc::clone(&store), DEFAULT_STORE_TIMEOUT));
        let mut sub = service.broadcaster().subscribe(None).unwrap();

        // Abort the caller while the ranked read is stalled
        let caller = {
            let service = Arc::clone(&service);
            let id = user.id.clone();
            tokio::spawn(async move { service.claim_with_key(Some(id.as_str()), "gone").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        let event = tokio::time::timeout(Duration::from_secs(2), sub.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.broadcaster().broadcast_count(), 1);

        let history = store.inner.get_history(&user.id).await.unwrap();
        assert_eq!(history.history.len(), 1);
        let awarded = history.history[0].points_awarded;

        // The retry replays the finished claim instead of answering 409
        let replay = service
            .claim_with_key(Some(user.id.as_str()), "gone")
            .await
            .unwrap();
        assert_eq!(replay.awarded, awarded);
        assert_eq!(
            *event,
            crate::realtime::RealtimeEvent::UpdateRankings(replay.rankings.clone())
        );
        assert_eq!(service.broadcaster().broadcast_count(), 1);
    }
}
