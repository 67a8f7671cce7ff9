//! In-memory score store
//!
//! Used in development mode and tests. Each user lives in a `DashMap`
//! shard; `get_mut` holds that shard's write lock for the whole
//! increment + history append, so the two never come apart and users in
//! other shards are untouched.

use async_trait::async_trait;
use bson::oid::ObjectId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{HistoryEntry, RankedEntry, ScoreStore, User, UserHistory, UserId};
use crate::types::{LeaderboardError, Result};

/// Stored user with its creation sequence (tie-break key)
#[derive(Debug, Clone)]
struct UserRecord {
    seq: u64,
    user: User,
}

/// Score store backed by a concurrent hash map
pub struct MemoryScoreStore {
    users: DashMap<UserId, UserRecord>,
    next_seq: AtomicU64,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Number of stored users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for MemoryScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn increment(&self, id: &UserId, amount: u32) -> Result<User> {
        if amount == 0 {
            return Err(LeaderboardError::InvalidRequest(
                "Award amount must be positive".to_string(),
            ));
        }

        let mut record = self
            .users
            .get_mut(id)
            .ok_or(LeaderboardError::UserNotFound)?;
        record.user.points += amount as u64;
        record.user.history.push(HistoryEntry::now(amount));

        Ok(record.user.clone())
    }

    async fn list_ranked(&self) -> Result<Vec<RankedEntry>> {
        let mut rows: Vec<(u64, RankedEntry)> = self
            .users
            .iter()
            .map(|r| {
                (
                    r.seq,
                    RankedEntry {
                        id: r.user.id.clone(),
                        name: r.user.name.clone(),
                        points: r.user.points,
                    },
                )
            })
            .collect();

        rows.sort_by(|(seq_a, a), (seq_b, b)| b.points.cmp(&a.points).then(seq_a.cmp(seq_b)));

        Ok(rows.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn get_history(&self, id: &UserId) -> Result<UserHistory> {
        let record = self.users.get(id).ok_or(LeaderboardError::UserNotFound)?;
        Ok(UserHistory {
            name: record.user.name.clone(),
            history: record.user.history.clone(),
        })
    }

    async fn create_user(&self, name: &str) -> Result<User> {
        // ObjectId hex keeps ids interchangeable with the MongoDB backend
        let id = UserId::parse(&ObjectId::new().to_hex())?;
        let user = User {
            id: id.clone(),
            name: name.to_string(),
            points: 0,
            history: Vec::new(),
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        self.users.insert(
            id,
            UserRecord {
                seq,
                user: user.clone(),
            },
        );
        Ok(user)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .filter(|r| r.user.name == name)
            .min_by_key(|r| r.seq)
            .map(|r| r.user.clone()))
    }
}
