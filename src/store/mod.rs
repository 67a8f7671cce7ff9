//! Score store
//!
//! Durable mapping from user id to point total and award history.
//!
//! ## Contract
//!
//! - `increment` adds points and appends the matching history entry as one
//!   atomic step. Concurrent increments on the same user never lose updates;
//!   increments on different users do not wait on each other.
//! - `list_ranked` returns every user sorted by points, highest first.
//!   Equal scores keep user creation order (oldest first).
//! - `get_history` returns the display name and the award history.
//!
//! Two backends implement the contract:
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────────┐
//! │  ScoreStore  │───►│  MemoryScoreStore    │  DashMap, per-shard locking
//! │   (trait)    │    └──────────────────────┘
//! │              │    ┌──────────────────────┐
//! │              │───►│  MongoScoreStore     │  findOneAndUpdate($inc+$push)
//! └──────────────┘    └──────────────────────┘
//! ```

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::types::{LeaderboardError, Result};

pub use memory::MemoryScoreStore;
pub use mongo::MongoScoreStore;

/// Longest user id accepted by `UserId::parse`
pub const MAX_USER_ID_LEN: usize = 128;

/// Opaque user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Validate a client-supplied id.
    ///
    /// Ids are non-blank, at most `MAX_USER_ID_LEN` characters, and made of
    /// ASCII alphanumerics, `-` or `_`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LeaderboardError::InvalidRequest("UserId is required".to_string()));
        }
        if trimmed.len() > MAX_USER_ID_LEN {
            return Err(LeaderboardError::InvalidRequest(format!(
                "UserId must be at most {} characters",
                MAX_USER_ID_LEN
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(LeaderboardError::InvalidRequest(
                "UserId contains invalid characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One award in a user's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub points_awarded: u32,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Entry stamped with the current time
    pub fn now(points_awarded: u32) -> Self {
        Self {
            points_awarded,
            timestamp: Utc::now(),
        }
    }
}

/// A user as returned after an increment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub points: u64,
    pub history: Vec<HistoryEntry>,
}

impl User {
    /// Sum of all awards in the history
    pub fn history_total(&self) -> u64 {
        self.history.iter().map(|h| h.points_awarded as u64).sum()
    }
}

/// One row of the ranked snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub points: u64,
}

/// Response shape for a history lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserHistory {
    pub name: String,
    pub history: Vec<HistoryEntry>,
}

/// Storage backend for user scores
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Short backend name for logs and health output
    fn kind(&self) -> &'static str;

    /// Atomically add `amount` points and append a history entry.
    ///
    /// Fails with `UserNotFound` when no such user exists.
    async fn increment(&self, id: &UserId, amount: u32) -> Result<User>;

    /// Every user sorted by points descending, ties in creation order
    async fn list_ranked(&self) -> Result<Vec<RankedEntry>>;

    /// Name and award history of one user
    async fn get_history(&self, id: &UserId) -> Result<UserHistory>;

    /// Create a user with zero points and an empty history
    async fn create_user(&self, name: &str) -> Result<User>;

    /// Oldest user with this display name, if any
    async fn find_by_name(&self, name: &str) -> Result<Option<User>>;
}

/// Ensure a user exists for each name, creating the missing ones.
///
/// Returns the number of users created.
pub async fn seed_users(store: &dyn ScoreStore, names: &[String]) -> Result<usize> {
    let mut created = 0;
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if store.find_by_name(name).await?.is_some() {
            continue;
        }
        let user = store.create_user(name).await?;
        info!(user_id = %user.id, name = %user.name, "Seeded user");
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_rejects_blank() {
        assert!(matches!(
            UserId::parse(""),
            Err(LeaderboardError::InvalidRequest(_))
        ));
        assert!(matches!(
            UserId::parse("   "),
            Err(LeaderboardError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_user_id_rejects_malformed() {
        assert!(UserId::parse("abc/def").is_err());
        assert!(UserId::parse("{\"$gt\": \"\"}").is_err());
        assert!(UserId::parse(&"a".repeat(MAX_USER_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_user_id_accepts_object_id_hex() {
        let id = UserId::parse("000000000000000000000000").unwrap();
        assert_eq!(id.as_str(), "000000000000000000000000");

        let id = UserId::parse("  65a1f0c2e4b0a1b2c3d4e5f6 ").unwrap();
        assert_eq!(id.to_string(), "65a1f0c2e4b0a1b2c3d4e5f6");
    }

    #[test]
    fn test_ranked_entry_serializes_mongo_style_id() {
        let entry = RankedEntry {
            id: UserId::parse("u1").unwrap(),
            name: "Alice".to_string(),
            points: 7,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["_id"], "u1");
        assert_eq!(json["name"], "Alice");
        assert_eq!(json["points"], 7);
    }

    #[test]
    fn test_history_entry_camel_case() {
        let json = serde_json::to_string(&HistoryEntry::now(4)).unwrap();
        assert!(json.contains("\"pointsAwarded\":4"));
        assert!(json.contains("\"timestamp\""));
    }

    #[tokio::test]
    async fn test_seed_users_is_idempotent() {
        let store = MemoryScoreStore::new();
        let names = vec!["Alice".to_string(), "Bob".to_string(), " ".to_string()];

        assert_eq!(seed_users(&store, &names).await.unwrap(), 2);
        assert_eq!(seed_users(&store, &names).await.unwrap(), 0);
        assert_eq!(store.list_ranked().await.unwrap().len(), 2);
    }
}
