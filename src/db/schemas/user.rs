//! User document schema
//!
//! Layout: `{ _id, name, points, history: [{ pointsAwarded, timestamp }] }`.
//! Timestamps are stored as BSON dates.

use bson::{doc, oid::ObjectId, Bson, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::store::{HistoryEntry, RankedEntry, User, UserHistory, UserId};
use crate::types::LeaderboardError;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Running total, only changed through `$inc`
    #[serde(default, deserialize_with = "int_or_double")]
    pub points: i64,

    /// Append-only award history
    #[serde(default)]
    pub history: Vec<HistoryDoc>,
}

/// Award history entry
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDoc {
    #[serde(deserialize_with = "int_or_double_i32")]
    pub points_awarded: i32,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

/// Projection of a user used for ranked reads
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RankedDoc {
    pub _id: ObjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "int_or_double")]
    pub points: i64,
}

impl UserDoc {
    /// Create a new user document with zero points
    pub fn new(name: String) -> Self {
        Self {
            _id: None,
            name,
            points: 0,
            history: Vec::new(),
        }
    }

    /// Convert into the domain user
    pub fn into_user(self) -> Result<User, LeaderboardError> {
        let oid = self
            ._id
            .ok_or_else(|| LeaderboardError::Internal("User document without _id".into()))?;
        Ok(User {
            id: object_id_to_user_id(&oid)?,
            name: self.name,
            points: points_from_doc(self.points)?,
            history: self
                .history
                .into_iter()
                .map(HistoryDoc::into_entry)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Convert into the history lookup response
    pub fn into_history(self) -> Result<UserHistory, LeaderboardError> {
        Ok(UserHistory {
            name: self.name,
            history: self
                .history
                .into_iter()
                .map(HistoryDoc::into_entry)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl HistoryDoc {
    pub fn from_entry(entry: &HistoryEntry) -> Self {
        Self {
            points_awarded: entry.points_awarded as i32,
            timestamp: entry.timestamp,
        }
    }

    pub fn into_entry(self) -> Result<HistoryEntry, LeaderboardError> {
        let points_awarded = u32::try_from(self.points_awarded).map_err(|_| {
            LeaderboardError::Internal(format!(
                "Negative history award in store: {}",
                self.points_awarded
            ))
        })?;
        Ok(HistoryEntry {
            points_awarded,
            timestamp: self.timestamp,
        })
    }
}

impl RankedDoc {
    pub fn into_entry(self) -> Result<RankedEntry, LeaderboardError> {
        Ok(RankedEntry {
            id: object_id_to_user_id(&self._id)?,
            name: self.name,
            points: points_from_doc(self.points)?,
        })
    }
}

/// Read a number stored as int32, int64 or an integral double.
///
/// Documents written through mongoose keep every `Number` as a BSON double.
fn int_or_double<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Bson::deserialize(deserializer)? {
        Bson::Int32(v) => Ok(v as i64),
        Bson::Int64(v) => Ok(v),
        Bson::Double(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            Ok(v as i64)
        }
        other => Err(de::Error::custom(format!(
            "expected an integral number, found {}",
            other
        ))),
    }
}

fn int_or_double_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = int_or_double(deserializer)?;
    i32::try_from(value).map_err(|_| de::Error::custom(format!("award out of range: {}", value)))
}

fn object_id_to_user_id(oid: &ObjectId) -> Result<UserId, LeaderboardError> {
    UserId::parse(&oid.to_hex())
}

fn points_from_doc(points: i64) -> Result<u64, LeaderboardError> {
    u64::try_from(points)
        .map_err(|_| LeaderboardError::Internal(format!("Negative points in store: {}", points)))
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Ranked read: points descending, creation order for ties
            (
                doc! { "points": -1, "_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("points_rank_index".to_string())
                        .build(),
                ),
            ),
            // Seeding looks users up by name
            (
                doc! { "name": 1 },
                Some(
                    IndexOptions::builder()
                        .name("name_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
