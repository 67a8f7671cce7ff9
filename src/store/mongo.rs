//! MongoDB-backed score store
//!
//! A claim is one `findOneAndUpdate` carrying both `$inc` and `$push`.
//! MongoDB applies a single-document update atomically, so the total and
//! the history can never be observed out of step.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use futures_util::TryStreamExt;
use mongodb::options::ReturnDocument;
use tracing::debug;

use super::{HistoryEntry, RankedEntry, ScoreStore, User, UserHistory, UserId};
use crate::db::schemas::{HistoryDoc, RankedDoc, UserDoc, USER_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{LeaderboardError, Result};

/// Score store persisted in the `users` collection
pub struct MongoScoreStore {
    users: MongoCollection<UserDoc>,
}

impl MongoScoreStore {
    /// Open the users collection, creating indexes if needed
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
        Ok(Self { users })
    }
}

/// Ids that are not ObjectIds cannot name a stored user
fn object_id(id: &UserId) -> Option<ObjectId> {
    ObjectId::parse_str(id.as_str()).ok()
}

#[async_trait]
impl ScoreStore for MongoScoreStore {
    fn kind(&self) -> &'static str {
        "mongodb"
    }

    async fn increment(&self, id: &UserId, amount: u32) -> Result<User> {
        if amount == 0 {
            return Err(LeaderboardError::InvalidRequest(
                "Award amount must be positive".to_string(),
            ));
        }
        let Some(oid) = object_id(id) else {
            return Err(LeaderboardError::UserNotFound);
        };

        let entry = HistoryDoc::from_entry(&HistoryEntry::now(amount));
        let entry = bson::to_bson(&entry)
            .map_err(|e| LeaderboardError::Internal(format!("History encoding failed: {}", e)))?;

        let updated = self
            .users
            .inner()
            .find_one_and_update(
                doc! { "_id": oid },
                doc! {
                    "$inc": { "points": amount as i64 },
                    "$push": { "history": entry },
                },
            )
            .return_document(ReturnDocument::After)
            .await?
            .ok_or(LeaderboardError::UserNotFound)?;

        debug!(user_id = %id, amount, "Increment committed");
        updated.into_user()
    }

    async fn list_ranked(&self) -> Result<Vec<RankedEntry>> {
        let cursor = self
            .users
            .inner()
            .clone_with_type::<RankedDoc>()
            .find(doc! {})
            .sort(doc! { "points": -1, "_id": 1 })
            .projection(doc! { "name": 1, "points": 1 })
            .await?;

        let docs: Vec<RankedDoc> = cursor.try_collect().await?;
        docs.into_iter().map(RankedDoc::into_entry).collect()
    }

    async fn get_history(&self, id: &UserId) -> Result<UserHistory> {
        let Some(oid) = object_id(id) else {
            return Err(LeaderboardError::UserNotFound);
        };

        self.users
            .inner()
            .find_one(doc! { "_id": oid })
            .projection(doc! { "name": 1, "history": 1 })
            .await?
            .ok_or(LeaderboardError::UserNotFound)?
            .into_history()
    }

    async fn create_user(&self, name: &str) -> Result<User> {
        let oid = self.users.insert_one(UserDoc::new(name.to_string())).await?;
        UserDoc {
            _id: Some(oid),
            ..UserDoc::new(name.to_string())
        }
        .into_user()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<User>> {
        self.users
            .inner()
            .find_one(doc! { "name": name })
            .sort(doc! { "_id": 1 })
            .await?
            .map(UserDoc::into_user)
            .transpose()
    }
}
