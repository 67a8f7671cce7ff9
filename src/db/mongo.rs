//! MongoDB client and collection wrapper

use bson::{doc, oid::ObjectId, Document};
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::types::LeaderboardError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, LeaderboardError> {
        info!("Connecting to MongoDB at {}", redact_uri(uri));

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else if uri.trim_end_matches('/').matches('/').count() > 2 {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!(
                "{}/?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000",
                uri.trim_end_matches('/')
            )
        };

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            LeaderboardError::StoreUnavailable(format!("Failed to connect to MongoDB: {}", e))
        })?;

        // Verify connection with timeout
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| LeaderboardError::StoreUnavailable(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Connect with a bounded number of attempts and linear backoff.
    ///
    /// Only the initial connection is retried; store operations never are.
    pub async fn connect_with_retry(
        uri: &str,
        db_name: &str,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, LeaderboardError> {
        let attempts = attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match Self::new(uri, db_name).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "MongoDB connection attempt failed");
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff * attempt).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            LeaderboardError::StoreUnavailable("MongoDB connection failed".to_string())
        }))
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, LeaderboardError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, LeaderboardError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), LeaderboardError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner.create_indexes(indices).await.map_err(|e| {
            LeaderboardError::StoreUnavailable(format!("Failed to create indexes: {}", e))
        })?;

        Ok(())
    }

    /// Insert a document and return its id
    pub async fn insert_one(&self, item: T) -> Result<ObjectId, LeaderboardError> {
        let result = self
            .inner
            .insert_one(item)
            .await
            .map_err(|e| LeaderboardError::StoreUnavailable(format!("Insert failed: {}", e)))?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| LeaderboardError::Internal("Failed to get inserted ID".into()))
    }

    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

/// Strip credentials from a connection string before logging it
pub fn redact_uri(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &uri[..scheme_end], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}
