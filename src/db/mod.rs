//! MongoDB persistence
//!
//! Client wrapper plus the document schemas stored by the service.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection};
