//! Database schemas for the leaderboard
//!
//! One document per user, holding the running total and the award history.

mod user;

pub use user::{HistoryDoc, RankedDoc, UserDoc, USER_COLLECTION};
