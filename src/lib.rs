//! Leaderboard - claim points and watch the rankings move live
//!
//! A small HTTP + WebSocket service: users claim a random award, the
//! ranked list is recomputed from the store, and every connected client is
//! pushed the new snapshot.
//!
//! ## Services
//!
//! - **Claims**: `POST /claim` awards 1-10 points and records history
//! - **Queries**: `GET /rankings`, `GET /history/:userId`
//! - **Realtime**: `/socket` websocket feed of `updateRankings` events
//! - **Store**: MongoDB `users` collection, or in-memory for development

pub mod config;
pub mod db;
pub mod logging;
pub mod ranking;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{LeaderboardError, Result};
