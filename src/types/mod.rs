//! Shared types for the leaderboard service

mod error;

pub use error::{LeaderboardError, Result};
