//! Configuration for the leaderboard service
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::logging::LogFormat;
use crate::ranking::RankingConfig;
use crate::realtime::BroadcasterConfig;
use crate::server::CorsPolicy;

/// Which score store backend to use
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// MongoDB `users` collection
    Mongo,
    /// Process-local store, lost on restart
    Memory,
}

/// Leaderboard - claim points and watch the rankings move live
#[derive(Parser, Debug, Clone)]
#[command(name = "leaderboard")]
#[command(about = "Real-time leaderboard service")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Score store backend
    #[arg(long, env = "STORE", value_enum, default_value = "mongo")]
    pub store: StoreKind,

    /// MongoDB connection URI
    #[arg(long, env = "MONGO_URI", default_value = "mongodb://localhost:27017")]
    pub mongo_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "leaderboard")]
    pub mongodb_db: String,

    /// Connection attempts before giving up on MongoDB at startup
    #[arg(long, env = "MONGO_CONNECT_ATTEMPTS", default_value = "3")]
    pub mongo_connect_attempts: u32,

    /// Enable development mode (fall back to the memory store if MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Comma-separated user names to create at startup if missing
    #[arg(long, env = "SEED_USERS")]
    pub seed_users: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Upper bound on a single store operation, in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Upper bound on a single websocket write, in milliseconds
    #[arg(long, env = "BROADCAST_TIMEOUT_MS", default_value = "2000")]
    pub broadcast_timeout_ms: u64,

    /// Queued snapshots per subscriber before it is considered lagging
    #[arg(long, env = "SUBSCRIBER_BUFFER", default_value = "32")]
    pub subscriber_buffer: usize,

    /// Maximum concurrent realtime subscribers
    #[arg(long, env = "MAX_SUBSCRIBERS", default_value = "10000")]
    pub max_subscribers: usize,

    /// Send the current rankings to a subscriber right after it connects
    #[arg(long, env = "SYNC_ON_CONNECT", default_value = "true", action = clap::ArgAction::Set)]
    pub sync_on_connect: bool,

    /// How long idempotency keys are remembered, in seconds
    #[arg(long, env = "CLAIM_KEY_TTL_SECS", default_value = "600")]
    pub claim_key_ttl_secs: u64,

    /// Allowed CORS origins: "*" or a comma-separated list
    #[arg(long, env = "CORS_ALLOW_ORIGIN", default_value = "*")]
    pub cors_allow_origin: String,
}

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Seed names, trimmed, without blanks
    pub fn seed_user_list(&self) -> Vec<String> {
        self.seed_users
            .as_deref()
            .map(|names| {
                names
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn cors_policy(&self) -> CorsPolicy {
        CorsPolicy::parse(&self.cors_allow_origin)
    }

    pub fn ranking_config(&self) -> RankingConfig {
        RankingConfig {
            store_timeout: self.store_timeout(),
            claim_key_ttl: Duration::from_secs(self.claim_key_ttl_secs),
        }
    }

    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            max_subscribers: self.max_subscribers,
            buffer: self.subscriber_buffer,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store_timeout_ms == 0 {
            return Err("STORE_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.broadcast_timeout_ms == 0 {
            return Err("BROADCAST_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.subscriber_buffer == 0 {
            return Err("SUBSCRIBER_BUFFER must be greater than zero".to_string());
        }
        if self.max_subscribers == 0 {
            return Err("MAX_SUBSCRIBERS must be greater than zero".to_string());
        }
        if self.mongo_connect_attempts == 0 {
            return Err("MONGO_CONNECT_ATTEMPTS must be at least 1".to_string());
        }
        if self.store == StoreKind::Mongo && self.mongo_uri.trim().is_empty() {
            return Err("MONGO_URI is required for the mongo store".to_string());
        }
        if matches!(self.cors_policy(), CorsPolicy::List(ref origins) if origins.is_empty()) {
            return Err("CORS_ALLOW_ORIGIN must be \"*\" or at least one origin".to_string());
        }
        Ok(())
    }
}
