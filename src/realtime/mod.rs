//! Realtime ranking updates
//!
//! ## Protocol
//!
//! Connect: `ws://localhost:3000/socket`
//!
//! Messages (server → client):
//! - `updateRankings` - full ranked snapshot after every successful claim
//! - `pong` - reply to a client `ping`
//!
//! Messages (client → server):
//! - `ping` - keep-alive
//!
//! ```json
//! { "event": "updateRankings", "data": [ { "_id": "65a1...", "name": "Alice", "points": 42 } ] }
//! ```

mod broadcaster;

use serde::{Deserialize, Serialize};

use crate::store::RankedEntry;

pub use broadcaster::{BroadcastReport, Broadcaster, BroadcasterConfig, SubscriberId, Subscription};

/// Event sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    /// Full ranked snapshot
    #[serde(rename = "updateRankings")]
    UpdateRankings(Vec<RankedEntry>),
    /// Keep-alive reply
    #[serde(rename = "pong")]
    Pong,
}

/// Event received from client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    Ping,
}
