//! HTTP routes for the leaderboard

pub mod claim;
pub mod health;
pub mod leaderboard;
pub mod realtime_ws;

pub use claim::handle_claim;
pub use health::{health_check, readiness_check};
pub use leaderboard::{handle_history, handle_rankings};
pub use realtime_ws::handle_realtime_ws;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::types::LeaderboardError;

/// Serialize `value` as a JSON response
pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap(),
        Err(e) => error_response(
            "serialize response",
            LeaderboardError::Internal(e.to_string()),
        ),
    }
}

/// Map an error onto its status and `{"error": ...}` body.
///
/// Server-side failures are logged here with their full detail.
pub(crate) fn error_response(context: &str, err: LeaderboardError) -> Response<Full<Bytes>> {
    if err.is_server_error() {
        error!(error = %err, "{} failed", context);
    }

    let (status, body) = err.into_status_code_and_body();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
