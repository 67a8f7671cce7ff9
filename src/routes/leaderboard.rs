//! Read-only leaderboard queries
//!
//! - GET /rankings - all users, highest points first
//! - GET /history/:userId - award history of one user

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

use crate::routes::{error_response, json_response};
use crate::server::AppState;
use crate::types::LeaderboardError;

pub async fn handle_rankings(state: &AppState) -> Response<Full<Bytes>> {
    match state.service.get_rankings().await {
        Ok(rankings) => json_response(StatusCode::OK, &rankings),
        Err(e) => error_response("rankings", e),
    }
}

/// `segment` is the raw path after `/history/`
pub async fn handle_history(state: &AppState, segment: &str) -> Response<Full<Bytes>> {
    let user_id = match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            return error_response(
                "history",
                LeaderboardError::InvalidRequest("Invalid userId encoding".to_string()),
            )
        }
    };

    match state.service.get_history(Some(&user_id)).await {
        Ok(history) => json_response(StatusCode::OK, &history),
        Err(e) => error_response("history", e),
    }
}
