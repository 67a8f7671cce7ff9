//! Health check endpoints
//!
//! - /health, /healthz - liveness, 200 whenever the process is serving
//! - /ready, /readyz - readiness, 200 only if the store answers a ranked read

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::routes::json_response;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    /// 'online' while serving
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    /// Store backend name
    pub store: &'static str,
    /// Connected realtime subscribers
    pub subscribers: usize,
    /// Broadcasts sent since startup
    pub broadcasts: u64,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub store: &'static str,
    /// Users in the ranked snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness check
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let broadcaster = state.broadcaster();
    let response = HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        store: state.service.store().kind(),
        subscribers: broadcaster.subscriber_count(),
        broadcasts: broadcaster.broadcast_count(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    json_response(StatusCode::OK, &response)
}

/// Readiness check
pub async fn readiness_check(state: &AppState) -> Response<Full<Bytes>> {
    let store = state.service.store().kind();

    match state.service.get_rankings().await {
        Ok(rankings) => json_response(
            StatusCode::OK,
            &ReadinessResponse {
                ready: true,
                store,
                users: Some(rankings.len()),
                error: None,
            },
        ),
        Err(e) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &ReadinessResponse {
                ready: false,
                store,
                users: None,
                error: Some(e.public_message()),
            },
        ),
    }
}
