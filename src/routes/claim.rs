//! POST /claim

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::routes::{error_response, json_response};
use crate::server::AppState;
use crate::store::{RankedEntry, User};
use crate::types::{LeaderboardError, Result};

/// Largest accepted claim body
pub const MAX_CLAIM_BODY_BYTES: usize = 16 * 1024;

/// Header carrying a client-chosen idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub const CLAIM_SUCCESS_MESSAGE: &str = "Points claimed successfully";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimRequest {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
struct ClaimResponse<'a> {
    message: &'static str,
    user: &'a User,
    rankings: &'a [RankedEntry],
}

/// Handle a claim request
pub async fn handle_claim(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let key = match idempotency_key(&req) {
        Ok(key) => key,
        Err(e) => return error_response("claim", e),
    };

    let body = match Limited::new(req.into_body(), MAX_CLAIM_BODY_BYTES)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(
                "claim",
                LeaderboardError::InvalidRequest(format!("Failed to read request body: {}", e)),
            )
        }
    };

    let request = match parse_claim_body(&body) {
        Ok(request) => request,
        Err(e) => return error_response("claim", e),
    };

    let user_id = request.user_id.as_deref();
    let result = match key.as_deref() {
        Some(key) => state.service.claim_with_key(user_id, key).await,
        None => state.service.claim(user_id).await,
    };

    match result {
        Ok(outcome) => json_response(
            StatusCode::OK,
            &ClaimResponse {
                message: CLAIM_SUCCESS_MESSAGE,
                user: &outcome.user,
                rankings: &outcome.rankings,
            },
        ),
        Err(e) => error_response("claim", e),
    }
}

fn idempotency_key<B>(req: &Request<B>) -> Result<Option<String>> {
    match req.headers().get(IDEMPOTENCY_KEY_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim().to_string()))
            .map_err(|_| {
                LeaderboardError::InvalidRequest("Idempotency-Key must be ASCII".to_string())
            }),
    }
}

/// An empty body is treated like a body without `userId`
fn parse_claim_body(body: &[u8]) -> Result<ClaimRequest> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(ClaimRequest::default());
    }
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_claim_body() {
        let request = parse_claim_body(br#"{"userId":"65a1"}"#).unwrap();
        assert_eq!(request.user_id.as_deref(), Some("65a1"));

        let request = parse_claim_body(br#"{}"#).unwrap();
        assert!(request.user_id.is_none());

        let request = parse_claim_body(b"  ").unwrap();
        assert!(request.user_id.is_none());
    }

    #[test]
    fn test_malformed_body_is_bad_request() {
        let err = parse_claim_body(b"{userId:").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_idempotency_key_header() {
        let req = Request::builder()
            .header("Idempotency-Key", " abc-123 ")
            .body(())
            .unwrap();
        assert_eq!(idempotency_key(&req).unwrap().as_deref(), Some("abc-123"));

        let req = Request::builder().body(()).unwrap();
        assert!(idempotency_key(&req).unwrap().is_none());
    }
}
