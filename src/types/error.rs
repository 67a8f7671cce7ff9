//! Error types for the leaderboard service
//!
//! Every failure a caller can observe maps onto one of these variants.
//! Store failures keep their detail for logs but expose only a generic
//! message over HTTP.

use hyper::StatusCode;

/// Main error type for leaderboard operations
#[derive(Debug, thiserror::Error)]
pub enum LeaderboardError {
    /// Missing or malformed input, rejected before touching the store
    #[error("{0}")]
    InvalidRequest(String),

    /// The referenced user does not exist
    #[error("User not found")]
    UserNotFound,

    /// Store connection or operation failure (including timeouts)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Delivery to one or more subscribers failed
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    /// Idempotency key is in flight or its outcome is unknown
    #[error("{0}")]
    DuplicateClaim(String),

    /// A bounded resource (subscriber registry) is full
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LeaderboardError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BroadcastFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DuplicateClaim(_) => StatusCode::CONFLICT,
            Self::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a client
    ///
    /// 4xx errors carry their own message; server-side failures never leak
    /// internal detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidRequest(_)
            | Self::UserNotFound
            | Self::DuplicateClaim(_)
            | Self::Capacity(_) => self.to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Whether the error is a server-side fault worth logging at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.public_message() }).to_string();
        (status, body)
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for LeaderboardError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for LeaderboardError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(format!("Invalid JSON: {}", err))
    }
}

impl From<hyper::Error> for LeaderboardError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for LeaderboardError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

/// Result type alias for leaderboard operations
pub type Result<T> = std::result::Result<T, LeaderboardError>;
