//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Upgrades are enabled so
//! `/socket` can become a websocket.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::ranking::{self, RankingService};
use crate::realtime::Broadcaster;
use crate::routes;
use crate::server::CorsPolicy;
use crate::store::ScoreStore;
use crate::types::LeaderboardError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Interval between idempotency key sweeps
const LEDGER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Claim orchestration and queries
    pub service: Arc<RankingService>,
    /// Origin policy for HTTP responses and websocket upgrades
    pub cors: CorsPolicy,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the ranking service and broadcaster around a store
    pub fn new(args: Args, store: Arc<dyn ScoreStore>) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(args.broadcaster_config()));
        let service = Arc::new(RankingService::new(
            store,
            broadcaster,
            args.ranking_config(),
        ));
        let cors = args.cors_policy();

        Self {
            args,
            service,
            cors,
            started_at: Instant::now(),
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        self.service.broadcaster()
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), LeaderboardError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Leaderboard listening on {} (store: {})",
        state.args.listen,
        state.service.store().kind()
    );

    ranking::spawn_cleanup_task(Arc::clone(state.service.ledger()), LEDGER_CLEANUP_INTERVAL);
    info!(
        "Claim ledger enabled (keys kept {}s)",
        state.service.ledger().retention().as_secs()
    );

    serve(listener, state).await
}

/// Accept connections on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), LeaderboardError> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let origin = req
        .headers()
        .get("origin")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    debug!("[{}] {} {}", addr, method, path);

    // CORS preflight
    if method == Method::OPTIONS {
        return Ok(to_boxed(state.cors.preflight(origin.as_deref())));
    }

    let response = match (method, path.as_str()) {
        // Liveness
        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(&state),

        // Readiness (store round trip)
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(&state).await
        }

        (Method::POST, "/claim") => routes::handle_claim(req, Arc::clone(&state)).await,

        (Method::GET, "/rankings") => routes::handle_rankings(&state).await,

        (Method::GET, p) if p.starts_with("/history/") => {
            routes::handle_history(&state, &p["/history/".len()..]).await
        }

        // Realtime ranking feed
        (Method::GET, "/socket") | (Method::GET, "/ws") => {
            routes::handle_realtime_ws(Arc::clone(&state), req, addr).await
        }

        (_, "/claim") | (_, "/rankings") => method_not_allowed_response(),

        _ => not_found_response(&path),
    };

    Ok(to_boxed(state.cors.apply(response, origin.as_deref())))
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn method_not_allowed_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(r#"{"error":"Method Not Allowed"}"#)))
        .unwrap()
}
