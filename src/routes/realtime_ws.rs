//! Realtime ranking feed over WebSocket
//!
//! Registers the connection with the broadcaster before the upgrade so a
//! full registry can be refused with 503. Every write to the socket is
//! bounded; a client that cannot keep up is disconnected.

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::realtime::{ClientEvent, RealtimeEvent, Subscription};
use crate::routes::error_response;
use crate::server::AppState;
use crate::types::{LeaderboardError, Result};

/// WebSocket type after upgrade
type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Handle WebSocket upgrade for the ranking feed
pub async fn handle_realtime_ws(
    state: Arc<AppState>,
    req: Request<Incoming>,
    addr: SocketAddr,
) -> Response<Full<Bytes>> {
    let origin = req
        .headers()
        .get("origin")
        .and_then(|h| h.to_str().ok());
    if !state.cors.permits(origin) {
        warn!(%addr, origin = ?origin, "Rejected websocket from disallowed origin");
        return Response::builder()
            .status(StatusCode::FORBIDDEN)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(r#"{"error":"Origin not allowed"}"#)))
            .unwrap();
    }

    // Check if this is a WebSocket upgrade request
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(
                r#"{"error":"WebSocket upgrade required"}"#,
            )))
            .unwrap();
    }

    let subscription = match state.broadcaster().subscribe(Some(addr)) {
        Ok(subscription) => subscription,
        Err(e) => return error_response("subscribe", e),
    };
    let id = subscription.id;

    // Perform the upgrade
    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok((resp, ws)) => (resp, ws),
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            state.broadcaster().unsubscribe(&id);
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("WebSocket upgrade failed")))
                .unwrap();
        }
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                let ws: HyperWebSocket = ws;
                if let Err(e) = run_subscriber(ws, &state, subscription).await {
                    debug!(subscriber = %id, "Realtime connection ended: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
        state.broadcaster().unsubscribe(&id);
    });

    // Return the upgrade response with our body type
    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

/// Pump broadcaster events to one client until either side goes away
async fn run_subscriber(
    ws: HyperWebSocket,
    state: &AppState,
    mut subscription: Subscription,
) -> Result<()> {
    let (mut sender, mut receiver) = ws.split();
    let id = subscription.id;
    let write_timeout = state.args.broadcast_timeout();

    if state.args.sync_on_connect {
        match state.service.get_rankings().await {
            Ok(rankings) => {
                send_event(&mut sender, &RealtimeEvent::UpdateRankings(rankings), write_timeout)
                    .await?
            }
            Err(e) => warn!(subscriber = %id, error = %e, "Initial ranking sync failed"),
        }
    }

    loop {
        tokio::select! {
            event = subscription.events.recv() => {
                match event {
                    Some(event) => send_event(&mut sender, &event, write_timeout).await?,
                    // Evicted by the broadcaster
                    None => {
                        info!(subscriber = %id, "Subscriber evicted, closing socket");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(ClientEvent::Ping) => {
                                send_event(&mut sender, &RealtimeEvent::Pong, write_timeout).await?
                            }
                            Err(_) => debug!(subscriber = %id, "Ignoring client message: {}", text),
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        send_frame(&mut sender, WsMessage::Pong(data), write_timeout).await?
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        return Err(LeaderboardError::BroadcastFailed(e.to_string()));
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = sender.close().await;
    Ok(())
}

async fn send_event<S>(sender: &mut S, event: &RealtimeEvent, limit: Duration) -> Result<()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let json =
        serde_json::to_string(event).map_err(|e| LeaderboardError::Internal(e.to_string()))?;
    send_frame(sender, WsMessage::Text(json), limit).await
}

async fn send_frame<S>(sender: &mut S, frame: WsMessage, limit: Duration) -> Result<()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sender.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(LeaderboardError::BroadcastFailed(e.to_string())),
        Err(_) => Err(LeaderboardError::BroadcastFailed(format!(
            "write timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
