//! WebSocket handler: the connection-upgrade layer in front of the registry.
//!
//! DESIGN
//! ======
//! On upgrade, resolves the client and session identifiers, registers the
//! socket with the [`ConnectionRegistry`](crate::services::registry::ConnectionRegistry),
//! and enters a `select!` loop:
//! - Incoming text frames → `registry.handle_message`
//! - Frames queued on this connection's channel → socket
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → `add_connection` queues the `current` snapshot
//! 2. Client frames are routed by the registry
//! 3. Close or socket error → `remove_connection`

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::Frame;
use crate::services::registry::{ConnectionHandle, MessageContext, SESSION_COOKIE};
use crate::state::AppState;

/// Cookie carrying the stable per-browser client id.
pub const CLIENT_COOKIE: &str = "client_id";

/// Outbound frames buffered per connection before sends start dropping.
const CHANNEL_CAPACITY: usize = 256;

/// Longest accepted caller-supplied identifier.
const MAX_ID_LEN: usize = 128;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    client_id: Option<String>,
    session_id: Option<String>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(params): Query<WsQuery>,
    jar: CookieJar,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let cookie_client = jar.get(CLIENT_COOKIE).map(Cookie::value).and_then(clean_id);
    let client_id = cookie_client
        .clone()
        .or_else(|| params.client_id.as_deref().and_then(clean_id))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let session_id = jar
        .get(SESSION_COOKIE)
        .map(Cookie::value)
        .and_then(clean_id)
        .or_else(|| params.session_id.as_deref().and_then(clean_id))
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = MessageContext {
        cookies: jar.iter().map(|c| (c.name().to_owned(), c.value().to_owned())).collect::<HashMap<_, _>>(),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };

    let upgrade = {
        let client_id = client_id.clone();
        ws.on_upgrade(move |socket| run_ws(socket, state, client_id, session_id, remote_addr, ctx))
    };

    // Pin a freshly minted client id so reconnects keep the same identity.
    if cookie_client.is_none() {
        let cookie = Cookie::build((CLIENT_COOKIE, client_id))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax);
        return (CookieJar::new().add(cookie), upgrade).into_response();
    }
    upgrade
}

fn clean_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    (!id.is_empty() && id.len() <= MAX_ID_LEN).then(|| id.to_owned())
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(
    mut socket: WebSocket,
    state: AppState,
    client_id: String,
    session_id: String,
    remote_addr: SocketAddr,
    ctx: MessageContext,
) {
    // Per-connection channel the registry queues outbound frames on.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
    let handle = ConnectionHandle::new(client_tx);
    let conn_id = handle.id;

    state.registry.add_connection(handle, &client_id, &session_id, Some(remote_addr));

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        state.registry.handle_message(conn_id, text.as_str(), &ctx);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    state.registry.remove_connection(conn_id);
    info!(conn = %conn_id, client_id = %client_id, "ws: client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let text = match frame.to_text() {
        Ok(text) => text,
        Err(e) => {
            warn!(message = %frame.message, error = %e, "ws: failed to encode frame");
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
