//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router carries the websocket upgrade, the presenter/audience
//! HTTP API over the stores, and the cached slide content at `/`.

pub mod api;
pub mod content;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`; the websocket
/// handler reads the peer address.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(content::index))
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/stats", get(api::stats))
        .route("/api/forms/{form_id}", get(api::form_results).post(api::submit_form))
        .route("/api/feedback", get(api::feedback_report).post(api::submit_feedback))
        .route("/api/activity/{slide}", get(api::activity))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
