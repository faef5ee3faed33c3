//! Slide content route: cached `compile(locale)` output.
//!
//! The compiled document for each locale lives in the shared cache. A set
//! reload flag means the watcher saw a change since the last request; the
//! flag is consumed and the locale's entry recompiled before serving.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::frame::ErrorCode;
use crate::services::content::ContentError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ContentQuery {
    pub locale: Option<String>,
}

/// `GET /?locale=xx`: the compiled presentation.
pub async fn index(State(state): State<AppState>, Query(query): Query<ContentQuery>) -> Response {
    let locale = query
        .locale
        .map(|l| l.trim().to_owned())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| state.config.default_locale.clone());

    if state.reload.take() {
        debug!(locale = %locale, "content: reload pending; recompiling");
        state.cache.invalidate(&locale);
    }

    let cache = state.cache.clone();
    let compiler = state.compiler.clone();
    let key = locale.clone();
    let result =
        tokio::task::spawn_blocking(move || cache.fetch_or_compute(&key, || compiler.compile(&key))).await;

    match result {
        Ok(Ok(html)) => Html(html).into_response(),
        Ok(Err(e)) => {
            warn!(locale = %locale, code = e.error_code(), error = %e, "content: compile failed");
            (content_error_status(&e), e.to_string()).into_response()
        }
        Err(e) => {
            error!(locale = %locale, error = %e, "content: compile task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn content_error_status(err: &ContentError) -> StatusCode {
    match err {
        ContentError::InvalidLocale(_) => StatusCode::BAD_REQUEST,
        ContentError::NotFound(_) => StatusCode::NOT_FOUND,
        ContentError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "content_test.rs"]
mod tests;
