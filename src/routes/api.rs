//! HTTP API over the stores: aggregates for the presenter, submissions
//! from the audience.
//!
//! Read endpoints require the presenter credential in the
//! `x-presenter-token` header. Submission endpoints are open; they identify
//! the submitter by cookie, falling back to the request body.

use axum::extract::{FromRef, FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::frame::{ErrorCode, FRAME_CODE, FRAME_DETAIL, Frame};
use crate::routes::ws::CLIENT_COOKIE;
use crate::services::feedback::{FeedbackEntry, FeedbackSummary};
use crate::services::forms::{Answers, FormTally};
use crate::services::persistence::StoreError;
use crate::services::registry::{ActivitySummary, SESSION_COOKIE};
use crate::services::stats::StatsSummary;
use crate::state::AppState;

/// Header carrying the presenter credential on HTTP requests.
pub const PRESENTER_HEADER: &str = "x-presenter-token";

// =============================================================================
// PRESENTER EXTRACTOR
// =============================================================================

/// Proof that the request carried the presenter credential.
/// Use as a handler parameter to gate an endpoint.
pub struct Presenter;

impl<S> FromRequestParts<S> for Presenter
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(PRESENTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let app_state = AppState::from_ref(state);
        if app_state.session.validate_credential(token) {
            Ok(Self)
        } else {
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct FormSubmissionBody {
    pub session_id: Option<String>,
    pub answers: Answers,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub client_id: Option<String>,
    /// Kept untyped so a non-integer rating is a validation error, not a
    /// body rejection.
    pub rating: serde_json::Value,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackReport {
    pub summary: FeedbackSummary,
    pub entries: Vec<FeedbackEntry>,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /api/stats`: view, question, and pace aggregates.
pub async fn stats(_presenter: Presenter, State(state): State<AppState>) -> Json<StatsSummary> {
    Json(state.stats.aggregate())
}

/// `GET /api/forms/{form_id}`: answer tally for one form.
pub async fn form_results(
    _presenter: Presenter,
    State(state): State<AppState>,
    Path(form_id): Path<String>,
) -> Json<FormTally> {
    Json(state.forms.aggregate(&form_id))
}

/// `POST /api/forms/{form_id}`: record a submission and push fresh results
/// to presenters.
pub async fn submit_form(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(form_id): Path<String>,
    Json(body): Json<FormSubmissionBody>,
) -> Response {
    let session_id = jar
        .get(SESSION_COOKIE)
        .map(Cookie::value)
        .or(body.session_id.as_deref())
        .unwrap_or_default()
        .to_owned();

    let submission = match state.forms.record(&form_id, &session_id, body.answers) {
        Ok(submission) => submission,
        Err(e) => return store_error_response(&e),
    };

    let results = state.forms.aggregate(&form_id);
    let frame = Frame::new("form")
        .with_data("form", form_id.clone())
        .with_data("results", serde_json::to_value(&results).unwrap_or_default());
    let delivered = state.registry.broadcast_to_presenters(&frame);
    info!(form_id = %form_id, session_id = %session_id, delivered, "api: form submission recorded");

    (StatusCode::CREATED, Json(submission)).into_response()
}

/// `GET /api/feedback`: rating summary and each submitter's latest entry.
pub async fn feedback_report(_presenter: Presenter, State(state): State<AppState>) -> Json<FeedbackReport> {
    Json(FeedbackReport {
        summary: state.feedback.aggregate(),
        entries: state.feedback.latest_entries(),
    })
}

/// `POST /api/feedback`: record one rating.
pub async fn submit_feedback(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<FeedbackBody>,
) -> Response {
    let submitter = jar
        .get(CLIENT_COOKIE)
        .map(Cookie::value)
        .or(body.client_id.as_deref())
        .unwrap_or_default()
        .to_owned();

    let Some(rating) = body.rating.as_i64() else {
        return store_error_response(&StoreError::Validation("rating must be an integer".into()));
    };

    match state.feedback.record(&submitter, rating, body.comment.as_deref()) {
        Ok(entry) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// `GET /api/activity/{slide}`: how many audience clients reported, and
/// how many finished.
pub async fn activity(
    _presenter: Presenter,
    State(state): State<AppState>,
    Path(slide): Path<u32>,
) -> Json<ActivitySummary> {
    Json(state.registry.activity_summary(slide))
}

// =============================================================================
// HELPERS
// =============================================================================

fn store_error_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoreError::Io(_) | StoreError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_error_response(err: &StoreError) -> Response {
    let status = store_error_status(err);
    warn!(code = err.error_code(), error = %err, "api: request rejected");
    let body = json!({ FRAME_CODE: err.error_code(), FRAME_DETAIL: err.to_string() });
    (status, Json(body)).into_response()
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
