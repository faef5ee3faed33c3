use super::*;
use crate::services::registry::ConnectionHandle;
use crate::state::test_helpers::{TEST_TOKEN, test_app_state};
use axum::body::to_bytes;
use axum::http::Request;
use tokio::sync::mpsc;

async fn extract_presenter(state: &AppState, token: Option<&str>) -> Result<Presenter, StatusCode> {
    let mut builder = Request::builder().uri("/api/stats");
    if let Some(token) = token {
        builder = builder.header(PRESENTER_HEADER, token);
    }
    let (mut parts, ()) = builder.body(()).unwrap().into_parts();
    Presenter::from_request_parts(&mut parts, state).await
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn answers(value: serde_json::Value) -> Answers {
    value.as_object().cloned().unwrap()
}

/// Register a presenter connection and return its queue with the connect
/// snapshot already consumed.
fn presenter_queue(state: &AppState) -> mpsc::Receiver<Frame> {
    let (tx, mut rx) = mpsc::channel(16);
    let handle = ConnectionHandle::new(tx);
    let id = handle.id;
    state.registry.add_connection(handle, "p1", "sp", None);
    assert!(state.registry.register_presenter(id));
    assert_eq!(rx.try_recv().unwrap().message, "current");
    rx
}

// =============================================================================
// Presenter extractor
// =============================================================================

#[tokio::test]
async fn presenter_header_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_app_state(dir.path());

    assert!(matches!(extract_presenter(&state, None).await, Err(StatusCode::UNAUTHORIZED)));
    assert!(matches!(extract_presenter(&state, Some("wrong")).await, Err(StatusCode::UNAUTHORIZED)));
    assert!(extract_presenter(&state, Some(TEST_TOKEN)).await.is_ok());
}

// =============================================================================
// Forms
// =============================================================================

#[tokio::test]
async fn form_submission_notifies_presenters() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_app_state(dir.path());
    let mut rx = presenter_queue(&state);

    let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "s1"));
    let body = FormSubmissionBody { session_id: None, answers: answers(json!({"q1": "A"})) };
    let response = submit_form(State(state.clone()), jar, Path("quiz1".into()), Json(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["session_id"], "s1");

    let frame = rx.try_recv().unwrap();
    assert_eq!(frame.message, "form");
    assert_eq!(frame.str_field("form"), Some("quiz1"));
    assert_eq!(frame.data["results"], json!({"q1": {"A": 1}}));

    let Json(tally) = form_results(Presenter, State(state.clone()), Path("quiz1".into())).await;
    assert_eq!(tally["q1"].get("A"), Some(&1));
}

#[tokio::test]
async fn form_submission_falls_back_to_body_session() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_app_state(dir.path());

    let body = FormSubmissionBody { session_id: Some("s2".into()), answers: answers(json!({"q1": "B"})) };
    let response = submit_form(State(state.clone()), CookieJar::new(), Path("quiz1".into()), Json(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(state.forms.submissions("quiz1")[0].session_id, "s2");
}

#[tokio::test]
async fn form_submission_without_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_app_state(dir.path());

    let body = FormSubmissionBody { session_id: None, answers: answers(json!({"q1": "A"})) };
    let response = submit_form(State(state.clone()), CookieJar::new(), Path("quiz1".into()), Json(body)).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["code"], "E_VALIDATION");
    assert!(state.forms.form_ids().is_empty());
}

// =============================================================================
// Feedback
// =============================================================================

#[tokio::test]
async fn feedback_is_recorded_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_app_state(dir.path());

    let jar = CookieJar::new().add(Cookie::new(CLIENT_COOKIE, "c1"));
    let body = FeedbackBody { client_id: None, rating: json!(4), comment: Some("  ".into()) };
    let response = submit_feedback(State(state.clone()), jar, Json(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["comment"], "no comment");

    let Json(report) = feedback_report(Presenter, State(state.clone())).await;
    assert_eq!(report.summary.count, 1);
    assert_eq!(report.entries[0].submitter, "c1");
}

#[tokio::test]
async fn invalid_ratings_are_unprocessable() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_app_state(dir.path());

    for rating in [json!(0), json!(6), json!(4.5), json!("five"), serde_json::Value::Null] {
        let body = FeedbackBody { client_id: Some("c1".into()), rating, comment: None };
        let response = submit_feedback(State(state.clone()), CookieJar::new(), Json(body)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
    assert_eq!(state.feedback.aggregate().count, 0);
}

// =============================================================================
// Aggregates
// =============================================================================

#[tokio::test]
async fn stats_and_activity_reflect_stores() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_app_state(dir.path());
    state.stats.record_view(1, "s1", None);

    let Json(summary) = stats(Presenter, State(state.clone())).await;
    assert_eq!(summary.total_views, 1);

    let Json(counts) = activity(Presenter, State(state.clone()), Path(3)).await;
    assert_eq!(counts, ActivitySummary::default());
}

#[test]
fn store_errors_map_to_status() {
    assert_eq!(
        store_error_status(&StoreError::Validation("bad".into())),
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
        store_error_status(&StoreError::Io(std::io::Error::other("disk"))),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
