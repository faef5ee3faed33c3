use super::*;
use crate::state::test_helpers::test_app_state;
use axum::body::to_bytes;

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn write_slides(dir: &std::path::Path, html: &str) {
    let slides = dir.join("slides");
    std::fs::create_dir_all(&slides).unwrap();
    std::fs::write(slides.join("index.html"), html).unwrap();
}

fn query(locale: Option<&str>) -> Query<ContentQuery> {
    Query(ContentQuery { locale: locale.map(str::to_owned) })
}

#[tokio::test]
async fn serves_compiled_content_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    write_slides(dir.path(), "<h1>v1</h1>");
    let state = test_app_state(dir.path());

    let response = index(State(state.clone()), query(None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<h1>v1</h1>");
    assert_eq!(state.cache.get("en").as_deref(), Some("<h1>v1</h1>"));

    // Without a reload the cached copy is served.
    write_slides(dir.path(), "<h1>v2</h1>");
    let response = index(State(state.clone()), query(Some("en"))).await;
    assert_eq!(body_text(response).await, "<h1>v1</h1>");
}

#[tokio::test]
async fn reload_flag_forces_recompile_once() {
    let dir = tempfile::tempdir().unwrap();
    write_slides(dir.path(), "<h1>v1</h1>");
    let state = test_app_state(dir.path());
    index(State(state.clone()), query(None)).await;

    write_slides(dir.path(), "<h1>v2</h1>");
    state.reload.mark();
    let response = index(State(state.clone()), query(None)).await;
    assert_eq!(body_text(response).await, "<h1>v2</h1>");
    assert!(!state.reload.is_set());
}

#[tokio::test]
async fn compile_errors_map_to_status() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_app_state(dir.path());

    let response = index(State(state.clone()), query(Some("en"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = index(State(state.clone()), query(Some("../etc"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.cache.is_empty());
}
