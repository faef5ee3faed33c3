use super::*;
use crate::services::session::CurrentSlideProvider;

#[test]
fn stores_cover_every_durable_component() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let labels: Vec<&str> = state.stores().iter().map(|s| s.label()).collect();
    assert_eq!(labels, vec!["stats", "forms", "feedback"]);
}

#[test]
fn reload_targets_share_instances() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let targets = state.reload_targets();

    assert!(Arc::ptr_eq(&targets.cache, &state.cache));
    assert!(Arc::ptr_eq(&targets.registry, &state.registry));
    targets.reload.mark();
    assert!(state.reload.take());
}

#[test]
fn clones_share_session() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let clone = state.clone();
    clone.session.set_current_slide("deck", 7, 0);
    assert_eq!(state.session.current_slide().slide, 7);
    assert!(state.session.validate_credential(test_helpers::TEST_TOKEN));
}
