use super::*;

// =============================================================================
// bytes_to_hex / generate_token
// =============================================================================

#[test]
fn bytes_to_hex_leading_zero() {
    assert_eq!(bytes_to_hex(&[0x0a, 0xff]), "0aff");
}

#[test]
fn generate_token_is_64_hex_chars() {
    let token = generate_token();
    assert_eq!(token.len(), 64);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn generate_token_two_calls_differ() {
    assert_ne!(generate_token(), generate_token());
}

// =============================================================================
// Presenter credential
// =============================================================================

#[test]
fn issue_is_idempotent() {
    let state = SessionState::new();
    let first = state.issue_presenter_credential();
    let second = state.issue_presenter_credential();
    assert_eq!(first, second);
}

#[test]
fn validate_before_issue_is_false() {
    let state = SessionState::new();
    assert!(!state.validate_credential("anything"));
    assert!(!state.validate_credential(""));
}

#[test]
fn validate_matches_only_active_token() {
    let state = SessionState::new();
    let token = state.issue_presenter_credential();
    assert!(state.validate_credential(&token));
    assert!(!state.validate_credential("wrong"));
    assert!(!state.validate_credential(""));
}

#[test]
fn configured_credential_is_returned_by_issue() {
    let state = SessionState::with_credential("secret");
    assert_eq!(state.issue_presenter_credential(), "secret");
    assert!(state.validate_credential("secret"));
}

#[test]
fn reset_replaces_token_and_master() {
    let state = SessionState::new();
    let old = state.issue_presenter_credential();
    assert!(state.register_master_presenter("client-a"));
    state.reset_credential();
    assert!(!state.validate_credential(&old));
    assert_eq!(state.master_presenter(), None);
    let new = state.issue_presenter_credential();
    assert_ne!(old, new);
}

// =============================================================================
// Master presenter
// =============================================================================

#[test]
fn master_presenter_first_writer_wins() {
    let state = SessionState::new();
    assert!(state.register_master_presenter("client-a"));
    assert!(!state.register_master_presenter("client-b"));
    assert!(state.register_master_presenter("client-a"));
    assert_eq!(state.master_presenter().as_deref(), Some("client-a"));
}

// =============================================================================
// Slide position / follow mode
// =============================================================================

#[test]
fn unknown_session_has_no_position() {
    let state = SessionState::new();
    assert_eq!(state.get_slide_position("nobody"), None);
}

#[test]
fn set_and_get_slide_position() {
    let state = SessionState::new();
    state.set_slide_position("s1", 4, 2);
    assert_eq!(
        state.get_slide_position("s1"),
        Some(SlidePosition { slide: 4, increment: 2, follow: false })
    );
}

#[test]
fn follow_mode_survives_position_updates() {
    let state = SessionState::new();
    state.set_follow_mode("s1", true);
    state.set_slide_position("s1", 9, 0);
    let position = state.get_slide_position("s1").unwrap();
    assert!(position.follow);
    assert_eq!(position.slide, 9);

    state.set_follow_mode("s1", false);
    assert!(!state.get_slide_position("s1").unwrap().follow);
}

#[test]
fn current_slide_provider_round_trip() {
    let state = SessionState::new();
    assert_eq!(state.current_slide(), CurrentSlide::default());
    state.set_current_slide("intro", 3, 1);
    assert_eq!(
        state.current_slide(),
        CurrentSlide { name: "intro".into(), slide: 3, increment: 1 }
    );
}
