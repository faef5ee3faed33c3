use super::*;
use serde_json::json;

fn answers(value: serde_json::Value) -> Answers {
    value.as_object().cloned().expect("answers must be an object")
}

fn store_in(dir: &tempfile::TempDir) -> ResponseStore {
    ResponseStore::load(dir.path().join("forms.json"))
}

#[test]
fn two_sessions_same_answer_tally_two() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.record("quiz1", "s1", answers(json!({"q1": "A"}))).unwrap();
    store.record("quiz1", "s2", answers(json!({"q1": "A"}))).unwrap();

    let tally = store.aggregate("quiz1");
    assert_eq!(serde_json::to_value(&tally).unwrap(), json!({"q1": {"A": 2}}));
}

#[test]
fn resubmission_replaces_previous_answer() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.record("quiz1", "s1", answers(json!({"q1": "A"}))).unwrap();
    store.record("quiz1", "s1", answers(json!({"q1": "B"}))).unwrap();
    store.record("quiz1", "s2", answers(json!({"q1": "A"}))).unwrap();

    let tally = store.aggregate("quiz1");
    assert_eq!(tally["q1"].get("A"), Some(&1));
    assert_eq!(tally["q1"].get("B"), Some(&1));
    // Both submissions from s1 are kept.
    assert_eq!(store.submissions("quiz1").len(), 3);
}

#[test]
fn array_answers_count_each_choice() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.record("poll", "s1", answers(json!({"langs": ["rust", "go"], "years": 3}))).unwrap();
    store.record("poll", "s2", answers(json!({"langs": ["rust"], "years": 3}))).unwrap();

    let tally = store.aggregate("poll");
    assert_eq!(tally["langs"].get("rust"), Some(&2));
    assert_eq!(tally["langs"].get("go"), Some(&1));
    assert_eq!(tally["years"].get("3"), Some(&2));
}

#[test]
fn forms_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.record("a", "s1", answers(json!({"q": "x"}))).unwrap();
    store.record("b", "s1", answers(json!({"q": "y"}))).unwrap();

    assert_eq!(store.aggregate("a")["q"].get("x"), Some(&1));
    assert!(store.aggregate("a")["q"].get("y").is_none());
    assert_eq!(store.form_ids(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn unknown_form_tallies_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(store_in(&dir).aggregate("nope").is_empty());
}

#[test]
fn validation_rejects_without_recording() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    assert!(matches!(
        store.record("", "s1", answers(json!({"q": "x"}))),
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        store.record("quiz", " ", answers(json!({"q": "x"}))),
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(store.record("quiz", "s1", Answers::new()), Err(StoreError::Validation(_))));
    assert!(store.form_ids().is_empty());
}

#[test]
fn export_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.record("quiz1", "s1", answers(json!({"q1": "A", "q2": ["x", "y"]}))).unwrap();
    store.record("quiz1", "s2", answers(json!({"q1": "B"}))).unwrap();
    store.export().unwrap();

    let restored = store_in(&dir);
    assert_eq!(restored.aggregate("quiz1"), store.aggregate("quiz1"));
    assert_eq!(restored.submissions("quiz1"), store.submissions("quiz1"));
}

#[test]
fn reload_discards_unexported_submissions() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.record("quiz1", "s1", answers(json!({"q1": "A"}))).unwrap();
    store.export().unwrap();
    store.record("quiz1", "s2", answers(json!({"q1": "B"}))).unwrap();

    store.reload();
    assert_eq!(store.submissions("quiz1").len(), 1);
    assert_eq!(serde_json::to_value(store.aggregate("quiz1")).unwrap(), json!({"q1": {"A": 1}}));
}
