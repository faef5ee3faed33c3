use super::*;
use serde_json::json;

#[test]
fn parse_flattens_fields() {
    let frame = Frame::parse(r#"{"message":"update","name":"intro","slide":3,"increment":0}"#).unwrap();
    assert_eq!(frame.message, "update");
    assert_eq!(frame.str_field("name"), Some("intro"));
    assert_eq!(frame.u32_field("slide"), Some(3));
    assert_eq!(frame.u32_field("increment"), Some(0));
    assert!(!frame.data.contains_key("message"));
}

#[test]
fn parse_rejects_missing_message() {
    assert!(Frame::parse(r#"{"slide":3}"#).is_err());
}

#[test]
fn parse_rejects_non_string_message() {
    assert!(Frame::parse(r#"{"message":5}"#).is_err());
}

#[test]
fn parse_rejects_garbage() {
    assert!(Frame::parse("not json").is_err());
    assert!(Frame::parse("[1,2,3]").is_err());
}

#[test]
fn current_serializes_flat() {
    let value = serde_json::to_value(Frame::current(3, 0)).unwrap();
    assert_eq!(value, json!({"message": "current", "current": 3, "increment": 0}));
}

#[test]
fn numeric_fields_accept_strings() {
    let frame = Frame::new("update").with_data("slide", "7").with_data("increment", " 2 ");
    assert_eq!(frame.u32_field("slide"), Some(7));
    assert_eq!(frame.u32_field("increment"), Some(2));
}

#[test]
fn u32_field_rejects_negative_and_fractional() {
    let frame = Frame::new("update").with_data("a", -1).with_data("b", 1.5).with_data("c", true);
    assert_eq!(frame.u32_field("a"), None);
    assert_eq!(frame.u32_field("b"), None);
    assert_eq!(frame.u32_field("c"), None);
    assert_eq!(frame.u32_field("missing"), None);
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("not allowed")]
    struct Denied;

    impl ErrorCode for Denied {
        fn error_code(&self) -> &'static str {
            "E_DENIED"
        }
    }

    let frame = Frame::error_from(&Denied);
    assert_eq!(frame.message, ERROR_MESSAGE);
    assert_eq!(frame.str_field(FRAME_CODE), Some("E_DENIED"));
    assert_eq!(frame.str_field(FRAME_DETAIL), Some("not allowed"));
}

#[test]
fn extra_fields_survive_round_trip() {
    let text = r#"{"message":"annotation","path":[[1,2],[3,4]],"color":"red"}"#;
    let frame = Frame::parse(text).unwrap();
    let back: serde_json::Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
    assert_eq!(back, serde_json::from_str::<serde_json::Value>(text).unwrap());
}
