//! Frame: the wire envelope for every live-channel message.
//!
//! ARCHITECTURE
//! ============
//! Browsers and the server exchange flat JSON objects of the form
//! `{"message": <type>, ...fields}`. The registry routes on `message` and
//! forwards the remaining fields verbatim for relay types, so the payload is
//! kept as an untyped map rather than a per-type struct.
//!
//! DESIGN
//! ======
//! - Flat data: `data` is flattened into the top-level object on the wire.
//! - Typed accessors (`u32_field`, `str_field`, ...) do the lenient parsing
//!   handlers need; numeric fields also accept numeric strings.
//! - Error replies are ordinary frames with `message = "error"`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Message type of error replies.
pub const ERROR_MESSAGE: &str = "error";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for human-readable error detail.
pub const FRAME_DETAIL: &str = "detail";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// One message on the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Message type, e.g. `update`, `current`, `reload`.
    pub message: String,
    #[serde(flatten)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for structured error frames and HTTP error bodies.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Frame {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), data: Data::new() }
    }

    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the text is not an object with a string
    /// `message` field.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `{"message":"current","current":slide,"increment":increment}`.
    #[must_use]
    pub fn current(slide: u32, increment: u32) -> Self {
        Self::new("current")
            .with_data("current", slide)
            .with_data("increment", increment)
    }

    /// Structured error reply built from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::new(ERROR_MESSAGE)
            .with_data(FRAME_CODE, err.error_code())
            .with_data(FRAME_DETAIL, err.to_string())
    }

    /// Serialize for the socket.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if a payload value cannot be serialized.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(serde_json::Value::as_bool)
    }

    /// Integer field. Accepts JSON integers and integer strings (`"3"`).
    #[must_use]
    pub fn i64_field(&self, key: &str) -> Option<i64> {
        match self.data.get(key)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Non-negative integer field that fits a slide or increment number.
    #[must_use]
    pub fn u32_field(&self, key: &str) -> Option<u32> {
        self.i64_field(key).and_then(|n| u32::try_from(n).ok())
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
