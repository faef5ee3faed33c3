//! Session state: presenter credential, current slide, per-session position.
//!
//! ARCHITECTURE
//! ============
//! One shared secret authorises presenter actions. It is issued once per
//! process (or supplied by configuration) and compared on every gated frame.
//! The first client to register with it becomes the master presenter.
//!
//! The presenter-driven "current slide" lives here too and is exposed to the
//! registry through the narrow [`CurrentSlideProvider`] trait, so the registry
//! never reaches into session internals.
//!
//! All operations take one short lock and never block.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

// =============================================================================
// TYPES
// =============================================================================

/// The slide the presenter is showing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CurrentSlide {
    /// Presentation name from the last `update`, empty before any.
    pub name: String,
    pub slide: u32,
    pub increment: u32,
}

/// Per-session position of one audience member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlidePosition {
    pub slide: u32,
    /// Sub-step within the slide.
    pub increment: u32,
    /// Whether this session tracks the presenter automatically.
    pub follow: bool,
}

/// Read/write access to the shared current slide.
pub trait CurrentSlideProvider: Send + Sync {
    fn current_slide(&self) -> CurrentSlide;

    fn set_current_slide(&self, name: &str, slide: u32, increment: u32);
}

struct SessionInner {
    presenter_token: Option<String>,
    master_presenter: Option<String>,
    current: CurrentSlide,
    positions: HashMap<String, SlidePosition>,
}

pub struct SessionState {
    inner: Mutex<SessionInner>,
}

// =============================================================================
// SESSION STATE
// =============================================================================

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                presenter_token: None,
                master_presenter: None,
                current: CurrentSlide::default(),
                positions: HashMap::new(),
            }),
        }
    }

    /// Start with an operator-supplied presenter secret.
    #[must_use]
    pub fn with_credential(token: impl Into<String>) -> Self {
        let state = Self::new();
        state.lock().presenter_token = Some(token.into());
        state
    }

    /// Return the presenter token, generating it on first call.
    pub fn issue_presenter_credential(&self) -> String {
        let mut inner = self.lock();
        if let Some(token) = &inner.presenter_token {
            return token.clone();
        }
        let token = generate_token();
        inner.presenter_token = Some(token.clone());
        info!("session: presenter credential issued");
        token
    }

    /// Compare a candidate against the active token. Always false before a
    /// token has been issued.
    #[must_use]
    pub fn validate_credential(&self, candidate: &str) -> bool {
        let inner = self.lock();
        let Some(token) = inner.presenter_token.as_deref() else {
            return false;
        };
        if candidate.is_empty() {
            return false;
        }
        // Digest comparison keeps the check independent of where the strings diverge.
        Sha256::digest(token.as_bytes()) == Sha256::digest(candidate.as_bytes())
    }

    /// Forget the token and master presenter. The next issue generates a new one.
    pub fn reset_credential(&self) {
        let mut inner = self.lock();
        inner.presenter_token = None;
        inner.master_presenter = None;
        info!("session: presenter credential reset");
    }

    /// Record the first presenter client. Returns true if `client_id` is the
    /// master presenter after the call.
    pub fn register_master_presenter(&self, client_id: &str) -> bool {
        let mut inner = self.lock();
        match &inner.master_presenter {
            Some(existing) => existing == client_id,
            None => {
                inner.master_presenter = Some(client_id.to_owned());
                info!(client_id, "session: master presenter registered");
                true
            }
        }
    }

    #[must_use]
    pub fn master_presenter(&self) -> Option<String> {
        self.lock().master_presenter.clone()
    }

    pub fn set_slide_position(&self, session_id: &str, slide: u32, increment: u32) {
        let mut inner = self.lock();
        let position = inner.positions.entry(session_id.to_owned()).or_default();
        position.slide = slide;
        position.increment = increment;
    }

    #[must_use]
    pub fn get_slide_position(&self, session_id: &str) -> Option<SlidePosition> {
        self.lock().positions.get(session_id).copied()
    }

    pub fn set_follow_mode(&self, session_id: &str, follow: bool) {
        let mut inner = self.lock();
        inner.positions.entry(session_id.to_owned()).or_default().follow = follow;
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentSlideProvider for SessionState {
    fn current_slide(&self) -> CurrentSlide {
        self.lock().current.clone()
    }

    fn set_current_slide(&self, name: &str, slide: u32, increment: u32) {
        let mut inner = self.lock();
        inner.current = CurrentSlide { name: name.to_owned(), slide, increment };
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
