//! Content compiler boundary.
//!
//! The server treats slide rendering as an opaque `compile(locale) -> html`
//! call whose result is cached per locale. [`FileCompiler`] serves
//! pre-rendered HTML from the content directory; other renderers plug in
//! behind [`ContentCompiler`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::frame::ErrorCode;

/// Longest accepted locale tag (BCP 47 tags stay well below this).
const MAX_LOCALE_LEN: usize = 35;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("invalid locale: {0:?}")]
    InvalidLocale(String),
    #[error("no content for locale {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ErrorCode for ContentError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidLocale(_) => "E_INVALID_LOCALE",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Io(_) => "E_IO",
        }
    }
}

/// Turns content sources into one HTML document for a locale. Called from
/// the blocking pool; implementations may do file I/O.
pub trait ContentCompiler: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ContentError`] if the locale is unusable or no content exists.
    fn compile(&self, locale: &str) -> Result<String, ContentError>;
}

/// Reads `<root>/<locale>/index.html`, falling back to `<root>/index.html`.
pub struct FileCompiler {
    root: PathBuf,
}

impl FileCompiler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ContentCompiler for FileCompiler {
    fn compile(&self, locale: &str) -> Result<String, ContentError> {
        if !is_valid_locale(locale) {
            return Err(ContentError::InvalidLocale(locale.to_owned()));
        }

        let localized = self.root.join(locale).join("index.html");
        if let Some(html) = read_if_exists(&localized)? {
            debug!(path = %localized.display(), "content: compiled");
            return Ok(html);
        }

        let fallback = self.root.join("index.html");
        match read_if_exists(&fallback)? {
            Some(html) => {
                debug!(path = %fallback.display(), locale, "content: compiled from fallback");
                Ok(html)
            }
            None => Err(ContentError::NotFound(locale.to_owned())),
        }
    }
}

fn read_if_exists(path: &Path) -> Result<Option<String>, ContentError> {
    match std::fs::read_to_string(path) {
        Ok(html) => Ok(Some(html)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Locale tags become path segments, so only `[A-Za-z0-9_-]` is accepted.
fn is_valid_locale(locale: &str) -> bool {
    !locale.is_empty()
        && locale.len() <= MAX_LOCALE_LEN
        && locale.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
#[path = "content_test.rs"]
mod tests;
