//! Forms service: audience answers to in-slide polls and quizzes.
//!
//! Every submission is appended; a session may submit the same form many
//! times. The tally counts each session's latest submission only, so a
//! changed answer moves the vote instead of adding one.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::persistence::{Durable, Exportable, StoreError};

// =============================================================================
// TYPES
// =============================================================================

/// Question id -> answer as submitted (string, number, bool, or array of those).
pub type Answers = serde_json::Map<String, serde_json::Value>;

/// Question id -> answer text -> count.
pub type FormTally = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub session_id: String,
    pub answers: Answers,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

/// `forms.json`: submissions keyed by form id, in arrival order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormsDoc {
    #[serde(default)]
    pub forms: BTreeMap<String, Vec<Submission>>,
}

// =============================================================================
// STORE
// =============================================================================

pub struct ResponseStore {
    doc: Durable<FormsDoc>,
}

impl ResponseStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self { doc: Durable::open("forms", path) }
    }

    /// Append one submission.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty form id, empty session id, or a
    /// submission with no answers.
    pub fn record(&self, form_id: &str, session_id: &str, answers: Answers) -> Result<Submission, StoreError> {
        if form_id.trim().is_empty() {
            return Err(StoreError::Validation("form id required".into()));
        }
        if session_id.trim().is_empty() {
            return Err(StoreError::Validation("session id required".into()));
        }
        if answers.is_empty() {
            return Err(StoreError::Validation("at least one answer required".into()));
        }

        let submission = Submission {
            session_id: session_id.to_owned(),
            answers,
            submitted_at: OffsetDateTime::now_utc(),
        };
        self.doc.write(|doc| {
            doc.forms
                .entry(form_id.to_owned())
                .or_default()
                .push(submission.clone());
        });
        Ok(submission)
    }

    /// Tally answers for one form. Unknown forms tally empty.
    #[must_use]
    pub fn aggregate(&self, form_id: &str) -> FormTally {
        self.doc.read(|doc| doc.forms.get(form_id).map(|s| tally(s)).unwrap_or_default())
    }

    #[must_use]
    pub fn form_ids(&self) -> Vec<String> {
        self.doc.read(|doc| doc.forms.keys().cloned().collect())
    }

    #[must_use]
    pub fn submissions(&self, form_id: &str) -> Vec<Submission> {
        self.doc.read(|doc| doc.forms.get(form_id).cloned().unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns the I/O or serialization failure.
    pub fn export(&self) -> Result<(), StoreError> {
        self.doc.export()
    }

    pub fn reload(&self) {
        self.doc.reload();
    }
}

impl Exportable for ResponseStore {
    fn label(&self) -> &'static str {
        self.doc.label()
    }

    fn is_dirty(&self) -> bool {
        self.doc.is_dirty()
    }

    fn export(&self) -> Result<(), StoreError> {
        self.doc.export()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn tally(submissions: &[Submission]) -> FormTally {
    let mut latest: BTreeMap<&str, &Submission> = BTreeMap::new();
    for submission in submissions {
        latest.insert(&submission.session_id, submission);
    }

    let mut out = FormTally::new();
    for submission in latest.values() {
        for (question, answer) in &submission.answers {
            let counts = out.entry(question.clone()).or_default();
            match answer {
                serde_json::Value::Array(choices) => {
                    for choice in choices {
                        *counts.entry(answer_text(choice)).or_default() += 1;
                    }
                }
                other => *counts.entry(answer_text(other)).or_default() += 1,
            }
        }
    }
    out
}

fn answer_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "forms_test.rs"]
mod tests;
