//! Feedback service: 1 to 5 star ratings with an optional comment.
//!
//! Ratings outside `1..=5` are rejected and never stored. A blank comment is
//! stored as "no comment". The aggregate reflects each submitter's latest
//! rating.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::persistence::{Durable, Exportable, StoreError};

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;
pub const NO_COMMENT: &str = "no comment";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Uuid,
    pub submitter: String,
    pub rating: u8,
    pub comment: String,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

/// `feedback.json`: entries keyed by submitter (client id), in arrival order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackDoc {
    #[serde(default)]
    pub feedback: BTreeMap<String, Vec<FeedbackEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackSummary {
    pub count: u64,
    /// Arithmetic mean of the counted ratings; 0 when there are none.
    pub mean: f64,
    /// Rating value -> count, always carrying every value 1..=5.
    pub histogram: BTreeMap<u8, u64>,
}

// =============================================================================
// STORE
// =============================================================================

pub struct FeedbackStore {
    doc: Durable<FeedbackDoc>,
}

impl FeedbackStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self { doc: Durable::open("feedback", path) }
    }

    /// Validate and append one rating.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `rating` is outside `1..=5` or the submitter
    /// is empty; nothing is stored in that case.
    pub fn record(&self, submitter: &str, rating: i64, comment: Option<&str>) -> Result<FeedbackEntry, StoreError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(StoreError::Validation(format!(
                "rating must be an integer in {MIN_RATING}..={MAX_RATING}, got {rating}"
            )));
        }
        let Ok(rating) = u8::try_from(rating) else {
            return Err(StoreError::Validation(format!("rating out of range: {rating}")));
        };
        if submitter.trim().is_empty() {
            return Err(StoreError::Validation("submitter required".into()));
        }

        let comment = comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(NO_COMMENT);
        let entry = FeedbackEntry {
            id: Uuid::new_v4(),
            submitter: submitter.to_owned(),
            rating,
            comment: comment.to_owned(),
            submitted_at: OffsetDateTime::now_utc(),
        };
        self.doc.write(|doc| {
            doc.feedback
                .entry(submitter.to_owned())
                .or_default()
                .push(entry.clone());
        });
        Ok(entry)
    }

    #[must_use]
    pub fn aggregate(&self) -> FeedbackSummary {
        self.doc.read(summarize)
    }

    /// Latest entry per submitter, newest first.
    #[must_use]
    pub fn latest_entries(&self) -> Vec<FeedbackEntry> {
        let mut entries: Vec<FeedbackEntry> =
            self.doc.read(|doc| doc.feedback.values().filter_map(|e| e.last().cloned()).collect());
        entries.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        entries
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

impl Exportable for FeedbackStore {
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

#[allow(clippy::cast_precision_loss)]
fn summarize(doc: &FeedbackDoc) -> FeedbackSummary {
    let mut histogram: BTreeMap<u8, u64> = (1..=5).map(|r| (r, 0)).collect();
    let mut count = 0_u64;
    let mut total = 0_u64;

    for entry in doc.feedback.values().filter_map(|entries| entries.last()) {
        *histogram.entry(entry.rating).or_default() += 1;
        count += 1;
        total += u64::from(entry.rating);
    }

    let mean = if count == 0 { 0.0 } else { total as f64 / count as f64 };
    FeedbackSummary { count, mean, histogram }
}

#[cfg(test)]
#[path = "feedback_test.rs"]
mod tests;
