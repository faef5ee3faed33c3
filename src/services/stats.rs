//! Stats service: slide views, audience questions, and pace signals.
//!
//! DESIGN
//! ======
//! Events are appended per session in arrival order, so a session's prior
//! view is always the last element of its `views`. The elapsed time on a view
//! is the time spent on the *previous* slide: zero for the session's first
//! view, or when the slide did not change.
//!
//! The aggregate is a pure function of the stored events, which makes an
//! export followed by a load reproduce it exactly.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::persistence::{Durable, Exportable, StoreError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub slide: u32,
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Milliseconds spent on `previous_slide` before this view.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_slide: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionEvent {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide: Option<u32>,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaceEvent {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide: Option<u32>,
    pub pace: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvents {
    #[serde(default)]
    pub views: Vec<ViewEvent>,
    #[serde(default)]
    pub questions: Vec<QuestionEvent>,
    #[serde(default)]
    pub pace: Vec<PaceEvent>,
}

/// `stats.json`: events keyed by session id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsDoc {
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionEvents>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlideSummary {
    pub views: u64,
    pub unique_sessions: u64,
    /// Total milliseconds sessions spent on this slide before moving on.
    pub time_spent_ms: u64,
    pub questions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub total_views: u64,
    pub unique_sessions: u64,
    pub total_questions: u64,
    pub slides: BTreeMap<u32, SlideSummary>,
    /// Count per pace value, e.g. `{"faster": 3, "slower": 1}`.
    pub pace: BTreeMap<String, u64>,
}

// =============================================================================
// STORE
// =============================================================================

pub struct StatsStore {
    doc: Durable<StatsDoc>,
}

impl StatsStore {
    /// Open `stats.json`, starting empty if it is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self { doc: Durable::open("stats", path) }
    }

    /// Append a view for `session_id`, computing elapsed time against the
    /// session's previous view.
    pub fn record_view(&self, slide: u32, session_id: &str, user_agent: Option<&str>) -> ViewEvent {
        self.record_view_at(slide, session_id, user_agent, OffsetDateTime::now_utc())
    }

    pub(crate) fn record_view_at(
        &self,
        slide: u32,
        session_id: &str,
        user_agent: Option<&str>,
        now: OffsetDateTime,
    ) -> ViewEvent {
        self.doc.write(|doc| {
            let events = doc.sessions.entry(session_id.to_owned()).or_default();
            let (elapsed_ms, previous_slide) = match events.views.last() {
                Some(prior) if prior.slide != slide => (elapsed_ms_between(prior.timestamp, now), Some(prior.slide)),
                _ => (0, None),
            };
            let event = ViewEvent {
                slide,
                session_id: session_id.to_owned(),
                timestamp: now,
                elapsed_ms,
                previous_slide,
                user_agent: user_agent.map(str::to_owned),
            };
            events.views.push(event.clone());
            event
        })
    }

    pub fn record_question(&self, id: &str, session_id: &str, slide: Option<u32>, text: &str) -> QuestionEvent {
        let event = QuestionEvent {
            id: id.to_owned(),
            session_id: session_id.to_owned(),
            slide,
            text: text.to_owned(),
            timestamp: OffsetDateTime::now_utc(),
        };
        self.doc.write(|doc| {
            doc.sessions
                .entry(session_id.to_owned())
                .or_default()
                .questions
                .push(event.clone());
        });
        event
    }

    pub fn record_pace(&self, session_id: &str, slide: Option<u32>, pace: &str) -> PaceEvent {
        let event = PaceEvent {
            session_id: session_id.to_owned(),
            slide,
            pace: pace.to_owned(),
            timestamp: OffsetDateTime::now_utc(),
        };
        self.doc.write(|doc| {
            doc.sessions
                .entry(session_id.to_owned())
                .or_default()
                .pace
                .push(event.clone());
        });
        event
    }

    /// All recorded views of one session, oldest first.
    #[must_use]
    pub fn session_views(&self, session_id: &str) -> Vec<ViewEvent> {
        self.doc
            .read(|doc| doc.sessions.get(session_id).map(|s| s.views.clone()))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn aggregate(&self) -> StatsSummary {
        self.doc.read(summarize)
    }

    /// Write `stats.json` atomically.
    ///
    /// # Errors
    ///
    /// Returns the I/O or serialization failure.
    pub fn export(&self) -> Result<(), StoreError> {
        self.doc.export()
    }

    /// Replace in-memory events with the snapshot on disk.
    pub fn reload(&self) {
        self.doc.reload();
    }
}

impl Exportable for StatsStore {
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

fn elapsed_ms_between(earlier: OffsetDateTime, later: OffsetDateTime) -> u64 {
    let millis = (later - earlier).whole_milliseconds();
    u64::try_from(millis).unwrap_or(0)
}

fn summarize(doc: &StatsDoc) -> StatsSummary {
    let mut summary = StatsSummary::default();
    let mut slide_sessions: BTreeMap<u32, BTreeSet<&str>> = BTreeMap::new();

    for (session_id, events) in &doc.sessions {
        if !events.views.is_empty() {
            summary.unique_sessions += 1;
        }

        for view in &events.views {
            summary.total_views += 1;
            summary.slides.entry(view.slide).or_default().views += 1;
            slide_sessions.entry(view.slide).or_default().insert(session_id);
            if let Some(previous) = view.previous_slide {
                summary.slides.entry(previous).or_default().time_spent_ms += view.elapsed_ms;
            }
        }

        for question in &events.questions {
            summary.total_questions += 1;
            if let Some(slide) = question.slide {
                summary.slides.entry(slide).or_default().questions += 1;
            }
        }

        for pace in &events.pace {
            *summary.pace.entry(pace.pace.clone()).or_default() += 1;
        }
    }

    for (slide, sessions) in slide_sessions {
        summary.slides.entry(slide).or_default().unique_sessions = sessions.len() as u64;
    }
    summary
}

#[cfg(test)]
#[path = "stats_test.rs"]
mod tests;
