//! Connection registry: live channels, presenter membership, and routing.
//!
//! ARCHITECTURE
//! ============
//! The upgrade layer hands every accepted socket to [`ConnectionRegistry::add_connection`]
//! together with an outbound channel; a per-connection writer task drains that
//! channel to the socket. Inbound text goes to [`ConnectionRegistry::handle_message`],
//! which classifies the frame and fans it out with one of the broadcast
//! primitives. The watcher uses the same primitives for reload notices.
//!
//! CONCURRENCY
//! ===========
//! Two locks, always taken in this order:
//! - `handler` serializes `handle_message` (and connection setup) so two
//!   `update` frames are applied and broadcast in arrival order.
//! - `state` guards the connection table, presenter set, and activity map.
//!   Broadcast recipients are copied out under it and the lock is released
//!   before any send.
//!
//! Calls into session, stats, and feedback are made with `state` released.
//! Sends use `try_send`, so a slow client drops frames instead of stalling
//! everyone else; a failed send is logged and never removes the connection.
//! Removal only happens when the transport reports a close.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{ErrorCode, Frame};
use crate::services::feedback::FeedbackStore;
use crate::services::persistence::StoreError;
use crate::services::session::{CurrentSlideProvider, SessionState};
use crate::services::stats::StatsStore;

/// Opaque connection handle id.
pub type ConnId = Uuid;

/// Cookie naming the session a view is attributed to.
pub const SESSION_COOKIE: &str = "session_id";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),
    #[error("presenter credential required")]
    NotPresenter,
    #[error("invalid presenter credential")]
    InvalidCredential,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for MessageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "E_PARSE",
            Self::MissingField(_) => "E_MISSING_FIELD",
            Self::NotPresenter => "E_NOT_PRESENTER",
            Self::InvalidCredential => "E_INVALID_CREDENTIAL",
            Self::Store(e) => e.error_code(),
        }
    }
}

/// Sending side of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnId,
    tx: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { id: Uuid::new_v4(), tx }
    }

    fn deliver(&self, frame: &Frame) -> bool {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn = %self.id, message = %frame.message, "registry: outbound queue full; dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn = %self.id, message = %frame.message, "registry: outbound queue closed; dropping frame");
                false
            }
        }
    }
}

/// Lifecycle of a registered connection. `Closed` is represented by removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Registered, slide snapshot not yet queued. Excluded from broadcasts.
    Connecting,
    Open,
}

struct Connection {
    handle: ConnectionHandle,
    client_id: String,
    session_id: String,
    is_presenter: bool,
    phase: ConnectionPhase,
    connected_at: OffsetDateTime,
    remote_addr: Option<SocketAddr>,
}

/// Read-only view of a connection for callers outside the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnId,
    pub client_id: String,
    pub session_id: String,
    pub is_presenter: bool,
    pub phase: ConnectionPhase,
    pub connected_at: OffsetDateTime,
    pub remote_addr: Option<SocketAddr>,
}

/// Request metadata observed by the upgrade layer.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub cookies: HashMap<String, String>,
    pub user_agent: Option<String>,
}

/// Activity counts for one slide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ActivitySummary {
    /// Audience clients that reported any state for the slide.
    pub reporting: u64,
    /// Of those, clients whose latest state is complete.
    pub completed: u64,
}

#[derive(Debug, Clone, Copy)]
enum Audience {
    All,
    Presenters,
    NonPresenters,
}

/// Sender attributes copied out of the table for one frame.
struct Sender {
    id: ConnId,
    client_id: String,
    session_id: String,
    is_presenter: bool,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnId, Connection>,
    presenters: HashSet<ConnId>,
    /// slide -> client id -> complete.
    activity: HashMap<u32, HashMap<String, bool>>,
}

pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
    handler: Mutex<()>,
    session: Arc<SessionState>,
    slides: Arc<dyn CurrentSlideProvider>,
    stats: Arc<StatsStore>,
    feedback: Arc<FeedbackStore>,
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

impl ConnectionRegistry {
    #[must_use]
    pub fn new(
        session: Arc<SessionState>,
        slides: Arc<dyn CurrentSlideProvider>,
        stats: Arc<StatsStore>,
        feedback: Arc<FeedbackStore>,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            handler: Mutex::new(()),
            session,
            slides,
            stats,
            feedback,
        }
    }

    /// Register a connection and queue the current-slide snapshot to it.
    /// Re-adding a known handle overwrites the previous record.
    pub fn add_connection(
        &self,
        handle: ConnectionHandle,
        client_id: &str,
        session_id: &str,
        remote_addr: Option<SocketAddr>,
    ) {
        // Holding the handler lock keeps an `update` from slipping between the
        // snapshot read and the snapshot send.
        let _order = self.lock_handler();
        let conn_id = handle.id;

        {
            let mut state = self.lock_state();
            state.presenters.remove(&conn_id);
            state.connections.insert(
                conn_id,
                Connection {
                    handle: handle.clone(),
                    client_id: client_id.to_owned(),
                    session_id: session_id.to_owned(),
                    is_presenter: false,
                    phase: ConnectionPhase::Connecting,
                    connected_at: OffsetDateTime::now_utc(),
                    remote_addr,
                },
            );
        }

        let current = self.slides.current_slide();
        handle.deliver(&Frame::current(current.slide, current.increment));

        let total = {
            let mut state = self.lock_state();
            if let Some(conn) = state.connections.get_mut(&conn_id) {
                conn.phase = ConnectionPhase::Open;
            }
            state.connections.len()
        };
        info!(conn = %conn_id, client_id, session_id, remote = ?remote_addr, total, "registry: connection added");
    }

    /// Forget a connection. Safe to call repeatedly or mid-message.
    pub fn remove_connection(&self, conn_id: ConnId) -> bool {
        let mut state = self.lock_state();
        state.presenters.remove(&conn_id);
        let removed = state.connections.remove(&conn_id).is_some();
        if removed {
            info!(conn = %conn_id, remaining = state.connections.len(), "registry: connection removed");
        }
        removed
    }

    /// Promote a known connection to presenter. False for unknown handles.
    pub fn register_presenter(&self, conn_id: ConnId) -> bool {
        let mut state = self.lock_state();
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            return false;
        };
        conn.is_presenter = true;
        let client_id = conn.client_id.clone();
        state.presenters.insert(conn_id);
        info!(conn = %conn_id, client_id = %client_id, presenters = state.presenters.len(), "registry: presenter registered");
        true
    }

    #[must_use]
    pub fn is_presenter(&self, conn_id: ConnId) -> bool {
        self.lock_state().presenters.contains(&conn_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock_state().connections.len()
    }

    #[must_use]
    pub fn presenter_count(&self) -> usize {
        self.lock_state().presenters.len()
    }

    #[must_use]
    pub fn connection(&self, conn_id: ConnId) -> Option<ConnectionInfo> {
        self.lock_state().connections.get(&conn_id).map(|conn| ConnectionInfo {
            id: conn.handle.id,
            client_id: conn.client_id.clone(),
            session_id: conn.session_id.clone(),
            is_presenter: conn.is_presenter,
            phase: conn.phase,
            connected_at: conn.connected_at,
            remote_addr: conn.remote_addr,
        })
    }

    #[must_use]
    pub fn activity_summary(&self, slide: u32) -> ActivitySummary {
        let state = self.lock_state();
        let Some(records) = state.activity.get(&slide) else {
            return ActivitySummary::default();
        };
        ActivitySummary {
            reporting: records.len() as u64,
            completed: records.values().filter(|done| **done).count() as u64,
        }
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

impl ConnectionRegistry {
    /// Send to every open connection. Returns the number of queued deliveries.
    pub fn broadcast_to_all(&self, frame: &Frame) -> usize {
        self.broadcast(Audience::All, frame)
    }

    pub fn broadcast_to_presenters(&self, frame: &Frame) -> usize {
        self.broadcast(Audience::Presenters, frame)
    }

    pub fn broadcast_to_audience(&self, frame: &Frame) -> usize {
        self.broadcast(Audience::NonPresenters, frame)
    }

    /// Send to one connection. False if unknown or its queue rejected the frame.
    pub fn send_to(&self, conn_id: ConnId, frame: &Frame) -> bool {
        let handle = self.lock_state().connections.get(&conn_id).map(|c| c.handle.clone());
        match handle {
            Some(handle) => handle.deliver(frame),
            None => {
                debug!(conn = %conn_id, message = %frame.message, "registry: send to unknown connection");
                false
            }
        }
    }

    fn broadcast(&self, audience: Audience, frame: &Frame) -> usize {
        // PHASE: SNAPSHOT RECIPIENTS
        let recipients: Vec<ConnectionHandle> = {
            let state = self.lock_state();
            state
                .connections
                .values()
                .filter(|conn| conn.phase == ConnectionPhase::Open)
                .filter(|conn| match audience {
                    Audience::All => true,
                    Audience::Presenters => state.presenters.contains(&conn.handle.id),
                    Audience::NonPresenters => !state.presenters.contains(&conn.handle.id),
                })
                .map(|conn| conn.handle.clone())
                .collect()
        };

        // PHASE: SEND WITHOUT THE LOCK
        let delivered = recipients.iter().filter(|handle| handle.deliver(frame)).count();
        debug!(
            message = %frame.message,
            ?audience,
            recipients = recipients.len(),
            delivered,
            "registry: broadcast"
        );
        delivered
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

impl ConnectionRegistry {
    /// Parse and route one inbound frame. Never fails outward: malformed
    /// frames are logged and dropped, rejected operations are answered to
    /// the sender only.
    pub fn handle_message(&self, conn_id: ConnId, raw: &str, ctx: &MessageContext) {
        let _order = self.lock_handler();

        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                let err = MessageError::from(e);
                warn!(conn = %conn_id, code = err.error_code(), error = %err, "registry: dropping frame");
                return;
            }
        };

        let Some(sender) = self.sender(conn_id) else {
            debug!(conn = %conn_id, message = %frame.message, "registry: frame from unknown connection");
            return;
        };
        debug!(conn = %conn_id, message = %frame.message, presenter = sender.is_presenter, "registry: recv frame");

        let result = match frame.message.as_str() {
            "update" => self.on_update(&sender, &frame),
            "register" => self.on_register(&sender, &frame),
            "track" => self.on_track(&sender, &frame, ctx),
            "position" => {
                self.on_position(&sender);
                Ok(())
            }
            "activity" => self.on_activity(&sender, &frame),
            "pace" | "question" | "cancel" => self.on_audience_signal(&sender, &frame, ctx),
            "complete" | "answerkey" => {
                self.broadcast_to_all(&frame);
                Ok(())
            }
            "annotation" | "annotationConfig" => {
                self.broadcast_to_audience(&frame);
                Ok(())
            }
            "feedback" => self.on_feedback(&sender, &frame),
            "follow" => self.on_follow(&sender, &frame),
            other => {
                debug!(conn = %conn_id, message = other, "registry: ignoring unrecognized frame");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(conn = %conn_id, client_id = %sender.client_id, code = e.error_code(), error = %e, "registry: frame rejected");
            self.send_to(conn_id, &Frame::error_from(&e));
        }
    }

    fn on_update(&self, sender: &Sender, frame: &Frame) -> Result<(), MessageError> {
        let mut is_presenter = sender.is_presenter;
        if !is_presenter {
            if let Some(token) = frame.str_field("token") {
                if !self.session.validate_credential(token) {
                    return Err(MessageError::InvalidCredential);
                }
                is_presenter = self.register_presenter(sender.id);
                if is_presenter {
                    self.session.register_master_presenter(&sender.client_id);
                }
            }
        }
        if !is_presenter {
            return Err(MessageError::NotPresenter);
        }

        let slide = frame.u32_field("slide").ok_or(MessageError::MissingField("slide"))?;
        let increment = frame.u32_field("increment").unwrap_or(0);
        let name = frame.str_field("name").unwrap_or_default();

        self.slides.set_current_slide(name, slide, increment);
        self.session.set_slide_position(&sender.session_id, slide, increment);
        info!(conn = %sender.id, name, slide, increment, "registry: slide update");
        self.broadcast_to_all(&Frame::current(slide, increment));
        Ok(())
    }

    fn on_register(&self, sender: &Sender, frame: &Frame) -> Result<(), MessageError> {
        let token = frame.str_field("token").ok_or(MessageError::MissingField("token"))?;
        if !self.session.validate_credential(token) {
            return Err(MessageError::InvalidCredential);
        }
        if !self.register_presenter(sender.id) {
            // Closed while this frame was queued.
            return Ok(());
        }
        let master = self.session.register_master_presenter(&sender.client_id);
        self.send_to(sender.id, &Frame::new("registered").with_data("master", master));
        Ok(())
    }

    fn on_track(&self, sender: &Sender, frame: &Frame, ctx: &MessageContext) -> Result<(), MessageError> {
        let slide = frame.u32_field("slide").ok_or(MessageError::MissingField("slide"))?;
        let increment = frame.u32_field("increment").unwrap_or(0);
        let session_id = ctx
            .cookies
            .get(SESSION_COOKIE)
            .filter(|s| !s.is_empty())
            .map_or(sender.session_id.as_str(), String::as_str);

        let event = self.stats.record_view(slide, session_id, ctx.user_agent.as_deref());
        self.session.set_slide_position(session_id, slide, increment);
        debug!(session_id, slide, elapsed_ms = event.elapsed_ms, "registry: view tracked");
        Ok(())
    }

    fn on_position(&self, sender: &Sender) {
        let current = self.slides.current_slide();
        self.send_to(sender.id, &Frame::current(current.slide, current.increment));
    }

    fn on_activity(&self, sender: &Sender, frame: &Frame) -> Result<(), MessageError> {
        if sender.is_presenter {
            debug!(conn = %sender.id, "registry: ignoring activity from presenter");
            return Ok(());
        }
        let slide = frame.u32_field("slide").ok_or(MessageError::MissingField("slide"))?;
        let status = frame.bool_field("status").ok_or(MessageError::MissingField("status"))?;

        let count = {
            let mut state = self.lock_state();
            let records = state.activity.entry(slide).or_default();
            records.insert(sender.client_id.clone(), status);
            records.len() as u64
        };

        if self.slides.current_slide().slide == slide {
            self.broadcast_to_presenters(&Frame::new("activity").with_data("count", count));
        }
        Ok(())
    }

    fn on_audience_signal(&self, sender: &Sender, frame: &Frame, ctx: &MessageContext) -> Result<(), MessageError> {
        let correlation_id = Uuid::new_v4().to_string();
        let slide = frame
            .u32_field("slide")
            .unwrap_or_else(|| self.slides.current_slide().slide);
        let session_id = ctx
            .cookies
            .get(SESSION_COOKIE)
            .filter(|s| !s.is_empty())
            .map_or(sender.session_id.as_str(), String::as_str);

        match frame.message.as_str() {
            "question" => {
                let text = frame
                    .str_field("question")
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or(MessageError::MissingField("question"))?;
                self.stats.record_question(&correlation_id, session_id, Some(slide), text);
            }
            "pace" => {
                let pace = frame
                    .str_field("pace")
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or(MessageError::MissingField("pace"))?;
                self.stats.record_pace(session_id, Some(slide), pace);
            }
            _ => {}
        }

        self.broadcast_to_presenters(&frame.clone().with_data("id", correlation_id));
        Ok(())
    }

    fn on_feedback(&self, sender: &Sender, frame: &Frame) -> Result<(), MessageError> {
        let rating = frame
            .i64_field("rating")
            .ok_or_else(|| StoreError::Validation("rating must be an integer".into()))?;
        let entry = self.feedback.record(&sender.client_id, rating, frame.str_field("comment"))?;
        info!(conn = %sender.id, rating = entry.rating, "registry: feedback recorded");
        Ok(())
    }

    fn on_follow(&self, sender: &Sender, frame: &Frame) -> Result<(), MessageError> {
        let enabled = frame.bool_field("enabled").ok_or(MessageError::MissingField("enabled"))?;
        self.session.set_follow_mode(&sender.session_id, enabled);
        self.send_to(sender.id, &Frame::new("follow").with_data("enabled", enabled));
        Ok(())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

impl ConnectionRegistry {
    fn sender(&self, conn_id: ConnId) -> Option<Sender> {
        let state = self.lock_state();
        let conn = state.connections.get(&conn_id)?;
        Some(Sender {
            id: conn_id,
            client_id: conn.client_id.clone(),
            session_id: conn.session_id.clone(),
            is_presenter: conn.is_presenter,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handler(&self) -> MutexGuard<'_, ()> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
