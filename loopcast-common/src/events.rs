//! Event types for the Loopcast event system
//!
//! Holds the persisted log event model, the session lifecycle state, and the
//! EventBus used to push changes to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::broadcast;

use crate::Error;

/// Streaming session lifecycle state
///
/// `Idle → Starting → Live → Stopping → Ended`, with `Failed` reachable
/// from `Starting` or `Live`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session has been started yet
    Idle,
    /// Session slot claimed, encoder not yet spawned
    Starting,
    /// Encoder running
    Live,
    /// Termination requested, waiting for the encoder to exit
    Stopping,
    /// Encoder exited normally or was stopped on request
    Ended,
    /// Encoder failed to spawn or exited unsuccessfully
    Failed,
}

impl SessionState {
    /// True while a session owns the encoder slot
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Live | SessionState::Stopping
        )
    }

    /// True once a session has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Live => "live",
            SessionState::Stopping => "stopping",
            SessionState::Ended => "ended",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Category of a persisted log event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogCategory {
    /// Session lifecycle messages
    Info,
    /// Significant lines from the encoder's output
    Ffmpeg,
    /// Spawn and runtime failures
    Error,
}

impl LogCategory {
    /// Value stored in the `log_type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Info => "INFO",
            LogCategory::Ffmpeg => "FFMPEG",
            LogCategory::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(LogCategory::Info),
            "FFMPEG" => Ok(LogCategory::Ffmpeg),
            "ERROR" => Ok(LogCategory::Error),
            other => Err(Error::InvalidInput(format!("Unknown log category: {}", other))),
        }
    }
}

/// One row of the streaming event log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEvent {
    /// Autoincrement row id
    pub id: i64,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Session the event belongs to
    pub session_id: String,
    pub category: LogCategory,
    pub message: String,
}

/// Events pushed to subscribers (SSE clients, tests)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Supervisor moved a session to a new lifecycle state
    SessionStateChanged {
        session_id: String,
        old_state: SessionState,
        new_state: SessionState,
        timestamp: DateTime<Utc>,
    },

    /// A log event was appended to the store
    LogAppended { event: LogEvent },
}

impl StreamEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::SessionStateChanged { .. } => "SessionStateChanged",
            StreamEvent::LogAppended { .. } => "LogAppended",
        }
    }
}

/// Broadcast bus for [`StreamEvent`]s
///
/// Events emitted before a subscriber joins are not replayed. Slow
/// subscribers lag and lose the oldest events rather than blocking emitters.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers reached
    ///
    /// Returns `Err` when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: StreamEvent,
    ) -> Result<usize, broadcast::error::SendError<StreamEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
