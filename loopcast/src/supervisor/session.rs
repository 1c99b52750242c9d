//! Session records exposed by the supervisor

use chrono::{DateTime, Utc};
use loopcast_common::events::{LogEvent, SessionState};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::playlist::{InputSources, MediaSelection};

/// Start request from the control surface
#[derive(Clone, Deserialize)]
pub struct StartRequest {
    pub stream_key: String,
    #[serde(default)]
    pub selection: MediaSelection,
}

impl StartRequest {
    pub fn rotation(stream_key: impl Into<String>) -> Self {
        Self {
            stream_key: stream_key.into(),
            selection: MediaSelection::Rotation,
        }
    }
}

impl fmt::Debug for StartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartRequest")
            .field("stream_key", &"****")
            .field("selection", &self.selection)
            .finish()
    }
}

/// Public view of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub pid: Option<u32>,
    /// Destination with the stream key masked
    pub target: String,
    pub selection: MediaSelection,
    /// Known once input descriptors are built
    pub inputs: Option<InputSources>,
}

impl SessionInfo {
    pub(super) fn new(target: String, selection: MediaSelection) -> Self {
        Self {
            session_id: new_session_id(),
            created_at: loopcast_common::time::now(),
            pid: None,
            target,
            selection,
            inputs: None,
        }
    }
}

/// Accepted start
#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub state: SessionState,
    #[serde(flatten)]
    pub session: SessionInfo,
}

/// Snapshot returned by `Supervisor::status`
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: SessionState,
    /// Current or most recent session
    pub session: Option<SessionInfo>,
    /// Newest first
    pub recent_events: Vec<LogEvent>,
}

fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionInfo::new("rtmp://x/****".into(), MediaSelection::Rotation);
        let b = SessionInfo::new("rtmp://x/****".into(), MediaSelection::Rotation);
        assert_ne!(a.session_id, b.session_id);
        assert!(a.session_id.starts_with("session-"));
    }

    #[test]
    fn test_start_request_debug_hides_key() {
        let request: StartRequest =
            serde_json::from_str(r#"{"stream_key":"abcd-1234"}"#).unwrap();
        assert_eq!(request.selection, MediaSelection::Rotation);
        assert!(!format!("{:?}", request).contains("abcd-1234"));
    }
}
