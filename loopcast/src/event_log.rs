//! Event Log Store
//!
//! Append-only, per-session event log backed by the `streaming_logs` table.
//! Rows are never updated or deleted here.

use loopcast_common::events::{EventBus, LogCategory, LogEvent, StreamEvent};
use loopcast_common::time;
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::Result;

/// Handle to the event log; cheap to clone
#[derive(Clone)]
pub struct EventLogStore {
    pool: SqlitePool,
    bus: Option<EventBus>,
}

impl EventLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, bus: None }
    }

    /// Also publish every appended event on `bus`
    pub fn with_event_bus(pool: SqlitePool, bus: EventBus) -> Self {
        Self {
            pool,
            bus: Some(bus),
        }
    }

    /// Append one event and return the stored row
    pub async fn append(
        &self,
        session_id: &str,
        category: LogCategory,
        message: &str,
    ) -> Result<LogEvent> {
        let timestamp = time::now();

        let id = sqlx::query(
            "INSERT INTO streaming_logs (timestamp, session_id, log_type, message) VALUES (?, ?, ?, ?)",
        )
        .bind(time::to_storage_string(&timestamp))
        .bind(session_id)
        .bind(category.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let event = LogEvent {
            id,
            timestamp,
            session_id: session_id.to_string(),
            category,
            message: message.to_string(),
        };

        if let Some(bus) = &self.bus {
            bus.emit_lossy(StreamEvent::LogAppended {
                event: event.clone(),
            });
        }

        Ok(event)
    }

    /// Append, reporting a storage failure through tracing instead of failing
    ///
    /// Used on the streaming path: losing a log line must never disturb the
    /// stream itself.
    pub async fn record(&self, session_id: &str, category: LogCategory, message: &str) {
        if let Err(e) = self.append(session_id, category, message).await {
            warn!(
                session_id = %session_id,
                category = %category,
                error = %e,
                "Failed to append event to log"
            );
        }
    }

    /// The `limit` most recent events of one session, newest first
    pub async fn recent(&self, session_id: &str, limit: u32) -> Result<Vec<LogEvent>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, String)>(
            r#"
            SELECT id, timestamp, session_id, log_type, message
            FROM streaming_logs
            WHERE session_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: (i64, String, String, String, String)) -> Result<LogEvent> {
    let (id, timestamp, session_id, log_type, message) = row;

    let timestamp = time::parse_storage_string(&timestamp).ok_or_else(|| {
        loopcast_common::Error::Internal(format!("Invalid timestamp in row {}: {}", id, timestamp))
    })?;
    let category = log_type.parse::<LogCategory>()?;

    Ok(LogEvent {
        id,
        timestamp,
        session_id,
        category,
        message,
    })
}
