//! Session Supervisor
//!
//! Owns at most one streaming session at a time and the encoder process
//! behind it. State machine:
//!
//! ```text
//! Idle -> Starting -> Live -> Stopping -> Ended
//!            |          |
//!            +-> Failed <+
//! ```
//!
//! Control calls hold the state mutex only while reading or changing state
//! (`stop` also records its request under it),
//! never across a process wait. Each session gets one exit observer task
//! that waits for the encoder (or a stop request) and runs the session's
//! cleanup exactly once.

mod monitor;
mod process;
mod session;

pub use monitor::{is_significant, OutputLineCodec, MAX_LINE_BYTES};
pub use session::{SessionInfo, StartRequest, StartedSession, SupervisorStatus};

use std::sync::Arc;
use std::time::Duration;

use loopcast_common::events::{EventBus, LogCategory, SessionState, StreamEvent};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{RootLayout, StreamerConfig};
use crate::encoder::{EncoderCommand, StreamTarget};
use crate::error::{Error, Result};
use crate::event_log::EventLogStore;
use crate::media::MediaRepository;
use crate::playlist::PlaylistBuilder;

use monitor::{Cleanup, ExitOutcome, ExitWatch};

/// Message appended as the last event of every spawned session
pub const SESSION_ENDED_MESSAGE: &str = "Streaming session ended";

/// Extra time allowed after the stop grace period during shutdown
const SHUTDOWN_SLACK: Duration = Duration::from_secs(2);

/// Upper bound on draining and cleanup once the encoder has exited
const SETTLE_AFTER_EXIT: Duration = Duration::from_secs(5);

/// Mutable supervisor state, guarded by one mutex
struct SessionSlot {
    state: SessionState,
    /// Current or most recent session
    session: Option<SessionInfo>,
    /// Taken by `stop`; the observer holds the receiving end
    cancel_tx: Option<oneshot::Sender<()>>,
    /// The observer has reaped the encoder; its pid must not be signalled
    exit_observed: bool,
}

struct SupervisorInner {
    config: StreamerConfig,
    layout: RootLayout,
    media: MediaRepository,
    playlists: PlaylistBuilder,
    log: EventLogStore,
    bus: Option<EventBus>,
    slot: Mutex<SessionSlot>,
    state_tx: watch::Sender<SessionState>,
}

/// Handle to the session supervisor; cheap to clone
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Create a supervisor, cleaning up after a previous run that did not exit cleanly
    pub async fn new(
        config: StreamerConfig,
        media: MediaRepository,
        log: EventLogStore,
        bus: Option<EventBus>,
    ) -> Self {
        let layout = config.paths();
        process::sweep_orphan(&layout.pid_file(), &config.encoder_program).await;

        let playlists = PlaylistBuilder::new(layout.playlists_dir(), config.playlist_length);
        playlists.clear_stale().await;
        let (state_tx, _) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(SupervisorInner {
                config,
                layout,
                media,
                playlists,
                log,
                bus,
                slot: Mutex::new(SessionSlot {
                    state: SessionState::Idle,
                    session: None,
                    cancel_tx: None,
                    exit_observed: false,
                }),
                state_tx,
            }),
        }
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.inner.config
    }

    pub fn media(&self) -> &MediaRepository {
        &self.inner.media
    }

    pub fn event_log(&self) -> &EventLogStore {
        &self.inner.log
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.inner.slot.lock().await.state
    }

    /// Start a new session
    ///
    /// Validation happens before any state change. On success the encoder is
    /// running and the session is `Live` (or `Stopping` if a stop raced in).
    pub async fn start(&self, request: StartRequest) -> Result<StartedSession> {
        self.ensure_idle().await?;

        let key = request.stream_key.trim();
        if key.is_empty() {
            return Err(Error::Validation("Stream key must not be empty".to_string()));
        }
        let resolved = self
            .inner
            .playlists
            .resolve(&self.inner.media, &request.selection)
            .await?;
        let target = StreamTarget::new(&self.inner.config.ingest_endpoint, key);

        // Claim the slot
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let session_id = {
            let mut slot = self.inner.slot.lock().await;
            if slot.state.is_active() {
                return Err(already_active(&slot));
            }
            let session = SessionInfo::new(target.redacted(), request.selection.clone());
            let session_id = session.session_id.clone();
            slot.session = Some(session);
            slot.cancel_tx = Some(cancel_tx);
            slot.exit_observed = false;
            self.transition(&mut slot, SessionState::Starting);
            session_id
        };

        self.inner
            .log
            .record(
                &session_id,
                LogCategory::Info,
                &format!("Starting stream to {}", target.redacted()),
            )
            .await;

        let inputs = match self
            .inner
            .playlists
            .materialize(&session_id, &resolved)
            .await
        {
            Ok(inputs) => inputs,
            Err(e) => {
                self.fail_start(&session_id, &e.to_string(), Vec::new()).await;
                return Err(e);
            }
        };

        let command = EncoderCommand::build(&self.inner.config.encoder, &inputs, &target);
        let program = &self.inner.config.encoder_program;
        info!(
            session_id = %session_id,
            program = %program.display(),
            command = %command.redacted(),
            "Spawning encoder"
        );

        let mut child = match process::spawn_encoder(program, &command) {
            Ok(child) => child,
            Err(e) => {
                let err = Error::Spawn(format!("{}: {}", program.display(), e));
                self.fail_start(&session_id, &err.to_string(), inputs.playlist_files())
                    .await;
                return Err(err);
            }
        };

        let pid = child.id();
        let pid_file = self.inner.layout.pid_file();
        if let Some(pid) = pid {
            process::write_pid_file(&pid_file, pid).await;
        }

        let (lines, writer) =
            monitor::spawn_output_writer(session_id.clone(), self.inner.log.clone());
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(monitor::spawn_drain(
                stdout,
                "stdout",
                session_id.clone(),
                lines.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(monitor::spawn_drain(
                stderr,
                "stderr",
                session_id.clone(),
                lines,
            ));
        }

        let started = {
            let mut slot = self.inner.slot.lock().await;
            if let Some(session) = slot.session.as_mut() {
                session.pid = pid;
                session.inputs = Some(inputs.clone());
            }
            if slot.state == SessionState::Starting {
                self.transition(&mut slot, SessionState::Live);
            }
            slot.session.clone().map(|session| StartedSession {
                state: slot.state,
                session,
            })
        };

        self.inner
            .log
            .record(
                &session_id,
                LogCategory::Info,
                &match pid {
                    Some(pid) => format!("Encoder started (pid {})", pid),
                    None => "Encoder started".to_string(),
                },
            )
            .await;

        monitor::spawn_exit_observer(
            self.clone(),
            ExitWatch {
                session_id: session_id.clone(),
                child,
                drains,
                writer,
                cleanup: Cleanup {
                    playlists: inputs.playlist_files(),
                    pid_file,
                },
                cancel_rx,
                grace: self.inner.config.stop_grace_period(),
            },
        );

        started.ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
    }

    /// Request the active session to stop; does not wait for exit
    ///
    /// Returns the state after the call. Repeated calls while stopping or
    /// after the session ended are no-ops. If the encoder has already exited
    /// on its own, nothing is signalled and the call returns the state the
    /// session settles in.
    pub async fn stop(&self) -> Result<SessionState> {
        {
            let mut slot = self.inner.slot.lock().await;
            match slot.state {
                SessionState::Idle => return Err(Error::NotActive),
                SessionState::Starting | SessionState::Live => {}
                other => return Ok(other),
            }

            if !slot.exit_observed {
                let session_id = slot
                    .session
                    .as_ref()
                    .map(|s| s.session_id.clone())
                    .unwrap_or_default();
                // Logged while locked so it precedes the observer's final events
                self.inner
                    .log
                    .record(&session_id, LogCategory::Info, "Stop requested")
                    .await;

                self.transition(&mut slot, SessionState::Stopping);
                if let Some(tx) = slot.cancel_tx.take() {
                    if tx.send(()).is_err() {
                        debug!(session_id = %session_id, "Exit observer already finishing");
                    }
                }
                return Ok(slot.state);
            }
        }

        debug!("Encoder already exited, waiting for session to settle");
        Ok(self.wait_until_settled(SETTLE_AFTER_EXIT).await)
    }

    /// State, session details and recent events; never touches the encoder
    pub async fn status(&self) -> SupervisorStatus {
        let (state, session) = {
            let slot = self.inner.slot.lock().await;
            (slot.state, slot.session.clone())
        };

        let recent_events = match &session {
            Some(session) => self
                .inner
                .log
                .recent(&session.session_id, self.inner.config.recent_event_limit)
                .await
                .unwrap_or_else(|e| {
                    warn!(session_id = %session.session_id, error = %e, "Failed to load recent events");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        SupervisorStatus {
            state,
            session,
            recent_events,
        }
    }

    /// Wait until no session is active, up to `timeout`
    pub async fn wait_until_settled(&self, timeout: Duration) -> SessionState {
        let mut rx = self.inner.state_tx.subscribe();
        let settled = async {
            loop {
                let state = *rx.borrow_and_update();
                if !state.is_active() {
                    return state;
                }
                if rx.changed().await.is_err() {
                    return state;
                }
            }
        };

        match tokio::time::timeout(timeout, settled).await {
            Ok(state) => state,
            Err(_) => self.state().await,
        }
    }

    /// Stop the active session, if any, and wait (bounded) for it to end
    pub async fn shutdown(&self) -> SessionState {
        if self.state().await.is_active() {
            if let Err(e) = self.stop().await {
                warn!(error = %e, "Failed to stop session during shutdown");
            }
        }

        let state = self
            .wait_until_settled(self.inner.config.stop_grace_period() + SHUTDOWN_SLACK)
            .await;
        if state.is_active() {
            warn!(state = %state, "Session still active at shutdown");
        }
        state
    }

    async fn ensure_idle(&self) -> Result<()> {
        let slot = self.inner.slot.lock().await;
        if slot.state.is_active() {
            return Err(already_active(&slot));
        }
        Ok(())
    }

    /// Spawn never happened: record why, drop playlists and mark Failed
    async fn fail_start(&self, session_id: &str, message: &str, playlists: Vec<std::path::PathBuf>) {
        warn!(session_id = %session_id, error = %message, "Session failed to start");
        self.inner
            .log
            .record(session_id, LogCategory::Error, message)
            .await;
        self.inner.playlists.remove(&playlists).await;

        let mut slot = self.inner.slot.lock().await;
        slot.cancel_tx = None;
        if is_current(&slot, session_id) {
            self.transition(&mut slot, SessionState::Failed);
        }
    }

    /// Called by the observer as soon as the encoder is reaped
    async fn mark_exited(&self, session_id: &str) {
        let mut slot = self.inner.slot.lock().await;
        if !is_current(&slot, session_id) {
            return;
        }
        slot.exit_observed = true;
        slot.cancel_tx = None;
        if let Some(session) = slot.session.as_mut() {
            session.pid = None;
        }
    }

    /// Called once per session by its exit observer
    async fn finalize(&self, session_id: &str, outcome: ExitOutcome, cleanup: Cleanup) {
        cleanup.run(&self.inner.playlists).await;

        // Only a stop delivered before the exit excuses a non-zero status
        let failure = match &outcome {
            ExitOutcome::Exited(status) if !status.success() => {
                Some(format!("Encoder exited unexpectedly ({})", status))
            }
            ExitOutcome::WaitFailed(e) => Some(format!("Lost track of encoder: {}", e)),
            _ => None,
        };

        if let Some(message) = &failure {
            self.inner
                .log
                .record(session_id, LogCategory::Error, message)
                .await;
        }
        self.inner
            .log
            .record(session_id, LogCategory::Info, SESSION_ENDED_MESSAGE)
            .await;

        let mut slot = self.inner.slot.lock().await;
        slot.cancel_tx = None;
        if is_current(&slot, session_id) {
            let next = if failure.is_some() {
                SessionState::Failed
            } else {
                SessionState::Ended
            };
            info!(session_id = %session_id, outcome = ?outcome, state = %next, "Session finished");
            self.transition(&mut slot, next);
        }
    }

    fn transition(&self, slot: &mut SessionSlot, new_state: SessionState) {
        let old_state = slot.state;
        if old_state == new_state {
            return;
        }
        slot.state = new_state;
        self.inner.state_tx.send_replace(new_state);

        let session_id = slot
            .session
            .as_ref()
            .map(|s| s.session_id.clone())
            .unwrap_or_default();
        info!(session_id = %session_id, from = %old_state, to = %new_state, "Session state changed");

        if let Some(bus) = &self.inner.bus {
            bus.emit_lossy(StreamEvent::SessionStateChanged {
                session_id,
                old_state,
                new_state,
                timestamp: loopcast_common::time::now(),
            });
        }
    }
}

fn is_current(slot: &SessionSlot, session_id: &str) -> bool {
    slot.session
        .as_ref()
        .is_some_and(|s| s.session_id == session_id)
}

fn already_active(slot: &SessionSlot) -> Error {
    Error::AlreadyActive {
        session_id: slot
            .session
            .as_ref()
            .map(|s| s.session_id.clone())
            .unwrap_or_default(),
    }
}
