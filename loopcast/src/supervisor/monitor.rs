//! Output drains and the per-session exit observer

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use loopcast_common::events::LogCategory;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, error, warn};

use super::{process, Supervisor};
use crate::event_log::EventLogStore;
use crate::playlist::PlaylistBuilder;

/// Longer lines are truncated to this length
pub const MAX_LINE_BYTES: usize = 8192;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether an encoder output line is worth recording
pub fn is_significant(line: &str) -> bool {
    line.contains("bitrate") || line.to_ascii_lowercase().contains("error")
}

/// Splits encoder output on `\n` or `\r`, truncating overlong lines
#[derive(Debug, Default)]
pub struct OutputLineCodec {
    discarding: bool,
}

impl Decoder for OutputLineCodec {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, Self::Error> {
        loop {
            match buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    let mut line = buf.split_to(pos + 1);
                    line.truncate(pos);
                    if std::mem::take(&mut self.discarding) {
                        // Tail of a truncated line
                        continue;
                    }
                    return Ok(Some(line));
                }
                None if self.discarding => {
                    buf.clear();
                    return Ok(None);
                }
                None if buf.len() >= MAX_LINE_BYTES => {
                    self.discarding = true;
                    let head = buf.split_to(MAX_LINE_BYTES);
                    buf.clear();
                    return Ok(Some(head));
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, Self::Error> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() || self.discarding => {
                buf.clear();
                Ok(None)
            }
            None => Ok(Some(buf.split())),
        }
    }
}

/// Significant lines waiting for the event log, per session
const OUTPUT_QUEUE_DEPTH: usize = 256;

/// Append queued output lines to the event log until every drain is done
pub(super) fn spawn_output_writer(
    session_id: String,
    log: EventLogStore,
) -> (mpsc::Sender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<String>(OUTPUT_QUEUE_DEPTH);
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            log.record(&session_id, LogCategory::Ffmpeg, &line).await;
        }
    });
    (tx, handle)
}

/// Queue significant lines from one output stream for the writer
///
/// Lines end at `\n` or `\r`; the encoder rewrites its progress line in
/// place with carriage returns. Reading never waits on the event log: when
/// the queue is full the line is dropped.
pub(super) fn spawn_drain<R>(
    reader: R,
    stream: &'static str,
    session_id: String,
    lines: mpsc::Sender<String>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, OutputLineCodec::default());
        let mut dropped = 0u64;

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(bytes) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    let line = String::from_utf8_lossy(&bytes);
                    let line = line.trim_end();
                    if !is_significant(line) {
                        continue;
                    }
                    // Full or writer gone; keep reading so the pipe never fills
                    if lines.try_send(line.to_string()).is_err() {
                        dropped += 1;
                    }
                }
                Err(e) => {
                    debug!(session_id = %session_id, stream, error = %e, "Stopped draining encoder output");
                    break;
                }
            }
        }

        if dropped > 0 {
            warn!(session_id = %session_id, stream, dropped, "Dropped encoder output lines while the event log was busy");
        }
    })
}

/// Resources released when a session ends, consumed exactly once
#[derive(Debug)]
pub(super) struct Cleanup {
    pub playlists: Vec<PathBuf>,
    pub pid_file: PathBuf,
}

impl Cleanup {
    pub async fn run(self, builder: &PlaylistBuilder) {
        builder.remove(&self.playlists).await;
        process::remove_pid_file(&self.pid_file).await;
    }
}

/// How the encoder went away
#[derive(Debug)]
pub(super) enum ExitOutcome {
    Exited(ExitStatus),
    Stopped,
    WaitFailed(String),
}

/// Everything the observer owns for one session
pub(super) struct ExitWatch {
    pub session_id: String,
    pub child: Child,
    pub drains: Vec<JoinHandle<()>>,
    pub writer: JoinHandle<()>,
    pub cleanup: Cleanup,
    pub cancel_rx: oneshot::Receiver<()>,
    pub grace: Duration,
}

/// Wait for exit or a stop request, then finalize the session
pub(super) fn spawn_exit_observer(supervisor: Supervisor, watch: ExitWatch) {
    tokio::spawn(async move {
        let ExitWatch {
            session_id,
            mut child,
            drains,
            mut writer,
            cleanup,
            cancel_rx,
            grace,
        } = watch;

        let outcome = tokio::select! {
            result = child.wait() => match result {
                Ok(status) => ExitOutcome::Exited(status),
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Failed to wait on encoder");
                    ExitOutcome::WaitFailed(e.to_string())
                }
            },
            Ok(()) = cancel_rx => {
                debug!(session_id = %session_id, "Stop requested, terminating encoder");
                process::graceful_kill(&mut child, grace).await;
                ExitOutcome::Stopped
            }
        };
        supervisor.mark_exited(&session_id).await;

        for mut drain in drains {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut drain).await.is_err() {
                // A grandchild may still hold the pipe open
                warn!(session_id = %session_id, "Encoder output still open after exit");
                drain.abort();
            }
        }
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut writer).await.is_err() {
            warn!(session_id = %session_id, "Encoder output not fully recorded");
            writer.abort();
        }

        supervisor.finalize(&session_id, outcome, cleanup).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_significant_lines() {
        assert!(is_significant(
            "frame= 120 fps= 30 q=28.0 size= 512kB time=00:00:04.00 bitrate=1048.6kbits/s speed=1x"
        ));
        assert!(is_significant("[flv @ 0x55] Error writing trailer"));
        assert!(is_significant("Connection ERROR: broken pipe"));
        assert!(!is_significant("Input #0, concat, from 'list.txt':"));
        assert!(!is_significant("  Stream #0:0: Video: h264"));
    }

    #[test]
    fn test_codec_truncates_long_lines() {
        let mut codec = OutputLineCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 10]);

        let head = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(head.len(), MAX_LINE_BYTES);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"yyy\nnext bitrate\n");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"next bitrate");
    }

    #[test]
    fn test_codec_emits_unterminated_tail_at_eof() {
        let mut codec = OutputLineCodec::default();
        let mut buf = BytesMut::from(&b"first\rlast"[..]);
        assert_eq!(&codec.decode_eof(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode_eof(&mut buf).unwrap().unwrap()[..], b"last");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drain_splits_on_carriage_returns() {
        let dir = tempfile::tempdir().unwrap();
        let pool = loopcast_common::db::init_database(&dir.path().join("log.db"))
            .await
            .unwrap();
        let log = EventLogStore::new(pool);

        let (lines, writer) = spawn_output_writer("session-d".into(), log.clone());
        let output: &'static [u8] =
            b"Input #0\nframe=1 bitrate=10k\rframe=2 bitrate=20k\r\nsome error here\nnoise\n";
        spawn_drain(output, "stderr", "session-d".into(), lines)
            .await
            .unwrap();
        writer.await.unwrap();

        let events = log.recent("session-d", 10).await.unwrap();
        let mut messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
        messages.reverse();
        assert_eq!(
            messages,
            vec!["frame=1 bitrate=10k", "frame=2 bitrate=20k", "some error here"]
        );
        assert!(events.iter().all(|e| e.category == LogCategory::Ffmpeg));
    }

    #[tokio::test]
    async fn test_drain_does_not_wait_for_a_busy_writer() {
        let (lines, mut queued) = mpsc::channel(1);
        let output: &'static [u8] = b"bitrate=1k\nbitrate=2k\nbitrate=3k\n";

        tokio::time::timeout(
            Duration::from_secs(1),
            spawn_drain(output, "stderr", "session-q".into(), lines),
        )
        .await
        .expect("drain blocked on a full queue")
        .unwrap();

        assert_eq!(queued.recv().await.as_deref(), Some("bitrate=1k"));
        assert!(queued.recv().await.is_none());
    }
}
