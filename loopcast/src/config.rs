//! Streamer configuration
//!
//! Loaded from the TOML config file (all keys optional), then overridden by
//! command-line flags in `main`. The root folder itself is resolved through
//! [`loopcast_common::config::resolve_root_folder`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoder::EncoderSettings;

/// Default ingestion endpoint (stream key is appended as the last segment)
pub const DEFAULT_INGEST_ENDPOINT: &str = "rtmp://a.rtmp.youtube.com/live2";

/// Streamer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Root folder holding media, playlists, pid file and database
    #[serde(skip)]
    pub root_folder: PathBuf,

    /// HTTP listen address
    pub bind_addr: String,

    /// Encoder executable (looked up on PATH when not absolute)
    pub encoder_program: PathBuf,

    /// Ingestion endpoint template; the stream key is appended
    pub ingest_endpoint: String,

    /// Number of entries drawn into each generated playlist
    pub playlist_length: usize,

    /// Number of events returned by status queries
    pub recent_event_limit: u32,

    /// Time between SIGTERM and SIGKILL when stopping the encoder
    pub stop_grace_period_ms: u64,

    /// Upper bound for a single upload request body
    pub max_upload_bytes: usize,

    /// Per-subscriber buffer of the push channel
    pub event_bus_capacity: usize,

    /// Codec parameters passed to the encoder
    pub encoder: EncoderSettings,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            root_folder: PathBuf::new(),
            bind_addr: "127.0.0.1:5780".to_string(),
            encoder_program: PathBuf::from("ffmpeg"),
            ingest_endpoint: DEFAULT_INGEST_ENDPOINT.to_string(),
            playlist_length: 100,
            recent_event_limit: 50,
            stop_grace_period_ms: 5000,
            max_upload_bytes: 200 * 1024 * 1024,
            event_bus_capacity: 256,
            encoder: EncoderSettings::default(),
        }
    }
}

impl StreamerConfig {
    /// Default configuration rooted at `root_folder`
    pub fn with_root(root_folder: impl Into<PathBuf>) -> Self {
        Self {
            root_folder: root_folder.into(),
            ..Self::default()
        }
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    pub fn paths(&self) -> RootLayout {
        RootLayout::new(&self.root_folder)
    }
}

/// Fixed layout of the root folder
#[derive(Debug, Clone)]
pub struct RootLayout {
    root: PathBuf,
}

impl RootLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn audios_dir(&self) -> PathBuf {
        self.root.join("audios")
    }

    /// Transient concat lists, one pair per session
    pub fn playlists_dir(&self) -> PathBuf {
        self.root.join("playlists")
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(loopcast_common::db::DATABASE_FILE_NAME)
    }

    /// Pid of the running encoder, used for the orphan sweep after a crash
    pub fn pid_file(&self) -> PathBuf {
        self.root.join("encoder.pid")
    }
}
