//! Shared fixtures for supervisor and API tests
//!
//! The encoder is replaced by a small shell script that appends its
//! arguments to `spawn.log`, prints a few encoder-like lines and then runs
//! the given body.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use loopcast::config::StreamerConfig;
use loopcast::event_log::EventLogStore;
use loopcast::media::{MediaKind, MediaRepository};
use loopcast::Supervisor;
use loopcast_common::db::init_database;
use loopcast_common::events::{EventBus, SessionState};
use tempfile::TempDir;

pub const INGEST_ENDPOINT: &str = "rtmp://127.0.0.1:1935/live2";

/// Runs until signalled
pub const LONG_RUNNING: &str = "exec sleep 30";

/// Reports a connection error and exits non-zero
pub const FAILS_IMMEDIATELY: &str = "echo \"rtmp://127.0.0.1:1935: Connection error\" >&2\nexit 1";

/// Plays the list through and exits cleanly
pub const EXITS_CLEANLY: &str = "exit 0";

pub struct TestEnv {
    pub dir: TempDir,
    pub supervisor: Supervisor,
    pub bus: EventBus,
    pub spawn_log: PathBuf,
}

impl TestEnv {
    pub fn media(&self) -> &MediaRepository {
        self.supervisor.media()
    }

    pub async fn add_video(&self, name: &str) {
        self.media()
            .put(MediaKind::Video, name, b"not really a video")
            .await
            .unwrap();
    }

    pub async fn add_audio(&self, name: &str) {
        self.media()
            .put(MediaKind::Audio, name, b"not really audio")
            .await
            .unwrap();
    }

    pub fn playlists_dir(&self) -> PathBuf {
        self.supervisor.config().paths().playlists_dir()
    }

    pub fn pid_file(&self) -> PathBuf {
        self.supervisor.config().paths().pid_file()
    }

    /// Argument lines recorded by the fake encoder, one per spawn
    pub fn spawns(&self) -> Vec<String> {
        std::fs::read_to_string(&self.spawn_log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Wait until the fake encoder has recorded `count` spawns
    pub async fn wait_for_spawns(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            let spawns = self.spawns();
            if spawns.len() >= count {
                return spawns;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("encoder was not spawned {} time(s)", count);
    }

    /// Poll until the session is no longer active
    pub async fn wait_settled(&self) -> SessionState {
        let state = self
            .supervisor
            .wait_until_settled(Duration::from_secs(10))
            .await;
        assert!(!state.is_active(), "session still {} after timeout", state);
        state
    }

    pub fn playlist_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.playlists_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

/// Write an executable fake encoder running `body` after its preamble
pub fn write_fake_encoder(dir: &Path, spawn_log: &Path, body: &str) -> PathBuf {
    let script = dir.join("fake-ffmpeg");
    let content = format!(
        "#!/bin/sh\n\
         echo \"$@\" >> '{}'\n\
         echo \"Input #0, concat, from 'list.txt':\" >&2\n\
         echo \"frame=   30 fps= 30 q=28.0 size=     256kB time=00:00:01.00 bitrate=2097.2kbits/s speed=1x\" >&2\n\
         {}\n",
        spawn_log.display(),
        body
    );
    std::fs::write(&script, content).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// Supervisor rooted in a fresh temp dir with a fake encoder
pub async fn setup(body: &str) -> TestEnv {
    setup_with(body, |_| {}).await
}

pub async fn setup_with(body: &str, adjust: impl FnOnce(&mut StreamerConfig)) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    let spawn_log = dir.path().join("spawn.log");
    let script = write_fake_encoder(dir.path(), &spawn_log, body);

    let mut config = StreamerConfig::with_root(&root);
    config.encoder_program = script;
    config.ingest_endpoint = INGEST_ENDPOINT.to_string();
    config.stop_grace_period_ms = 500;
    config.playlist_length = 10;
    adjust(&mut config);

    let paths = config.paths();
    std::fs::create_dir_all(paths.root()).unwrap();
    let pool = init_database(&paths.database_path()).await.unwrap();
    let bus = EventBus::new(64);
    let log = EventLogStore::with_event_bus(pool, bus.clone());
    let media = MediaRepository::new(&paths);
    media.ensure_dirs().await.unwrap();

    let supervisor = Supervisor::new(config, media, log, Some(bus.clone())).await;

    TestEnv {
        dir,
        supervisor,
        bus,
        spawn_log,
    }
}
