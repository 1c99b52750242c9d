//! Playlist Builder
//!
//! Turns a media selection into the encoder's input source descriptors.
//! In rotation mode every kind gets a concat list: the assets are shuffled
//! once, then a fixed number of entries is drawn with replacement, so even a
//! single asset yields a full-length list. Consecutive repeats can occur.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::media::{MediaAsset, MediaKind, MediaRepository};

/// What to stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MediaSelection {
    /// Shuffled rotation over every uploaded asset
    #[default]
    Rotation,
    /// One named video (and optionally one named audio), looped
    Single {
        video: String,
        #[serde(default)]
        audio: Option<String>,
    },
}

/// Selection checked against the repository, before any file is written
#[derive(Debug, Clone)]
pub enum ResolvedSelection {
    Rotation {
        videos: Vec<MediaAsset>,
        audios: Vec<MediaAsset>,
    },
    Single {
        video: MediaAsset,
        audio: Option<MediaAsset>,
    },
}

/// One encoder input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "path", rename_all = "snake_case")]
pub enum InputSource {
    /// Literal media file, looped indefinitely
    LoopedFile(PathBuf),
    /// Generated concat list, played once
    ConcatList(PathBuf),
    /// Synthetic silence, used when no audio is available
    SilentAudio,
}

impl InputSource {
    pub fn playlist_path(&self) -> Option<&Path> {
        match self {
            InputSource::ConcatList(path) => Some(path),
            _ => None,
        }
    }
}

/// Video and audio input descriptors for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSources {
    pub video: InputSource,
    pub audio: InputSource,
}

impl InputSources {
    /// Generated files that must be removed when the session ends
    pub fn playlist_files(&self) -> Vec<PathBuf> {
        [&self.video, &self.audio]
            .into_iter()
            .filter_map(|s| s.playlist_path().map(Path::to_path_buf))
            .collect()
    }
}

/// Shuffle once, then draw `length` entries with replacement
pub fn draw_entries<R: Rng + ?Sized>(
    assets: &[MediaAsset],
    length: usize,
    rng: &mut R,
) -> Vec<PathBuf> {
    let mut shuffled: Vec<&Path> = assets.iter().map(|a| a.path.as_path()).collect();
    shuffled.shuffle(rng);

    (0..length)
        .filter_map(|_| shuffled.choose(rng).map(|p| p.to_path_buf()))
        .collect()
}

/// Render entries in concat-demuxer syntax, one `file '<path>'` per line
pub fn render_playlist(entries: &[PathBuf]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str("file '");
        // Quote-escape for the concat demuxer: ' becomes '\''
        out.push_str(&entry.to_string_lossy().replace('\'', r"'\''"));
        out.push_str("'\n");
    }
    out
}

/// Writes and removes per-session concat lists
#[derive(Debug, Clone)]
pub struct PlaylistBuilder {
    dir: PathBuf,
    length: usize,
}

impl PlaylistBuilder {
    pub fn new(dir: impl Into<PathBuf>, length: usize) -> Self {
        Self {
            dir: dir.into(),
            length: length.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn playlist_path(&self, session_id: &str, kind: MediaKind) -> PathBuf {
        self.dir.join(format!("{}-{}.txt", session_id, kind))
    }

    /// Check a selection against the repository without side effects
    pub async fn resolve(
        &self,
        repo: &MediaRepository,
        selection: &MediaSelection,
    ) -> Result<ResolvedSelection> {
        let videos = repo.list(MediaKind::Video).await?;
        if videos.is_empty() {
            return Err(Error::NoMedia(MediaKind::Video));
        }

        match selection {
            MediaSelection::Rotation => {
                let audios = repo.list(MediaKind::Audio).await?;
                Ok(ResolvedSelection::Rotation { videos, audios })
            }
            MediaSelection::Single { video, audio } => {
                let video = lookup(repo, MediaKind::Video, video).await?;
                let audio = match audio {
                    Some(name) => Some(lookup(repo, MediaKind::Audio, name).await?),
                    None => None,
                };
                Ok(ResolvedSelection::Single { video, audio })
            }
        }
    }

    /// Build input descriptors, writing concat lists for rotation mode
    pub async fn materialize(
        &self,
        session_id: &str,
        resolved: &ResolvedSelection,
    ) -> Result<InputSources> {
        match resolved {
            ResolvedSelection::Single { video, audio } => Ok(InputSources {
                video: InputSource::LoopedFile(video.path.clone()),
                audio: audio
                    .as_ref()
                    .map(|a| InputSource::LoopedFile(a.path.clone()))
                    .unwrap_or(InputSource::SilentAudio),
            }),
            ResolvedSelection::Rotation { videos, audios } => {
                let video_list = self.write(session_id, MediaKind::Video, videos).await?;

                let audio = if audios.is_empty() {
                    InputSource::SilentAudio
                } else {
                    match self.write(session_id, MediaKind::Audio, audios).await {
                        Ok(path) => InputSource::ConcatList(path),
                        Err(e) => {
                            self.remove(std::slice::from_ref(&video_list)).await;
                            return Err(e);
                        }
                    }
                };

                Ok(InputSources {
                    video: InputSource::ConcatList(video_list),
                    audio,
                })
            }
        }
    }

    /// Write one concat list for `kind` and return its path
    pub async fn write(
        &self,
        session_id: &str,
        kind: MediaKind,
        assets: &[MediaAsset],
    ) -> Result<PathBuf> {
        if assets.is_empty() {
            return Err(Error::NoMedia(kind));
        }

        let content = {
            let mut rng = rand::thread_rng();
            render_playlist(&draw_entries(assets, self.length, &mut rng))
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.playlist_path(session_id, kind);
        tokio::fs::write(&path, content).await?;

        debug!(
            session_id = %session_id,
            kind = %kind,
            entries = self.length,
            assets = assets.len(),
            path = %path.display(),
            "Wrote playlist"
        );
        Ok(path)
    }

    /// Remove lists left behind by a previous run
    pub async fn clear_stale(&self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let mut stale = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "txt") {
                stale.push(path);
            }
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "Removing stale playlists");
            self.remove(&stale).await;
        }
    }

    /// Best-effort removal of generated lists
    pub async fn remove(&self, files: &[PathBuf]) {
        for file in files {
            match tokio::fs::remove_file(file).await {
                Ok(()) => debug!(path = %file.display(), "Removed playlist"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %file.display(), error = %e, "Failed to remove playlist"),
            }
        }
    }
}

async fn lookup(repo: &MediaRepository, kind: MediaKind, name: &str) -> Result<MediaAsset> {
    repo.get(kind, name).await.map_err(|e| match e {
        Error::NotFound(_) | Error::InvalidInput(_) => {
            Error::Validation(format!("Selected {} '{}' is not available", kind, name))
        }
        other => other,
    })
}
