//! Media Repository
//!
//! Two flat content directories, one per [`MediaKind`], addressed by file
//! name. Uploading an existing name overwrites it.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::RootLayout;
use crate::error::{Error, Result};

/// Kind of media asset; each kind has its own directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Video, MediaKind::Audio];

    /// Accepted file extensions (lowercase)
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            MediaKind::Video => &["mp4", "mkv", "mov", "avi", "mpeg4"],
            MediaKind::Audio => &["mp3", "wav", "m4a"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" | "videos" => Ok(MediaKind::Video),
            "audio" | "audios" => Ok(MediaKind::Audio),
            other => Err(Error::InvalidInput(format!("Unknown media kind: {}", other))),
        }
    }
}

/// A stored media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaAsset {
    pub kind: MediaKind,
    pub name: String,
    /// Absolute storage path
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Asset that was removed during an erase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedAsset {
    pub kind: MediaKind,
    pub name: String,
}

/// Asset that could not be removed during an erase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub kind: MediaKind,
    pub name: String,
    pub error: String,
}

/// Outcome of a batch erase; failures do not abort the batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub removed: Vec<RemovedAsset>,
    pub failures: Vec<DeleteFailure>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: DeleteReport) {
        self.removed.extend(other.removed);
        self.failures.extend(other.failures);
    }
}

/// Scope of an erase request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseScope {
    All,
    Kind(MediaKind),
}

/// Video and audio content directories
#[derive(Debug, Clone)]
pub struct MediaRepository {
    videos_dir: PathBuf,
    audios_dir: PathBuf,
}

impl MediaRepository {
    pub fn new(layout: &RootLayout) -> Self {
        Self {
            videos_dir: absolute(&layout.videos_dir()),
            audios_dir: absolute(&layout.audios_dir()),
        }
    }

    /// Create both content directories if missing
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.videos_dir).await?;
        tokio::fs::create_dir_all(&self.audios_dir).await?;
        Ok(())
    }

    pub fn dir(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Video => &self.videos_dir,
            MediaKind::Audio => &self.audios_dir,
        }
    }

    /// Assets of one kind, sorted by name
    ///
    /// A missing directory lists as empty. Hidden files (in-flight uploads)
    /// and non-regular files are skipped.
    pub async fn list(&self, kind: MediaKind) -> Result<Vec<MediaAsset>> {
        let dir = self.dir(kind);
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut assets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                debug!(path = %entry.path().display(), "Skipping non-UTF-8 file name");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            assets.push(MediaAsset {
                kind,
                path: entry.path(),
                name,
                size_bytes: metadata.len(),
            });
        }

        assets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(assets)
    }

    /// Look up one asset by name
    pub async fn get(&self, kind: MediaKind, name: &str) -> Result<MediaAsset> {
        validate_name(kind, name)?;
        let path = self.dir(kind).join(name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(MediaAsset {
                kind,
                name: name.to_string(),
                path,
                size_bytes: metadata.len(),
            }),
            Ok(_) => Err(Error::NotFound(format!("{} asset {}", kind, name))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("{} asset {}", kind, name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store `bytes` under `name`, replacing any existing asset
    ///
    /// The bytes land in a hidden sibling file first and are renamed into
    /// place, so readers never observe a partial asset.
    pub async fn put(&self, kind: MediaKind, name: &str, bytes: &[u8]) -> Result<MediaAsset> {
        validate_name(kind, name)?;

        let dir = self.dir(kind);
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(name);
        let staging = dir.join(format!(".{}.{}.upload", name, uuid::Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&staging, bytes).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        info!(kind = %kind, name = %name, size_bytes = bytes.len(), "Stored media asset");

        Ok(MediaAsset {
            kind,
            name: name.to_string(),
            path,
            size_bytes: bytes.len() as u64,
        })
    }

    /// Remove one asset
    pub async fn delete_one(&self, kind: MediaKind, name: &str) -> Result<()> {
        validate_name(kind, name)?;
        match tokio::fs::remove_file(self.dir(kind).join(name)).await {
            Ok(()) => {
                info!(kind = %kind, name = %name, "Deleted media asset");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("{} asset {}", kind, name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every asset of one kind, continuing past individual failures
    pub async fn delete_all(&self, kind: MediaKind) -> Result<DeleteReport> {
        let mut report = DeleteReport::default();

        for asset in self.list(kind).await? {
            match tokio::fs::remove_file(&asset.path).await {
                Ok(()) => report.removed.push(RemovedAsset {
                    kind,
                    name: asset.name,
                }),
                Err(e) => {
                    warn!(kind = %kind, name = %asset.name, error = %e, "Failed to delete media asset");
                    report.failures.push(DeleteFailure {
                        kind,
                        name: asset.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            kind = %kind,
            removed = report.removed.len(),
            failed = report.failures.len(),
            "Erased media directory"
        );
        Ok(report)
    }

    /// Kind-scoped or global erase
    pub async fn erase(&self, scope: EraseScope) -> Result<DeleteReport> {
        match scope {
            EraseScope::Kind(kind) => self.delete_all(kind).await,
            EraseScope::All => {
                let mut report = DeleteReport::default();
                for kind in MediaKind::ALL {
                    report.merge(self.delete_all(kind).await?);
                }
                Ok(report)
            }
        }
    }
}

/// Reject names that could escape the content directory or are not media
fn validate_name(kind: MediaKind, name: &str) -> Result<()> {
    if name.is_empty() || name.trim() != name {
        return Err(Error::InvalidInput("Media name must not be empty or padded with whitespace".into()));
    }
    if name.starts_with('.') || name.contains("..") {
        return Err(Error::InvalidInput(format!("Invalid media name: {}", name)));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidInput(format!(
            "Media name must not contain path separators: {}",
            name
        )));
    }

    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension {
        Some(ext) if kind.allowed_extensions().contains(&ext.as_str()) => Ok(()),
        _ => Err(Error::InvalidInput(format!(
            "Unsupported {} file {} (allowed: {})",
            kind,
            name,
            kind.allowed_extensions().join(", ")
        ))),
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
