//! Uploaded media
//!
//! Files live under the upload root: images in `images/`, everything else in
//! `files/`. Stored names are generated, never taken from the client.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::db::repositories::{PageRepository, PostRepository};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("File type not allowed: {0}")]
    NotAllowed(String),

    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
    Video,
    Audio,
}

impl MediaKind {
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Image,
        MediaKind::Document,
        MediaKind::Video,
        MediaKind::Audio,
    ];

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => &["png", "jpg", "jpeg", "gif"],
            MediaKind::Document => &["pdf", "doc", "docx", "txt"],
            MediaKind::Video => &["mp4", "webm"],
            MediaKind::Audio => &["mp3", "wav"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.extensions().contains(&ext.as_str()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    fn subdir(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            _ => "files",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "document" => Ok(MediaKind::Document),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(MediaError::NotAllowed(other.to_string())),
        }
    }
}

/// A stored upload
#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    pub name: String,
    /// Path relative to the upload root, `/`-separated
    pub path: String,
    pub url: String,
    pub kind: MediaKind,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Lowercased extension of `filename`, if any
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Reduce a client-supplied name to ASCII letters, digits, `_`, `.` and `-`
pub fn secure_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .filter(char::is_ascii)
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// `YYYYmmdd_HHMMSS_{8 hex}.{ext}`
pub fn unique_filename(filename: &str, now: DateTime<Utc>) -> Option<String> {
    let ext = extension(filename)?;
    let id = Uuid::new_v4().simple().to_string();
    Some(format!("{}_{}.{}", now.format("%Y%m%d_%H%M%S"), &id[..8], ext))
}

/// Reject absolute paths and any `..` component
fn checked_relative(path: &str) -> Result<PathBuf, MediaError> {
    let trimmed = path.trim_start_matches("/uploads/");
    let candidate = Path::new(trimmed);
    if trimmed.is_empty()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(MediaError::InvalidPath(path.to_string()));
    }
    Ok(candidate.to_path_buf())
}

pub struct MediaService {
    root: PathBuf,
    max_file_size: u64,
    posts: Arc<dyn PostRepository>,
    pages: Arc<dyn PageRepository>,
}

impl MediaService {
    pub fn new(
        config: &UploadConfig,
        posts: Arc<dyn PostRepository>,
        pages: Arc<dyn PageRepository>,
    ) -> Self {
        Self {
            root: config.path.clone(),
            max_file_size: config.max_file_size,
            posts,
            pages,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `data` under a generated name. With `kind` given, the extension
    /// must belong to that kind.
    pub async fn save(
        &self,
        data: &[u8],
        filename: &str,
        kind: Option<MediaKind>,
    ) -> Result<MediaFile, MediaError> {
        let safe = secure_filename(filename);
        let ext = extension(&safe).ok_or_else(|| MediaError::NotAllowed(filename.to_string()))?;
        let detected =
            MediaKind::from_extension(&ext).ok_or_else(|| MediaError::NotAllowed(ext.clone()))?;
        if kind.is_some_and(|k| k != detected) {
            return Err(MediaError::NotAllowed(ext));
        }

        let size = data.len() as u64;
        if size > self.max_file_size {
            return Err(MediaError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let now = Utc::now();
        let name = unique_filename(&safe, now).ok_or_else(|| MediaError::NotAllowed(safe.clone()))?;
        let dir = self.root.join(detected.subdir());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&name), data).await?;
        info!("Stored upload {} as {}/{}", filename, detected.subdir(), name);

        let path = format!("{}/{}", detected.subdir(), name);
        Ok(MediaFile {
            url: format!("/uploads/{}", path),
            name,
            path,
            kind: detected,
            size,
            modified: now,
        })
    }

    /// Remove a file by its path relative to the upload root
    pub async fn delete(&self, path: &str) -> Result<(), MediaError> {
        let relative = checked_relative(path)?;
        let full = self.root.join(&relative);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                info!("Deleted upload {}", relative.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored file of an allowed type, newest first
    pub async fn list(&self, kind: Option<MediaKind>) -> Result<Vec<MediaFile>, MediaError> {
        let mut files = Vec::new();
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(files);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let Some(detected) = extension(&name).and_then(|e| MediaKind::from_extension(&e))
                else {
                    continue;
                };
                if kind.is_some_and(|k| k != detected) {
                    continue;
                }
                let relative = path
                    .strip_prefix(&self.root)
                    .map_err(|e| MediaError::InvalidPath(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                files.push(MediaFile {
                    url: format!("/uploads/{}", relative),
                    name,
                    path: relative,
                    kind: detected,
                    size: meta.len(),
                    modified,
                });
            }
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then(a.name.cmp(&b.name)));
        Ok(files)
    }

    /// Whether any post or page mentions the file name
    pub async fn is_referenced(&self, name: &str) -> Result<bool, MediaError> {
        Ok(self.posts.references(name).await? || self.pages.references(name).await?)
    }

    /// Delete unreferenced files older than `days`; returns how many went
    pub async fn cleanup(&self, days: i64) -> Result<u64, MediaError> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let mut removed = 0;
        for file in self.list(None).await? {
            if file.modified >= cutoff || self.is_referenced(&file.name).await? {
                continue;
            }
            match self.delete(&file.path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove {}: {}", file.path, e),
            }
        }
        debug!("Media cleanup removed {} files", removed);
        Ok(removed)
    }
}
