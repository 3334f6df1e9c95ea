//! Types for torrent client operations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during torrent client operations.
#[derive(Debug, Error)]
pub enum TorrentClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("Invalid torrent data: {0}")]
    InvalidTorrent(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,
}

impl TorrentClientError {
    /// True for errors that a fresh login may cure.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TorrentClientError::AuthenticationFailed(_))
    }

    pub(crate) fn from_request(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TorrentClientError::Timeout
        } else if e.is_connect() {
            TorrentClientError::ConnectionFailed(e.to_string())
        } else {
            TorrentClientError::ApiError(e.to_string())
        }
    }
}

/// State of a torrent as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Downloading from peers.
    Downloading,
    /// Finished and seeding.
    Seeding,
    /// Paused or stopped.
    Paused,
    /// Checking file integrity.
    Checking,
    /// Queued for download.
    Queued,
    /// Stalled (no peers).
    Stalled,
    /// Error state.
    Error,
    /// Unknown state.
    Unknown,
}

impl TorrentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Paused => "paused",
            TorrentState::Checking => "checking",
            TorrentState::Queued => "queued",
            TorrentState::Stalled => "stalled",
            TorrentState::Error => "error",
            TorrentState::Unknown => "unknown",
        }
    }
}

/// Information about a torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentInfo {
    /// Info hash (lowercase hex).
    pub hash: String,
    /// Torrent name (file name for single-file torrents, folder otherwise).
    pub name: String,
    /// Current state.
    pub state: TorrentState,
    /// Download progress (0.0 - 1.0).
    pub progress: f64,
    /// Total size in bytes.
    pub size_bytes: u64,
    /// Directory the torrent is saved into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
    /// Absolute path of the payload, when the backend reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
}

impl TorrentInfo {
    /// Whether the payload is fully on disk.
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0 || self.state == TorrentState::Seeding
    }

    /// Where the payload lives on disk, if known yet.
    ///
    /// Magnets without metadata report an empty name; those have no
    /// location until the backend resolves them.
    pub fn location(&self) -> Option<PathBuf> {
        if let Some(content) = self.content_path.as_deref().filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(content));
        }
        let save_path = self.save_path.as_deref().filter(|p| !p.is_empty())?;
        if self.name.is_empty() || self.name == self.hash {
            return None;
        }
        Some(Path::new(save_path).join(&self.name))
    }
}

/// Trait for torrent client backends.
///
/// Implementations recover from an expired session on their own: an
/// authorization failure triggers one re-login and one retry of the
/// original call before the error is surfaced.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Backend name for logging and metrics.
    fn name(&self) -> &str;

    /// Log in to the backend. `Ok(false)` means the credentials were refused.
    async fn authenticate(&self) -> Result<bool, TorrentClientError>;

    /// Add a torrent from a magnet URI; returns its info hash.
    async fn add_torrent(&self, magnet: &str) -> Result<String, TorrentClientError>;

    /// Get a specific torrent by hash.
    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError>;

    /// Remove a torrent.
    /// If `delete_files` is true, also delete downloaded files.
    async fn remove_torrent(&self, hash: &str, delete_files: bool)
        -> Result<(), TorrentClientError>;

    /// Whether the torrent has finished downloading.
    async fn is_complete(&self, hash: &str) -> Result<bool, TorrentClientError> {
        Ok(self.get_torrent(hash).await?.is_complete())
    }

    /// On-disk location of the torrent payload, `None` until known.
    async fn file_location(&self, hash: &str) -> Result<Option<PathBuf>, TorrentClientError> {
        Ok(self.get_torrent(hash).await?.location())
    }
}
