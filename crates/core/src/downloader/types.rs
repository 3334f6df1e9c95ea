use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::DownloaderConfig;
use crate::store::StoreError;
use crate::torrent_client::TorrentClientError;

#[derive(Debug, Error)]
pub enum DownloaderError {
    #[error("show {0} not found")]
    ShowNotFound(i64),

    #[error("no library configured for show {0}")]
    NoLibrary(i64),

    #[error("entry {0} has no file path")]
    MissingFilePath(i64),

    #[error("torrent client error: {0}")]
    TorrentClient(#[from] TorrentClientError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloaderError {
    /// Errors that need an operator rather than another tick.
    pub fn is_inconsistency(&self) -> bool {
        matches!(
            self,
            Self::ShowNotFound(_)
                | Self::NoLibrary(_)
                | Self::MissingFilePath(_)
                | Self::TorrentClient(TorrentClientError::TorrentNotFound(_))
        )
    }
}

/// Tunables taken from `[downloader]`.
#[derive(Debug, Clone)]
pub struct DownloaderSettings {
    /// Skip the back-link symlink after a move.
    pub in_container: bool,
    pub stale_after: Duration,
}

impl From<&DownloaderConfig> for DownloaderSettings {
    fn from(config: &DownloaderConfig) -> Self {
        Self {
            in_container: config.in_container,
            stale_after: Duration::seconds(config.stale_after_secs as i64),
        }
    }
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self::from(&DownloaderConfig::default())
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub scanned: usize,
    /// Transitions persisted during the pass.
    pub transitions: usize,
    pub completed: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloaderStatus {
    pub last_tick_at: Option<DateTime<Utc>>,
    pub unfinished: usize,
    /// Unfinished releases untouched for longer than `stale_after`.
    pub stale: usize,
}
