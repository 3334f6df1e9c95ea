//! Data model types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default rename template.
pub const DEFAULT_FORMAT: &str = "{n} - {s00e00}";
/// Default folder template, relative to the library folder.
pub const DEFAULT_FOLDER: &str = "{n}";

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Pipeline position of a release.
///
/// Forward order is `Downloading → Downloaded → Renamed → Moved → Completed`.
/// `Failed` is terminal and operator-set; nothing in the pipeline enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Downloading,
    Downloaded,
    Renamed,
    Moved,
    Completed,
    Failed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Downloading => "downloading",
            EntryState::Downloaded => "downloaded",
            EntryState::Renamed => "renamed",
            EntryState::Moved => "moved",
            EntryState::Completed => "completed",
            EntryState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Completed | EntryState::Failed)
    }

    /// The state after this one, `None` for terminal states.
    pub fn next(&self) -> Option<EntryState> {
        match self {
            EntryState::Downloading => Some(EntryState::Downloaded),
            EntryState::Downloaded => Some(EntryState::Renamed),
            EntryState::Renamed => Some(EntryState::Moved),
            EntryState::Moved => Some(EntryState::Completed),
            EntryState::Completed | EntryState::Failed => None,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "downloading" => Ok(EntryState::Downloading),
            "downloaded" => Ok(EntryState::Downloaded),
            "renamed" => Ok(EntryState::Renamed),
            "moved" => Ok(EntryState::Moved),
            "completed" => Ok(EntryState::Completed),
            "failed" => Ok(EntryState::Failed),
            other => Err(StoreError::InvalidData(format!("unknown entry state: {}", other))),
        }
    }
}

/// One release being acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub show_id: i64,
    /// Episode number as the release reports it (before the show's offset).
    pub episode: u32,
    pub version: String,
    pub state: EntryState,
    /// Info hash at the torrent client.
    pub torrent_hash: String,
    /// `None` only while downloading.
    pub file_path: Option<PathBuf>,
    pub created_manually: bool,
    pub last_update: DateTime<Utc>,
}

/// Fields for inserting a release.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub show_id: i64,
    pub episode: u32,
    pub version: String,
    pub torrent_hash: String,
    pub created_manually: bool,
}

/// A watched show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub id: i64,
    pub title: String,
    /// `None` means the default library.
    pub library_id: Option<i64>,
    pub desired_format: Option<String>,
    pub desired_folder: Option<String>,
    pub season: u32,
    pub episode_offset: i32,
    pub watch: bool,
    pub post_process: bool,
    pub preferred_resolution: Option<String>,
    pub preferred_release_group: Option<String>,
}

impl Show {
    pub fn format_template(&self) -> &str {
        self.desired_format.as_deref().unwrap_or(DEFAULT_FORMAT)
    }

    pub fn folder_template(&self) -> &str {
        self.desired_folder.as_deref().unwrap_or(DEFAULT_FOLDER)
    }

    /// Episode number with the show's offset applied, floored at zero.
    pub fn display_episode(&self, episode: u32) -> u32 {
        (episode as i64 + self.episode_offset as i64).max(0) as u32
    }
}

/// Fields for inserting a show.
#[derive(Debug, Clone)]
pub struct NewShow {
    pub title: String,
    pub library_id: Option<i64>,
    pub desired_format: Option<String>,
    pub desired_folder: Option<String>,
    pub season: u32,
    pub episode_offset: i32,
    pub watch: bool,
    pub post_process: bool,
    pub preferred_resolution: Option<String>,
    pub preferred_release_group: Option<String>,
}

impl NewShow {
    /// A watched season-1 show with default templates.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            library_id: None,
            desired_format: None,
            desired_folder: None,
            season: 1,
            episode_offset: 0,
            watch: true,
            post_process: false,
            preferred_resolution: None,
            preferred_release_group: None,
        }
    }
}

/// A destination folder for finished releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: i64,
    pub folder: PathBuf,
    pub is_default: bool,
}

/// Ledger row for a release sighting, keyed by `(title, release_group, resolution)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRelease {
    pub title: String,
    /// Empty when the release carries no group tag.
    pub release_group: String,
    /// Normalized resolution, empty when unknown.
    pub resolution: String,
    pub episode: u32,
    pub version: String,
    pub source_location: String,
    pub seen_at: DateTime<Utc>,
}

/// A queued or running re-encode. `ended_at == None` means not finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeJob {
    pub entry_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub initial_size: Option<u64>,
    pub final_size: Option<u64>,
}
