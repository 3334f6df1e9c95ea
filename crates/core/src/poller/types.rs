use chrono::Duration;
use serde::Serialize;
use thiserror::Error;

use crate::config::PollerConfig;
use crate::feed::FeedError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A feed item accepted for a watched show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollMatch {
    pub show_id: i64,
    pub episode: u32,
    /// Set when this poll created the release; `None` when one already existed.
    pub entry_id: Option<i64>,
}

/// Tunables taken from `[poller]`.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub fuzzy_cutoff: u8,
    pub seen_max_age: Duration,
}

impl From<&PollerConfig> for PollerSettings {
    fn from(config: &PollerConfig) -> Self {
        Self {
            fuzzy_cutoff: config.fuzzy_cutoff,
            seen_max_age: Duration::days(config.seen_release_max_age_days as i64),
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from(&PollerConfig::default())
    }
}
