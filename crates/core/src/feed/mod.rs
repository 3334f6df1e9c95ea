//! Release feeds: items, per-source parser hooks, change detection and
//! fetching.

mod cache;
mod fetcher;
mod source;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use cache::{FeedCache, FeedCacheEntry};
pub use fetcher::{parse_feed, FeedFetcher, FetchOutcome, HttpFeedFetcher};
pub use source::{EpisodeFn, FeedSource, IgnoreFn, ItemTextFn, ParserHooks, ShowNameFn};

/// Errors from fetching or parsing a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Failed to parse feed: {0}")]
    Parse(String),
}

/// One item of a release feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    /// Magnet link or `.torrent` URL.
    pub link: Option<String>,
    pub description: Option<String>,
    pub guid: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
}

impl FeedItem {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: Some(link.into()),
            description: None,
            guid: None,
            pub_date: None,
        }
    }

    /// Hex SHA-256 of title followed by description.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update(self.description.as_deref().unwrap_or("").as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_covers_description() {
        let a = FeedItem::new("Show - 01", "magnet:?xt=urn:btih:a");
        let mut b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);

        b.description = Some("v2 fix".into());
        assert_ne!(a.content_hash(), b.content_hash());

        // link is not part of the hash
        let mut c = a.clone();
        c.link = Some("https://example.org/1.torrent".into());
        assert_eq!(a.content_hash(), c.content_hash());
    }
}
