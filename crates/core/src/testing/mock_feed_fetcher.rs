use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::feed::{FeedError, FeedFetcher, FeedItem, FeedSource, FetchOutcome};

#[derive(Debug, Clone)]
struct Published {
    items: Vec<FeedItem>,
    etag: String,
}

/// Serves canned feeds keyed by source name.
///
/// Every [`MockFeedFetcher::publish`] bumps the source's ETag; a fetch that
/// presents the current ETag gets `NotModified`, like a well-behaved server.
#[derive(Debug, Default)]
pub struct MockFeedFetcher {
    feeds: RwLock<HashMap<String, Published>>,
    errors: RwLock<HashMap<String, FeedError>>,
    /// `(source, etag presented)` per fetch.
    calls: RwLock<Vec<(String, Option<String>)>>,
    revision: RwLock<u32>,
}

impl MockFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the feed served for `source`, newest item first.
    pub async fn publish(&self, source: &str, items: Vec<FeedItem>) {
        let mut revision = self.revision.write().await;
        *revision += 1;
        self.feeds.write().await.insert(
            source.to_string(),
            Published {
                items,
                etag: format!("\"rev-{}\"", *revision),
            },
        );
    }

    /// Fail the next fetch of `source`.
    pub async fn fail_next(&self, source: &str, error: FeedError) {
        self.errors.write().await.insert(source.to_string(), error);
    }

    pub async fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl FeedFetcher for MockFeedFetcher {
    async fn fetch(
        &self,
        source: &FeedSource,
        etag: Option<&str>,
        _last_modified: Option<&str>,
    ) -> Result<FetchOutcome, FeedError> {
        self.calls
            .write()
            .await
            .push((source.name.clone(), etag.map(str::to_string)));

        if let Some(err) = self.errors.write().await.remove(&source.name) {
            return Err(err);
        }

        let feeds = self.feeds.read().await;
        let published = feeds.get(&source.name).ok_or(FeedError::Status(404))?;
        if etag == Some(published.etag.as_str()) {
            return Ok(FetchOutcome::NotModified);
        }

        Ok(FetchOutcome::Fetched {
            items: published.items.clone(),
            etag: Some(published.etag.clone()),
            last_modified: None,
        })
    }
}
