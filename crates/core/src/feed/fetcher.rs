use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{FeedError, FeedItem, FeedSource};

/// Result of a conditional feed fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The server reported no change since the supplied tokens.
    NotModified,
    Fetched {
        /// Newest first, as published.
        items: Vec<FeedItem>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

/// Fetches a feed, honouring conditional-request tokens.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &FeedSource,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome, FeedError>;
}

/// RSS over HTTP.
pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kanshi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(
        &self,
        source: &FeedSource,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome, FeedError> {
        let mut request = self.client.get(&source.url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedError::Http(format!("fetch {}: {}", source.name, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(feed = %source.name, "Feed not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedError::Http(format!("read {}: {}", source.name, e)))?;

        Ok(FetchOutcome::Fetched {
            items: parse_feed(&bytes)?,
            etag,
            last_modified,
        })
    }
}

/// Parse an RSS document into feed items.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedItem>, FeedError> {
    let channel = rss::Channel::read_from(bytes).map_err(|e| FeedError::Parse(e.to_string()))?;

    Ok(channel
        .items()
        .iter()
        .map(|item: &rss::Item| {
            let pub_date: Option<DateTime<Utc>> = item
                .pub_date()
                .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            // some trackers only publish the torrent as an enclosure
            let link = item
                .link()
                .map(str::to_string)
                .or_else(|| item.enclosure().map(|e| e.url().to_string()));

            FeedItem {
                title: item.title().unwrap_or("").trim().to_string(),
                link,
                description: item.description().map(str::to_string),
                guid: item.guid().map(|g| g.value().to_string()),
                pub_date,
            }
        })
        .collect())
}
