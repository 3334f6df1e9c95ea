//! Mock implementations of the external seams, for unit and end-to-end
//! tests that must not touch a real torrent daemon, tracker or ffmpeg.

mod mock_converter;
mod mock_feed_fetcher;
mod mock_torrent_client;
mod recording_dispatcher;

pub use mock_converter::{MockConverter, RecordedConversion};
pub use mock_feed_fetcher::MockFeedFetcher;
pub use mock_torrent_client::{MockTorrentClient, RecordedAdd};
pub use recording_dispatcher::RecordingDispatcher;

use std::path::Path;

use crate::store::{Entry, EntryState, Store, StoreError};

/// A magnet link whose info hash is `n` as 40 hex digits.
pub fn magnet(n: u64) -> String {
    format!("magnet:?xt=urn:btih:{:040x}", n)
}

/// The info hash carried by [`magnet`]`(n)`.
pub fn info_hash(n: u64) -> String {
    format!("{:040x}", n)
}

/// Walk a release forward one step at a time until it reaches `target`,
/// as the downloader would. `file_path` is stored with the final step.
pub fn advance_entry(
    store: &dyn Store,
    id: i64,
    target: EntryState,
    file_path: Option<&Path>,
) -> Result<Entry, StoreError> {
    let mut entry = store
        .get_entry(id)?
        .ok_or_else(|| StoreError::NotFound(format!("entry {}", id)))?;
    while entry.state != target {
        let next = entry.state.next().ok_or_else(|| {
            StoreError::Conflict(format!("entry {} is {}, past {}", id, entry.state, target))
        })?;
        let path = if next == target { file_path } else { None };
        entry = store.update_entry_state(id, entry.state, next, path)?;
    }
    Ok(entry)
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::feed::FeedItem;

    /// A SubsPlease-style feed item carrying [`super::magnet`]`(n)`.
    pub fn release_item(show: &str, episode: u32, resolution: &str, n: u64) -> FeedItem {
        FeedItem::new(
            format!(
                "[SubsPlease] {} - {:02} ({}) [{:08X}].mkv",
                show, episode, resolution, n
            ),
            super::magnet(n),
        )
    }

    /// An RSS document listing `items` in order.
    pub fn rss_document(items: &[FeedItem]) -> String {
        let body: String = items
            .iter()
            .map(|item| {
                format!(
                    "<item><title>{}</title><link>{}</link></item>",
                    item.title,
                    item.link.as_deref().unwrap_or("").replace('&', "&amp;")
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>test</title><link>https://example.org</link><description>test</description>{}</channel></rss>"#,
            body
        )
    }
}
