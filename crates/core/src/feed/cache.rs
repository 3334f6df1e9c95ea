use std::collections::HashMap;

use tokio::sync::RwLock;

use super::FeedItem;

/// Change-detection state for one feed source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedCacheEntry {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Content hash of the newest item seen in the last fetch.
    pub most_recent_hash: Option<String>,
}

/// In-memory change-detection state keyed by feed source name.
#[derive(Debug, Default)]
pub struct FeedCache {
    entries: RwLock<HashMap<String, FeedCacheEntry>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, source: &str) -> FeedCacheEntry {
        self.entries
            .read()
            .await
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Store the conditional-fetch tokens returned by the last response.
    pub async fn set_tokens(
        &self,
        source: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(source.to_string()).or_default();
        entry.etag = etag;
        entry.last_modified = last_modified;
    }

    /// Keep only the items newer than the last recorded head of the feed.
    ///
    /// Items are newest-first: the walk stops at the first item whose hash
    /// matches the recorded head. The new head is the first item's hash.
    pub async fn take_new_items(&self, source: &str, items: Vec<FeedItem>) -> Vec<FeedItem> {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(source.to_string()).or_default();

        let Some(head) = items.first().map(FeedItem::content_hash) else {
            return items;
        };
        let previous = entry.most_recent_hash.replace(head);

        match previous {
            Some(previous) => items
                .into_iter()
                .take_while(|item| item.content_hash() != previous)
                .collect(),
            None => items,
        }
    }

    /// Drop one source's state so its next fetch is unconditional and full.
    pub async fn forget(&self, source: &str) {
        self.entries.write().await.remove(source);
    }

    /// Forget everything; the next poll re-scans every feed in full.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(titles: &[&str]) -> Vec<FeedItem> {
        titles
            .iter()
            .map(|t| FeedItem::new(*t, format!("magnet:?dn={}", t)))
            .collect()
    }

    #[tokio::test]
    async fn test_first_fetch_is_all_new() {
        let cache = FeedCache::new();
        let new = cache.take_new_items("feed", items(&["c", "b", "a"])).await;
        assert_eq!(new.len(), 3);
        assert!(cache.get("feed").await.most_recent_hash.is_some());
    }

    #[tokio::test]
    async fn test_walk_stops_at_previous_head() {
        let cache = FeedCache::new();
        cache.take_new_items("feed", items(&["c", "b", "a"])).await;

        let new = cache
            .take_new_items("feed", items(&["e", "d", "c", "b", "a"]))
            .await;
        let titles: Vec<_> = new.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["e", "d"]);

        let again = cache
            .take_new_items("feed", items(&["e", "d", "c", "b", "a"]))
            .await;
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let cache = FeedCache::new();
        cache.take_new_items("one", items(&["a"])).await;
        let new = cache.take_new_items("two", items(&["a"])).await;
        assert_eq!(new.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_feed_keeps_head() {
        let cache = FeedCache::new();
        cache.take_new_items("feed", items(&["a"])).await;
        assert!(cache.take_new_items("feed", Vec::new()).await.is_empty());
        assert!(cache.take_new_items("feed", items(&["a"])).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let cache = FeedCache::new();
        cache
            .set_tokens("feed", Some("\"etag\"".into()), Some("yesterday".into()))
            .await;
        cache.take_new_items("feed", items(&["b", "a"])).await;

        cache.take_new_items("other", items(&["a"])).await;
        cache.forget("other").await;
        assert_eq!(cache.get("other").await, FeedCacheEntry::default());
        assert!(cache.get("feed").await.most_recent_hash.is_some());

        cache.clear().await;
        assert_eq!(cache.get("feed").await, FeedCacheEntry::default());
        assert_eq!(cache.take_new_items("feed", items(&["b", "a"])).await.len(), 2);
    }
}
