use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::feed::{FeedCache, FeedFetcher, FeedItem, FeedSource, FetchOutcome};
use crate::intake::{IntakeError, ReleaseIntake};
use crate::matcher::match_title;
use crate::metrics;
use crate::parser::{normalize_resolution, parse_release_name};
use crate::store::{SeenRelease, Show, Store};

use super::types::{PollMatch, PollerError, PollerSettings};

/// What one source contributed to a poll.
#[derive(Default)]
struct SourceOutcome {
    matches: Vec<PollMatch>,
    /// A hand-off failed; the source must be re-scanned next time.
    retry: bool,
}

pub struct Poller {
    sources: Vec<FeedSource>,
    fetcher: Arc<dyn FeedFetcher>,
    cache: FeedCache,
    store: Arc<dyn Store>,
    intake: Arc<ReleaseIntake>,
    settings: PollerSettings,
}

impl Poller {
    pub fn new(
        sources: Vec<FeedSource>,
        fetcher: Arc<dyn FeedFetcher>,
        store: Arc<dyn Store>,
        intake: Arc<ReleaseIntake>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            sources,
            fetcher,
            cache: FeedCache::new(),
            store,
            intake,
            settings,
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    /// Clear all change-detection state; the next poll re-scans every feed.
    pub async fn reset_feed_cache(&self) {
        self.cache.clear().await;
        info!("Feed cache cleared");
    }

    /// Poll every source once. `force` clears the feed cache first.
    ///
    /// A failing source is logged and skipped. Only a store failure while
    /// loading the watch list aborts the whole poll.
    pub async fn poll(&self, force: bool) -> Result<Vec<PollMatch>, PollerError> {
        if force {
            self.reset_feed_cache().await;
        }

        let shows = self.store.list_shows()?;
        let mut found = Vec::new();

        for source in &self.sources {
            match self.poll_source(source, &shows).await {
                Ok(outcome) => {
                    if outcome.retry {
                        self.cache.forget(&source.name).await;
                    }
                    found.extend(outcome.matches);
                }
                Err(e) => {
                    warn!(feed = %source.name, error = %e, "Feed poll failed");
                    metrics::FEED_POLLS
                        .with_label_values(&[source.name.as_str(), "error"])
                        .inc();
                }
            }
        }

        self.evict_seen();

        info!(
            sources = self.sources.len(),
            matches = found.len(),
            created = found.iter().filter(|m| m.entry_id.is_some()).count(),
            "Poll finished"
        );
        Ok(found)
    }

    async fn poll_source(
        &self,
        source: &FeedSource,
        shows: &[Show],
    ) -> Result<SourceOutcome, PollerError> {
        let cached = self.cache.get(&source.name).await;
        let outcome = self
            .fetcher
            .fetch(
                source,
                cached.etag.as_deref(),
                cached.last_modified.as_deref(),
            )
            .await?;

        let items = match outcome {
            FetchOutcome::NotModified => {
                metrics::FEED_POLLS
                    .with_label_values(&[source.name.as_str(), "not_modified"])
                    .inc();
                return Ok(SourceOutcome::default());
            }
            FetchOutcome::Fetched {
                items,
                etag,
                last_modified,
            } => {
                metrics::FEED_POLLS
                    .with_label_values(&[source.name.as_str(), "fetched"])
                    .inc();
                self.cache
                    .set_tokens(&source.name, etag, last_modified)
                    .await;
                self.cache.take_new_items(&source.name, items).await
            }
        };

        debug!(feed = %source.name, new_items = items.len(), "Feed fetched");
        metrics::FEED_NEW_ITEMS
            .with_label_values(&[source.name.as_str()])
            .inc_by(items.len() as u64);

        let mut outcome = SourceOutcome::default();
        for item in &items {
            match self.consider_item(source, item, shows).await {
                Ok(Some(m)) => outcome.matches.push(m),
                Ok(None) => {}
                Err(e) => {
                    warn!(feed = %source.name, title = %item.title, error = %e, "Could not hand off release");
                    outcome.retry = true;
                }
            }
        }
        Ok(outcome)
    }

    /// Run one item through parse, ledger, match and intake.
    async fn consider_item(
        &self,
        source: &FeedSource,
        item: &FeedItem,
        shows: &[Show],
    ) -> Result<Option<PollMatch>, IntakeError> {
        let hooks = &source.hooks;
        if !hooks.keep(item) {
            debug!(feed = %source.name, title = %item.title, "Item ignored by source");
            return Ok(None);
        }

        let file_name = hooks.file_name(item);
        let (Some(show_name), Some(episode)) =
            (hooks.show_name(&file_name), hooks.episode_number(&file_name))
        else {
            debug!(feed = %source.name, file_name = %file_name, "No show/episode in item");
            return Ok(None);
        };

        let parsed = parse_release_name(&file_name);
        let group = parsed.release_group.clone().unwrap_or_default();
        let resolution = parsed
            .resolution
            .as_deref()
            .map(normalize_resolution)
            .unwrap_or_default();
        let version = parsed.version_or_default();
        let link = hooks.link(item);

        let seen = SeenRelease {
            title: show_name.clone(),
            release_group: group.clone(),
            resolution: resolution.clone(),
            episode,
            version: version.clone(),
            source_location: link.clone().unwrap_or_default(),
            seen_at: Utc::now(),
        };
        if let Err(e) = self.store.record_seen(&seen) {
            warn!(title = %show_name, error = %e, "Failed to record sighting");
        }

        let Some(best) = match_title(&show_name, shows.iter().map(|s| s.title.as_str())) else {
            return Ok(None);
        };
        if best.score < self.settings.fuzzy_cutoff {
            debug!(title = %show_name, best = %best.title, score = best.score, "Below match cutoff");
            return Ok(None);
        }
        let show = &shows[best.index];
        metrics::FEED_MATCHES.inc();

        if !show.watch {
            debug!(show_id = show.id, "Show not watched");
            return Ok(None);
        }
        if !prefers(show.preferred_resolution.as_deref(), &resolution, true)
            || !prefers(show.preferred_release_group.as_deref(), &group, false)
        {
            debug!(show_id = show.id, group = %group, resolution = %resolution, "Release does not meet show preferences");
            return Ok(None);
        }

        if self.store.entry_exists(show.id, episode)? {
            debug!(show_id = show.id, episode, "Release already handled");
            return Ok(Some(PollMatch {
                show_id: show.id,
                episode,
                entry_id: None,
            }));
        }

        let Some(link) = link else {
            warn!(feed = %source.name, title = %item.title, "Matched item has no link");
            return Ok(None);
        };

        match self
            .intake
            .begin_handling(show.id, episode, &link, &version, false)
            .await
        {
            Ok(entry_id) => Ok(Some(PollMatch {
                show_id: show.id,
                episode,
                entry_id: Some(entry_id),
            })),
            // another item in this poll got there first
            Err(IntakeError::AlreadyHandled { .. }) => Ok(Some(PollMatch {
                show_id: show.id,
                episode,
                entry_id: None,
            })),
            Err(e) => Err(e),
        }
    }

    fn evict_seen(&self) {
        let cutoff = Utc::now() - self.settings.seen_max_age;
        match self.store.evict_seen_before(cutoff) {
            Ok(0) => {}
            Ok(n) => debug!(evicted = n, "Evicted old sightings"),
            Err(e) => warn!(error = %e, "Failed to evict old sightings"),
        }
    }
}

/// True when no preference is set or `actual` satisfies it.
fn prefers(preferred: Option<&str>, actual: &str, is_resolution: bool) -> bool {
    match preferred.filter(|p| !p.is_empty()) {
        None => true,
        Some(p) if is_resolution => normalize_resolution(p) == actual,
        Some(p) => p.eq_ignore_ascii_case(actual),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedError;
    use crate::notify::NoopDispatcher;
    use crate::store::{EntryState, NewShow, SqliteStore};
    use crate::testing::fixtures::release_item;
    use crate::testing::{magnet, MockFeedFetcher, MockTorrentClient};
    use crate::torrent_client::{MagnetResolver, TorrentClientError};
    use std::time::Duration;

    struct Fixture {
        poller: Poller,
        fetcher: Arc<MockFeedFetcher>,
        store: Arc<SqliteStore>,
        client: Arc<MockTorrentClient>,
    }

    fn fixture(sources: &[&str]) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let client = Arc::new(MockTorrentClient::new());
        let fetcher = Arc::new(MockFeedFetcher::new());
        let intake = Arc::new(ReleaseIntake::new(
            store.clone(),
            client.clone(),
            MagnetResolver::new(Duration::from_secs(5)).unwrap(),
            Arc::new(NoopDispatcher),
        ));
        let poller = Poller::new(
            sources
                .iter()
                .map(|s| FeedSource::new(*s, format!("https://{}.example/rss", s)))
                .collect(),
            fetcher.clone(),
            store.clone(),
            intake,
            PollerSettings::default(),
        );
        Fixture {
            poller,
            fetcher,
            store,
            client,
        }
    }

    #[tokio::test]
    async fn test_poll_creates_releases_for_matches() {
        let f = fixture(&["subs"]);
        let show = f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();
        f.fetcher
            .publish(
                "subs",
                vec![
                    release_item("Chainsaw Man", 12, "1080p", 1),
                    release_item("Some Other Show", 3, "1080p", 2),
                ],
            )
            .await;

        let found = f.poller.poll(false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].show_id, show.id);
        assert_eq!(found[0].episode, 12);

        let entry = f.store.get_entry(found[0].entry_id.unwrap()).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Downloading);
        assert_eq!(entry.version, "v0");
        assert!(!entry.created_manually);
        assert_eq!(f.client.added().await[0].magnet, magnet(1));
    }

    #[tokio::test]
    async fn test_unchanged_feed_yields_nothing() {
        let f = fixture(&["subs"]);
        f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();
        f.fetcher
            .publish("subs", vec![release_item("Chainsaw Man", 12, "1080p", 1)])
            .await;

        assert_eq!(f.poller.poll(false).await.unwrap().len(), 1);
        assert!(f.poller.poll(false).await.unwrap().is_empty());

        // second fetch presented the stored etag
        let calls = f.fetcher.calls().await;
        assert!(calls[0].1.is_none());
        assert!(calls[1].1.is_some());
    }

    #[tokio::test]
    async fn test_forced_poll_rescans_without_duplicates() {
        let f = fixture(&["subs"]);
        f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();
        f.fetcher
            .publish("subs", vec![release_item("Chainsaw Man", 12, "1080p", 1)])
            .await;

        let first = f.poller.poll(false).await.unwrap();
        let again = f.poller.poll(true).await.unwrap();
        assert_eq!(first.len(), again.len());
        assert_eq!(again[0].entry_id, None);
        assert_eq!(f.client.added().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_source_is_isolated() {
        let f = fixture(&["broken", "subs"]);
        f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();
        f.fetcher
            .publish("subs", vec![release_item("Chainsaw Man", 12, "1080p", 1)])
            .await;
        f.fetcher
            .fail_next("broken", FeedError::Parse("bad xml".into()))
            .await;

        assert_eq!(f.poller.poll(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preferences_and_watch_flag() {
        let f = fixture(&["subs"]);
        let mut wanted = NewShow::new("Chainsaw Man");
        wanted.preferred_resolution = Some("1920x1080".into());
        wanted.preferred_release_group = Some("subsplease".into());
        f.store.create_show(&wanted).unwrap();

        let mut paused = NewShow::new("Spy x Family");
        paused.watch = false;
        f.store.create_show(&paused).unwrap();

        f.fetcher
            .publish(
                "subs",
                vec![
                    release_item("Chainsaw Man", 11, "720p", 1),
                    release_item("Chainsaw Man", 12, "1080p", 2),
                    release_item("Spy x Family", 5, "1080p", 3),
                ],
            )
            .await;

        let found = f.poller.poll(false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].episode, 12);

        // unwatched sightings still land in the ledger
        let seen = f.store.get_seen("Spy x Family", "SubsPlease", "1080p").unwrap();
        assert_eq!(seen.unwrap().episode, 5);
    }

    #[tokio::test]
    async fn test_ignore_hook_and_missing_episode() {
        let f = fixture(&[]);
        f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();
        let source = FeedSource::new("subs", "https://subs.example/rss").with_hooks(
            crate::feed::ParserHooks {
                ignore_logic: Some(Arc::new(|item: &FeedItem| !item.title.contains("720p"))),
                ..Default::default()
            },
        );
        let poller = Poller {
            sources: vec![source],
            ..f.poller
        };
        f.fetcher
            .publish(
                "subs",
                vec![
                    release_item("Chainsaw Man", 12, "720p", 1),
                    FeedItem::new("Chainsaw Man Batch", magnet(2)),
                ],
            )
            .await;

        assert!(poller.poll(false).await.unwrap().is_empty());
        assert!(f.client.added().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_handoff_is_retried() {
        let f = fixture(&["subs"]);
        f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();
        f.fetcher
            .publish("subs", vec![release_item("Chainsaw Man", 12, "1080p", 1)])
            .await;
        f.client
            .set_next_error(TorrentClientError::ConnectionFailed("down".into()))
            .await;

        assert!(f.poller.poll(false).await.unwrap().is_empty());
        let found = f.poller.poll(false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].entry_id.is_some());
    }

    #[test]
    fn test_prefers() {
        assert!(prefers(None, "720p", true));
        assert!(prefers(Some(""), "720p", true));
        assert!(prefers(Some("1920x1080"), "1080p", true));
        assert!(!prefers(Some("1080p"), "720p", true));
        assert!(prefers(Some("subsplease"), "SubsPlease", false));
        assert!(!prefers(Some("Erai-raws"), "SubsPlease", false));
    }
}
