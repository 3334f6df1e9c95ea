//! Release intake: the one place new releases enter the pipeline.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::metrics;
use crate::notify::NotificationDispatcher;
use crate::store::{EntryState, NewEntry, Store, StoreError};
use crate::torrent_client::{MagnetResolver, TorrentClient, TorrentClientError};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Show {0} not found")]
    ShowNotFound(i64),

    #[error("Show {show_id} already has a release for episode {episode}")]
    AlreadyHandled { show_id: i64, episode: u32 },

    #[error("Torrent client error: {0}")]
    TorrentClient(#[from] TorrentClientError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Hands a locator to the torrent client and records the new release.
pub struct ReleaseIntake {
    store: Arc<dyn Store>,
    client: Arc<dyn TorrentClient>,
    resolver: MagnetResolver,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl ReleaseIntake {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn TorrentClient>,
        resolver: MagnetResolver,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            client,
            resolver,
            notifier,
        }
    }

    /// Start acquiring `episode` of `show_id` from `locator`.
    ///
    /// Returns the id of the new release, which starts in `Downloading`.
    pub async fn begin_handling(
        &self,
        show_id: i64,
        episode: u32,
        locator: &str,
        version: &str,
        manual: bool,
    ) -> Result<i64, IntakeError> {
        if self.store.get_show(show_id)?.is_none() {
            return Err(IntakeError::ShowNotFound(show_id));
        }
        if self.store.entry_exists(show_id, episode)? {
            return Err(IntakeError::AlreadyHandled { show_id, episode });
        }

        let magnet = self.resolver.resolve(locator).await?;
        let torrent_hash = self.client.add_torrent(&magnet).await?;

        let entry = self
            .store
            .create_entry(&NewEntry {
                show_id,
                episode,
                version: version.to_string(),
                torrent_hash,
                created_manually: manual,
            })
            .map_err(|e| match e {
                StoreError::AlreadyExists(_) => IntakeError::AlreadyHandled { show_id, episode },
                other => other.into(),
            })?;

        info!(
            entry_id = entry.id,
            show_id,
            episode,
            version,
            manual,
            torrent = %entry.torrent_hash,
            "Release handed to {}",
            self.client.name()
        );
        metrics::RELEASES_CREATED
            .with_label_values(&[if manual { "manual" } else { "poll" }])
            .inc();
        self.notifier.dispatch(&entry, EntryState::Downloading);

        Ok(entry.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewShow, SqliteStore};
    use crate::testing::{magnet, MockTorrentClient, RecordingDispatcher};
    use std::time::Duration;

    struct Fixture {
        intake: ReleaseIntake,
        store: Arc<SqliteStore>,
        client: Arc<MockTorrentClient>,
        notes: Arc<RecordingDispatcher>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let client = Arc::new(MockTorrentClient::new());
        let notes = Arc::new(RecordingDispatcher::new());
        let intake = ReleaseIntake::new(
            store.clone(),
            client.clone(),
            MagnetResolver::new(Duration::from_secs(5)).unwrap(),
            notes.clone(),
        );
        Fixture {
            intake,
            store,
            client,
            notes,
        }
    }

    #[tokio::test]
    async fn test_begin_handling_creates_downloading_entry() {
        let f = fixture();
        let show = f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();

        let id = f
            .intake
            .begin_handling(show.id, 12, &magnet(1), "v1", true)
            .await
            .unwrap();

        let entry = f.store.get_entry(id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Downloading);
        assert_eq!(entry.version, "v1");
        assert!(entry.created_manually);
        assert_eq!(f.client.added().await.len(), 1);
        assert_eq!(f.notes.states(), vec![(id, EntryState::Downloading)]);
    }

    #[tokio::test]
    async fn test_duplicate_episode_rejected() {
        let f = fixture();
        let show = f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();
        f.intake
            .begin_handling(show.id, 12, &magnet(1), "v0", false)
            .await
            .unwrap();

        let err = f
            .intake
            .begin_handling(show.id, 12, &magnet(2), "v0", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::AlreadyHandled { episode: 12, .. }));
        assert_eq!(f.client.added().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_show() {
        let f = fixture();
        let err = f
            .intake
            .begin_handling(42, 1, &magnet(1), "v0", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::ShowNotFound(42)));
    }

    #[tokio::test]
    async fn test_client_failure_creates_nothing() {
        let f = fixture();
        let show = f.store.create_show(&NewShow::new("Chainsaw Man")).unwrap();
        f.client
            .set_next_error(TorrentClientError::ConnectionFailed("down".into()))
            .await;

        let err = f
            .intake
            .begin_handling(show.id, 1, &magnet(1), "v0", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::TorrentClient(_)));
        assert!(!f.store.entry_exists(show.id, 1).unwrap());
        assert!(f.notes.states().is_empty());
    }
}
