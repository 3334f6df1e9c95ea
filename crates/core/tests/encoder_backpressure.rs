//! Completed releases of post-processed shows flow into the bounded
//! re-encode queue without ever holding up reconciliation.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use kanshi_core::{
    encoder::scratch_path,
    store::{EntryState, NewEntry, NewShow},
    testing::{info_hash, magnet, MockConverter, MockTorrentClient},
    Downloader, DownloaderSettings, Encoder, EncoderSettings, NoopDispatcher, SqliteStore, Store,
    TorrentClient,
};

struct TestHarness {
    store: Arc<SqliteStore>,
    client: Arc<MockTorrentClient>,
    converter: Arc<MockConverter>,
    encoder: Arc<Encoder>,
    downloader: Downloader,
    downloads: TempDir,
    _library: TempDir,
}

impl TestHarness {
    fn new(max_encodes: usize) -> Self {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let library = TempDir::new().unwrap();
        store.create_library(library.path(), true).unwrap();
        let client = Arc::new(MockTorrentClient::new());
        let converter = Arc::new(MockConverter::gated());
        let encoder = Arc::new(Encoder::new(
            store.clone(),
            converter.clone(),
            EncoderSettings {
                enabled: true,
                max_encodes,
            },
        ));
        let downloader = Downloader::new(
            store.clone(),
            client.clone(),
            Arc::new(NoopDispatcher),
            DownloaderSettings::default(),
        )
        .with_encoder(encoder.clone());

        Self {
            store,
            client,
            converter,
            encoder,
            downloader,
            downloads: TempDir::new().unwrap(),
            _library: library,
        }
    }

    /// A finished download of `episode` for a show.
    async fn downloaded_release(&self, show_id: i64, episode: u32) -> i64 {
        let n = episode as u64;
        let hash = self.client.add_torrent(&magnet(n)).await.unwrap();
        let entry = self
            .store
            .create_entry(&NewEntry {
                show_id,
                episode,
                version: "v0".into(),
                torrent_hash: hash,
                created_manually: false,
            })
            .unwrap();
        let name = format!("Frieren - {:02} (1080p).mkv", episode);
        std::fs::write(self.downloads.path().join(&name), b"original video").unwrap();
        self.client
            .set_location(&info_hash(n), self.downloads.path(), &name)
            .await;
        self.client.set_complete(&info_hash(n)).await;
        entry.id
    }
}

async fn until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_completion_queues_bounded_encodes() {
    let h = TestHarness::new(2);
    let show = h
        .store
        .create_show(&NewShow {
            post_process: true,
            ..NewShow::new("Frieren")
        })
        .unwrap();
    let mut ids = Vec::new();
    for episode in 1..=5 {
        ids.push(h.downloaded_release(show.id, episode).await);
    }

    // reconciliation finishes even though every transcode is parked
    let summary = h.downloader.check_show_entries().await.unwrap();
    assert_eq!(summary.completed, 5);
    for id in &ids {
        assert_eq!(
            h.store.get_entry(*id).unwrap().unwrap().state,
            EntryState::Completed
        );
    }

    let converter = h.converter.clone();
    until(move || converter.active() == 2).await;
    let status = h.encoder.status();
    assert_eq!(status.active.len(), 2);
    assert_eq!(status.queued.len(), 3);
    assert_eq!(h.store.pending_encode_jobs().unwrap().len(), 5);

    // one finishes, the oldest queued job takes its slot
    h.converter.release(1);
    let encoder = h.encoder.clone();
    until(move || encoder.status().queued.len() == 2).await;
    assert_eq!(h.encoder.status().active.len(), 2);
    assert_eq!(h.encoder.status().queued, ids[3..].to_vec());

    h.converter.release(4);
    h.encoder.wait_idle().await;

    assert_eq!(h.converter.max_active(), 2);
    assert!(h.store.pending_encode_jobs().unwrap().is_empty());
    for id in ids {
        let entry = h.store.get_entry(id).unwrap().unwrap();
        let path = entry.file_path.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"encoded");
        assert!(!scratch_path(&path).exists());
        let job = h.store.get_encode_job(id).unwrap().unwrap();
        assert_eq!(job.initial_size, Some(14));
        assert_eq!(job.final_size, Some(7));
    }
}

#[tokio::test]
async fn test_shows_without_post_processing_are_not_encoded() {
    let h = TestHarness::new(1);
    let show = h.store.create_show(&NewShow::new("Frieren")).unwrap();
    let id = h.downloaded_release(show.id, 1).await;

    h.downloader.check_show_entries().await.unwrap();

    assert_eq!(
        h.store.get_entry(id).unwrap().unwrap().state,
        EntryState::Completed
    );
    assert!(h.store.get_encode_job(id).unwrap().is_none());
    assert!(h.encoder.status().queued.is_empty());
}
