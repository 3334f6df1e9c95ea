//! Mock torrent client for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use crate::torrent_client::{
    extract_hash_from_magnet, TorrentClient, TorrentClientError, TorrentInfo, TorrentState,
};

/// A recorded `add_torrent` call.
#[derive(Debug, Clone)]
pub struct RecordedAdd {
    pub magnet: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

/// In-memory stand-in for a torrent daemon.
///
/// Added torrents start with no name, so their location is unknown until a
/// test calls [`MockTorrentClient::set_location`], mirroring a daemon still
/// fetching metadata.
///
/// ```rust,ignore
/// let client = MockTorrentClient::new();
/// let hash = client.add_torrent(&magnet(1)).await?;
/// client.set_location(&hash, "/downloads", "Show - 01.mkv").await;
/// client.set_complete(&hash).await;
/// ```
#[derive(Debug, Default)]
pub struct MockTorrentClient {
    added: RwLock<Vec<RecordedAdd>>,
    torrents: RwLock<HashMap<String, TorrentInfo>>,
    removed: RwLock<Vec<String>>,
    /// If set, the next operation fails with this error.
    next_error: RwLock<Option<TorrentClientError>>,
    hash_counter: AtomicU32,
    auth_calls: AtomicU32,
}

impl MockTorrentClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn added(&self) -> Vec<RecordedAdd> {
        self.added.read().await.clone()
    }

    pub async fn removed(&self) -> Vec<String> {
        self.removed.read().await.clone()
    }

    pub fn auth_calls(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub async fn set_next_error(&self, error: TorrentClientError) {
        *self.next_error.write().await = Some(error);
    }

    /// Report the payload as `save_path/name`.
    pub async fn set_location(&self, hash: &str, save_path: impl AsRef<Path>, name: &str) {
        if let Some(t) = self.torrents.write().await.get_mut(hash) {
            t.save_path = Some(save_path.as_ref().to_string_lossy().into_owned());
            t.name = name.to_string();
        }
    }

    pub async fn set_progress(&self, hash: &str, progress: f64) {
        if let Some(t) = self.torrents.write().await.get_mut(hash) {
            t.progress = progress.clamp(0.0, 1.0);
            t.state = if t.progress >= 1.0 {
                TorrentState::Seeding
            } else {
                TorrentState::Downloading
            };
        }
    }

    pub async fn set_complete(&self, hash: &str) {
        self.set_progress(hash, 1.0).await;
    }

    pub async fn complete_all(&self) {
        for t in self.torrents.write().await.values_mut() {
            t.progress = 1.0;
            t.state = TorrentState::Seeding;
        }
    }

    /// Pre-populate a torrent, as if added before this process started.
    pub async fn insert(&self, info: TorrentInfo) {
        self.torrents.write().await.insert(info.hash.clone(), info);
    }

    pub async fn has_torrent(&self, hash: &str) -> bool {
        self.torrents.read().await.contains_key(hash)
    }

    async fn take_error(&self) -> Result<(), TorrentClientError> {
        match self.next_error.write().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn authenticate(&self) -> Result<bool, TorrentClientError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        self.take_error().await?;
        Ok(true)
    }

    async fn add_torrent(&self, magnet: &str) -> Result<String, TorrentClientError> {
        self.take_error().await?;

        let hash = extract_hash_from_magnet(magnet).unwrap_or_else(|| {
            let n = self.hash_counter.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{:040x}", 0xfeed_0000_u64 + n as u64)
        });

        self.added.write().await.push(RecordedAdd {
            magnet: magnet.to_string(),
            hash: hash.clone(),
            timestamp: Utc::now(),
        });
        self.torrents
            .write()
            .await
            .entry(hash.clone())
            .or_insert_with(|| TorrentInfo {
                hash: hash.clone(),
                name: String::new(),
                state: TorrentState::Downloading,
                progress: 0.0,
                size_bytes: 0,
                save_path: None,
                content_path: None,
            });

        Ok(hash)
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        self.take_error().await?;
        self.torrents
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        _delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        self.take_error().await?;
        if self.torrents.write().await.remove(hash).is_none() {
            return Err(TorrentClientError::TorrentNotFound(hash.to_string()));
        }
        self.removed.write().await.push(hash.to_string());
        Ok(())
    }
}
