use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::encoder::Encoder;
use crate::metrics;
use crate::notify::NotificationDispatcher;
use crate::store::{Entry, EntryState, Library, Show, Store, StoreError};
use crate::torrent_client::TorrentClient;

use super::files::{link_back, move_file, parent_readable, resolve_artifact};
use super::naming;
use super::types::{DownloaderError, DownloaderSettings, DownloaderStatus, TickSummary};

/// What one release did during a pass.
#[derive(Debug, Default)]
struct Advance {
    transitions: usize,
    completed: bool,
}

/// Drives releases through the download state machine.
pub struct Downloader {
    store: Arc<dyn Store>,
    client: Arc<dyn TorrentClient>,
    notifier: Arc<dyn NotificationDispatcher>,
    encoder: Option<Arc<Encoder>>,
    settings: DownloaderSettings,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
    /// Held for a whole pass; passes never overlap.
    pass: Mutex<()>,
}

impl Downloader {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn TorrentClient>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: DownloaderSettings,
    ) -> Self {
        Self {
            store,
            client,
            notifier,
            encoder: None,
            settings,
            last_tick_at: RwLock::new(None),
            pass: Mutex::new(()),
        }
    }

    /// Hand completed releases of post-processed shows to `encoder`.
    pub fn with_encoder(mut self, encoder: Arc<Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// One reconciliation pass over every unfinished release.
    ///
    /// Releases are processed one after another; a release that fails is
    /// logged and left where it is for the next pass. A call made while
    /// another pass is running waits for it, then scans afresh.
    pub async fn check_show_entries(&self) -> Result<TickSummary, DownloaderError> {
        let _pass = self.pass.lock().await;
        let timer = metrics::RECONCILE_DURATION
            .with_label_values(&[])
            .start_timer();
        let entries = self.store.list_unfinished_entries()?;
        let mut summary = TickSummary {
            scanned: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            let (id, state) = (entry.id, entry.state);
            match self.process_entry(entry).await {
                Ok(advance) => {
                    summary.transitions += advance.transitions;
                    summary.completed += advance.completed as usize;
                }
                Err(DownloaderError::Store(StoreError::Conflict(reason))) => {
                    debug!(
                        entry_id = id,
                        state = %state,
                        reason = %reason,
                        "Release changed underneath this pass"
                    );
                }
                Err(e) if e.is_inconsistency() => {
                    summary.errors += 1;
                    error!(entry_id = id, state = %state, error = %e, "Release needs attention");
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!(entry_id = id, state = %state, error = %e, "Release will be retried");
                }
            }
        }

        *self.last_tick_at.write().await = Some(Utc::now());
        match self.stale_entries() {
            Ok(stale) => metrics::STALE_ENTRIES.set(stale.len() as i64),
            Err(e) => warn!(error = %e, "Could not count stale releases"),
        }
        timer.observe_duration();

        if summary.transitions > 0 || summary.errors > 0 {
            info!(
                scanned = summary.scanned,
                transitions = summary.transitions,
                completed = summary.completed,
                errors = summary.errors,
                "Reconciliation pass finished"
            );
        }
        Ok(summary)
    }

    /// Unfinished releases whose last update is older than the stale threshold.
    pub fn stale_entries(&self) -> Result<Vec<Entry>, DownloaderError> {
        let cutoff = Utc::now() - self.settings.stale_after;
        Ok(self
            .store
            .list_unfinished_entries()?
            .into_iter()
            .filter(|e| e.last_update < cutoff)
            .collect())
    }

    pub async fn status(&self) -> Result<DownloaderStatus, DownloaderError> {
        let cutoff = Utc::now() - self.settings.stale_after;
        let unfinished = self.store.list_unfinished_entries()?;
        Ok(DownloaderStatus {
            last_tick_at: *self.last_tick_at.read().await,
            stale: unfinished.iter().filter(|e| e.last_update < cutoff).count(),
            unfinished: unfinished.len(),
        })
    }

    async fn process_entry(&self, mut entry: Entry) -> Result<Advance, DownloaderError> {
        let mut advance = Advance::default();
        if entry.state.is_terminal() {
            return Ok(advance);
        }

        let show = self
            .store
            .get_show(entry.show_id)?
            .ok_or(DownloaderError::ShowNotFound(entry.show_id))?;

        if entry.state == EntryState::Downloading {
            let Some(location) = self.client.file_location(&entry.torrent_hash).await? else {
                debug!(entry_id = entry.id, "Torrent location not known yet");
                return Ok(advance);
            };
            if !parent_readable(&location).await {
                warn!(entry_id = entry.id, path = %location.display(), "Download directory not readable");
                return Ok(advance);
            }
            if entry.file_path.as_deref() != Some(location.as_path()) {
                self.store.set_entry_file_path(entry.id, &location)?;
                entry.file_path = Some(location);
            }
        }

        if !self.client.is_complete(&entry.torrent_hash).await? {
            return Ok(advance);
        }

        loop {
            let next = match entry.state {
                EntryState::Downloading => {
                    let location = self.file_path(&entry)?;
                    let Some(artifact) = resolve_artifact(&location, entry.episode).await? else {
                        debug!(entry_id = entry.id, path = %location.display(), "Episode file not found yet");
                        return Ok(advance);
                    };
                    self.transition(&entry, EntryState::Downloaded, Some(&artifact))?
                }
                EntryState::Downloaded => {
                    let renamed = self.rename(&entry, &show).await?;
                    self.transition(&entry, EntryState::Renamed, Some(&renamed))?
                }
                EntryState::Renamed => {
                    let moved = self.move_to_library(&entry, &show).await?;
                    self.transition(&entry, EntryState::Moved, Some(&moved))?
                }
                EntryState::Moved => {
                    let done = self.transition(&entry, EntryState::Completed, None)?;
                    advance.completed = true;
                    self.post_process(&done, &show).await;
                    done
                }
                EntryState::Completed | EntryState::Failed => break,
            };
            advance.transitions += 1;
            entry = next;
        }

        Ok(advance)
    }

    fn file_path(&self, entry: &Entry) -> Result<PathBuf, DownloaderError> {
        entry
            .file_path
            .clone()
            .ok_or(DownloaderError::MissingFilePath(entry.id))
    }

    /// Persist, count and announce one step.
    fn transition(
        &self,
        entry: &Entry,
        state: EntryState,
        file_path: Option<&Path>,
    ) -> Result<Entry, DownloaderError> {
        let updated = self
            .store
            .update_entry_state(entry.id, entry.state, state, file_path)?;
        info!(
            entry_id = entry.id,
            show_id = entry.show_id,
            episode = entry.episode,
            from = %entry.state,
            to = %state,
            "Release advanced"
        );
        metrics::ENTRY_TRANSITIONS
            .with_label_values(&[state.as_str()])
            .inc();
        self.notifier.dispatch(&updated, state);
        Ok(updated)
    }

    /// Rename the payload in place to the show's format template.
    async fn rename(&self, entry: &Entry, show: &Show) -> Result<PathBuf, DownloaderError> {
        let current = self.file_path(entry)?;
        let target = current.with_file_name(naming::file_name(
            show,
            entry.episode,
            &extension(&current),
        ));
        if target == current {
            return Ok(target);
        }

        if fs::try_exists(&current).await? {
            fs::rename(&current, &target).await?;
        } else if !fs::try_exists(&target).await? {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is gone", current.display()),
            )
            .into());
        }
        Ok(target)
    }

    /// Move the renamed payload into its library folder.
    async fn move_to_library(&self, entry: &Entry, show: &Show) -> Result<PathBuf, DownloaderError> {
        let current = self.file_path(entry)?;
        let library = self.library_for(show)?;
        let dir = library
            .folder
            .join(naming::folder(show, entry.episode, &extension(&current)));
        fs::create_dir_all(&dir).await?;

        let Some(name) = current.file_name() else {
            return Err(DownloaderError::MissingFilePath(entry.id));
        };
        let destination = dir.join(name);
        if destination == current {
            return Ok(destination);
        }

        // a back-link at the old path means the move already happened
        let already_moved = fs::symlink_metadata(&current)
            .await
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !already_moved && fs::try_exists(&current).await? {
            move_file(&current, &destination).await?;
            if !self.settings.in_container {
                if let Err(e) = link_back(&destination, &current).await {
                    warn!(entry_id = entry.id, error = %e, "Could not link back to moved file");
                }
            }
        } else if !fs::try_exists(&destination).await? {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is gone", current.display()),
            )
            .into());
        }
        Ok(destination)
    }

    fn library_for(&self, show: &Show) -> Result<Library, DownloaderError> {
        let library = match show.library_id {
            Some(id) => self.store.get_library(id)?,
            None => self.store.default_library()?,
        };
        library.ok_or(DownloaderError::NoLibrary(show.id))
    }

    async fn post_process(&self, entry: &Entry, show: &Show) {
        if !show.post_process {
            return;
        }
        let Some(encoder) = &self.encoder else {
            return;
        };
        if let Err(e) = encoder.enqueue(entry.id).await {
            warn!(entry_id = entry.id, error = %e, "Could not queue re-encode");
        }
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderSettings;
    use crate::store::{NewEntry, NewShow, SqliteStore};
    use crate::testing::{
        advance_entry, info_hash, magnet, MockConverter, MockTorrentClient, RecordingDispatcher,
    };
    use crate::torrent_client::TorrentClient as _;

    struct Fixture {
        downloader: Downloader,
        store: Arc<SqliteStore>,
        client: Arc<MockTorrentClient>,
        notes: Arc<RecordingDispatcher>,
        downloads: tempfile::TempDir,
        library: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let client = Arc::new(MockTorrentClient::new());
        let notes = Arc::new(RecordingDispatcher::new());
        let library = tempfile::tempdir().unwrap();
        store.create_library(library.path(), true).unwrap();
        let downloader = Downloader::new(
            store.clone(),
            client.clone(),
            notes.clone(),
            DownloaderSettings::default(),
        );
        Fixture {
            downloader,
            store,
            client,
            notes,
            downloads: tempfile::tempdir().unwrap(),
            library,
        }
    }

    impl Fixture {
        async fn release(&self, title: &str, episode: u32, n: u64) -> Entry {
            let show = match self
                .store
                .list_shows()
                .unwrap()
                .into_iter()
                .find(|s| s.title == title)
            {
                Some(show) => show,
                None => self.store.create_show(&NewShow::new(title)).unwrap(),
            };
            let hash = self.client.add_torrent(&magnet(n)).await.unwrap();
            self.store
                .create_entry(&NewEntry {
                    show_id: show.id,
                    episode,
                    version: "v0".into(),
                    torrent_hash: hash,
                    created_manually: false,
                })
                .unwrap()
        }

        async fn finish_download(&self, n: u64, name: &str) {
            let hash = info_hash(n);
            std::fs::write(self.downloads.path().join(name), b"video").unwrap();
            self.client
                .set_location(&hash, self.downloads.path(), name)
                .await;
            self.client.set_complete(&hash).await;
        }
    }

    #[tokio::test]
    async fn test_waits_without_location() {
        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;

        let summary = f.downloader.check_show_entries().await.unwrap();
        assert_eq!(summary.transitions, 0);
        let entry = f.store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Downloading);
        assert!(entry.file_path.is_none());
    }

    #[tokio::test]
    async fn test_stores_location_before_completion() {
        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;
        let name = "[SubsPlease] Chainsaw Man - 12 (1080p).mkv";
        f.client
            .set_location(&info_hash(1), f.downloads.path(), name)
            .await;

        f.downloader.check_show_entries().await.unwrap();
        let entry = f.store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Downloading);
        assert_eq!(entry.file_path, Some(f.downloads.path().join(name)));
    }

    #[tokio::test]
    async fn test_full_walk_in_one_pass() {
        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;
        f.finish_download(1, "[SubsPlease] Chainsaw Man - 12 (1080p).mkv")
            .await;

        let summary = f.downloader.check_show_entries().await.unwrap();
        assert_eq!(summary.transitions, 4);
        assert_eq!(summary.completed, 1);

        let entry = f.store.get_entry(entry.id).unwrap().unwrap();
        let expected = f.library.path().join("Chainsaw Man/Chainsaw Man - s01e12.mkv");
        assert_eq!(entry.state, EntryState::Completed);
        assert_eq!(entry.file_path, Some(expected.clone()));
        assert_eq!(std::fs::read(&expected).unwrap(), b"video");
        assert_eq!(
            f.notes.states_for(entry.id),
            vec![
                EntryState::Downloaded,
                EntryState::Renamed,
                EntryState::Moved,
                EntryState::Completed
            ]
        );

        #[cfg(unix)]
        {
            let link = f.downloads.path().join("Chainsaw Man - s01e12.mkv");
            assert!(std::fs::symlink_metadata(&link)
                .unwrap()
                .file_type()
                .is_symlink());
        }
    }

    #[tokio::test]
    async fn test_in_container_skips_symlink() {
        let mut f = fixture();
        f.downloader.settings.in_container = true;
        f.release("Chainsaw Man", 1, 1).await;
        f.finish_download(1, "Chainsaw Man - 01.mkv").await;

        f.downloader.check_show_entries().await.unwrap();
        assert!(!f.downloads.path().join("Chainsaw Man - s01e01.mkv").exists());
        assert!(std::fs::symlink_metadata(f.downloads.path().join("Chainsaw Man - s01e01.mkv")).is_err());
    }

    #[tokio::test]
    async fn test_resume_from_downloaded() {
        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;
        let file = f.downloads.path().join("raw-name.mkv");
        std::fs::write(&file, b"video").unwrap();
        f.client.set_complete(&info_hash(1)).await;
        advance_entry(&*f.store, entry.id, EntryState::Downloaded, Some(&file)).unwrap();

        f.downloader.check_show_entries().await.unwrap();
        let entry = f.store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Completed);
        assert!(entry
            .file_path
            .unwrap()
            .ends_with("Chainsaw Man/Chainsaw Man - s01e12.mkv"));
    }

    #[tokio::test]
    async fn test_resume_after_unrecorded_move() {
        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;
        let renamed = f.downloads.path().join("Chainsaw Man - s01e12.mkv");
        let moved = f.library.path().join("Chainsaw Man/Chainsaw Man - s01e12.mkv");
        std::fs::create_dir_all(moved.parent().unwrap()).unwrap();
        std::fs::write(&moved, b"video").unwrap();
        f.client.set_complete(&info_hash(1)).await;
        advance_entry(&*f.store, entry.id, EntryState::Renamed, Some(&renamed)).unwrap();

        f.downloader.check_show_entries().await.unwrap();
        let entry = f.store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Completed);
        assert_eq!(entry.file_path, Some(moved));
    }

    #[tokio::test]
    async fn test_overlapping_passes_complete_once() {
        let f = fixture();
        let show = f
            .store
            .create_show(&NewShow {
                post_process: true,
                ..NewShow::new("Chainsaw Man")
            })
            .unwrap();
        let hash = f.client.add_torrent(&magnet(1)).await.unwrap();
        let entry = f
            .store
            .create_entry(&NewEntry {
                show_id: show.id,
                episode: 12,
                version: "v0".into(),
                torrent_hash: hash,
                created_manually: false,
            })
            .unwrap();
        f.finish_download(1, "Chainsaw Man - 12.mkv").await;

        let converter = Arc::new(MockConverter::new());
        let encoder = Arc::new(Encoder::new(
            f.store.clone(),
            converter.clone(),
            EncoderSettings {
                enabled: true,
                max_encodes: 1,
            },
        ));
        let downloader = Downloader::new(
            f.store.clone(),
            f.client.clone(),
            f.notes.clone(),
            DownloaderSettings::default(),
        )
        .with_encoder(encoder.clone());

        let (a, b) = tokio::join!(
            downloader.check_show_entries(),
            downloader.check_show_entries()
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.completed + b.completed, 1);
        assert_eq!(a.errors + b.errors, 0);
        encoder.wait_idle().await;

        assert_eq!(
            f.notes.states_for(entry.id),
            vec![
                EntryState::Downloaded,
                EntryState::Renamed,
                EntryState::Moved,
                EntryState::Completed
            ]
        );
        assert_eq!(converter.recorded_conversions().await.len(), 1);

        // a later pass has nothing left to touch
        let again = downloader.check_show_entries().await.unwrap();
        assert_eq!(again.scanned, 0);
        encoder.wait_idle().await;
        assert_eq!(converter.recorded_conversions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_state() {
        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;
        let file = f.downloads.path().join("raw-name.mkv");
        std::fs::write(&file, b"video").unwrap();
        f.client.set_complete(&info_hash(1)).await;
        advance_entry(&*f.store, entry.id, EntryState::Downloaded, Some(&file)).unwrap();

        // a non-empty directory sits where the renamed file should go
        let blocker = f.downloads.path().join("Chainsaw Man - s01e12.mkv");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let summary = f.downloader.check_show_entries().await.unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.transitions, 0);
        let stuck = f.store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(stuck.state, EntryState::Downloaded);
        assert_eq!(stuck.file_path, Some(file.clone()));
        assert!(file.exists());

        std::fs::remove_dir_all(&blocker).unwrap();
        f.downloader.check_show_entries().await.unwrap();
        assert_eq!(
            f.store.get_entry(entry.id).unwrap().unwrap().state,
            EntryState::Completed
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_only_download_dir_retries_rename() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;
        let file = f.downloads.path().join("raw-name.mkv");
        std::fs::write(&file, b"video").unwrap();
        f.client.set_complete(&info_hash(1)).await;
        advance_entry(&*f.store, entry.id, EntryState::Downloaded, Some(&file)).unwrap();

        let dir = f.downloads.path();
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o555)).unwrap();
        if std::fs::write(dir.join(".write-check"), b"").is_ok() {
            // permission bits are not enforced for this user
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let summary = f.downloader.check_show_entries().await.unwrap();
        assert_eq!(summary.errors, 1);
        let stuck = f.store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(stuck.state, EntryState::Downloaded);
        assert_eq!(stuck.file_path, Some(file.clone()));

        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).unwrap();
        f.downloader.check_show_entries().await.unwrap();
        assert_eq!(
            f.store.get_entry(entry.id).unwrap().unwrap().state,
            EntryState::Completed
        );
    }

    #[tokio::test]
    async fn test_missing_torrent_leaves_release() {
        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;
        f.client.remove_torrent(&info_hash(1), false).await.unwrap();

        let summary = f.downloader.check_show_entries().await.unwrap();
        assert_eq!(summary.errors, 1);
        let entry = f.store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Downloading);
    }

    #[tokio::test]
    async fn test_incomplete_download_waits() {
        let f = fixture();
        let entry = f.release("Chainsaw Man", 12, 1).await;
        let name = "Chainsaw Man - 12.mkv";
        std::fs::write(f.downloads.path().join(name), b"vid").unwrap();
        f.client
            .set_location(&info_hash(1), f.downloads.path(), name)
            .await;
        f.client.set_progress(&info_hash(1), 0.4).await;

        f.downloader.check_show_entries().await.unwrap();
        let entry = f.store.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Downloading);
    }

    #[tokio::test]
    async fn test_stale_entries() {
        let mut f = fixture();
        f.release("Chainsaw Man", 12, 1).await;
        assert!(f.downloader.stale_entries().unwrap().is_empty());

        f.downloader.settings.stale_after = chrono::Duration::seconds(-1);
        assert_eq!(f.downloader.stale_entries().unwrap().len(), 1);

        f.downloader.check_show_entries().await.unwrap();
        let status = f.downloader.status().await.unwrap();
        assert!(status.last_tick_at.is_some());
        assert_eq!(status.unfinished, 1);
        assert_eq!(status.stale, 1);
    }
}
