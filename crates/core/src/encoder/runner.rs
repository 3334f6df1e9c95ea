use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::fs;
use tokio::sync::{mpsc, Notify, OnceCell};
use tracing::{debug, info, warn};

use crate::converter::{ConversionJob, ConversionProgress, Converter};
use crate::metrics;
use crate::store::Store;

use super::types::{ActiveEncode, EncoderError, EncoderSettings, EncoderStatus};

#[derive(Default)]
struct Queue {
    pending: VecDeque<i64>,
    /// Entry id to last reported percent.
    active: HashMap<i64, f32>,
}

impl Queue {
    fn tracks(&self, entry_id: i64) -> bool {
        self.active.contains_key(&entry_id) || self.pending.contains(&entry_id)
    }

    fn is_idle(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }
}

/// Sizes before and after a successful swap.
struct Swapped {
    initial: u64,
    final_size: u64,
}

pub struct Encoder {
    store: Arc<dyn Store>,
    converter: Arc<dyn Converter>,
    settings: EncoderSettings,
    queue: Mutex<Queue>,
    available: OnceCell<bool>,
    processed: AtomicU64,
    failed: AtomicU64,
    idle: Notify,
}

impl Encoder {
    pub fn new(
        store: Arc<dyn Store>,
        converter: Arc<dyn Converter>,
        settings: EncoderSettings,
    ) -> Self {
        Self {
            store,
            converter,
            settings,
            queue: Mutex::new(Queue::default()),
            available: OnceCell::new(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            idle: Notify::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Queue a re-encode of the entry's file.
    ///
    /// Returns `false` when encoding is disabled or the entry is already
    /// queued or running.
    pub async fn enqueue(self: &Arc<Self>, entry_id: i64) -> Result<bool, EncoderError> {
        if !self.settings.enabled {
            debug!(entry_id, "Encoding disabled, not queueing");
            return Ok(false);
        }
        if self.lock().tracks(entry_id) {
            debug!(entry_id, "Re-encode already queued");
            return Ok(false);
        }

        self.store.queue_encode_job(entry_id)?;
        let queued = self.submit(entry_id);
        if queued {
            info!(entry_id, "Re-encode queued");
        }
        Ok(queued)
    }

    /// Resubmit every job left unfinished by a previous run.
    pub async fn resume_pending(self: &Arc<Self>) -> Result<usize, EncoderError> {
        if !self.settings.enabled {
            return Ok(0);
        }
        let resumed = self
            .store
            .pending_encode_jobs()?
            .into_iter()
            .filter(|job| self.submit(job.entry_id))
            .count();
        if resumed > 0 {
            info!(count = resumed, "Resumed unfinished re-encodes");
        }
        Ok(resumed)
    }

    pub fn status(&self) -> EncoderStatus {
        let queue = self.lock();
        let mut active: Vec<ActiveEncode> = queue
            .active
            .iter()
            .map(|(&entry_id, &percent)| ActiveEncode { entry_id, percent })
            .collect();
        active.sort_by_key(|a| a.entry_id);

        EncoderStatus {
            enabled: self.settings.enabled,
            available: self.available.get().copied(),
            max_encodes: self.settings.max_encodes,
            active,
            queued: queue.pending.iter().copied().collect(),
            total_processed: self.processed.load(Ordering::Relaxed),
            total_failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Resolves once nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn submit(self: &Arc<Self>, entry_id: i64) -> bool {
        {
            let mut queue = self.lock();
            if queue.tracks(entry_id) {
                return false;
            }
            queue.pending.push_back(entry_id);
        }
        self.drain();
        true
    }

    /// Start queued jobs while slots are free.
    fn drain(self: &Arc<Self>) {
        loop {
            let next = {
                let mut queue = self.lock();
                if queue.active.len() >= self.settings.max_encodes {
                    None
                } else {
                    queue.pending.pop_front().inspect(|&id| {
                        queue.active.insert(id, 0.0);
                    })
                }
            };
            let Some(entry_id) = next else {
                break;
            };

            metrics::ENCODES_ACTIVE.inc();
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run(entry_id).await;
                this.finish(entry_id);
            });
        }
    }

    fn finish(self: &Arc<Self>, entry_id: i64) {
        let idle = {
            let mut queue = self.lock();
            queue.active.remove(&entry_id);
            queue.is_idle()
        };
        metrics::ENCODES_ACTIVE.dec();
        if idle {
            self.idle.notify_waiters();
        } else {
            self.drain();
        }
    }

    async fn run(&self, entry_id: i64) {
        let started = Instant::now();
        let outcome = self.encode(entry_id).await;

        let result = match &outcome {
            Ok(Some(_)) => "success",
            Ok(None) => "skipped",
            Err(_) => "failed",
        };
        metrics::ENCODES_TOTAL.with_label_values(&[result]).inc();
        metrics::ENCODE_DURATION
            .with_label_values(&[result])
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Some(sizes)) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                info!(
                    entry_id,
                    initial_size = sizes.initial,
                    final_size = sizes.final_size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Re-encode finished"
                );
            }
            Ok(None) => {}
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(entry_id, error = %e, "Re-encode failed");
            }
        }
    }

    async fn encode(&self, entry_id: i64) -> Result<Option<Swapped>, EncoderError> {
        if !self.tooling_available().await {
            debug!(entry_id, "Transcoder unavailable, skipping re-encode");
            return Ok(None);
        }

        let entry = self
            .store
            .get_entry(entry_id)?
            .ok_or(EncoderError::EntryNotFound(entry_id))?;
        let input = entry
            .file_path
            .ok_or(EncoderError::MissingFilePath(entry_id))?;

        let initial = fs::metadata(&input).await?.len();
        self.store.start_encode_job(entry_id, initial)?;

        let scratch = scratch_path(&input);
        let job = ConversionJob {
            entry_id,
            input_path: input.clone(),
            output_path: scratch.clone(),
        };
        let (tx, rx) = mpsc::channel(16);
        let (result, ()) = tokio::join!(
            self.converter.convert_with_progress(job, tx),
            self.track_progress(rx)
        );

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&scratch).await {
                debug!(entry_id, error = %cleanup, "No scratch file to clean up");
            }
            self.store.finish_encode_job(entry_id, None)?;
            return Err(e.into());
        }

        let final_size = fs::metadata(&scratch).await?.len();
        fs::rename(&scratch, &input).await?;
        self.store.finish_encode_job(entry_id, Some(final_size))?;

        Ok(Some(Swapped {
            initial,
            final_size,
        }))
    }

    async fn track_progress(&self, mut rx: mpsc::Receiver<ConversionProgress>) {
        while let Some(progress) = rx.recv().await {
            if let Some(percent) = self.lock().active.get_mut(&progress.entry_id) {
                *percent = progress.percent;
            }
        }
    }

    /// Checked once; a missing transcoder leaves jobs pending for the next run.
    async fn tooling_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                match self.converter.validate().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            converter = self.converter.name(),
                            error = %e,
                            "Transcoder unavailable, re-encodes will be skipped"
                        );
                        false
                    }
                }
            })
            .await
    }
}

/// Scratch file a transcode writes to, next to `input`.
///
/// `show/ep.mkv` becomes `show/ep.encoding.mkv`.
pub fn scratch_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}.encoding.{}", stem, ext.to_string_lossy()),
        None => format!("{}.encoding", stem),
    };
    input.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConverterError;
    use crate::store::{EntryState, NewEntry, NewShow, SqliteStore};
    use crate::testing::{advance_entry, MockConverter};
    use std::time::Duration;

    struct Fixture {
        encoder: Arc<Encoder>,
        store: Arc<SqliteStore>,
        converter: Arc<MockConverter>,
        dir: tempfile::TempDir,
    }

    fn fixture(converter: MockConverter, max_encodes: usize) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let converter = Arc::new(converter);
        let encoder = Arc::new(Encoder::new(
            store.clone(),
            converter.clone(),
            EncoderSettings {
                enabled: true,
                max_encodes,
            },
        ));
        Fixture {
            encoder,
            store,
            converter,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    impl Fixture {
        fn completed_entry(&self, episode: u32) -> (i64, PathBuf) {
            let show = match self.store.list_shows().unwrap().into_iter().next() {
                Some(show) => show,
                None => self.store.create_show(&NewShow::new("Chainsaw Man")).unwrap(),
            };
            let entry = self
                .store
                .create_entry(&NewEntry {
                    show_id: show.id,
                    episode,
                    version: "v0".into(),
                    torrent_hash: format!("hash{}", episode),
                    created_manually: false,
                })
                .unwrap();
            let path = self
                .dir
                .path()
                .join(format!("Chainsaw Man - s01e{:02}.mkv", episode));
            std::fs::write(&path, b"original video").unwrap();
            advance_entry(&*self.store, entry.id, EntryState::Completed, Some(&path)).unwrap();
            (entry.id, path)
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

    #[test]
    fn test_scratch_path() {
        assert_eq!(
            scratch_path(Path::new("/lib/Show/ep.mkv")),
            PathBuf::from("/lib/Show/ep.encoding.mkv")
        );
        assert_eq!(
            scratch_path(Path::new("/lib/raw")),
            PathBuf::from("/lib/raw.encoding")
        );
    }

    #[tokio::test]
    async fn test_disabled_short_circuits() {
        let f = fixture(MockConverter::new(), 1);
        let encoder = Arc::new(Encoder::new(
            f.store.clone(),
            f.converter.clone(),
            EncoderSettings {
                enabled: false,
                max_encodes: 1,
            },
        ));
        let (id, _) = f.completed_entry(1);

        assert!(!encoder.enqueue(id).await.unwrap());
        assert!(f.store.get_encode_job(id).unwrap().is_none());
        assert_eq!(encoder.resume_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_swaps_encoded_file_in_place() {
        let f = fixture(MockConverter::new(), 1);
        let (id, path) = f.completed_entry(12);

        assert!(f.encoder.enqueue(id).await.unwrap());
        f.encoder.wait_idle().await;

        assert_eq!(std::fs::read(&path).unwrap(), b"encoded");
        assert!(!scratch_path(&path).exists());

        let job = f.store.get_encode_job(id).unwrap().unwrap();
        assert_eq!(job.initial_size, Some(14));
        assert_eq!(job.final_size, Some(7));
        assert!(job.ended_at.is_some());

        let runs = f.converter.recorded_conversions().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].job.output_path, scratch_path(&path));
        assert_eq!(f.encoder.status().total_processed, 1);
    }

    #[tokio::test]
    async fn test_bounded_concurrency_and_fifo() {
        let f = fixture(MockConverter::gated(), 2);
        let mut ids = Vec::new();
        for ep in 1..=5 {
            let (id, _) = f.completed_entry(ep);
            assert!(f.encoder.enqueue(id).await.unwrap());
            ids.push(id);
        }

        let converter = f.converter.clone();
        until(move || converter.active() == 2).await;
        let status = f.encoder.status();
        assert_eq!(status.active.len(), 2);
        assert_eq!(status.queued, ids[2..].to_vec());

        // already queued
        assert!(!f.encoder.enqueue(ids[4]).await.unwrap());

        f.converter.release(5);
        f.encoder.wait_idle().await;

        assert_eq!(f.converter.max_active(), 2);
        assert_eq!(f.converter.recorded_conversions().await.len(), 5);
        assert!(f.store.pending_encode_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_conversion_keeps_original() {
        let f = fixture(MockConverter::new(), 1);
        f.converter
            .set_next_error(ConverterError::conversion_failed("exit status 1", None))
            .await;
        let (id, path) = f.completed_entry(3);

        f.encoder.enqueue(id).await.unwrap();
        f.encoder.wait_idle().await;

        assert_eq!(std::fs::read(&path).unwrap(), b"original video");
        assert!(!scratch_path(&path).exists());
        let job = f.store.get_encode_job(id).unwrap().unwrap();
        assert!(job.ended_at.is_some());
        assert!(job.final_size.is_none());
        assert_eq!(f.encoder.status().total_failed, 1);
    }

    #[tokio::test]
    async fn test_missing_transcoder_skips_and_keeps_job() {
        let f = fixture(MockConverter::new(), 1);
        f.converter
            .set_validate_error(ConverterError::FfmpegNotFound {
                path: "/nope/ffmpeg".into(),
            })
            .await;
        let (id, path) = f.completed_entry(4);

        f.encoder.enqueue(id).await.unwrap();
        f.encoder.wait_idle().await;

        assert!(f.converter.recorded_conversions().await.is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), b"original video");
        assert_eq!(f.store.pending_encode_jobs().unwrap().len(), 1);
        assert_eq!(f.encoder.status().available, Some(false));
    }

    #[tokio::test]
    async fn test_resume_pending_jobs() {
        let f = fixture(MockConverter::new(), 1);
        let (first, _) = f.completed_entry(1);
        let (second, _) = f.completed_entry(2);
        f.store.queue_encode_job(first).unwrap();
        f.store.queue_encode_job(second).unwrap();
        f.store.start_encode_job(second, 14).unwrap();

        assert_eq!(f.encoder.resume_pending().await.unwrap(), 2);
        f.encoder.wait_idle().await;

        assert!(f.store.pending_encode_jobs().unwrap().is_empty());
        assert_eq!(f.encoder.status().total_processed, 2);
    }
}
