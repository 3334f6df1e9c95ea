//! Mock converter for testing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, RwLock, Semaphore};

use crate::converter::{
    ConversionJob, ConversionProgress, ConversionResult, Converter, ConverterError, MediaInfo,
};

#[derive(Debug, Clone)]
pub struct RecordedConversion {
    pub job: ConversionJob,
    pub success: bool,
}

/// Converter that writes a fixed payload instead of running ffmpeg.
///
/// A gated converter parks every job until [`MockConverter::release`] lets
/// it through, so tests can observe how many run at once.
#[derive(Debug)]
pub struct MockConverter {
    conversions: RwLock<Vec<RecordedConversion>>,
    next_error: RwLock<Option<ConverterError>>,
    validate_error: RwLock<Option<ConverterError>>,
    output: Vec<u8>,
    gate: Option<Semaphore>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConverter {
    pub fn new() -> Self {
        Self {
            conversions: RwLock::new(Vec::new()),
            next_error: RwLock::new(None),
            validate_error: RwLock::new(None),
            output: b"encoded".to_vec(),
            gate: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Let `n` parked jobs finish.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of jobs ever running at the same time.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub async fn recorded_conversions(&self) -> Vec<RecordedConversion> {
        self.conversions.read().await.clone()
    }

    pub async fn set_next_error(&self, error: ConverterError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_validate_error(&self, error: ConverterError) {
        *self.validate_error.write().await = Some(error);
    }

    async fn run(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let result = match self.next_error.write().await.take() {
            Some(err) => Err(err),
            None => tokio::fs::write(&job.output_path, &self.output)
                .await
                .map_err(ConverterError::from)
                .map(|_| ConversionResult {
                    entry_id: job.entry_id,
                    output_path: job.output_path.clone(),
                    output_size_bytes: self.output.len() as u64,
                    duration_ms: 0,
                }),
        };

        self.conversions.write().await.push(RecordedConversion {
            job,
            success: result.is_ok(),
        });
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|_| ConverterError::InputNotFound {
                path: path.to_path_buf(),
            })?
            .len();
        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes,
            duration_secs: 1440.0,
            format: "matroska".to_string(),
            video_codec: Some("h264".to_string()),
            video_width: Some(1920),
            video_height: Some(1080),
        })
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        self.run(job).await
    }

    async fn convert_with_progress(
        &self,
        job: ConversionJob,
        progress_tx: mpsc::Sender<ConversionProgress>,
    ) -> Result<ConversionResult, ConverterError> {
        let entry_id = job.entry_id;
        let result = self.run(job).await;
        if result.is_ok() {
            let _ = progress_tx.try_send(ConversionProgress {
                entry_id,
                percent: 100.0,
                time_secs: 1440.0,
                duration_secs: Some(1440.0),
                speed: Some("10x".to_string()),
            });
        }
        result
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        match self.validate_error.write().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
