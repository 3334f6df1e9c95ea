use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

use super::error::ConverterError;
use super::types::{ConversionJob, ConversionProgress, ConversionResult, MediaInfo};

/// Something that can re-encode a video file.
#[async_trait]
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError>;

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError>;

    /// Like `convert`, reporting progress on `progress_tx`.
    ///
    /// A dropped or full receiver never stalls the conversion.
    async fn convert_with_progress(
        &self,
        job: ConversionJob,
        progress_tx: mpsc::Sender<ConversionProgress>,
    ) -> Result<ConversionResult, ConverterError>;

    /// Check the tooling is present before any job is started.
    async fn validate(&self) -> Result<(), ConverterError>;
}
