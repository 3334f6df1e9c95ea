use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("FFmpeg not found at path: {path}")]
    FfmpegNotFound { path: PathBuf },

    #[error("FFprobe not found at path: {path}")]
    FfprobeNotFound { path: PathBuf },

    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// The transcoder exited unsuccessfully or produced nothing.
    #[error("Conversion failed: {reason}")]
    ConversionFailed {
        reason: String,
        stderr: Option<String>,
    },

    #[error("Conversion timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("Failed to probe media file: {reason}")]
    ProbeFailed { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConverterError {
    pub fn conversion_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ConversionFailed {
            reason: reason.into(),
            stderr,
        }
    }

    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            reason: reason.into(),
        }
    }

    /// Missing binaries will not fix themselves between jobs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FfmpegNotFound { .. } | Self::FfprobeNotFound { .. }
        )
    }
}
