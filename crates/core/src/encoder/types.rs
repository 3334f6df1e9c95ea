//! Types for the encoder module.

use serde::Serialize;
use thiserror::Error;

use crate::config::EncoderConfig;
use crate::converter::ConverterError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("entry {0} not found")]
    EntryNotFound(i64),

    #[error("entry {0} has no file path")]
    MissingFilePath(i64),

    #[error("conversion failed: {0}")]
    Converter(#[from] ConverterError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunables taken from `[encoder]`.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub enabled: bool,
    pub max_encodes: usize,
}

impl From<&EncoderConfig> for EncoderSettings {
    fn from(config: &EncoderConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_encodes: config.max_encodes.max(1),
        }
    }
}

/// A job currently holding a slot.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveEncode {
    pub entry_id: i64,
    /// 0-100 from the transcoder's progress reports.
    pub percent: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EncoderStatus {
    pub enabled: bool,
    /// `None` until the first job checked for the transcoder.
    pub available: Option<bool>,
    pub max_encodes: usize,
    pub active: Vec<ActiveEncode>,
    /// Jobs waiting for a slot, oldest first.
    pub queued: Vec<i64>,
    pub total_processed: u64,
    pub total_failed: u64,
}
