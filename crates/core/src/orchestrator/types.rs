//! Types for the orchestrator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::downloader::{DownloaderError, DownloaderStatus};
use crate::encoder::EncoderStatus;
use crate::intake::IntakeError;
use crate::poller::PollerError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("poll failed: {0}")]
    Poller(#[from] PollerError),

    #[error("reconciliation failed: {0}")]
    Downloader(#[from] DownloaderError),

    #[error(transparent)]
    Intake(#[from] IntakeError),
}

/// Loop intervals.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub reconcile_interval: Duration,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poller.interval_secs),
            reconcile_interval: Duration::from_secs(config.downloader.interval_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub downloader: DownloaderStatus,
    /// `None` when no encoder is wired in.
    pub encoder: Option<EncoderStatus>,
}
