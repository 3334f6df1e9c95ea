//! Orchestrator implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::downloader::{Downloader, TickSummary};
use crate::encoder::Encoder;
use crate::intake::ReleaseIntake;
use crate::poller::{PollMatch, Poller};

use super::types::{OrchestratorError, OrchestratorSettings, OrchestratorStatus};

/// Runs the poll and reconcile loops and exposes their out-of-cycle triggers.
pub struct Orchestrator {
    poller: Arc<Poller>,
    downloader: Arc<Downloader>,
    intake: Arc<ReleaseIntake>,
    encoder: Option<Arc<Encoder>>,
    settings: OrchestratorSettings,

    // Runtime state
    running: Arc<AtomicBool>,
    last_poll_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        poller: Arc<Poller>,
        downloader: Arc<Downloader>,
        intake: Arc<ReleaseIntake>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            poller,
            downloader,
            intake,
            encoder: None,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            last_poll_at: Arc::new(RwLock::new(None)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Resume unfinished re-encodes on start and report the queue in `status`.
    pub fn with_encoder(mut self, encoder: Arc<Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Start both loops. Each runs a first pass immediately.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            reconcile_interval_secs = self.settings.reconcile_interval.as_secs(),
            "Starting orchestrator"
        );

        if let Some(encoder) = &self.encoder {
            if let Err(e) = encoder.resume_pending().await {
                warn!(error = %e, "Could not resume unfinished re-encodes");
            }
        }

        let poll = self.spawn_poll_loop();
        let reconcile = self.spawn_reconcile_loop();
        self.tasks.lock().await.extend([poll, reconcile]);

        info!("Orchestrator started");
    }

    /// Stop both loops, letting a pass in progress finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping orchestrator");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Orchestrator loop ended abnormally");
            }
        }
        info!("Orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Poll now. `force` clears the feed cache first.
    pub async fn poll(&self, force: bool) -> Result<Vec<PollMatch>, OrchestratorError> {
        Self::poll_once(&self.poller, &self.last_poll_at, force)
            .await
            .map_err(Into::into)
    }

    /// Insert a release outside the poll flow.
    pub async fn begin_handling(
        &self,
        show_id: i64,
        episode: u32,
        locator: &str,
        version: &str,
        manual: bool,
    ) -> Result<i64, OrchestratorError> {
        Ok(self
            .intake
            .begin_handling(show_id, episode, locator, version, manual)
            .await?)
    }

    /// Reconcile now.
    pub async fn check_show_entries(&self) -> Result<TickSummary, OrchestratorError> {
        Ok(self.downloader.check_show_entries().await?)
    }

    pub async fn reset_feed_cache(&self) {
        self.poller.reset_feed_cache().await;
    }

    pub async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        Ok(OrchestratorStatus {
            running: self.is_running(),
            last_poll_at: *self.last_poll_at.read().await,
            downloader: self.downloader.status().await?,
            encoder: self.encoder.as_ref().map(|e| e.status()),
        })
    }

    async fn poll_once(
        poller: &Poller,
        last_poll_at: &RwLock<Option<DateTime<Utc>>>,
        force: bool,
    ) -> Result<Vec<PollMatch>, crate::poller::PollerError> {
        let found = poller.poll(force).await?;
        *last_poll_at.write().await = Some(Utc::now());
        Ok(found)
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let poller = Arc::clone(&self.poller);
        let last_poll_at = Arc::clone(&self.last_poll_at);
        let interval = self.settings.poll_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Poll loop started");
            let mut delay = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Poll loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = Self::poll_once(&poller, &last_poll_at, false).await {
                            warn!(error = %e, "Scheduled poll failed");
                        }
                        delay = interval;
                    }
                }
            }
            info!("Poll loop stopped");
        })
    }

    fn spawn_reconcile_loop(&self) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let downloader = Arc::clone(&self.downloader);
        let interval = self.settings.reconcile_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Reconcile loop started");
            let mut delay = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reconcile loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = downloader.check_show_entries().await {
                            warn!(error = %e, "Reconciliation pass failed");
                        }
                        delay = interval;
                    }
                }
            }
            info!("Reconcile loop stopped");
        })
    }
}
