mod http;
mod metrics;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kanshi_core::{
    create_torrent_client, load_config, validate_config, ChannelDispatcher, Downloader,
    DownloaderSettings, Encoder, EncoderSettings, FeedSource, FfmpegConverter, HttpFeedFetcher,
    MagnetResolver, Orchestrator, OrchestratorSettings, Poller, PollerSettings, ReleaseIntake,
    SanitizedConfig, SqliteStore, StateNotification, Store,
};

/// Buffer size for the notification channel
const NOTIFICATION_BUFFER_SIZE: usize = 256;

/// Timeout for feed and `.torrent` downloads
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("KANSHI_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(sanitized.as_bytes()));
    info!(
        config_hash = &config_hash[..16],
        backend = config.torrent_client.backend.as_str(),
        feeds = config.feeds.len(),
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::new(&config.database.path).context("Failed to open database")?,
    );
    if store.default_library()?.is_none() {
        warn!("No default library configured; downloaded releases will wait before moving");
    }

    let client = create_torrent_client(&config.torrent_client)
        .context("Failed to create torrent client")?;
    info!("Using torrent client: {}", client.name());

    let (dispatcher, notifications) = ChannelDispatcher::channel(NOTIFICATION_BUFFER_SIZE);
    let notifier = Arc::new(dispatcher);
    let notification_handle = tokio::spawn(log_notifications(notifications));

    let intake = Arc::new(ReleaseIntake::new(
        Arc::clone(&store),
        Arc::clone(&client),
        MagnetResolver::new(FETCH_TIMEOUT).context("Failed to create magnet resolver")?,
        notifier.clone(),
    ));

    let sources: Vec<FeedSource> = config.feeds.iter().map(FeedSource::from).collect();
    let fetcher =
        Arc::new(HttpFeedFetcher::new(FETCH_TIMEOUT).context("Failed to create feed fetcher")?);
    let poller = Arc::new(Poller::new(
        sources,
        fetcher,
        Arc::clone(&store),
        Arc::clone(&intake),
        PollerSettings::from(&config.poller),
    ));

    let encoder = Arc::new(Encoder::new(
        Arc::clone(&store),
        Arc::new(FfmpegConverter::new(&config.encoder)),
        EncoderSettings::from(&config.encoder),
    ));
    info!(
        enabled = encoder.is_enabled(),
        max_encodes = config.encoder.max_encodes,
        "Encoder configured"
    );

    let downloader = Arc::new(
        Downloader::new(
            Arc::clone(&store),
            Arc::clone(&client),
            notifier,
            DownloaderSettings::from(&config.downloader),
        )
        .with_encoder(Arc::clone(&encoder)),
    );

    let orchestrator = Arc::new(
        Orchestrator::new(
            poller,
            downloader,
            intake,
            OrchestratorSettings::from(&config),
        )
        .with_encoder(Arc::clone(&encoder)),
    );
    orchestrator.start().await;

    let app = http::create_router(Arc::clone(&orchestrator));
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Serving health and metrics on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    orchestrator.stop().await;

    // The dispatcher clones live in the pipeline; dropping it closes the channel.
    drop(orchestrator);
    if tokio::time::timeout(Duration::from_secs(5), notification_handle)
        .await
        .is_err()
    {
        debug!("Notification logger still busy at exit");
    }

    Ok(())
}

/// Log every state transition.
async fn log_notifications(mut rx: tokio::sync::mpsc::Receiver<StateNotification>) {
    while let Some(note) = rx.recv().await {
        info!(
            entry_id = note.entry_id,
            show_id = note.show_id,
            episode = note.episode,
            state = %note.state,
            file = note.file_path.as_deref().unwrap_or(""),
            "Release state changed"
        );
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
