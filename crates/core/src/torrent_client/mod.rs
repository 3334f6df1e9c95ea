//! Torrent client abstraction.
//!
//! This module provides a `TorrentClient` trait for driving an external
//! torrent daemon (qBittorrent, Transmission, Deluge), plus the magnet
//! resolution shared by all of them.

mod deluge;
mod magnet;
mod qbittorrent;
#[cfg(test)]
mod test_server;
mod transmission;
mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

pub use deluge::DelugeClient;
pub use magnet::{extract_hash_from_magnet, magnet_from_torrent_bytes, normalize_magnet, MagnetResolver};
pub use qbittorrent::QBittorrentClient;
pub use transmission::TransmissionClient;
pub use types::*;

use crate::config::{TorrentClientBackend, TorrentClientConfig};

/// Login attempts before an authorization failure is surfaced.
pub const AUTH_ATTEMPTS: u32 = 5;

/// Build the configured backend.
pub fn create_torrent_client(
    config: &TorrentClientConfig,
) -> Result<Arc<dyn TorrentClient>, TorrentClientError> {
    let missing = |backend: TorrentClientBackend| {
        TorrentClientError::ConnectionFailed(format!(
            "torrent_client.{} section is missing",
            backend.as_str()
        ))
    };

    let client: Arc<dyn TorrentClient> = match config.backend {
        TorrentClientBackend::Qbittorrent => {
            let cfg = config.qbittorrent.clone().ok_or_else(|| missing(config.backend))?;
            Arc::new(QBittorrentClient::new(cfg)?)
        }
        TorrentClientBackend::Transmission => {
            let cfg = config.transmission.clone().ok_or_else(|| missing(config.backend))?;
            Arc::new(TransmissionClient::new(cfg)?)
        }
        TorrentClientBackend::Deluge => {
            let cfg = config.deluge.clone().ok_or_else(|| missing(config.backend))?;
            Arc::new(DelugeClient::new(cfg)?)
        }
    };
    Ok(client)
}

/// Run `login` up to [`AUTH_ATTEMPTS`] times, backing off between attempts.
pub(crate) async fn login_with_retries<F, Fut>(
    backend: &str,
    mut login: F,
) -> Result<(), TorrentClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), TorrentClientError>>,
{
    let mut attempt = 1;
    loop {
        match login().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= AUTH_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(backend, attempt, error = %e, "Login attempt failed");
                tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
                attempt += 1;
            }
        }
    }
}
