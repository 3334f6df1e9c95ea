//! qBittorrent WebUI API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::QBittorrentConfig;
use crate::metrics;

use super::{
    extract_hash_from_magnet, login_with_retries, TorrentClient, TorrentClientError, TorrentInfo,
    TorrentState,
};

const BACKEND: &str = "qbittorrent";

/// qBittorrent client implementation.
pub struct QBittorrentClient {
    client: Client,
    config: QBittorrentConfig,
    /// Set once the cookie jar holds a valid SID.
    authenticated: RwLock<bool>,
}

impl QBittorrentClient {
    pub fn new(config: QBittorrentConfig) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .map_err(|e| TorrentClientError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            authenticated: RwLock::new(false),
        })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url(), endpoint)
    }

    /// Single login call; the session cookie lands in the client's jar.
    async fn login(&self) -> Result<(), TorrentClientError> {
        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(self.url("/api/v2/auth/login"))
            .form(&params)
            .send()
            .await
            .map_err(TorrentClientError::from_request)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!("qBittorrent login successful");
            *self.authenticated.write().await = true;
            Ok(())
        } else if body.contains("Fails.") || status == StatusCode::FORBIDDEN {
            Err(TorrentClientError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(TorrentClientError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), TorrentClientError> {
        if *self.authenticated.read().await {
            return Ok(());
        }
        login_with_retries(BACKEND, || self.login()).await
    }

    /// Send an authenticated request, re-logging in once on 403.
    async fn send<F>(&self, build: F) -> Result<String, TorrentClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.ensure_authenticated().await?;

        let response = build()
            .send()
            .await
            .map_err(TorrentClientError::from_request)?;

        if response.status() == StatusCode::FORBIDDEN {
            warn!("qBittorrent session expired, re-authenticating");
            *self.authenticated.write().await = false;
            self.login().await?;

            let response = build()
                .send()
                .await
                .map_err(TorrentClientError::from_request)?;
            return read_body(response).await;
        }

        read_body(response).await
    }
}

async fn read_body(response: Response) -> Result<String, TorrentClientError> {
    let status = response.status();
    if status == StatusCode::FORBIDDEN {
        return Err(TorrentClientError::AuthenticationFailed(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        return Err(TorrentClientError::ApiError(format!("HTTP {}", status)));
    }
    response
        .text()
        .await
        .map_err(|e| TorrentClientError::ApiError(e.to_string()))
}

/// qBittorrent torrent info response.
#[derive(Debug, Deserialize)]
struct QBTorrentInfo {
    hash: String,
    #[serde(default)]
    name: String,
    state: String,
    progress: f64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    content_path: String,
}

impl QBTorrentInfo {
    fn into_torrent_info(self) -> TorrentInfo {
        TorrentInfo {
            hash: self.hash.to_lowercase(),
            name: self.name,
            state: parse_qb_state(&self.state),
            progress: self.progress,
            size_bytes: self.size.max(0) as u64,
            save_path: Some(self.save_path).filter(|p| !p.is_empty()),
            content_path: Some(self.content_path).filter(|p| !p.is_empty()),
        }
    }
}

/// Parse qBittorrent state string to TorrentState.
fn parse_qb_state(state: &str) -> TorrentState {
    match state {
        "downloading" | "forcedDL" | "metaDL" | "forcedMetaDL" | "allocating" => {
            TorrentState::Downloading
        }
        "uploading" | "forcedUP" => TorrentState::Seeding,
        "pausedDL" | "pausedUP" | "stoppedDL" | "stoppedUP" => TorrentState::Paused,
        "checkingDL" | "checkingUP" | "checkingResumeData" | "moving" => TorrentState::Checking,
        "queuedDL" | "queuedUP" => TorrentState::Queued,
        "stalledDL" | "stalledUP" => TorrentState::Stalled,
        "error" | "missingFiles" => TorrentState::Error,
        _ => TorrentState::Unknown,
    }
}

#[async_trait]
impl TorrentClient for QBittorrentClient {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn authenticate(&self) -> Result<bool, TorrentClientError> {
        let result = login_with_retries(BACKEND, || self.login()).await;
        metrics::record_client_request(BACKEND, "authenticate", &result);
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_auth_failure() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn add_torrent(&self, magnet: &str) -> Result<String, TorrentClientError> {
        let hash = extract_hash_from_magnet(magnet)
            .ok_or_else(|| TorrentClientError::InvalidTorrent(magnet.to_string()))?;

        let url = self.url("/api/v2/torrents/add");
        let result = self
            .send(|| {
                let mut form = multipart::Form::new().text("urls", magnet.to_string());
                if let Some(path) = &self.config.download_path {
                    form = form.text("savepath", path.clone());
                }
                self.client.post(&url).multipart(form)
            })
            .await
            .and_then(|body| {
                if body.contains("Fails.") {
                    Err(TorrentClientError::ApiError("torrent rejected".to_string()))
                } else {
                    Ok(hash)
                }
            });
        metrics::record_client_request(BACKEND, "add", &result);
        result
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        let url = self.url(&format!(
            "/api/v2/torrents/info?hashes={}",
            hash.to_lowercase()
        ));
        let result = self.send(|| self.client.get(&url)).await.and_then(|body| {
            let torrents: Vec<QBTorrentInfo> = serde_json::from_str(&body).map_err(|e| {
                TorrentClientError::ApiError(format!("Failed to parse response: {}", e))
            })?;
            torrents
                .into_iter()
                .next()
                .map(|t| t.into_torrent_info())
                .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))
        });
        metrics::record_client_request(BACKEND, "get", &result);
        result
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        let url = self.url("/api/v2/torrents/delete");
        let hash_lower = hash.to_lowercase();
        let delete_str = if delete_files { "true" } else { "false" };
        let params = [("hashes", hash_lower.as_str()), ("deleteFiles", delete_str)];

        let result = self
            .send(|| self.client.post(&url).form(&params))
            .await
            .map(|_| ());
        metrics::record_client_request(BACKEND, "remove", &result);
        result
    }
}
