//! Deluge WebUI JSON-RPC client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::DelugeConfig;
use crate::metrics;

use super::{
    extract_hash_from_magnet, login_with_retries, TorrentClient, TorrentClientError, TorrentInfo,
    TorrentState,
};

const BACKEND: &str = "deluge";
/// Deluge's error code for a missing or expired web session.
const NOT_AUTHENTICATED: i64 = 1;
const STATUS_FIELDS: &[&str] = &[
    "hash",
    "name",
    "state",
    "progress",
    "total_size",
    "save_path",
];

pub struct DelugeClient {
    client: Client,
    config: DelugeConfig,
    authenticated: RwLock<bool>,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

#[derive(Debug, Deserialize)]
struct DelugeStatus {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    /// Percent, 0-100.
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    total_size: i64,
    #[serde(default)]
    save_path: String,
}

impl DelugeStatus {
    fn into_torrent_info(self, requested: &str) -> TorrentInfo {
        let hash = if self.hash.is_empty() {
            requested.to_lowercase()
        } else {
            self.hash.to_lowercase()
        };
        TorrentInfo {
            hash,
            name: self.name,
            state: parse_deluge_state(&self.state),
            progress: (self.progress / 100.0).clamp(0.0, 1.0),
            size_bytes: self.total_size.max(0) as u64,
            save_path: Some(self.save_path).filter(|p| !p.is_empty()),
            content_path: None,
        }
    }
}

fn parse_deluge_state(state: &str) -> TorrentState {
    match state {
        "Downloading" | "Allocating" => TorrentState::Downloading,
        "Seeding" => TorrentState::Seeding,
        "Paused" => TorrentState::Paused,
        "Checking" | "Moving" => TorrentState::Checking,
        "Queued" => TorrentState::Queued,
        "Error" => TorrentState::Error,
        _ => TorrentState::Unknown,
    }
}

impl DelugeClient {
    pub fn new(config: DelugeConfig) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .map_err(|e| TorrentClientError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            authenticated: RwLock::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    fn json_url(&self) -> String {
        format!("{}/json", self.config.url.trim_end_matches('/'))
    }

    /// One raw JSON-RPC call, no session handling.
    async fn call(&self, method: &str, params: Value) -> Result<Value, TorrentClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "method": method, "params": params, "id": id });

        let response = self
            .client
            .post(self.json_url())
            .json(&body)
            .send()
            .await
            .map_err(TorrentClientError::from_request)?;

        if !response.status().is_success() {
            return Err(TorrentClientError::ApiError(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let reply: RpcReply = response
            .json()
            .await
            .map_err(|e| TorrentClientError::ApiError(format!("Failed to parse response: {}", e)))?;

        match reply.error {
            Some(err) if err.code == NOT_AUTHENTICATED || err.message.contains("Not authenticated") => {
                Err(TorrentClientError::AuthenticationFailed(err.message))
            }
            Some(err) => Err(TorrentClientError::ApiError(format!(
                "{} ({})",
                err.message, err.code
            ))),
            None => Ok(reply.result),
        }
    }

    /// Log in to the web UI and attach it to a daemon if it is not already.
    async fn login(&self) -> Result<(), TorrentClientError> {
        let ok = self.call("auth.login", json!([self.config.password])).await?;
        if ok != Value::Bool(true) {
            return Err(TorrentClientError::AuthenticationFailed(
                "Invalid password".to_string(),
            ));
        }

        let connected = self.call("web.connected", json!([])).await?;
        if connected != Value::Bool(true) {
            let hosts = self.call("web.get_hosts", json!([])).await?;
            let host_id = hosts
                .get(0)
                .and_then(|h| h.get(0))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    TorrentClientError::ConnectionFailed("no Deluge daemon configured".into())
                })?
                .to_string();
            info!(host_id = %host_id, "Connecting Deluge web UI to daemon");
            self.call("web.connect", json!([host_id])).await?;
        }

        debug!("Deluge login successful");
        *self.authenticated.write().await = true;
        Ok(())
    }

    /// Call with an established session, re-logging in once if it expired.
    async fn call_authenticated(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, TorrentClientError> {
        if !*self.authenticated.read().await {
            login_with_retries(BACKEND, || self.login()).await?;
        }

        match self.call(method, params.clone()).await {
            Err(e) if e.is_auth_failure() => {
                warn!("Deluge session expired, re-authenticating");
                *self.authenticated.write().await = false;
                self.login().await?;
                self.call(method, params).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl TorrentClient for DelugeClient {
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
        let mut options = json!({});
        if let Some(path) = &self.config.download_path {
            options["download_location"] = json!(path);
        }

        let result = self
            .call_authenticated("core.add_torrent_magnet", json!([magnet, options]))
            .await
            .and_then(|added| {
                // null when the torrent is already in the session
                added
                    .as_str()
                    .map(str::to_lowercase)
                    .or_else(|| extract_hash_from_magnet(magnet))
                    .ok_or_else(|| TorrentClientError::InvalidTorrent(magnet.to_string()))
            });
        metrics::record_client_request(BACKEND, "add", &result);
        result
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        let result = self
            .call_authenticated(
                "core.get_torrent_status",
                json!([hash.to_lowercase(), STATUS_FIELDS]),
            )
            .await
            .and_then(|status| {
                let empty = status.as_object().map_or(true, |o| o.is_empty());
                if empty {
                    return Err(TorrentClientError::TorrentNotFound(hash.to_string()));
                }
                let status: DelugeStatus = serde_json::from_value(status).map_err(|e| {
                    TorrentClientError::ApiError(format!("Failed to parse status: {}", e))
                })?;
                Ok(status.into_torrent_info(hash))
            });
        metrics::record_client_request(BACKEND, "get", &result);
        result
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        let result = self
            .call_authenticated(
                "core.remove_torrent",
                json!([hash.to_lowercase(), delete_files]),
            )
            .await
            .map(|_| ());
        metrics::record_client_request(BACKEND, "remove", &result);
        result
    }
}
