//! Transmission RPC client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::TransmissionConfig;
use crate::metrics;

use super::{
    extract_hash_from_magnet, login_with_retries, TorrentClient, TorrentClientError, TorrentInfo,
    TorrentState,
};

const BACKEND: &str = "transmission";
const SESSION_HEADER: &str = "X-Transmission-Session-Id";
const TORRENT_FIELDS: &[&str] = &[
    "hashString",
    "name",
    "status",
    "error",
    "percentDone",
    "totalSize",
    "downloadDir",
];

/// Transmission client. Credentials travel as HTTP basic auth; the session
/// is the CSRF token Transmission hands out with a 409.
pub struct TransmissionClient {
    client: Client,
    config: TransmissionConfig,
    session_id: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrTorrent {
    hash_string: String,
    #[serde(default)]
    name: String,
    status: i64,
    #[serde(default)]
    error: i64,
    percent_done: f64,
    #[serde(default)]
    total_size: i64,
    #[serde(default)]
    download_dir: String,
}

impl TrTorrent {
    fn into_torrent_info(self) -> TorrentInfo {
        let state = if self.error != 0 {
            TorrentState::Error
        } else {
            parse_tr_status(self.status)
        };
        TorrentInfo {
            hash: self.hash_string.to_lowercase(),
            name: self.name,
            state,
            progress: self.percent_done,
            size_bytes: self.total_size.max(0) as u64,
            save_path: Some(self.download_dir).filter(|p| !p.is_empty()),
            content_path: None,
        }
    }
}

/// Transmission numeric status to TorrentState.
fn parse_tr_status(status: i64) -> TorrentState {
    match status {
        0 => TorrentState::Paused,
        1 | 2 => TorrentState::Checking,
        3 | 5 => TorrentState::Queued,
        4 => TorrentState::Downloading,
        6 => TorrentState::Seeding,
        _ => TorrentState::Unknown,
    }
}

impl TransmissionClient {
    pub fn new(config: TransmissionConfig) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| TorrentClientError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session_id: RwLock::new(None),
        })
    }

    fn rpc_url(&self) -> String {
        format!("{}/transmission/rpc", self.config.url.trim_end_matches('/'))
    }

    async fn post(&self, body: &Value) -> Result<Response, TorrentClientError> {
        let mut request = self.client.post(self.rpc_url()).json(body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }
        if let Some(id) = self.session_id.read().await.clone() {
            request = request.header(SESSION_HEADER, id);
        }
        request.send().await.map_err(TorrentClientError::from_request)
    }

    async fn remember_session(&self, response: &Response) {
        let id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *self.session_id.write().await = id;
    }

    /// Post, picking up a fresh session token once on 409.
    async fn post_with_session(&self, body: &Value) -> Result<Response, TorrentClientError> {
        let response = self.post(body).await?;
        if response.status() == StatusCode::CONFLICT {
            debug!("Transmission session id rotated, retrying");
            self.remember_session(&response).await;
            return self.post(body).await;
        }
        Ok(response)
    }

    /// Call an RPC method. A 401 drops the session and retries once.
    async fn rpc(&self, method: &str, arguments: Value) -> Result<Value, TorrentClientError> {
        let body = json!({ "method": method, "arguments": arguments });

        let mut response = self.post_with_session(&body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Transmission rejected the session, re-authenticating");
            *self.session_id.write().await = None;
            response = self.post_with_session(&body).await?;
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::CONFLICT {
            return Err(TorrentClientError::AuthenticationFailed(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(TorrentClientError::ApiError(format!("HTTP {}", status)));
        }

        let reply: RpcResponse = response
            .json()
            .await
            .map_err(|e| TorrentClientError::ApiError(format!("Failed to parse response: {}", e)))?;
        if reply.result != "success" {
            return Err(TorrentClientError::ApiError(reply.result));
        }
        Ok(reply.arguments)
    }

    async fn open_session(&self) -> Result<(), TorrentClientError> {
        self.rpc("session-get", json!({ "fields": ["version"] }))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TorrentClient for TransmissionClient {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn authenticate(&self) -> Result<bool, TorrentClientError> {
        let result = login_with_retries(BACKEND, || self.open_session()).await;
        metrics::record_client_request(BACKEND, "authenticate", &result);
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_auth_failure() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn add_torrent(&self, magnet: &str) -> Result<String, TorrentClientError> {
        let mut arguments = json!({ "filename": magnet });
        if let Some(dir) = &self.config.download_path {
            arguments["download-dir"] = json!(dir);
        }

        let result = self.rpc("torrent-add", arguments).await.and_then(|args| {
            args.get("torrent-added")
                .or_else(|| args.get("torrent-duplicate"))
                .and_then(|t| t.get("hashString"))
                .and_then(Value::as_str)
                .map(str::to_lowercase)
                .or_else(|| extract_hash_from_magnet(magnet))
                .ok_or_else(|| TorrentClientError::InvalidTorrent(magnet.to_string()))
        });
        metrics::record_client_request(BACKEND, "add", &result);
        result
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        let arguments = json!({ "ids": [hash.to_lowercase()], "fields": TORRENT_FIELDS });

        let result = self.rpc("torrent-get", arguments).await.and_then(|args| {
            let torrents: Vec<TrTorrent> =
                serde_json::from_value(args.get("torrents").cloned().unwrap_or(Value::Null))
                    .map_err(|e| {
                        TorrentClientError::ApiError(format!("Failed to parse torrents: {}", e))
                    })?;
            torrents
                .into_iter()
                .next()
                .map(TrTorrent::into_torrent_info)
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
        let arguments = json!({
            "ids": [hash.to_lowercase()],
            "delete-local-data": delete_files,
        });
        let result = self.rpc("torrent-remove", arguments).await.map(|_| ());
        metrics::record_client_request(BACKEND, "remove", &result);
        result
    }
}
