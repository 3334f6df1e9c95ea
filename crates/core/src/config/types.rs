use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub torrent_client: TorrentClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
}

/// Metrics/health listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("kanshi.db")
}

/// Feed poller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    /// Seconds between polls. Must be at least 180.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Minimum matcher score (0-100) for a feed item to be accepted.
    #[serde(default = "default_fuzzy_cutoff")]
    pub fuzzy_cutoff: u8,
    /// Seen-release ledger rows older than this are evicted after every poll.
    #[serde(default = "default_seen_max_age")]
    pub seen_release_max_age_days: u32,
}

/// Minimum allowed poll interval.
pub const MIN_POLL_INTERVAL_SECS: u64 = 180;

fn default_poll_interval() -> u64 {
    900
}

fn default_fuzzy_cutoff() -> u8 {
    crate::matcher::ACCEPT_THRESHOLD
}

fn default_seen_max_age() -> u32 {
    30
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            fuzzy_cutoff: default_fuzzy_cutoff(),
            seen_release_max_age_days: default_seen_max_age(),
        }
    }
}

/// A feed source parsed with the built-in release-name hooks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_feed_version")]
    pub version: String,
}

fn default_feed_version() -> String {
    "1.0.0".to_string()
}

/// Downloader (reconciliation loop) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloaderConfig {
    /// Seconds between reconciliation ticks.
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    /// Running inside a container: skip the post-move symlink.
    #[serde(default)]
    pub in_container: bool,
    /// Non-terminal releases untouched for longer than this are reported stale.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_reconcile_interval() -> u64 {
    15
}

fn default_stale_after() -> u64 {
    6 * 60 * 60
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
            in_container: false,
            stale_after_secs: default_stale_after(),
        }
    }
}

/// Post-processing (re-encode) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Maximum concurrent transcoder processes.
    #[serde(default = "default_max_encodes")]
    pub max_encodes: usize,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    #[serde(default)]
    pub codec: VideoCodec,
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Timeout for a single transcode in seconds.
    #[serde(default = "default_encode_timeout")]
    pub timeout_secs: u64,
}

fn default_max_encodes() -> usize {
    2
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_crf() -> u8 {
    24
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_encode_timeout() -> u64 {
    6 * 60 * 60
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_encodes: default_max_encodes(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            codec: VideoCodec::default(),
            crf: default_crf(),
            preset: default_preset(),
            timeout_secs: default_encode_timeout(),
        }
    }
}

/// Target video codec for re-encodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    #[default]
    H265,
    Av1,
}

impl VideoCodec {
    /// Returns the ffmpeg encoder name for this codec.
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Av1 => "libsvtav1",
        }
    }
}

/// Torrent client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentClientConfig {
    /// Which backend to use
    pub backend: TorrentClientBackend,
    #[serde(default)]
    pub qbittorrent: Option<QBittorrentConfig>,
    #[serde(default)]
    pub transmission: Option<TransmissionConfig>,
    #[serde(default)]
    pub deluge: Option<DelugeConfig>,
}

/// Available torrent client backends
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TorrentClientBackend {
    Qbittorrent,
    Transmission,
    Deluge,
}

impl TorrentClientBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qbittorrent => "qbittorrent",
            Self::Transmission => "transmission",
            Self::Deluge => "deluge",
        }
    }
}

/// qBittorrent WebUI configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QBittorrentConfig {
    /// WebUI URL (e.g., "http://localhost:8080")
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Save path override for new torrents
    #[serde(default)]
    pub download_path: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

/// Transmission RPC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransmissionConfig {
    /// Base URL (e.g., "http://localhost:9091"); "/transmission/rpc" is appended
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub download_path: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

/// Deluge WebUI (JSON-RPC) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelugeConfig {
    /// Web UI URL (e.g., "http://localhost:8112"); "/json" is appended
    pub url: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub download_path: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

/// Sanitized config for display (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub poller: PollerConfig,
    pub feeds: Vec<FeedConfig>,
    pub downloader: DownloaderConfig,
    pub encoder: EncoderConfig,
    pub torrent_client: SanitizedTorrentClientConfig,
}

/// Torrent client config with credentials hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTorrentClientConfig {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub credentials_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let tc = &config.torrent_client;
        let (url, credentials_configured) = match tc.backend {
            TorrentClientBackend::Qbittorrent => tc
                .qbittorrent
                .as_ref()
                .map(|c| (Some(c.url.clone()), !c.password.is_empty()))
                .unwrap_or((None, false)),
            TorrentClientBackend::Transmission => tc
                .transmission
                .as_ref()
                .map(|c| (Some(c.url.clone()), c.password.is_some()))
                .unwrap_or((None, false)),
            TorrentClientBackend::Deluge => tc
                .deluge
                .as_ref()
                .map(|c| (Some(c.url.clone()), !c.password.is_empty()))
                .unwrap_or((None, false)),
        };

        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            poller: config.poller.clone(),
            feeds: config.feeds.clone(),
            downloader: config.downloader.clone(),
            encoder: config.encoder.clone(),
            torrent_client: SanitizedTorrentClientConfig {
                backend: tc.backend.as_str().to_string(),
                url,
                credentials_configured,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[torrent_client]
backend = "deluge"

[torrent_client.deluge]
url = "http://localhost:8112"
password = "deluge"
"#;

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.torrent_client.backend, TorrentClientBackend::Deluge);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path.to_str().unwrap(), "kanshi.db");
        assert_eq!(config.poller.interval_secs, 900);
        assert_eq!(config.poller.fuzzy_cutoff, 90);
        assert_eq!(config.poller.seen_release_max_age_days, 30);
        assert_eq!(config.downloader.interval_secs, 15);
        assert!(!config.downloader.in_container);
        assert!(!config.encoder.enabled);
        assert_eq!(config.encoder.max_encodes, 2);
        assert_eq!(config.encoder.codec, VideoCodec::H265);
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_deserialize_missing_torrent_client_fails() {
        let result: Result<Config, _> = toml::from_str("[poller]\ninterval_secs = 300\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_unknown_backend_fails() {
        let toml = r#"
[torrent_client]
backend = "utorrent"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_encoder_section() {
        let toml = format!(
            "{}\n[encoder]\nenabled = true\nmax_encodes = 4\ncodec = \"av1\"\ncrf = 30\n",
            MINIMAL
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert!(config.encoder.enabled);
        assert_eq!(config.encoder.max_encodes, 4);
        assert_eq!(config.encoder.codec, VideoCodec::Av1);
        assert_eq!(config.encoder.codec.ffmpeg_codec(), "libsvtav1");
        assert_eq!(config.encoder.crf, 30);
        assert_eq!(config.encoder.preset, "medium");
    }

    #[test]
    fn test_sanitized_config_hides_password() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.torrent_client.backend, "deluge");
        assert_eq!(
            sanitized.torrent_client.url.as_deref(),
            Some("http://localhost:8112")
        );
        assert!(sanitized.torrent_client.credentials_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("password"));
    }
}
