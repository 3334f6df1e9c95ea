use super::{types::Config, ConfigError, TorrentClientBackend, MIN_POLL_INTERVAL_SECS};

/// Validate configuration.
///
/// Rejects values the pipeline cannot run with: poll intervals below the
/// minimum, out-of-range matcher cutoffs, a zero encode limit, and a selected
/// torrent backend without its connection section.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.poller.interval_secs < MIN_POLL_INTERVAL_SECS {
        return Err(ConfigError::ValidationError(format!(
            "poller.interval_secs must be at least {} (got {})",
            MIN_POLL_INTERVAL_SECS, config.poller.interval_secs
        )));
    }

    if config.poller.fuzzy_cutoff > 100 {
        return Err(ConfigError::ValidationError(format!(
            "poller.fuzzy_cutoff must be between 0 and 100 (got {})",
            config.poller.fuzzy_cutoff
        )));
    }

    if config.poller.seen_release_max_age_days == 0 {
        return Err(ConfigError::ValidationError(
            "poller.seen_release_max_age_days cannot be 0".to_string(),
        ));
    }

    if config.downloader.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "downloader.interval_secs cannot be 0".to_string(),
        ));
    }

    if config.encoder.max_encodes == 0 {
        return Err(ConfigError::ValidationError(
            "encoder.max_encodes must be at least 1".to_string(),
        ));
    }

    for feed in &config.feeds {
        if feed.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "feed '{}' has an empty url",
                feed.name
            )));
        }
    }

    let tc = &config.torrent_client;
    let url = match tc.backend {
        TorrentClientBackend::Qbittorrent => tc.qbittorrent.as_ref().map(|c| c.url.as_str()),
        TorrentClientBackend::Transmission => tc.transmission.as_ref().map(|c| c.url.as_str()),
        TorrentClientBackend::Deluge => tc.deluge.as_ref().map(|c| c.url.as_str()),
    };
    match url {
        None => Err(ConfigError::ValidationError(format!(
            "torrent_client.{} section is required when backend = \"{}\"",
            tc.backend.as_str(),
            tc.backend.as_str()
        ))),
        Some(url) if url.trim().is_empty() => Err(ConfigError::ValidationError(format!(
            "torrent_client.{}.url cannot be empty",
            tc.backend.as_str()
        ))),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn valid_config() -> Config {
        load_config_from_str(
            r#"
[torrent_client]
backend = "qbittorrent"

[torrent_client.qbittorrent]
url = "http://localhost:8080"
username = "admin"
password = "secret"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_poll_interval_too_short() {
        let mut config = valid_config();
        config.poller.interval_secs = 60;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("180"));

        config.poller.interval_secs = MIN_POLL_INTERVAL_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_cutoff_out_of_range() {
        let mut config = valid_config();
        config.poller.fuzzy_cutoff = 101;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_encodes() {
        let mut config = valid_config();
        config.encoder.max_encodes = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = valid_config();
        config.server.port = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_missing_backend_section() {
        let mut config = valid_config();
        config.torrent_client.backend = TorrentClientBackend::Transmission;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("torrent_client.transmission"));
    }

    #[test]
    fn test_validate_empty_feed_url() {
        let mut config = valid_config();
        config.feeds.push(crate::config::FeedConfig {
            name: "broken".to_string(),
            url: "  ".to_string(),
            version: "1.0.0".to_string(),
        });
        assert!(validate_config(&config).is_err());
    }
}
