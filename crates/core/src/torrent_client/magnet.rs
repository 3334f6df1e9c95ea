//! Locator to magnet URI resolution.

use std::time::Duration;

use librqbit_core::torrent_metainfo::{torrent_from_bytes, TorrentMetaV1Owned};
use reqwest::Client;
use tracing::debug;

use super::TorrentClientError;

const BTIH_PREFIX: &str = "xt=urn:btih:";

/// Turns feed locators (magnet links, `.torrent` URLs or paths) into magnet URIs.
pub struct MagnetResolver {
    client: Client,
}

impl MagnetResolver {
    pub fn new(timeout: Duration) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TorrentClientError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client })
    }

    /// Resolve a locator to a magnet URI with a lowercase hex info hash.
    pub async fn resolve(&self, locator: &str) -> Result<String, TorrentClientError> {
        let locator = locator.trim();
        if locator.starts_with("magnet:") {
            return normalize_magnet(locator);
        }

        let bytes = if locator.starts_with("http://") || locator.starts_with("https://") {
            debug!(url = %locator, "Fetching torrent file");
            let response = self
                .client
                .get(locator)
                .send()
                .await
                .map_err(TorrentClientError::from_request)?;
            if !response.status().is_success() {
                return Err(TorrentClientError::ApiError(format!(
                    "HTTP {} fetching {}",
                    response.status(),
                    locator
                )));
            }
            response
                .bytes()
                .await
                .map_err(TorrentClientError::from_request)?
                .to_vec()
        } else {
            tokio::fs::read(locator)
                .await
                .map_err(|e| TorrentClientError::InvalidTorrent(format!("{}: {}", locator, e)))?
        };

        magnet_from_torrent_bytes(&bytes)
    }
}

/// Build a magnet URI from raw `.torrent` bytes.
pub fn magnet_from_torrent_bytes(bytes: &[u8]) -> Result<String, TorrentClientError> {
    let torrent: TorrentMetaV1Owned =
        torrent_from_bytes(bytes).map_err(|e| TorrentClientError::InvalidTorrent(e.to_string()))?;

    let mut magnet = format!("magnet:?{}{}", BTIH_PREFIX, torrent.info_hash.as_string());

    if let Some(name) = torrent.info.name.as_ref() {
        let name = String::from_utf8_lossy(name.as_ref());
        magnet.push_str("&dn=");
        magnet.push_str(&urlencoding::encode(&name));
    }
    if let Some(tracker) = torrent.announce.as_ref() {
        let tracker = String::from_utf8_lossy(tracker.as_ref());
        magnet.push_str("&tr=");
        magnet.push_str(&urlencoding::encode(&tracker));
    }

    Ok(magnet)
}

/// Rewrite a base32 info hash in a magnet URI as lowercase hex.
pub fn normalize_magnet(magnet: &str) -> Result<String, TorrentClientError> {
    let start = magnet
        .find(BTIH_PREFIX)
        .map(|i| i + BTIH_PREFIX.len())
        .ok_or_else(|| TorrentClientError::InvalidTorrent("magnet has no btih hash".into()))?;
    let end = magnet[start..]
        .find('&')
        .map(|i| start + i)
        .unwrap_or(magnet.len());
    let hash = &magnet[start..end];

    let hex = match hash.len() {
        40 if hash.chars().all(|c| c.is_ascii_hexdigit()) => hash.to_lowercase(),
        32 => base32_to_hex(hash).ok_or_else(|| {
            TorrentClientError::InvalidTorrent(format!("invalid base32 hash: {}", hash))
        })?,
        _ => {
            return Err(TorrentClientError::InvalidTorrent(format!(
                "invalid info hash: {}",
                hash
            )))
        }
    };

    Ok(format!("{}{}{}", &magnet[..start], hex, &magnet[end..]))
}

/// Extract the info hash from a magnet URI.
pub fn extract_hash_from_magnet(magnet: &str) -> Option<String> {
    let (_, query) = magnet.split_once('?')?;
    query
        .split('&')
        .find_map(|param| param.strip_prefix(BTIH_PREFIX))
        .map(|hash| hash.to_lowercase())
}

/// RFC 4648 base32 (no padding) to lowercase hex.
fn base32_to_hex(input: &str) -> Option<String> {
    let mut buffer: u32 = 0;
    let mut bits = 0;
    let mut out = String::with_capacity(40);

    for c in input.bytes() {
        let value = match c.to_ascii_uppercase() {
            b @ b'A'..=b'Z' => b - b'A',
            b @ b'2'..=b'7' => b - b'2' + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push_str(&format!("{:02x}", (buffer >> bits) & 0xff));
            buffer &= (1 << bits) - 1;
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_hex_magnet() {
        let magnet = "magnet:?xt=urn:btih:ABCDEF0123456789ABCDEF0123456789ABCDEF01&dn=Show";
        assert_eq!(
            normalize_magnet(magnet).unwrap(),
            "magnet:?xt=urn:btih:abcdef0123456789abcdef0123456789abcdef01&dn=Show"
        );
    }

    #[test]
    fn test_normalize_base32_magnet() {
        let zeros = format!("magnet:?xt=urn:btih:{}", "A".repeat(32));
        assert_eq!(
            normalize_magnet(&zeros).unwrap(),
            format!("magnet:?xt=urn:btih:{}", "0".repeat(40))
        );

        let ones = format!("magnet:?xt=urn:btih:{}&tr=udp", "7".repeat(32));
        assert_eq!(
            normalize_magnet(&ones).unwrap(),
            format!("magnet:?xt=urn:btih:{}&tr=udp", "f".repeat(40))
        );
    }

    #[test]
    fn test_normalize_rejects_bad_hash() {
        assert!(normalize_magnet("magnet:?dn=Show").is_err());
        assert!(normalize_magnet("magnet:?xt=urn:btih:xyz").is_err());
        assert!(normalize_magnet(&format!("magnet:?xt=urn:btih:{}", "1".repeat(32))).is_err());
    }

    #[test]
    fn test_extract_hash_from_magnet() {
        let magnet = "magnet:?xt=urn:btih:ABC123&dn=Test";
        assert_eq!(extract_hash_from_magnet(magnet), Some("abc123".to_string()));
        assert_eq!(extract_hash_from_magnet("not a magnet"), None);
        assert_eq!(extract_hash_from_magnet("magnet:?dn=Test"), None);
    }

    #[test]
    fn test_magnet_from_torrent_bytes() {
        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce31:http://tracker.example/announce4:infod6:lengthi12e4:name8:test.mkv12:piece lengthi16384e6:pieces20:");
        data.extend_from_slice(&[7u8; 20]);
        data.extend_from_slice(b"ee");

        let magnet = magnet_from_torrent_bytes(&data).unwrap();
        let hash = extract_hash_from_magnet(&magnet).unwrap();
        assert_eq!(hash.split('&').next().unwrap().len(), 40);
        assert!(magnet.contains("&dn=test.mkv"));
        assert!(magnet.contains("&tr=http%3A%2F%2Ftracker.example%2Fannounce"));
    }

    #[test]
    fn test_magnet_from_garbage() {
        assert!(matches!(
            magnet_from_torrent_bytes(b"not a torrent"),
            Err(TorrentClientError::InvalidTorrent(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_passes_magnets_through() {
        let resolver = MagnetResolver::new(Duration::from_secs(5)).unwrap();
        let magnet = format!("magnet:?xt=urn:btih:{}&dn=x", "a".repeat(40));
        assert_eq!(resolver.resolve(&magnet).await.unwrap(), magnet);
    }
}
