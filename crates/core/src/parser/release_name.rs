//! Fansub/scene release-name parser.

use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::quality::{normalize_resolution, DEFAULT_VERSION};

/// File extensions treated as video payloads.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "webm", "ts", "m2ts", "wmv",
];

static RESOLUTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{3,4}x\d{3,4}|\d{3,4}p|4k)\b").expect("valid resolution regex")
});

static BRACKETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[[^\]]*\]|\([^)]*\)|\{[^}]*\}").expect("valid bracket regex")
});

static SEASON_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bs(\d{1,2})\s?e(\d{1,4})(?:v(\d+))?\b").expect("valid SxxEyy regex")
});

static DASH_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s-\s(\d{1,4})(?:v(\d+))?(?:\s|$)").expect("valid dash episode regex")
});

static KEYWORD_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:ep|episode|e)\s?(\d{1,4})(?:v(\d+))?\b").expect("valid keyword regex")
});

static TRAILING_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s(\d{1,4})(?:v(\d+))?\s*$").expect("valid trailing episode regex")
});

static SCENE_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-([A-Za-z0-9]+)$").expect("valid scene group regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Components extracted from a release name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRelease {
    /// Show title with tags, groups and episode markers removed.
    pub title: Option<String>,
    /// Season number when an `SxxEyy` marker is present.
    pub season: Option<u32>,
    /// Episode number as written in the release.
    pub episode: Option<u32>,
    /// Release version such as `"v2"`.
    pub version: Option<String>,
    /// Fansub group (`[Group]` prefix) or scene group (`-GROUP` suffix).
    pub release_group: Option<String>,
    /// Normalized resolution (`"1080p"`, `"4k"`).
    pub resolution: Option<String>,
    /// Lower-cased video extension, when the name ends with one.
    pub extension: Option<String>,
}

impl ParsedRelease {
    /// The release version, or [`DEFAULT_VERSION`] when none was written.
    pub fn version_or_default(&self) -> String {
        self.version
            .clone()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string())
    }
}

/// Parse a release name or file name into its components.
pub fn parse_release_name(name: &str) -> ParsedRelease {
    let mut parsed = ParsedRelease::default();
    let mut rest = name.trim().to_string();

    if let Some((stem, ext)) = rest.rsplit_once('.') {
        let ext = ext.to_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            rest = stem.to_string();
            parsed.extension = Some(ext);
        }
    }

    if rest.starts_with('[') {
        if let Some(end) = rest.find(']') {
            let group = rest[1..end].trim();
            if !group.is_empty() {
                parsed.release_group = Some(group.to_string());
            }
            rest = rest[end + 1..].to_string();
        }
    }

    parsed.resolution = RESOLUTION
        .captures(&rest)
        .and_then(|c| c.get(1))
        .map(|m| normalize_resolution(m.as_str()));

    let mut rest = BRACKETED.replace_all(&rest, " ").replace('_', " ");
    if !rest.contains(' ') && rest.contains('.') {
        rest = rest.replace('.', " ");
    }
    let rest = WHITESPACE.replace_all(rest.trim(), " ").to_string();

    let title_end = if let Some(caps) = SEASON_EPISODE.captures(&rest) {
        parsed.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
        apply_episode(&mut parsed, &caps, 2, 3);
        if parsed.release_group.is_none() {
            parsed.release_group = SCENE_GROUP
                .captures(&rest)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
        }
        caps.get(0).map(|m| m.start())
    } else {
        [&*DASH_EPISODE, &*KEYWORD_EPISODE, &*TRAILING_EPISODE]
            .iter()
            .find_map(|re| re.captures(&rest))
            .map(|caps| {
                apply_episode(&mut parsed, &caps, 1, 2);
                caps.get(0).map(|m| m.start()).unwrap_or(rest.len())
            })
    };

    let raw_title = match title_end {
        Some(end) => &rest[..end],
        None => strip_resolution(&rest),
    };
    let title = raw_title
        .trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '.' || c == '_')
        .to_string();
    if !title.is_empty() {
        parsed.title = Some(title);
    }

    parsed
}

fn apply_episode(parsed: &mut ParsedRelease, caps: &Captures<'_>, episode: usize, version: usize) {
    parsed.episode = caps.get(episode).and_then(|m| m.as_str().parse().ok());
    parsed.version = caps.get(version).map(|m| format!("v{}", m.as_str()));
}

fn strip_resolution(s: &str) -> &str {
    match RESOLUTION.find(s) {
        Some(m) => &s[..m.start()],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fansub_release() {
        let parsed = parse_release_name("[SubsPlease] Chainsaw Man - 12 (1080p) [A1B2C3D4].mkv");
        assert_eq!(parsed.title.as_deref(), Some("Chainsaw Man"));
        assert_eq!(parsed.episode, Some(12));
        assert_eq!(parsed.version, None);
        assert_eq!(parsed.version_or_default(), "v0");
        assert_eq!(parsed.release_group.as_deref(), Some("SubsPlease"));
        assert_eq!(parsed.resolution.as_deref(), Some("1080p"));
        assert_eq!(parsed.extension.as_deref(), Some("mkv"));
    }

    #[test]
    fn test_parse_versioned_release() {
        let parsed = parse_release_name("[Erai-raws] Spy x Family - 05v2 [720p][Multiple Subtitle].mkv");
        assert_eq!(parsed.title.as_deref(), Some("Spy x Family"));
        assert_eq!(parsed.episode, Some(5));
        assert_eq!(parsed.version.as_deref(), Some("v2"));
        assert_eq!(parsed.release_group.as_deref(), Some("Erai-raws"));
        assert_eq!(parsed.resolution.as_deref(), Some("720p"));
    }

    #[test]
    fn test_parse_scene_release() {
        let parsed = parse_release_name("Chainsaw.Man.S01E12.1080p.WEB.x264-GRP.mkv");
        assert_eq!(parsed.title.as_deref(), Some("Chainsaw Man"));
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episode, Some(12));
        assert_eq!(parsed.release_group.as_deref(), Some("GRP"));
        assert_eq!(parsed.resolution.as_deref(), Some("1080p"));
    }

    #[test]
    fn test_parse_plain_title_with_number() {
        let parsed = parse_release_name("Chainsaw Man - 12");
        assert_eq!(parsed.title.as_deref(), Some("Chainsaw Man"));
        assert_eq!(parsed.episode, Some(12));
        assert_eq!(parsed.extension, None);
    }

    #[test]
    fn test_parse_episode_keyword() {
        let parsed = parse_release_name("Frieren Episode 7 [1920x1080].mp4");
        assert_eq!(parsed.title.as_deref(), Some("Frieren"));
        assert_eq!(parsed.episode, Some(7));
        assert_eq!(parsed.resolution.as_deref(), Some("1080p"));
    }

    #[test]
    fn test_parse_without_episode() {
        let parsed = parse_release_name("[Group] Some Movie (1080p).mkv");
        assert_eq!(parsed.title.as_deref(), Some("Some Movie"));
        assert_eq!(parsed.episode, None);
        assert_eq!(parsed.resolution.as_deref(), Some("1080p"));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_release_name(""), ParsedRelease::default());
    }
}
