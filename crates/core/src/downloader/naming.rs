//! File and folder name templates.
//!
//! | token      | value                          |
//! |------------|--------------------------------|
//! | `{n}`      | show title                     |
//! | `{s}`      | season                         |
//! | `{s00}`    | season, two digits             |
//! | `{e}`      | episode with offset applied    |
//! | `{e00}`    | episode, two digits            |
//! | `{s00e00}` | `s01e12`                       |
//! | `{sxe}`    | `1x12`                         |
//! | `{ext}`    | file extension, no dot         |
//!
//! Unknown tokens are left untouched.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};

use crate::store::Show;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z0-9]+)\}").expect("valid token regex"));

/// Substitute every known token in `template`.
pub fn render(template: &str, show: &Show, episode: u32, ext: &str) -> String {
    let season = show.season;
    let ep = show.display_episode(episode);

    TOKEN
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "n" => show.title.clone(),
            "s" => season.to_string(),
            "s00" => format!("{:02}", season),
            "e" => ep.to_string(),
            "e00" => format!("{:02}", ep),
            "s00e00" => format!("s{:02}e{:02}", season, ep),
            "sxe" => format!("{}x{:02}", season, ep),
            "ext" => ext.to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Target file name for a release, always ending in `.ext`.
pub fn file_name(show: &Show, episode: u32, ext: &str) -> String {
    let mut name = render(show.format_template(), show, episode, ext);
    let suffix = format!(".{}", ext);
    if !ext.is_empty() && !name.to_lowercase().ends_with(&suffix.to_lowercase()) {
        name.push_str(&suffix);
    }
    sanitize_filename::sanitize(name.trim())
}

/// Library-relative folder for a release. `/` in the template nests folders.
pub fn folder(show: &Show, episode: u32, ext: &str) -> PathBuf {
    render(show.folder_template(), show, episode, ext)
        .split('/')
        .map(|part| sanitize_filename::sanitize(part.trim()))
        .filter(|part| !part.is_empty() && part != "." && part != "..")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show() -> Show {
        Show {
            id: 1,
            title: "Chainsaw Man".to_string(),
            library_id: None,
            desired_format: None,
            desired_folder: None,
            season: 1,
            episode_offset: 0,
            watch: true,
            post_process: false,
            preferred_resolution: None,
            preferred_release_group: None,
        }
    }

    #[test]
    fn test_default_template() {
        assert_eq!(file_name(&show(), 12, "mkv"), "Chainsaw Man - s01e12.mkv");
        assert_eq!(folder(&show(), 12, "mkv"), PathBuf::from("Chainsaw Man"));
    }

    #[test]
    fn test_all_tokens() {
        let mut s = show();
        s.season = 2;
        assert_eq!(
            render("{n}|{s}|{s00}|{e}|{e00}|{s00e00}|{sxe}|{ext}", &s, 5, "mp4"),
            "Chainsaw Man|2|02|5|05|s02e05|2x05|mp4"
        );
        assert_eq!(render("{n} {unknown}", &s, 5, "mp4"), "Chainsaw Man {unknown}");
    }

    #[test]
    fn test_offset_applies_to_episode() {
        let mut s = show();
        s.season = 2;
        s.episode_offset = -12;
        assert_eq!(file_name(&s, 13, "mkv"), "Chainsaw Man - s02e01.mkv");
    }

    #[test]
    fn test_explicit_ext_not_doubled() {
        let mut s = show();
        s.desired_format = Some("{n} {sxe}.{ext}".to_string());
        assert_eq!(file_name(&s, 3, "mkv"), "Chainsaw Man 1x03.mkv");
    }

    #[test]
    fn test_unsafe_characters_sanitized() {
        let mut s = show();
        s.title = "Re:Zero".to_string();
        s.desired_folder = Some("Anime/{n}/Season {s}/../x".to_string());

        assert!(!file_name(&s, 1, "mkv").contains(':'));
        let dir = folder(&s, 1, "mkv");
        assert_eq!(dir.components().count(), 4);
        assert!(dir.starts_with("Anime"));
        assert!(dir.ends_with("x"));
    }
}
