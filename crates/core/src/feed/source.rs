use std::fmt;
use std::sync::Arc;

use super::FeedItem;
use crate::config::FeedConfig;
use crate::parser::parse_release_name;

/// Extracts a show name from a file name.
pub type ShowNameFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
/// Extracts an episode number from a file name.
pub type EpisodeFn = Arc<dyn Fn(&str) -> Option<u32> + Send + Sync>;
/// Returns false for items that must be discarded.
pub type IgnoreFn = Arc<dyn Fn(&FeedItem) -> bool + Send + Sync>;
/// Derives a string (link, file name) from an item.
pub type ItemTextFn = Arc<dyn Fn(&FeedItem) -> Option<String> + Send + Sync>;

/// The capabilities a feed source plugs into the poller.
///
/// The two required hooks default to the built-in release-name parser; the
/// optional ones fall back to the raw item `title` and `link`.
#[derive(Clone)]
pub struct ParserHooks {
    pub get_show_name: ShowNameFn,
    pub get_episode_number: EpisodeFn,
    pub ignore_logic: Option<IgnoreFn>,
    pub get_link_location: Option<ItemTextFn>,
    pub get_file_name: Option<ItemTextFn>,
}

impl Default for ParserHooks {
    fn default() -> Self {
        Self {
            get_show_name: Arc::new(|name: &str| parse_release_name(name).title),
            get_episode_number: Arc::new(|name: &str| parse_release_name(name).episode),
            ignore_logic: None,
            get_link_location: None,
            get_file_name: None,
        }
    }
}

impl ParserHooks {
    /// False when `ignore_logic` rejects the item.
    pub fn keep(&self, item: &FeedItem) -> bool {
        self.ignore_logic.as_ref().map_or(true, |keep| keep(item))
    }

    pub fn file_name(&self, item: &FeedItem) -> String {
        self.get_file_name
            .as_ref()
            .and_then(|f| f(item))
            .unwrap_or_else(|| item.title.clone())
    }

    pub fn link(&self, item: &FeedItem) -> Option<String> {
        self.get_link_location
            .as_ref()
            .and_then(|f| f(item))
            .or_else(|| item.link.clone())
    }

    pub fn show_name(&self, file_name: &str) -> Option<String> {
        (self.get_show_name)(file_name)
    }

    pub fn episode_number(&self, file_name: &str) -> Option<u32> {
        (self.get_episode_number)(file_name)
    }
}

impl fmt::Debug for ParserHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserHooks")
            .field("ignore_logic", &self.ignore_logic.is_some())
            .field("get_link_location", &self.get_link_location.is_some())
            .field("get_file_name", &self.get_file_name.is_some())
            .finish()
    }
}

/// A configured feed. `name` identifies the source in the feed cache.
#[derive(Debug, Clone)]
pub struct FeedSource {
    pub name: String,
    pub version: String,
    pub url: String,
    pub hooks: ParserHooks,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            url: url.into(),
            hooks: ParserHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: ParserHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl From<&FeedConfig> for FeedSource {
    fn from(config: &FeedConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version.clone(),
            url: config.url.clone(),
            hooks: ParserHooks::default(),
        }
    }
}
