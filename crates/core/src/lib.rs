pub mod config;
pub mod converter;
pub mod downloader;
pub mod encoder;
pub mod feed;
pub mod intake;
pub mod matcher;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod parser;
pub mod poller;
pub mod store;
pub mod testing;
pub mod torrent_client;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use converter::{Converter, ConverterError, FfmpegConverter};
pub use downloader::{Downloader, DownloaderError, DownloaderSettings, TickSummary};
pub use encoder::{Encoder, EncoderError, EncoderSettings};
pub use feed::{FeedError, FeedFetcher, FeedSource, HttpFeedFetcher};
pub use intake::{IntakeError, ReleaseIntake};
pub use matcher::{match_title, ACCEPT_THRESHOLD};
pub use notify::{ChannelDispatcher, NotificationDispatcher, NoopDispatcher, StateNotification};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorSettings, OrchestratorStatus};
pub use parser::{compare_version_strings, normalize_resolution, parse_release_name};
pub use poller::{PollMatch, Poller, PollerError, PollerSettings};
pub use store::{Entry, EntryState, SqliteStore, Store, StoreError};
pub use torrent_client::{
    create_torrent_client, MagnetResolver, TorrentClient, TorrentClientError,
};
