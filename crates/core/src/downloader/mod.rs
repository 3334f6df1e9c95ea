//! Per-release reconciliation.
//!
//! Every tick walks the unfinished releases and pushes each one forward
//! through `downloading → downloaded → renamed → moved → completed`,
//! persisting after every step. A release that cannot advance simply waits
//! for the next tick.

mod files;
pub mod naming;
mod runner;
mod types;

pub use files::{move_file, resolve_artifact};
pub use runner::Downloader;
pub use types::{DownloaderError, DownloaderSettings, DownloaderStatus, TickSummary};
