//! Feed poller.
//!
//! One `poll` walks every configured feed: fetch (conditional), drop items
//! already seen at the head of the feed, parse, match against the watch
//! list, and hand fresh matches to the release intake.

mod runner;
mod types;

pub use runner::Poller;
pub use types::{PollMatch, PollerError, PollerSettings};
