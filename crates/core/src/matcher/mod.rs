//! Fuzzy title matching.
//!
//! Scores how closely a release's show name resembles each watched title.
//! Pure functions only: callers decide what score is good enough, the
//! pipeline uses [`ACCEPT_THRESHOLD`].

mod fuzzy;

pub use fuzzy::{match_title, normalize_tokens, token_set_ratio, token_sort_ratio, TitleMatch};

/// Minimum score (0-100) the poller requires before acting on a match.
pub const ACCEPT_THRESHOLD: u8 = 90;
