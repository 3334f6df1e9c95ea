//! Release-name parsing.
//!
//! Turns raw feed titles and on-disk file names such as
//! `[SubsPlease] Chainsaw Man - 12v2 (1080p) [ABCD1234].mkv` into their
//! components, and provides the ordering/normalization helpers used by the
//! seen-release ledger.

mod quality;
mod release_name;

pub use quality::{compare_version_strings, normalize_resolution, DEFAULT_VERSION};
pub use release_name::{parse_release_name, ParsedRelease, VIDEO_EXTENSIONS};
