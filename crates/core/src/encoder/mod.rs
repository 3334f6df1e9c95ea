//! Bounded re-encode queue.
//!
//! Completed releases of post-processed shows are queued here. At most
//! `max_encodes` transcodes run at once; the rest wait in FIFO order and
//! start one-in-one-out as slots free. Each job writes to a scratch file
//! next to the original and swaps it in with a rename, so a job cut short
//! by a restart is simply run again.

mod runner;
mod types;

pub use runner::{scratch_path, Encoder};
pub use types::{ActiveEncode, EncoderError, EncoderSettings, EncoderStatus};
