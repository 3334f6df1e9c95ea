//! Post-processing transcoder.
//!
//! The `Converter` trait is the seam between the encoder queue and the
//! external `ffmpeg` process. `FfmpegConverter` re-encodes the video stream
//! with the configured codec and copies every other stream untouched.

mod error;
mod ffmpeg;
mod traits;
mod types;

pub use error::ConverterError;
pub use ffmpeg::FfmpegConverter;
pub use traits::Converter;
pub use types::{ConversionJob, ConversionProgress, ConversionResult, MediaInfo};
