use std::path::PathBuf;

use serde::Serialize;

/// One re-encode of a single video file.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Release the file belongs to.
    pub entry_id: i64,
    pub input_path: PathBuf,
    /// Scratch file the transcoder writes to; swapped in by the caller.
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub entry_id: i64,
    pub output_path: PathBuf,
    pub output_size_bytes: u64,
    pub duration_ms: u64,
}

/// Snapshot of a running transcode, parsed from `-progress` output.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionProgress {
    pub entry_id: i64,
    /// 0-100, zero while the input duration is unknown.
    pub percent: f32,
    pub time_secs: f64,
    pub duration_secs: Option<f64>,
    pub speed: Option<String>,
}

/// What ffprobe reports about a file.
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub format: String,
    pub video_codec: Option<String>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
}
