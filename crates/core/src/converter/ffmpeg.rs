use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::config::{EncoderConfig, VideoCodec};

use super::error::ConverterError;
use super::traits::Converter;
use super::types::{ConversionJob, ConversionProgress, ConversionResult, MediaInfo};

static OUT_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^out_time_ms=(\d+)").expect("valid out_time regex"));
static SPEED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^speed=\s*(\d+\.?\d*)x").expect("valid speed regex"));

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Re-encodes video through an external `ffmpeg` binary.
pub struct FfmpegConverter {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    codec: VideoCodec,
    crf: u8,
    preset: String,
    timeout_secs: u64,
}

/// Running position inside one `-progress` stream.
#[derive(Debug, Default)]
struct ProgressState {
    time_secs: f64,
    speed: Option<String>,
}

impl ProgressState {
    fn update(&mut self, line: &str) {
        if let Some(caps) = OUT_TIME.captures(line) {
            if let Ok(us) = caps[1].parse::<f64>() {
                // despite the name, ffmpeg reports microseconds here
                self.time_secs = us / 1_000_000.0;
            }
        } else if let Some(caps) = SPEED.captures(line) {
            self.speed = Some(format!("{}x", &caps[1]));
        }
    }

    fn percent(&self, duration_secs: Option<f64>) -> f32 {
        match duration_secs {
            Some(d) if d > 0.0 => (self.time_secs / d * 100.0).min(100.0) as f32,
            _ => 0.0,
        }
    }
}

impl FfmpegConverter {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            codec: config.codec,
            crf: config.crf,
            preset: config.preset.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    fn build_args(&self, input_path: &Path, output_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input_path.to_string_lossy().to_string(),
            // keep every stream, only the video gets touched
            "-map".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-c:v".to_string(),
            self.codec.ffmpeg_codec().to_string(),
            "-crf".to_string(),
            self.crf.to_string(),
        ];

        // SVT-AV1 takes numeric presets only
        let preset_ok = match self.codec {
            VideoCodec::Av1 => self.preset.parse::<u8>().is_ok(),
            VideoCodec::H264 | VideoCodec::H265 => !self.preset.is_empty(),
        };
        if preset_ok {
            args.extend(["-preset".to_string(), self.preset.clone()]);
        }

        args.extend([
            "-loglevel".to_string(),
            "error".to_string(),
            "-progress".to_string(),
            "pipe:2".to_string(),
            output_path.to_string_lossy().to_string(),
        ]);
        args
    }

    fn parse_probe_output(path: &Path, output: &str) -> Result<MediaInfo, ConverterError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
            size: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
        }

        let probe: ProbeOutput = serde_json::from_str(output)
            .map_err(|e| ConverterError::probe_failed(format!("bad ffprobe output: {}", e)))?;

        let video = probe.streams.iter().find(|s| s.codec_type == "video");

        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes: probe
                .format
                .size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            duration_secs: probe
                .format
                .duration
                .as_deref()
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0),
            format: probe
                .format
                .format_name
                .split(',')
                .next()
                .unwrap_or("unknown")
                .to_string(),
            video_codec: video.and_then(|s| s.codec_name.clone()),
            video_width: video.and_then(|s| s.width),
            video_height: video.and_then(|s| s.height),
        })
    }

    fn spawn_error(&self, e: std::io::Error, path: &Path, ffprobe: bool) -> ConverterError {
        match (e.kind(), ffprobe) {
            (std::io::ErrorKind::NotFound, false) => ConverterError::FfmpegNotFound {
                path: path.to_path_buf(),
            },
            (std::io::ErrorKind::NotFound, true) => ConverterError::FfprobeNotFound {
                path: path.to_path_buf(),
            },
            _ => ConverterError::Io(e),
        }
    }

    async fn run_conversion(
        &self,
        job: &ConversionJob,
        progress_tx: Option<mpsc::Sender<ConversionProgress>>,
    ) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();

        if !tokio::fs::try_exists(&job.input_path).await? {
            return Err(ConverterError::InputNotFound {
                path: job.input_path.clone(),
            });
        }

        // a failed probe only costs us the percentage
        let duration_secs = self
            .probe(&job.input_path)
            .await
            .ok()
            .map(|i| i.duration_secs);

        let args = self.build_args(&job.input_path, &job.output_path);
        debug!(entry_id = job.entry_id, ?args, "Spawning ffmpeg");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e, &self.ffmpeg_path, false))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConverterError::conversion_failed("stderr not captured", None))?;
        let mut reader = BufReader::new(stderr).lines();

        let result = timeout(Duration::from_secs(self.timeout_secs), async {
            let mut state = ProgressState::default();
            let mut last_sent = Instant::now();
            let mut error_output = String::new();

            while let Some(line) = reader.next_line().await? {
                if line.contains('=') && !line.contains(' ') {
                    state.update(&line);
                } else {
                    error_output.push_str(&line);
                    error_output.push('\n');
                }

                let finished = line == "progress=end";
                if let Some(tx) = &progress_tx {
                    if finished || last_sent.elapsed() >= PROGRESS_INTERVAL {
                        let _ = tx.try_send(ConversionProgress {
                            entry_id: job.entry_id,
                            percent: if finished {
                                100.0
                            } else {
                                state.percent(duration_secs)
                            },
                            time_secs: state.time_secs,
                            duration_secs,
                            speed: state.speed.clone(),
                        });
                        last_sent = Instant::now();
                    }
                }
            }

            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, error_output))
        })
        .await;

        match result {
            Ok(Ok((status, error_output))) => {
                if !status.success() {
                    return Err(ConverterError::conversion_failed(
                        format!("ffmpeg exited with code: {:?}", status.code()),
                        Some(error_output).filter(|s| !s.is_empty()),
                    ));
                }
            }
            Ok(Err(e)) => return Err(ConverterError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                return Err(ConverterError::Timeout {
                    timeout_secs: self.timeout_secs,
                });
            }
        }

        let output_meta = tokio::fs::metadata(&job.output_path)
            .await
            .map_err(|_| ConverterError::conversion_failed("output file not created", None))?;

        Ok(ConversionResult {
            entry_id: job.entry_id,
            output_path: job.output_path.clone(),
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| self.spawn_error(e, &self.ffprobe_path, true))?;

        if !output.status.success() {
            return Err(ConverterError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Self::parse_probe_output(path, &String::from_utf8_lossy(&output.stdout))
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        self.run_conversion(&job, None).await
    }

    async fn convert_with_progress(
        &self,
        job: ConversionJob,
        progress_tx: mpsc::Sender<ConversionProgress>,
    ) -> Result<ConversionResult, ConverterError> {
        self.run_conversion(&job, Some(progress_tx)).await
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| self.spawn_error(e, &self.ffmpeg_path, false))?;
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| self.spawn_error(e, &self.ffprobe_path, true))?;
        Ok(())
    }
}
