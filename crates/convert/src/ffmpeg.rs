//! ffmpeg subprocess transcoder
//!
//! Spawns the ffmpeg binary for each conversion, strips the video
//! streams, and remuxes/re-encodes the audio into the configured output
//! format. Progress is scraped from ffmpeg's stderr: the `Duration:` line
//! of the source gives the total, each `time=` status line gives the
//! position, and the two combine into a permille value.

use crate::{ConvertError, Converter, OutputFormat, ProgressFn};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Number of trailing stderr lines kept for the failure message.
const STDERR_TAIL: usize = 8;

/// Converter implementation backed by an external ffmpeg binary.
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    format: OutputFormat,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            format,
        }
    }

    fn build_command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner");
        cmd.arg("-nostdin");
        cmd.arg("-y");
        cmd.arg("-i").arg(input);
        // Audio only; the container is chosen explicitly rather than
        // guessed from the output extension.
        cmd.arg("-vn");
        cmd.arg("-f").arg(self.format.name());
        cmd.arg(output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl Converter for FfmpegTranscoder {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressFn,
    ) -> Result<(), ConvertError> {
        let io_error = |source| ConvertError::Io {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            source,
        };

        let mut command = self.build_command(input, output);
        tracing::debug!("spawning {:?}", command.as_std());
        let mut child = command.spawn().map_err(io_error)?;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            let mut total_secs: Option<f64> = None;

            while let Ok(Some(line)) = lines.next_line().await {
                if total_secs.is_none() {
                    total_secs = parse_total_duration(&line);
                }
                if let Some(position) = parse_progress_position(&line) {
                    if let Some(total) = total_secs.filter(|t| *t > 0.0) {
                        progress(permille(position, total));
                    }
                }

                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let status = child.wait().await.map_err(io_error)?;
        if status.success() {
            progress(1000);
            Ok(())
        } else {
            Err(ConvertError::Failed {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
                reason: format!(
                    "ffmpeg exited with {status}: {}",
                    tail.make_contiguous().join(" | ")
                ),
            })
        }
    }
}

/// Extract the source duration in seconds from an ffmpeg header line,
/// e.g. `  Duration: 00:03:25.43, start: 0.000000, bitrate: 320 kb/s`.
fn parse_total_duration(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?.trim_start();
    let timestamp = rest.split([',', ' ']).next()?;
    parse_timestamp(timestamp)
}

/// Extract the current position in seconds from an ffmpeg status line,
/// e.g. `size=     512kB time=00:01:02.03 bitrate= 128.0kbits/s`.
fn parse_progress_position(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once("time=")?;
    let timestamp = rest.split_whitespace().next()?;
    parse_timestamp(timestamp)
}

/// Parse an `HH:MM:SS.cc` timestamp into seconds. ffmpeg prints `N/A`
/// before the position is known.
fn parse_timestamp(timestamp: &str) -> Option<f64> {
    let mut parts = timestamp.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn permille(position: f64, total: f64) -> u32 {
    (((position / total) * 1000.0).round()).clamp(0.0, 1000.0) as u32
}
