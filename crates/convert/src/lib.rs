//! Media conversion boundary for Hotfolder
//!
//! This crate provides:
//! - The [`Converter`] capability invoked once per stable file
//! - Output format definitions
//! - An ffmpeg subprocess transcoder with permille progress reporting

pub mod ffmpeg;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use ffmpeg::FfmpegTranscoder;

/// Progress callback, fed permille values in `0..=1000` while a
/// conversion runs. A successful conversion always ends with `1000`.
pub type ProgressFn = dyn Fn(u32) + Send + Sync;

/// A conversion capability: turn `input` into `output`, reporting
/// progress along the way.
///
/// Implementations block (asynchronously) until the conversion finishes
/// or fails. The caller decides scheduling; the dispatcher in the service
/// runs exactly one conversion at a time.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressFn,
    ) -> Result<(), ConvertError>;
}

/// Errors from a failed conversion. Carries both endpoints so log lines
/// can identify the task without extra context.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("failed to convert {} to {}: {reason}", .input.display(), .output.display())]
    Failed {
        input: PathBuf,
        output: PathBuf,
        reason: String,
    },

    #[error("failed to convert {} to {}", .input.display(), .output.display())]
    Io {
        input: PathBuf,
        output: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Target container/codec families the transcoder can produce. The name
/// doubles as the ffmpeg muxer name and the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp3,
    Ogg,
    Flac,
    Wav,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::Wav => "wav",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.name()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "ogg" => Ok(Self::Ogg),
            "flac" => Ok(Self::Flac),
            "wav" => Ok(Self::Wav),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

/// Parse error for [`OutputFormat`].
#[derive(Debug, thiserror::Error)]
#[error("unknown output format {0:?} (expected one of: mp3, ogg, flac, wav)")]
pub struct UnknownFormat(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_round_trip() {
        for format in [
            OutputFormat::Mp3,
            OutputFormat::Ogg,
            OutputFormat::Flac,
            OutputFormat::Wav,
        ] {
            assert_eq!(format.name().parse::<OutputFormat>().unwrap(), format);
        }
    }

    #[test]
    fn format_parse_is_case_insensitive() {
        assert_eq!("MP3".parse::<OutputFormat>().unwrap(), OutputFormat::Mp3);
        assert_eq!(" flac ".parse::<OutputFormat>().unwrap(), OutputFormat::Flac);
        assert!("mp4".parse::<OutputFormat>().is_err());
    }
}
