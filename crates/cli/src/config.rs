//! Service configuration
//!
//! Loaded from a TOML file. A missing or unparsable file logs a warning
//! and falls back to the defaults, so a bare `hotfolder run` works out of
//! the box with `./in` and `./out`.

use convert::OutputFormat;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "conf/hotfolder.toml";

/// Hotfolder service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory watched for incoming files (default: "in")
    pub input_dir: PathBuf,

    /// Directory converted files are written to (default: "out")
    pub output_dir: PathBuf,

    /// Quiet period in milliseconds between the last filesystem event on
    /// a file and the start of its conversion (default: 5000)
    pub quiet_time_ms: u64,

    /// File extensions handled by the pipeline, matched
    /// case-insensitively. An empty list matches every file.
    pub extensions: Vec<String>,

    /// Output format (default: mp3)
    pub format: OutputFormat,

    /// ffmpeg binary to invoke (default: resolved from PATH)
    pub ffmpeg_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("in"),
            output_dir: PathBuf::from("out"),
            quiet_time_ms: 5000,
            extensions: ["wav", "flac", "ogg", "opus", "m4a", "aac", "wma"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            format: OutputFormat::Mp3,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl Config {
    /// Load the configuration from a TOML file. An unreadable or invalid
    /// file is logged and replaced by the defaults.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    "failed to read config from {}: {e}. Using default values",
                    path.display()
                );
                return Self::default();
            }
        };

        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "failed to parse config at {}: {e}. Using default values",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn quiet_time(&self) -> Duration {
        Duration::from_millis(self.quiet_time_ms)
    }

    /// Whether the pipeline cares about this file, judged by extension.
    pub fn is_watched(&self, file: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        file.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    /// Destination artifact for a source file: the full source file name
    /// with the output extension appended, placed in the output
    /// directory. `song.wav` converts into `song.wav.mp3` so distinct
    /// sources cannot collide on one destination.
    pub fn destination_for(&self, source: &Path) -> Option<PathBuf> {
        let mut name = source.file_name()?.to_os_string();
        name.push(".");
        name.push(self.format.extension());
        Some(self.output_dir.join(name))
    }

    /// Example configuration rendered as TOML, shown by `hotfolder config`.
    pub fn example() -> String {
        let mut content = String::from("# Hotfolder configuration\n");
        content.push_str("# Default location: conf/hotfolder.toml\n\n");
        content.push_str(&toml::to_string_pretty(&Config::default()).unwrap_or_default());
        content
    }
}
