//! Hotfolder CLI - hotfolder command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod config;
mod service;

/// Hotfolder - convert media files dropped into a watched directory
#[derive(Parser)]
#[command(name = "hotfolder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the input directory and convert files once they go quiet
    Run {
        /// Path to the configuration file (default: conf/hotfolder.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Convert a single file immediately
    Convert {
        /// Source media file
        input: PathBuf,
        /// Destination file
        output: PathBuf,
        /// Output format (mp3, ogg, flac, wav)
        #[arg(short, long, default_value = "mp3")]
        format: String,
        /// ffmpeg binary to invoke
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg_path: PathBuf,
    },
    /// Print an example configuration file
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => cmd::run::run(config).await,
        Commands::Convert {
            input,
            output,
            format,
            ffmpeg_path,
        } => cmd::convert::run(input, output, format, ffmpeg_path).await,
        Commands::Config => cmd::config::run(),
    }
}
