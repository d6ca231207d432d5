//! One-shot conversion of a single file

use anyhow::{ensure, Context, Result};
use convert::{Converter, FfmpegTranscoder, OutputFormat};
use std::path::PathBuf;

pub async fn run(
    input: PathBuf,
    output: PathBuf,
    format: String,
    ffmpeg_path: PathBuf,
) -> Result<()> {
    let format: OutputFormat = format.parse()?;
    ensure!(input.is_file(), "input {} is not a file", input.display());

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let transcoder = FfmpegTranscoder::new(ffmpeg_path, format);
    let progress = |permille: u32| {
        tracing::info!("conversion progress: {permille}/1000");
    };
    transcoder.convert(&input, &output, &progress).await?;

    println!("Converted {} -> {}", input.display(), output.display());
    Ok(())
}
