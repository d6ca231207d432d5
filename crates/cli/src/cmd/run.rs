//! Run the watch-and-convert service

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::service::Service;
use anyhow::{Context, Result};
use convert::FfmpegTranscoder;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path);

    std::fs::create_dir_all(&config.input_dir).with_context(|| {
        format!(
            "failed to create input directory {}",
            config.input_dir.display()
        )
    })?;
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output_dir.display()
        )
    })?;

    let converter = Arc::new(FfmpegTranscoder::new(
        config.ffmpeg_path.clone(),
        config.format,
    ));
    let service = Service::new(config.clone(), converter);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let dispatcher = service.start(shutdown_rx)?;

    tracing::info!(
        "watching {} (quiet period: {}ms), writing {} files to {}",
        config.input_dir.display(),
        config.quiet_time_ms,
        config.format,
        config.output_dir.display()
    );

    // Wait for a shutdown signal
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }

    let _ = shutdown_tx.send(());
    service.stop();
    let _ = dispatcher.await;

    tracing::info!("shutdown complete");
    Ok(())
}
