//! Conversion service: wires the watch pipeline to the transcoder
//!
//! One listener on the input directory feeds the debounce scheduler; one
//! dispatcher task drains released tasks and runs conversions strictly
//! one at a time. A task failure is logged and the loop moves on; only a
//! shutdown signal ends it.

use crate::config::Config;
use anyhow::{Context, Result};
use convert::Converter;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use watcher::{
    DebounceScheduler, DebounceTask, DirectoryListener, EventKind, Listener, WatchService,
};

pub struct Service {
    config: Config,
    watch: WatchService,
    scheduler: Arc<DebounceScheduler>,
    converter: Arc<dyn Converter>,
}

impl Service {
    /// Create the service. Must be called from within a Tokio runtime.
    pub fn new(config: Config, converter: Arc<dyn Converter>) -> Self {
        Self {
            config,
            watch: WatchService::new(),
            scheduler: Arc::new(DebounceScheduler::new()),
            converter,
        }
    }

    /// Start watching the input directory and spawn the dispatcher.
    ///
    /// The returned handle completes after a shutdown signal arrives,
    /// once any conversion already in flight has finished.
    pub fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<tokio::task::JoinHandle<()>> {
        self.watch.start().context("failed to start the watch service")?;

        let listener: Listener = Arc::new(EnqueueListener {
            scheduler: Arc::clone(&self.scheduler),
            config: self.config.clone(),
        });
        self.watch
            .add_listener(&self.config.input_dir, &listener)
            .with_context(|| {
                format!(
                    "failed to watch input directory {}",
                    self.config.input_dir.display()
                )
            })?;

        Ok(tokio::spawn(dispatch_loop(
            Arc::clone(&self.scheduler),
            self.config.clone(),
            Arc::clone(&self.converter),
            shutdown,
        )))
    }

    /// Stop watching. Pending debounce tasks stay queued; the dispatcher
    /// keeps draining them until it is shut down.
    pub fn stop(&self) {
        self.watch.stop();
    }

    pub fn scheduler(&self) -> &Arc<DebounceScheduler> {
        &self.scheduler
    }
}

/// Listener feeding filesystem activity into the debounce scheduler.
struct EnqueueListener {
    scheduler: Arc<DebounceScheduler>,
    config: Config,
}

impl DirectoryListener for EnqueueListener {
    fn updated(&self, file: &Path, kind: EventKind) {
        if !matches!(kind, EventKind::Created | EventKind::Modified) {
            return;
        }
        if !self.config.is_watched(file) {
            return;
        }

        tracing::debug!(
            "{kind:?} on {}, conversion scheduled after quiet period",
            file.display()
        );
        self.scheduler.trigger(file, self.config.quiet_time());
    }
}

/// Sequential task consumer. Pulls the earliest released task, converts
/// it, and loops; exits only when the shutdown channel fires.
async fn dispatch_loop(
    scheduler: Arc<DebounceScheduler>,
    config: Config,
    converter: Arc<dyn Converter>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            task = scheduler.take() => process_task(&task, &config, converter.as_ref()).await,
            _ = shutdown.recv() => break,
        }
    }
    tracing::info!("conversion dispatcher stopped");
}

pub(crate) async fn process_task(task: &DebounceTask, config: &Config, converter: &dyn Converter) {
    let source = task.path();

    if !source.is_file() {
        tracing::warn!(
            "source {} vanished before conversion, skipping",
            source.display()
        );
        return;
    }

    let Some(destination) = config.destination_for(source) else {
        tracing::warn!(
            "cannot derive a destination for {}, skipping",
            source.display()
        );
        return;
    };

    if destination.exists() {
        tracing::warn!(
            "destination {} already exists, skipping",
            destination.display()
        );
        return;
    }

    tracing::info!(
        "converting {} to {}",
        source.display(),
        destination.display()
    );

    let progress = {
        let source = source.to_path_buf();
        move |permille: u32| {
            tracing::info!("{} conversion progress: {permille}/1000", source.display());
        }
    };

    match converter.convert(source, &destination, &progress).await {
        Ok(()) => tracing::info!(
            "converted {} to {}",
            source.display(),
            destination.display()
        ),
        Err(e) => tracing::warn!("conversion failed: {e}"),
    }
}
