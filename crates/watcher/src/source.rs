//! Event source adapter over the platform notification backend

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::Path;
use tokio::sync::mpsc;

pub(crate) type RawEventTx = mpsc::UnboundedSender<notify::Result<notify::Event>>;
pub(crate) type RawEventRx = mpsc::UnboundedReceiver<notify::Result<notify::Event>>;

/// Wraps the OS directory-notification primitive (inotify on Linux,
/// FSEvents on macOS). Owns one registration per watched directory; raw
/// events flow from the backend thread into the channel handed to
/// [`EventSource::new`].
pub(crate) struct EventSource {
    watcher: RecommendedWatcher,
}

impl EventSource {
    pub(crate) fn new(events: RawEventTx) -> notify::Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = events.send(res);
            },
            Config::default(),
        )?;

        Ok(Self { watcher })
    }

    /// Register a non-recursive watch for the directory. Entries inside
    /// it report with the directory as their path prefix.
    pub(crate) fn watch(&mut self, directory: &Path) -> notify::Result<()> {
        self.watcher.watch(directory, RecursiveMode::NonRecursive)
    }

    /// Release the watch for the directory. Release failures are logged;
    /// the registration is treated as gone either way.
    pub(crate) fn unwatch(&mut self, directory: &Path) {
        if let Err(e) = self.watcher.unwatch(directory) {
            tracing::debug!("failed to release watch on {}: {}", directory.display(), e);
        }
    }
}
