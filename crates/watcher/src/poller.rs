//! Event polling loop
//!
//! A single long-lived task drains raw backend events and fans them out.
//! While the service is stopped the loop idles on a short sleep without
//! consuming anything; while started it parks on the event channel. Every
//! per-event failure is contained here: the loop only ends when the
//! service is dropped and the channel closes.

use crate::registry::WatchRegistry;
use crate::source::RawEventRx;
use crate::EventKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Backoff between idle checks while the service is stopped.
const IDLE_BACKOFF: Duration = Duration::from_millis(500);

pub(crate) async fn run(registry: Arc<WatchRegistry>, mut events: RawEventRx, wake: Arc<Notify>) {
    loop {
        if !registry.is_started() {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_BACKOFF) => {}
                _ = wake.notified() => {}
            }
            continue;
        }

        tokio::select! {
            received = events.recv() => match received {
                // Events already in flight when the service stopped are
                // discarded, not delivered.
                Some(Ok(event)) if registry.is_started() => dispatch(&registry, event),
                Some(Ok(_)) => {}
                Some(Err(e)) => tracing::warn!("watch backend reported an error: {e}"),
                None => break,
            },
            _ = wake.notified() => {}
        }
    }

    tracing::warn!("event polling task halted");
}

/// Resolve one raw event and hand it to every listener registered for its
/// parent directory. Listener callbacks are spawned individually so a
/// slow, failing or panicking listener cannot hold up the loop or its
/// peers.
fn dispatch(registry: &WatchRegistry, event: notify::Event) {
    let Some(kind) = EventKind::from_raw(&event.kind) else {
        return;
    };

    if event.paths.is_empty() {
        tracing::warn!("received {kind:?} event without a path, discarding");
        return;
    }

    for path in event.paths {
        // Watches are non-recursive, so the parent is the directory the
        // registration was taken on.
        let Some(parent) = path.parent().map(Path::to_path_buf) else {
            tracing::warn!(
                "received {kind:?} event for {} without a parent directory, discarding",
                path.display()
            );
            continue;
        };

        for listener in registry.listeners_for(&parent) {
            let file = path.clone();
            tokio::spawn(async move {
                listener.updated(&file, kind);
            });
        }
    }
}
