//! Watch registry: directory -> listener sets and OS watch lifecycle
//!
//! The registry keeps one invariant while the service is started: a
//! directory holds an OS watch registration if and only if its listener
//! set is non-empty. Every mutation runs a reconciliation pass inside the
//! same write critical section, so the invariant holds at every point
//! outside an in-progress mutation.

use crate::source::{EventSource, RawEventTx};
use crate::{same_listener, Listener, WatchError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared watch state. Mutations (listener add/remove, start/stop) take
/// the write lock; the poller snapshots listener sets under the read
/// lock. The backend lock is only ever acquired while holding the state
/// write lock.
pub struct WatchRegistry {
    state: RwLock<RegistryState>,
    backend: Mutex<Option<EventSource>>,
    started: AtomicBool,
}

#[derive(Default)]
struct RegistryState {
    /// Registered listeners, keyed by canonical directory path
    listeners: HashMap<PathBuf, Vec<Listener>>,

    /// Directories with a live OS watch registration
    watches: HashSet<PathBuf>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            backend: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Install the notification backend and register a watch for every
    /// directory that already has listeners.
    pub(crate) fn start(&self, events: RawEventTx) -> Result<(), WatchError> {
        let mut state = self.state.write();
        let mut backend = self.backend.lock();

        if backend.is_some() {
            tracing::warn!("watch service already started, ignoring");
            return Ok(());
        }

        *backend = Some(EventSource::new(events).map_err(WatchError::Backend)?);

        let result = reconcile(&mut state, backend.as_mut());
        match result {
            Ok(()) => self.started.store(true, Ordering::Release),
            Err(_) => {
                // A partial start must not leave stray registrations behind.
                if let Some(mut source) = backend.take() {
                    for dir in state.watches.drain() {
                        source.unwatch(&dir);
                    }
                }
            }
        }
        result
    }

    /// Release every OS watch and drop the backend. Listener
    /// registrations survive so a restart can re-register them.
    pub(crate) fn stop(&self) {
        let mut state = self.state.write();
        let mut backend = self.backend.lock();

        let Some(mut source) = backend.take() else {
            tracing::warn!("watch service not running, ignoring");
            return;
        };

        self.started.store(false, Ordering::Release);
        for dir in state.watches.drain() {
            source.unwatch(&dir);
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Register a listener for a directory.
    ///
    /// Validates the directory (exists, is a directory, readable) and
    /// stores its canonical path. Re-adding the same listener to the same
    /// directory is a no-op. The first listener for a directory registers
    /// the OS watch when the service is started; a failed registration is
    /// rolled back so the listener map and the watch set stay consistent.
    pub fn add_listener(&self, directory: &Path, listener: &Listener) -> Result<(), WatchError> {
        let directory = verify_directory(directory)?;
        let mut state = self.state.write();
        let mut backend = self.backend.lock();

        let entry = state.listeners.entry(directory.clone()).or_default();
        let inserted = if entry.iter().any(|l| same_listener(l, listener)) {
            false
        } else {
            entry.push(Listener::clone(listener));
            true
        };

        let result = reconcile(&mut state, backend.as_mut());
        if result.is_err() && inserted {
            if let Some(listeners) = state.listeners.get_mut(&directory) {
                listeners.retain(|l| !same_listener(l, listener));
                if listeners.is_empty() {
                    state.listeners.remove(&directory);
                }
            }
        }
        result
    }

    /// Remove a listener from one directory only; registrations on other
    /// directories are untouched. Removing an unregistered listener is a
    /// no-op. When the directory's listener set empties, its OS watch is
    /// released.
    pub fn remove_listener(&self, directory: &Path, listener: &Listener) -> Result<(), WatchError> {
        let directory = verify_directory(directory)?;
        let mut state = self.state.write();
        let mut backend = self.backend.lock();

        if let Some(listeners) = state.listeners.get_mut(&directory) {
            listeners.retain(|l| !same_listener(l, listener));
        }
        reconcile(&mut state, backend.as_mut())
    }

    /// Remove a listener from every directory it is registered on.
    pub fn remove_listener_all(&self, listener: &Listener) -> Result<(), WatchError> {
        let mut state = self.state.write();
        let mut backend = self.backend.lock();

        for listeners in state.listeners.values_mut() {
            listeners.retain(|l| !same_listener(l, listener));
        }
        reconcile(&mut state, backend.as_mut())
    }

    /// Owned snapshot of the watched (canonical) directory paths. Later
    /// registry mutations are not observable through the returned set.
    pub fn watched_directories(&self) -> HashSet<PathBuf> {
        self.state.read().listeners.keys().cloned().collect()
    }

    /// Snapshot of the listeners registered for a directory, taken under
    /// the read lock so polling never blocks behind another reader.
    pub(crate) fn listeners_for(&self, directory: &Path) -> Vec<Listener> {
        self.state
            .read()
            .listeners
            .get(directory)
            .cloned()
            .unwrap_or_default()
    }
}

/// Align the OS watch set with the listener map: prune empty listener
/// entries, register watches for newly non-empty directories, release
/// watches for directories without listeners. Runs inside the caller's
/// write critical section. With no backend installed (service stopped)
/// only the listener map is pruned.
fn reconcile(state: &mut RegistryState, backend: Option<&mut EventSource>) -> Result<(), WatchError> {
    state.listeners.retain(|_, listeners| !listeners.is_empty());

    let Some(source) = backend else {
        return Ok(());
    };

    let RegistryState { listeners, watches } = state;

    for dir in listeners.keys() {
        if !watches.contains(dir) {
            source.watch(dir).map_err(|e| WatchError::Registration {
                path: dir.clone(),
                source: e,
            })?;
            watches.insert(dir.clone());
        }
    }

    watches.retain(|dir| {
        if listeners.contains_key(dir) {
            true
        } else {
            source.unwatch(dir);
            false
        }
    });

    Ok(())
}

/// Validate that the path names an existing, readable directory and
/// return its canonical form. Keys are canonicalized so event paths
/// reported by the backend resolve to the same directory entry.
fn verify_directory(path: &Path) -> Result<PathBuf, WatchError> {
    let invalid = |reason: String| WatchError::InvalidDirectory {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = fs::metadata(path).map_err(|e| invalid(format!("does not exist: {e}")))?;
    if !metadata.is_dir() {
        return Err(invalid("not a directory".into()));
    }
    fs::read_dir(path).map_err(|e| invalid(format!("not readable: {e}")))?;
    fs::canonicalize(path).map_err(|e| invalid(format!("cannot canonicalize: {e}")))
}
