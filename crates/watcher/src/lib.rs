//! Directory watching and stable-file detection for Hotfolder
//!
//! This crate provides the core watch pipeline:
//! - A watch registry mapping directories to listener sets, with the OS
//!   registration lifecycle tied to listener-set emptiness
//! - A long-lived event poller that resolves raw notifications and fans
//!   them out to the listeners registered for the affected directory
//! - A per-file debounce scheduler that releases a file only once a
//!   configurable quiet period passes with no further event

pub mod debounce;
pub mod registry;

mod poller;
mod source;

use registry::WatchRegistry;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;

pub use debounce::{DebounceScheduler, DebounceTask};

/// The kind of change observed for an entry in a watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new entry appeared
    Created,

    /// An existing entry changed
    Modified,

    /// An entry was removed
    Deleted,
}

impl EventKind {
    /// Map a raw backend event kind onto the domain enum.
    ///
    /// Access, rescan and unknown kinds carry no domain meaning and map
    /// to `None`; callers drop them.
    pub(crate) fn from_raw(kind: &notify::EventKind) -> Option<Self> {
        match kind {
            notify::EventKind::Create(_) => Some(Self::Created),
            notify::EventKind::Modify(_) => Some(Self::Modified),
            notify::EventKind::Remove(_) => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Callback capability invoked for every event in a directory the listener
/// is registered on.
///
/// Callbacks run on the runtime's worker threads and must return promptly;
/// hand longer work to a channel or the [`DebounceScheduler`].
pub trait DirectoryListener: Send + Sync {
    /// Called with the absolute path of the changed entry and the kind of
    /// change observed for it.
    fn updated(&self, file: &Path, kind: EventKind);
}

/// Shared handle to a [`DirectoryListener`].
///
/// Listener identity is the allocation behind the handle: clones of the
/// same `Arc` count as the same registration, distinct allocations are
/// distinct listeners even when they behave identically.
pub type Listener = Arc<dyn DirectoryListener>;

pub(crate) fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Errors surfaced synchronously by the watch registry and service.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The path handed to the registry is missing, not a directory, or
    /// unreadable.
    #[error("invalid directory {}: {reason}", .path.display())]
    InvalidDirectory { path: PathBuf, reason: String },

    /// The OS-level watch registration for a directory failed.
    #[error("failed to register watch on {}", .path.display())]
    Registration {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The notification backend itself could not be created.
    #[error("failed to initialize the watch backend")]
    Backend(#[source] notify::Error),
}

/// Directory watch service: owns the registry, the notification backend
/// and the polling task.
///
/// The poller is spawned at construction and runs for the lifetime of the
/// service, idling while the service is stopped. Listeners may be added
/// and removed independently of the started state; they only receive
/// events while the service is started.
pub struct WatchService {
    registry: Arc<WatchRegistry>,
    events_tx: source::RawEventTx,
    wake: Arc<Notify>,
    poller: tokio::task::JoinHandle<()>,
}

impl WatchService {
    /// Create a new service and spawn its polling task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let registry = Arc::new(WatchRegistry::new());
        let wake = Arc::new(Notify::new());
        let poller = tokio::spawn(poller::run(
            Arc::clone(&registry),
            events_rx,
            Arc::clone(&wake),
        ));

        Self {
            registry,
            events_tx,
            wake,
            poller,
        }
    }

    /// Start delivering events. Registers an OS watch for every directory
    /// that already has listeners; starting a started service is a logged
    /// no-op.
    pub fn start(&self) -> Result<(), WatchError> {
        self.registry.start(self.events_tx.clone())?;
        self.wake.notify_one();
        Ok(())
    }

    /// Stop delivering events and release every OS watch. Listener
    /// registrations are kept, so a later [`start`](Self::start)
    /// re-registers the directories they cover. Stopping a stopped
    /// service is a logged no-op.
    pub fn stop(&self) {
        self.registry.stop();
        self.wake.notify_one();
    }

    /// Whether the service currently delivers events.
    pub fn is_started(&self) -> bool {
        self.registry.is_started()
    }

    /// Register a listener for a directory. See
    /// [`WatchRegistry::add_listener`].
    pub fn add_listener(&self, directory: &Path, listener: &Listener) -> Result<(), WatchError> {
        self.registry.add_listener(directory, listener)
    }

    /// Remove a listener from one directory only. See
    /// [`WatchRegistry::remove_listener`].
    pub fn remove_listener(&self, directory: &Path, listener: &Listener) -> Result<(), WatchError> {
        self.registry.remove_listener(directory, listener)
    }

    /// Remove a listener from every directory it is registered on.
    pub fn remove_listener_all(&self, listener: &Listener) -> Result<(), WatchError> {
        self.registry.remove_listener_all(listener)
    }

    /// Snapshot of the currently watched directories.
    pub fn watched_directories(&self) -> HashSet<PathBuf> {
        self.registry.watched_directories()
    }
}

impl Default for WatchService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<(PathBuf, EventKind)>>,
    }

    impl RecordingListener {
        fn snapshot(&self) -> Vec<(PathBuf, EventKind)> {
            self.events.lock().clone()
        }

        fn saw(&self, name: &str, kind: EventKind) -> bool {
            self.snapshot()
                .iter()
                .any(|(p, k)| p.file_name().is_some_and(|n| n == name) && *k == kind)
        }
    }

    impl DirectoryListener for RecordingListener {
        fn updated(&self, file: &Path, kind: EventKind) {
            self.events.lock().push((file.to_path_buf(), kind));
        }
    }

    async fn wait_for(cond: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cond()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_dispatches_to_registered_directory_only() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();

        let service = WatchService::new();
        service.start().unwrap();

        let on_a = Arc::new(RecordingListener::default());
        let on_b = Arc::new(RecordingListener::default());
        let listener_a: Listener = on_a.clone();
        let listener_b: Listener = on_b.clone();
        service.add_listener(dir_a.path(), &listener_a).unwrap();
        service.add_listener(dir_b.path(), &listener_b).unwrap();

        fs::write(dir_a.path().join("a.txt"), b"hello").unwrap();

        assert!(
            wait_for(|| on_a.saw("a.txt", EventKind::Created)).await,
            "listener on the touched directory should see the create"
        );
        assert!(
            on_b.snapshot().is_empty(),
            "listener on an unrelated directory saw {:?}",
            on_b.snapshot()
        );

        service.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_listener_on_a_directory_receives_the_event() {
        let dir = TempDir::new().unwrap();

        let service = WatchService::new();
        service.start().unwrap();

        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());
        let listener_one: Listener = first.clone();
        let listener_two: Listener = second.clone();
        service.add_listener(dir.path(), &listener_one).unwrap();
        service.add_listener(dir.path(), &listener_two).unwrap();

        fs::write(dir.path().join("b.txt"), b"data").unwrap();

        assert!(wait_for(|| first.saw("b.txt", EventKind::Created)).await);
        assert!(wait_for(|| second.saw("b.txt", EventKind::Created)).await);

        service.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stopped_service_delivers_nothing() {
        let dir = TempDir::new().unwrap();

        let service = WatchService::new();
        service.start().unwrap();

        let recorder = Arc::new(RecordingListener::default());
        let listener: Listener = recorder.clone();
        service.add_listener(dir.path(), &listener).unwrap();
        service.stop();

        fs::write(dir.path().join("c.txt"), b"data").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(recorder.snapshot().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_rewatches_directories_with_listeners() {
        let dir = TempDir::new().unwrap();

        let service = WatchService::new();
        service.start().unwrap();

        let recorder = Arc::new(RecordingListener::default());
        let listener: Listener = recorder.clone();
        service.add_listener(dir.path(), &listener).unwrap();

        service.stop();
        assert!(!service.is_started());
        service.start().unwrap();
        assert!(service.is_started());

        fs::write(dir.path().join("d.txt"), b"data").unwrap();

        assert!(wait_for(|| recorder.saw("d.txt", EventKind::Created)).await);

        service.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removed_listener_goes_silent() {
        let dir = TempDir::new().unwrap();

        let service = WatchService::new();
        service.start().unwrap();

        let recorder = Arc::new(RecordingListener::default());
        let listener: Listener = recorder.clone();
        service.add_listener(dir.path(), &listener).unwrap();
        service.remove_listener(dir.path(), &listener).unwrap();

        fs::write(dir.path().join("e.txt"), b"data").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(recorder.snapshot().is_empty());
        assert!(service.watched_directories().is_empty());

        service.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_is_reported_as_deleted() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"data").unwrap();

        let service = WatchService::new();
        service.start().unwrap();

        let recorder = Arc::new(RecordingListener::default());
        let listener: Listener = recorder.clone();
        service.add_listener(dir.path(), &listener).unwrap();

        fs::remove_file(&file).unwrap();

        assert!(wait_for(|| recorder.saw("f.txt", EventKind::Deleted)).await);

        service.stop();
    }

    #[test]
    fn event_kind_mapping_drops_unknown_kinds() {
        use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

        assert_eq!(
            EventKind::from_raw(&notify::EventKind::Create(CreateKind::File)),
            Some(EventKind::Created)
        );
        assert_eq!(
            EventKind::from_raw(&notify::EventKind::Modify(ModifyKind::Any)),
            Some(EventKind::Modified)
        );
        assert_eq!(
            EventKind::from_raw(&notify::EventKind::Remove(RemoveKind::File)),
            Some(EventKind::Deleted)
        );
        assert_eq!(
            EventKind::from_raw(&notify::EventKind::Access(AccessKind::Any)),
            None
        );
        assert_eq!(EventKind::from_raw(&notify::EventKind::Other), None);
        assert_eq!(EventKind::from_raw(&notify::EventKind::Any), None);
    }

    #[test]
    fn listener_identity_is_the_allocation() {
        let shared = Arc::new(RecordingListener::default());
        let first: Listener = shared.clone();
        let second: Listener = shared;
        let other: Listener = Arc::new(RecordingListener::default());

        assert!(same_listener(&first, &second));
        assert!(!same_listener(&first, &other));
    }
}
