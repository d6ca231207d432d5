//! Per-file debounce scheduling
//!
//! Collapses bursts of filesystem events into a single release per file:
//! a file is released only after its quiet period elapses with no further
//! trigger, and every new trigger restarts the countdown. N triggers
//! spaced closer than the quiet period produce exactly one release.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Deadline-ordered scheduler holding at most one pending task per file.
///
/// Producers call [`trigger`](Self::trigger) from any task; a single
/// consumer drains ready tasks with [`take`](Self::take). The consumer
/// sleeps until the earliest pending deadline and is woken early whenever
/// a trigger changes the picture, so it never busy-polls. Trigger and
/// take serialize on the pending-set lock: a trigger and a take racing on
/// the same file cannot both win.
pub struct DebounceScheduler {
    pending: Mutex<PendingSet>,
    wake: Notify,
}

#[derive(Default)]
struct PendingSet {
    tasks: HashMap<PathBuf, Pending>,
    next_seq: u64,
}

#[derive(Clone, Copy)]
struct Pending {
    deadline: Instant,

    /// Insertion order, used as the deterministic tie-break for equal
    /// deadlines. A deadline reset keeps the first-insertion sequence:
    /// the task identity is unchanged.
    seq: u64,
}

impl DebounceScheduler {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(PendingSet::default()),
            wake: Notify::new(),
        }
    }

    /// Record a trigger for `file`: its release deadline becomes
    /// `now + quiet`. If a task for the file is already pending, the
    /// deadline is replaced, never accumulated; otherwise a new task is
    /// created. A file released and re-triggered starts over as a fresh
    /// task.
    pub fn trigger(&self, file: impl Into<PathBuf>, quiet: Duration) {
        let deadline = Instant::now() + quiet;
        let path = file.into();
        {
            let mut set = self.pending.lock();
            if let Some(pending) = set.tasks.get_mut(&path) {
                pending.deadline = deadline;
            } else {
                let seq = set.next_seq;
                set.next_seq += 1;
                set.tasks.insert(path, Pending { deadline, seq });
            }
        }
        self.wake.notify_one();
    }

    /// Pull the next ready task, earliest deadline first.
    ///
    /// Blocks until a pending task exists and its deadline has passed.
    /// Intended for a single consumer.
    pub async fn take(&self) -> DebounceTask {
        loop {
            let next_deadline = {
                let mut set = self.pending.lock();
                let earliest = set
                    .tasks
                    .iter()
                    .min_by_key(|(_, p)| (p.deadline, p.seq))
                    .map(|(path, p)| (path.clone(), *p));

                match earliest {
                    Some((path, pending)) if pending.deadline <= Instant::now() => {
                        set.tasks.remove(&path);
                        return DebounceTask {
                            path,
                            deadline: pending.deadline,
                        };
                    }
                    Some((_, pending)) => Some(pending.deadline),
                    None => None,
                }
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }
    }

    /// Withdraw the pending task for `file`, if any. Returns whether a
    /// task was removed.
    pub fn withdraw(&self, file: &Path) -> bool {
        let removed = self.pending.lock().tasks.remove(file).is_some();
        if removed {
            self.wake.notify_one();
        }
        removed
    }

    /// Number of files currently awaiting their quiet period.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().tasks.is_empty()
    }
}

impl Default for DebounceScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A file whose quiet period elapsed, released from the scheduler.
///
/// Task identity is the file path: two tasks are equal iff they reference
/// the same file, independent of timing state.
#[derive(Debug, Clone)]
pub struct DebounceTask {
    path: PathBuf,
    deadline: Instant,
}

impl DebounceTask {
    /// Build a standalone task whose deadline is `quiet` from now.
    pub fn new(file: impl Into<PathBuf>, quiet: Duration) -> Self {
        Self {
            path: file.into(),
            deadline: Instant::now() + quiet,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }

    /// Diagnostic check: has the task's deadline passed? Release ordering
    /// is driven by the scheduler, not by polling this.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl PartialEq for DebounceTask {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for DebounceTask {}

impl Hash for DebounceTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}
