//! Per-resource reentrancy guards.
//!
//! A [`GuardTable`] holds the set of resource keys currently being worked
//! on by one stage. Acquiring a key that is already held fails immediately;
//! callers skip instead of queueing. Release is tied to [`GuardPermit`]'s
//! `Drop`, so every exit path (early return, error, panic unwind) frees the
//! key.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Set of in-flight resource keys for one stage.
#[derive(Clone, Debug, Default)]
pub struct GuardTable {
    name: &'static str,
    held: Arc<Mutex<HashSet<String>>>,
}

impl GuardTable {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            held: Arc::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // Nothing panics while holding the lock, but a poisoned set is still
        // a valid set.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key`, or `None` if another task already holds it.
    pub fn try_acquire(&self, key: impl Into<String>) -> Option<GuardPermit> {
        let key = key.into();
        if !self.lock().insert(key.clone()) {
            tracing::debug!("{} guard busy: {key}", self.name);
            return None;
        }
        Some(GuardPermit {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

/// Proof that a key is held. Dropping it releases the key.
#[derive(Debug)]
pub struct GuardPermit {
    held: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl GuardPermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Extra time on top of two debounce periods before an echo is forgotten.
pub const ECHO_SLACK: Duration = Duration::from_millis(250);

/// Shortest [`SelfWriteLedger`] window that still outlives the debounced
/// echo of a write.
pub fn min_self_write_window(debounce: Duration) -> Duration {
    debounce * 2 + ECHO_SLACK
}

/// Paths the engine itself wrote recently.
///
/// The watcher host consults this to drop the filesystem echo of a mirror,
/// registry or stamped-source write instead of treating it as a new save.
#[derive(Clone, Debug)]
pub struct SelfWriteLedger {
    window: Duration,
    writes: Arc<Mutex<HashMap<PathBuf, Instant>>>,
}

impl SelfWriteLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            writes: Arc::default(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Instant>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a write to `path` happening now.
    pub fn note(&self, path: &Path) {
        let now = Instant::now();
        let mut writes = self.lock();
        writes.retain(|_, at| now.duration_since(*at) <= self.window);
        writes.insert(path.to_path_buf(), now);
    }

    /// Whether `path` was written by the engine within the window.
    pub fn is_recent(&self, path: &Path) -> bool {
        self.lock()
            .get(path)
            .is_some_and(|at| at.elapsed() <= self.window)
    }
}
