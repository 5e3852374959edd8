//! Workspace watcher host.
//!
//! Turns filesystem change notifications under the workspace root into
//! [`GovernanceEngine::save_file`] calls. Events are debounced, filtered to
//! content changes of regular files outside the ignored directories, and
//! the echo of the engine's own writes is dropped.
//!
//! ```text
//! fs change → Debouncer → filter (kind, ignored dir, self-write) → save_file → WatchEvent
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use notify_debouncer_full::{DebounceEventResult, Debouncer, FileIdMap, new_debouncer};
use tokio::sync::mpsc;

use crate::engine::{GovernanceEngine, SaveReport};
use crate::guard::min_self_write_window;
use crate::io::is_staging_file;

/// What the watcher did with one changed path.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// The save lifecycle ran.
    Processed(SaveReport),
    /// The file could not be read or decoded.
    Failed { path: PathBuf, error: String },
}

/// Recursive watcher over a workspace root.
///
/// Drop it to stop watching; the event channel closes with it.
pub struct WorkspaceWatcher {
    engine: Arc<GovernanceEngine>,

    /// Kept alive for monitoring.
    #[allow(dead_code)]
    debouncer: Debouncer<notify::RecommendedWatcher, FileIdMap>,

    event_rx: tokio::sync::Mutex<mpsc::Receiver<WatchEvent>>,
}

impl WorkspaceWatcher {
    /// Start watching `engine.root()`. Must be called inside a tokio runtime.
    ///
    /// Fails when the engine's self-write window is too short for
    /// `debounce`, since the echo of a stamped save would then come back
    /// as a fresh save.
    pub fn new(engine: Arc<GovernanceEngine>, debounce: Duration) -> Result<Self> {
        let required = min_self_write_window(debounce);
        if engine.self_writes().window() < required {
            anyhow::bail!(
                "self-write window {}ms is shorter than the {}ms a {}ms debounce needs",
                engine.self_writes().window().as_millis(),
                required.as_millis(),
                debounce.as_millis()
            );
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let handle = tokio::runtime::Handle::current();
        let engine_clone = Arc::clone(&engine);

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let engine = Arc::clone(&engine_clone);
            let event_tx = event_tx.clone();
            match result {
                Ok(events) => {
                    let paths: BTreeSet<PathBuf> = events
                        .iter()
                        .filter(|e| is_relevant_event(&e.event))
                        .flat_map(|e| e.event.paths.iter().cloned())
                        .collect();
                    for path in paths {
                        if !should_dispatch(&engine, &path) {
                            continue;
                        }
                        let engine = Arc::clone(&engine);
                        let event_tx = event_tx.clone();
                        // Distinct paths run concurrently.
                        handle.spawn(async move {
                            let event = dispatch(&engine, path).await;
                            let _ = event_tx.send(event).await;
                        });
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::error!("Filesystem watcher error: {:?}", error);
                    }
                }
            }
        })
        .context("Failed to create filesystem watcher")?;

        debouncer
            .watcher()
            .watch(engine.root(), RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", engine.root().display()))?;

        tracing::info!("Watching {}", engine.root().display());

        Ok(Self {
            engine,
            debouncer,
            event_rx: tokio::sync::Mutex::new(event_rx),
        })
    }

    pub fn engine(&self) -> &GovernanceEngine {
        &self.engine
    }

    /// Next processed path. `None` once the watcher is gone.
    pub async fn recv_event(&self) -> Option<WatchEvent> {
        self.event_rx.lock().await.recv().await
    }
}

async fn dispatch(engine: &GovernanceEngine, path: PathBuf) -> WatchEvent {
    match engine.save_file(&path).await {
        Ok(report) => WatchEvent::Processed(report),
        Err(e) => {
            tracing::warn!("Save processing failed for {}: {e}", path.display());
            WatchEvent::Failed {
                path,
                error: e.to_string(),
            }
        }
    }
}

/// Content changes only; metadata and removals never start a save.
fn is_relevant_event(event: &Event) -> bool {
    match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Whether `path` sits under an ignored directory name or the audit dir.
fn is_ignored(path: &Path, root: &Path, ignore_dirs: &[String], audit_dir: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return true;
    };
    if relative.starts_with(audit_dir) {
        return true;
    }
    relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        ignore_dirs.iter().any(|d| d.as_str() == name)
    })
}

fn should_dispatch(engine: &GovernanceEngine, path: &Path) -> bool {
    let config = engine.config();
    if is_ignored(path, engine.root(), &config.watcher.ignore_dirs, &config.audit.dir)
        || is_staging_file(path)
    {
        return false;
    }
    if engine.self_writes().is_recent(path) {
        tracing::debug!("Ignoring own write: {}", path.display());
        return false;
    }
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernanceConfig;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::TempDir;

    #[test]
    fn relevant_event_kinds() {
        let ev = |kind| Event::new(kind);
        assert!(is_relevant_event(&ev(EventKind::Create(CreateKind::File))));
        assert!(is_relevant_event(&ev(EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        )))));
        assert!(!is_relevant_event(&ev(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::WriteTime
        )))));
        assert!(!is_relevant_event(&ev(EventKind::Remove(RemoveKind::File))));
    }

    #[test]
    fn ignored_directories() {
        let root = Path::new("/ws");
        let ignore = vec![".git".to_string(), "target".to_string()];
        let audit = Path::new(".ORCH_AUDITLOG/mirror");

        assert!(is_ignored(Path::new("/ws/.git/index"), root, &ignore, audit));
        assert!(is_ignored(Path::new("/ws/sub/target/x.txt"), root, &ignore, audit));
        assert!(is_ignored(
            Path::new("/ws/.ORCH_AUDITLOG/mirror/a.json"),
            root,
            &ignore,
            audit
        ));
        assert!(is_ignored(Path::new("/elsewhere/a.txt"), root, &ignore, audit));
        assert!(!is_ignored(Path::new("/ws/Lib/config.ahk"), root, &ignore, audit));
    }

    #[test]
    fn own_writes_are_not_dispatched() {
        let tmp = TempDir::new().expect("tempdir");
        let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
        let path = tmp.path().join("config.ahk.txt");
        std::fs::write(&path, "x").expect("write");

        assert!(should_dispatch(&engine, &path));
        engine.self_writes().note(&path);
        assert!(!should_dispatch(&engine, &path));
        assert!(!should_dispatch(&engine, &tmp.path().join("missing.txt")));

        let staging = tmp.path().join(".config.ahk.pipz-tmp-00ab12");
        std::fs::write(&staging, "x").expect("write");
        assert!(!should_dispatch(&engine, &staging));
    }

    #[tokio::test]
    async fn debounce_longer_than_echo_window_is_refused() {
        let tmp = TempDir::new().expect("tempdir");
        let mut config = GovernanceConfig::default();
        config.watcher.self_write_window_ms = 200;
        let engine = Arc::new(GovernanceEngine::new(tmp.path(), config));

        let err = WorkspaceWatcher::new(Arc::clone(&engine), Duration::from_millis(600))
            .err()
            .expect("window too short");
        assert!(err.to_string().contains("self-write window"), "{err}");
        assert!(WorkspaceWatcher::new(engine, Duration::from_millis(50)).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_user_write_stamps_once() {
        const AHK: &str = "; ------------------------------------------------------------------\n; GEMINI MEM TAG (DO NOT EVER REMOVE OR EDIT) - MY FULL PATH IS \"Pipz_Project_V3\\config.ahk\"\n; Content-Fingerprint: 2020-01-01T00-00-00Z-OLDOLD00\n; ------------------------------------------------------------------\nx := 1\n";

        let tmp = TempDir::new().expect("tempdir");
        let root = std::fs::canonicalize(tmp.path()).expect("canonical root");
        let engine = Arc::new(GovernanceEngine::new(&root, GovernanceConfig::default()));
        let watcher = WorkspaceWatcher::new(engine, Duration::from_millis(100)).expect("watcher");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let source = root.join("config.ahk");
        std::fs::write(&source, AHK).expect("write");

        let is_stamp_of_source = |event: &WatchEvent| {
            matches!(
                event,
                WatchEvent::Processed(report)
                    if report.path == source
                        && matches!(report.fingerprint, crate::FingerprintOutcome::Stamped { .. })
            )
        };

        let mut stamps = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while stamps == 0 {
            match tokio::time::timeout_at(deadline, watcher.recv_event()).await {
                Ok(Some(event)) if is_stamp_of_source(&event) => stamps += 1,
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => panic!("user write was never processed"),
            }
        }

        // The engine's own rewrite of the source must not come back.
        let quiet_until = tokio::time::Instant::now() + Duration::from_millis(1500);
        while let Ok(Some(event)) = tokio::time::timeout_at(quiet_until, watcher.recv_event()).await {
            if is_stamp_of_source(&event) {
                stamps += 1;
            }
        }
        assert_eq!(stamps, 1);
    }

    #[tokio::test]
    async fn watcher_starts_on_existing_root() {
        let tmp = TempDir::new().expect("tempdir");
        let engine = Arc::new(GovernanceEngine::new(tmp.path(), GovernanceConfig::default()));
        let watcher = WorkspaceWatcher::new(engine, Duration::from_millis(50)).expect("watcher");
        assert_eq!(watcher.engine().root(), tmp.path());
    }
}
