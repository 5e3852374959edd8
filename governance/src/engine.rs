//! Save-lifecycle engine.
//!
//! A host feeds [`SaveEvent`]s through the [`SaveHooks`] trait: the
//! pre-commit hook may hand back a stamped replacement text, the
//! post-commit hook writes the mirror and bumps the pointer registry.
//! [`GovernanceEngine::save_file`] drives the same lifecycle from disk for
//! the CLI and the watcher.
//!
//! Nothing in here lets a stage failure escape a hook. Failures become a
//! `warn!` line, a FAIL audit record and a `Failed` outcome.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditLog, Stage};
use crate::classifier::{Classifier, SkipReason};
use crate::config::GovernanceConfig;
use crate::document::{GovernedDocument, LineEnding};
use crate::encoding::{self, FileEncoding};
use crate::error::{GovernanceError, Result};
use crate::fingerprint::{self, Fingerprint, StampOutcome};
use crate::guard::{GuardPermit, GuardTable, SelfWriteLedger};
use crate::mirror::{self, MirrorPlan};
use crate::pointer::{self, PointerOutcome, WatchSet};

/// One save of one file, as the host sees it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SaveEvent {
    pub path: PathBuf,
    pub text: String,
    pub eol: LineEnding,
}

impl SaveEvent {
    /// Event with the end-of-line style sniffed from `text`.
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            path: path.into(),
            eol: LineEnding::detect(&text),
            text,
        }
    }
}

/// The two points at which a host notifies the engine.
#[async_trait]
pub trait SaveHooks: Send + Sync {
    /// Runs before the save is persisted. A returned text must be written
    /// in place of `event.text`.
    async fn before_persist(&self, event: &SaveEvent) -> Option<String>;

    /// Runs after the save is persisted.
    async fn after_persist(&self, event: &SaveEvent);
}

/// Outcome of the fingerprint stage.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FingerprintOutcome {
    Stamped { fingerprint: String, inserted: bool },
    Skipped { reason: SkipReason },
    NoHeader,
    Busy,
    Failed { error: String },
}

/// Outcome of the mirror stage.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MirrorOutcome {
    Written {
        destination: PathBuf,
        encoding: FileEncoding,
    },
    Skipped { reason: SkipReason },
    Busy,
    Failed { error: String },
}

/// Everything that happened during one [`GovernanceEngine::save_file`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SaveReport {
    pub path: PathBuf,
    pub encoding: FileEncoding,
    pub fingerprint: FingerprintOutcome,
    pub mirror: MirrorOutcome,
    pub pointer: PointerOutcome,
}

/// A stamped replacement awaiting persistence. Holds the per-path guard
/// until the outcome is recorded.
#[derive(Debug)]
struct PendingStamp {
    _permit: GuardPermit,
    fingerprint: Fingerprint,
    text: String,
    inserted: bool,
}

/// Governance engine bound to one workspace root.
#[derive(Debug)]
pub struct GovernanceEngine {
    root: PathBuf,
    config: GovernanceConfig,
    classifier: Classifier,
    watch_set: WatchSet,
    audit: AuditLog,
    fingerprint_guard: GuardTable,
    mirror_guard: GuardTable,
    pointer_guard: GuardTable,
    self_writes: SelfWriteLedger,
}

/// Fold `.` and `..` without touching the filesystem. Leading `..` of a
/// relative path is kept; `..` at the filesystem root is dropped.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn guard_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn subject(path: &Path) -> String {
    path.display().to_string()
}

impl GovernanceEngine {
    pub fn new(root: impl Into<PathBuf>, config: GovernanceConfig) -> Self {
        let root = normalize_lexically(&root.into());
        let audit = if config.audit.enabled {
            AuditLog::new(root.join(&config.audit.dir))
        } else {
            AuditLog::disabled()
        };
        Self {
            classifier: Classifier::from_config(&config.classifier),
            watch_set: WatchSet::new(&config.pointer.watch, &config.pointer.project_prefix),
            audit,
            fingerprint_guard: GuardTable::new("fingerprint"),
            mirror_guard: GuardTable::new("mirror"),
            pointer_guard: GuardTable::new("pointer"),
            self_writes: SelfWriteLedger::new(Duration::from_millis(
                config.watcher.self_write_window_ms,
            )),
            root,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn self_writes(&self) -> &SelfWriteLedger {
        &self.self_writes
    }

    pub fn pointer_guard(&self) -> &GuardTable {
        &self.pointer_guard
    }

    fn analyze(&self, event: &SaveEvent) -> GovernedDocument {
        GovernedDocument::analyze(&event.path, &event.text, event.eol, &self.config.scan)
    }

    /// Absolute form of `path`, rejecting anything outside the root.
    ///
    /// `..` components are folded before the check, and symlinks are
    /// followed for whatever part of the path exists.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize_lexically(&joined);
        let outside = || GovernanceError::OutsideWorkspace {
            path: resolved.clone(),
            root: self.root.clone(),
        };

        if !resolved.starts_with(&self.root) {
            return Err(outside());
        }
        if let Ok(real) = std::fs::canonicalize(&resolved) {
            let real_root = std::fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
            if !real.starts_with(&real_root) {
                return Err(outside());
            }
        }
        Ok(resolved)
    }

    /// Whether `path` is one of the pointer registry locations.
    pub fn is_registry_path(&self, path: &Path) -> bool {
        let target = path.to_string_lossy().to_lowercase();
        self.config
            .pointer
            .candidates
            .iter()
            .any(|c| self.root.join(c).to_string_lossy().to_lowercase() == target)
    }

    // ------------------------------------------------------------------
    // Fingerprint stage (pre-commit)
    // ------------------------------------------------------------------

    fn prepare_stamp(
        &self,
        event: &SaveEvent,
    ) -> std::result::Result<PendingStamp, FingerprintOutcome> {
        if self.is_registry_path(&event.path) {
            tracing::debug!("Fingerprint skipped: {} is the pointer registry", event.path.display());
            return Err(FingerprintOutcome::Skipped {
                reason: SkipReason::PointerRegistry,
            });
        }

        let doc = self.analyze(event);
        if let Err(reason) = self.classifier.fingerprint_gate(&doc) {
            tracing::debug!("Fingerprint skipped: {} ({reason})", event.path.display());
            return Err(FingerprintOutcome::Skipped { reason });
        }

        let Some(permit) = self.fingerprint_guard.try_acquire(guard_key(&event.path)) else {
            return Err(FingerprintOutcome::Busy);
        };

        let fingerprint = Fingerprint::generate();
        match fingerprint::stamp_text(
            &event.text,
            event.eol,
            self.config.scan.header_lines,
            fingerprint.as_str(),
        ) {
            StampOutcome::NoHeader => {
                tracing::info!(
                    "Fingerprint skipped: {} has no header block",
                    event.path.display()
                );
                Err(FingerprintOutcome::NoHeader)
            }
            StampOutcome::Replaced { text, .. } => Ok(PendingStamp {
                _permit: permit,
                fingerprint,
                text,
                inserted: false,
            }),
            StampOutcome::Inserted { text, .. } => Ok(PendingStamp {
                _permit: permit,
                fingerprint,
                text,
                inserted: true,
            }),
        }
    }

    /// Record the result of applying a stamp and release its guard.
    async fn finish_stamp(
        &self,
        path: &Path,
        pending: PendingStamp,
        applied: Result<()>,
    ) -> FingerprintOutcome {
        let subjects = vec![subject(path)];
        match applied {
            Ok(()) => {
                tracing::info!("Fingerprint PASS: {} -> {}", path.display(), pending.fingerprint);
                let detail = if pending.inserted {
                    "fingerprint line inserted"
                } else {
                    "fingerprint updated"
                };
                self.audit
                    .record(
                        &AuditEvent::pass(Stage::Fingerprint, subjects, detail)
                            .with_fingerprint(pending.fingerprint.as_str()),
                    )
                    .await;
                FingerprintOutcome::Stamped {
                    fingerprint: pending.fingerprint.to_string(),
                    inserted: pending.inserted,
                }
            }
            Err(e) => {
                tracing::warn!("Fingerprint FAIL: {}: {e}", path.display());
                self.audit
                    .record(&AuditEvent::fail(Stage::Fingerprint, subjects, &e))
                    .await;
                FingerprintOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Mirror stage (post-commit)
    // ------------------------------------------------------------------

    pub async fn run_mirror(&self, event: &SaveEvent) -> MirrorOutcome {
        let doc = self.analyze(event);
        if let Err(reason) = self.classifier.mirror_gate(&doc) {
            match reason {
                SkipReason::Denied | SkipReason::NotTargeted => {
                    tracing::debug!("Mirror skipped: {} ({reason})", event.path.display());
                }
                _ => tracing::info!("Mirror skipped: {} ({reason})", event.path.display()),
            }
            return MirrorOutcome::Skipped { reason };
        }

        let Some(_permit) = self.mirror_guard.try_acquire(guard_key(&event.path)) else {
            return MirrorOutcome::Busy;
        };

        let Some(plan) = mirror::plan_mirror(&doc, &self.config.mirror.suffix) else {
            return MirrorOutcome::Skipped {
                reason: SkipReason::MissingDeclaredPath,
            };
        };
        self.write_planned_mirror(&plan).await
    }

    async fn write_planned_mirror(&self, plan: &MirrorPlan) -> MirrorOutcome {
        let subjects = vec![subject(&plan.source), subject(&plan.destination)];
        self.self_writes.note(&plan.destination);
        match mirror::write_mirror(plan).await {
            Ok(written) => {
                tracing::info!(
                    "Mirror write PASS: {} -> {} | enc={}",
                    plan.source.display(),
                    written.destination.display(),
                    written.encoding
                );
                self.audit
                    .record(
                        &AuditEvent::pass(Stage::Mirror, subjects, "mirror written")
                            .with_encoding(written.encoding),
                    )
                    .await;
                MirrorOutcome::Written {
                    destination: written.destination,
                    encoding: written.encoding,
                }
            }
            Err(e) => {
                tracing::warn!("Mirror write FAIL: {}: {e}", plan.source.display());
                self.audit
                    .record(&AuditEvent::fail(Stage::Mirror, subjects, &e))
                    .await;
                MirrorOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Pointer stage (post-commit)
    // ------------------------------------------------------------------

    pub async fn run_pointer(&self, event: &SaveEvent) -> PointerOutcome {
        let doc = self.analyze(event);
        let key = self
            .watch_set
            .key_for(doc.declared_path(), &event.path, &self.root);
        if !self.watch_set.contains(&key) {
            tracing::debug!("Pointer skipped: {key} is not watched");
            return PointerOutcome::NotWatched;
        }
        self.bump(Some(&event.path)).await
    }

    /// Bump the registry regardless of the watch list.
    pub async fn bump_now(&self) -> PointerOutcome {
        self.bump(None).await
    }

    async fn bump(&self, trigger: Option<&Path>) -> PointerOutcome {
        let mut subjects: Vec<String> = trigger.into_iter().map(subject).collect();
        let result = pointer::bump_pointer(
            &self.root,
            &self.config.pointer.candidates,
            &self.pointer_guard,
            Utc::now(),
        )
        .await;

        match result {
            Ok(PointerOutcome::Bumped {
                registry,
                build_id,
                encoding,
            }) => {
                self.self_writes.note(&registry);
                let id = build_id.clone().unwrap_or_default();
                tracing::info!("Pointer update PASS: {} | BUILD_ID {id}", registry.display());
                subjects.push(subject(&registry));
                let mut record = AuditEvent::pass(Stage::Pointer, subjects, "pointer bumped")
                    .with_encoding(encoding);
                if let Some(id) = &build_id {
                    record = record.with_build_id(id);
                }
                self.audit.record(&record).await;
                PointerOutcome::Bumped {
                    registry,
                    build_id,
                    encoding,
                }
            }
            Ok(PointerOutcome::NoRegistry) => {
                tracing::debug!("Pointer skipped: no registry under {}", self.root.display());
                PointerOutcome::NoRegistry
            }
            Ok(other) => {
                tracing::debug!("Pointer skipped: {other:?}");
                other
            }
            Err(e) => {
                tracing::warn!("Pointer update FAIL: {e}");
                self.audit
                    .record(&AuditEvent::fail(Stage::Pointer, subjects, &e))
                    .await;
                PointerOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Disk driver
    // ------------------------------------------------------------------

    /// Run one full save lifecycle for a file already on disk.
    ///
    /// The stamped replacement (if any) is written and synced in the file's
    /// own encoding before the post-commit stages read anything.
    pub async fn save_file(&self, path: &Path) -> Result<SaveReport> {
        let path = self.resolve(path)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| GovernanceError::FileRead {
                path: path.clone(),
                source: e,
            })?;
        let decoded = encoding::decode(&bytes).map_err(|e| GovernanceError::Decode {
            path: path.clone(),
            encoding: encoding::detect(&bytes),
            reason: e.to_string(),
        })?;

        let mut event = SaveEvent::new(path.clone(), decoded.text);

        let fingerprint = match self.prepare_stamp(&event) {
            Err(outcome) => outcome,
            Ok(pending) => {
                let applied = persist(&path, &pending.text, decoded.encoding).await;
                if applied.is_ok() {
                    self.self_writes.note(&path);
                    event.text = pending.text.clone();
                }
                self.finish_stamp(&path, pending, applied).await
            }
        };

        let (mirror, pointer) = tokio::join!(self.run_mirror(&event), self.run_pointer(&event));

        Ok(SaveReport {
            path,
            encoding: decoded.encoding,
            fingerprint,
            mirror,
            pointer,
        })
    }
}

/// Overwrite `path` with `text` in `encoding`, synced to disk.
async fn persist(path: &Path, text: &str, encoding: FileEncoding) -> Result<()> {
    crate::io::write_atomic(path, &encoding::encode(text, encoding)).await
}

#[async_trait]
impl SaveHooks for GovernanceEngine {
    async fn before_persist(&self, event: &SaveEvent) -> Option<String> {
        let pending = self.prepare_stamp(event).ok()?;
        let text = pending.text.clone();
        self.finish_stamp(&event.path, pending, Ok(())).await;
        Some(text)
    }

    async fn after_persist(&self, event: &SaveEvent) {
        let (mirror, pointer) = tokio::join!(self.run_mirror(event), self.run_pointer(event));
        tracing::debug!(
            "Post-commit done: {} | mirror={mirror:?} pointer={pointer:?}",
            event.path.display()
        );
    }
}
