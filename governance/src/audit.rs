//! Append-only audit trail.
//!
//! One JSON file per stage outcome under `<root>/<audit dir>`, named
//! `<UTC timestamp with millis>_<6 hex>.json` so a directory listing sorts
//! chronologically. Files are created with create-new semantics and never
//! read back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::encoding::FileEncoding;
use crate::error::{GovernanceError, Result};

/// Default audit directory, relative to the workspace root.
pub const DEFAULT_AUDIT_DIR: &str = ".ORCH_AUDITLOG/mirror";

/// Attempts before giving up on finding a free file name.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Engine stage that produced an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fingerprint,
    Mirror,
    Pointer,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fingerprint => "fingerprint",
            Self::Mirror => "mirror",
            Self::Pointer => "pointer",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditResult {
    Pass,
    Fail,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub stage: Stage,
    /// Source path first, then any destination.
    pub subjects: Vec<String>,
    pub result: AuditResult,
    pub detail: String,
    pub ts_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<FileEncoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn pass(stage: Stage, subjects: Vec<String>, detail: impl Into<String>) -> Self {
        Self {
            stage,
            subjects,
            result: AuditResult::Pass,
            detail: detail.into(),
            ts_utc: Utc::now(),
            fingerprint: None,
            encoding: None,
            build_id: None,
            error: None,
        }
    }

    pub fn fail(stage: Stage, subjects: Vec<String>, error: &GovernanceError) -> Self {
        Self {
            result: AuditResult::Fail,
            error: Some(error.to_string()),
            ..Self::pass(stage, subjects, format!("{stage} failed"))
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_encoding(mut self, encoding: FileEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }
}

/// Sortable file name for an event at `ts`.
pub fn record_file_name(ts: DateTime<Utc>, disambiguator: u32) -> String {
    format!(
        "{}_{:06x}.json",
        ts.format("%Y-%m-%dT%H-%M-%S-%3fZ"),
        disambiguator & 0x00FF_FFFF
    )
}

/// Writer for the audit directory.
#[derive(Clone, Debug)]
pub struct AuditLog {
    dir: PathBuf,
    enabled: bool,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
        }
    }

    /// A log that accepts events and writes nothing.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Persist `event`. Failures are logged and swallowed.
    pub async fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.try_record(event).await {
            tracing::warn!("Audit write failed ({} {}): {e}", event.stage, event.result);
        }
    }

    /// Persist `event`, returning the created file, or `None` when disabled.
    pub async fn try_record(&self, event: &AuditEvent) -> Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| GovernanceError::DirectoryCreate {
                path: self.dir.clone(),
                source: e,
            })?;

        let json = serde_json::to_vec_pretty(event)
            .map_err(|e| GovernanceError::JsonSerialize { source: e })?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self
                .dir
                .join(record_file_name(event.ts_utc, rand::random::<u32>()));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(GovernanceError::FileWrite { path, source: e }),
            };
            file.write_all(&json)
                .await
                .map_err(|e| GovernanceError::FileWrite {
                    path: path.clone(),
                    source: e,
                })?;
            file.flush().await.map_err(|e| GovernanceError::FileWrite {
                path: path.clone(),
                source: e,
            })?;
            return Ok(Some(path));
        }

        Err(GovernanceError::Other(format!(
            "no free audit file name in {} after {MAX_NAME_ATTEMPTS} attempts",
            self.dir.display()
        )))
    }
}
