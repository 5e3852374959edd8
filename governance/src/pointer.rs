//! Pointer registry build bump.
//!
//! Saving any file on the watch list advances `BUILD_ID` in the shared
//! pointer registry and refreshes `UPDATED_UTC`, telling downstream
//! consumers that a new build epoch exists. The counter is derived from the
//! clock, so it is monotone across restarts without persisted state.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::LineEnding;
use crate::encoding::{self, FileEncoding};
use crate::error::{GovernanceError, Result};
use crate::fingerprint::utc_stamp;
use crate::guard::GuardTable;

/// Registry locations tried in order, relative to the workspace root.
pub const DEFAULT_CANDIDATES: [&str; 2] = ["Governance/PIPZ_POINTER.txt", "PIPZ_POINTER.txt"];

/// Folder name declared paths are rooted at.
pub const DEFAULT_PROJECT_PREFIX: &str = "Pipz_Project_V3";

pub const BUILD_ID_KEY: &str = "BUILD_ID";
pub const UPDATED_UTC_KEY: &str = "UPDATED_UTC";

const BUILD_ID_MODULUS: i64 = 100_000_000;
const BUILD_ID_DIGITS: usize = 8;

/// Paths whose save triggers a bump.
pub const DEFAULT_WATCH: [&str; 13] = [
    "GOVERNANCE_COMPENDIUM.txt",
    "PROTOCOL_RUNBOOK.txt",
    "Governance/GOVERNANCE_COMPENDIUM.txt",
    "Governance/PROTOCOL_RUNBOOK.txt",
    "GLOBAL_REGISTRY_MASTER.csv",
    "INTERNAL_FUNCTION_INDEX.csv",
    "Main_Controller.txt",
    "Controller_Core.txt",
    "Main_Worker.txt",
    "Worker_Core.txt",
    "Core_Utils.txt",
    "Interop.txt",
    "Humanoid.txt",
];

/// Normalize a declared or relative path for watch-set lookup.
///
/// Backslashes become slashes, leading slashes go, the result is
/// lowercased and a leading `<project_prefix>/` is stripped.
pub fn normalize(path: &str, project_prefix: &str) -> String {
    let slashed = path.trim().replace('\\', "/").to_lowercase();
    let trimmed = slashed.trim_start_matches('/');
    let prefix = format!(
        "{}/",
        project_prefix.trim().trim_matches('/').to_lowercase()
    );
    let stripped = if prefix.len() > 1 {
        trimmed.strip_prefix(prefix.as_str()).unwrap_or(trimmed)
    } else {
        trimmed
    };
    stripped.trim_start_matches('/').to_string()
}

/// Normalized set of watched paths.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WatchSet {
    project_prefix: String,
    entries: BTreeSet<String>,
}

impl WatchSet {
    pub fn new<I, S>(entries: I, project_prefix: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            project_prefix: project_prefix.to_string(),
            entries: entries
                .into_iter()
                .map(|e| normalize(e.as_ref(), project_prefix))
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn project_prefix(&self) -> &str {
        &self.project_prefix
    }

    /// Whether an already-normalized key is watched.
    pub fn contains(&self, normalized: &str) -> bool {
        self.entries.contains(normalized)
    }

    /// Lookup key for a saved document: the declared path if there is one,
    /// else the path relative to `root`.
    pub fn key_for(&self, declared: Option<&str>, path: &Path, root: &Path) -> String {
        match declared {
            Some(declared) => normalize(declared, &self.project_prefix),
            None => {
                let relative = path.strip_prefix(root).unwrap_or(path);
                normalize(&relative.to_string_lossy(), &self.project_prefix)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Next build counter for `now`, forcing movement when `prior` already
/// holds the same value.
pub fn next_build_id(prior: Option<&str>, now: DateTime<Utc>) -> String {
    let mut value = now.timestamp().rem_euclid(BUILD_ID_MODULUS);
    let prior = prior
        .filter(|p| p.len() == BUILD_ID_DIGITS && p.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|p| p.parse::<i64>().ok());
    if prior == Some(value) {
        value = (value + 1) % BUILD_ID_MODULUS;
    }
    format!("{value:0width$}", width = BUILD_ID_DIGITS)
}

/// Result of rewriting registry text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistryBump {
    pub text: String,
    /// New `BUILD_ID`, when the key was present.
    pub build_id: Option<String>,
    pub changed: bool,
}

/// Value after `KEY:` if `line` starts with the key (case-insensitive,
/// leading whitespace allowed).
fn key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let trimmed = line.trim_start();
    let head = trimmed.get(..key.len())?;
    if !head.eq_ignore_ascii_case(key) {
        return None;
    }
    trimmed[key.len()..].trim_start().strip_prefix(':').map(str::trim)
}

/// Rewrite the first `BUILD_ID` and `UPDATED_UTC` lines of `raw`.
pub fn bump_registry_text(raw: &str, now: DateTime<Utc>) -> RegistryBump {
    let eol = LineEnding::detect(raw);
    let mut lines: Vec<String> = raw
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect();

    let mut build_id = None;
    if let Some(idx) = lines.iter().position(|l| key_value(l, BUILD_ID_KEY).is_some()) {
        let next = next_build_id(key_value(&lines[idx], BUILD_ID_KEY), now);
        lines[idx] = format!("{BUILD_ID_KEY}: {next}");
        build_id = Some(next);
    }
    if let Some(idx) = lines.iter().position(|l| key_value(l, UPDATED_UTC_KEY).is_some()) {
        lines[idx] = format!("{UPDATED_UTC_KEY}: {}", utc_stamp(now));
    }

    let text = lines.join(eol.as_str());
    let changed = text != raw;
    RegistryBump {
        text,
        build_id,
        changed,
    }
}

/// First candidate under `root` that exists.
pub async fn resolve_registry(root: &Path, candidates: &[String]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = root.join(candidate);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

/// Guard key for a resolved registry.
pub fn registry_guard_key(registry: &Path) -> String {
    registry.to_string_lossy().to_lowercase()
}

/// Outcome of a pointer stage run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PointerOutcome {
    /// Registry rewritten.
    Bumped {
        registry: PathBuf,
        build_id: Option<String>,
        encoding: FileEncoding,
    },
    /// Neither key present; nothing written.
    Unchanged { registry: PathBuf },
    /// Saved path is not on the watch list.
    NotWatched,
    /// No candidate registry exists.
    NoRegistry,
    /// Another bump holds the registry.
    Busy { registry: PathBuf },
    /// Read, decode or write failed.
    Failed { error: String },
}

/// Read-modify-write the registry under `root`.
pub async fn bump_pointer(
    root: &Path,
    candidates: &[String],
    guard: &GuardTable,
    now: DateTime<Utc>,
) -> Result<PointerOutcome> {
    let Some(registry) = resolve_registry(root, candidates).await else {
        return Ok(PointerOutcome::NoRegistry);
    };
    let Some(_permit) = guard.try_acquire(registry_guard_key(&registry)) else {
        return Ok(PointerOutcome::Busy { registry });
    };

    let bytes = tokio::fs::read(&registry)
        .await
        .map_err(|e| GovernanceError::FileRead {
            path: registry.clone(),
            source: e,
        })?;
    let decoded = encoding::decode(&bytes).map_err(|e| GovernanceError::Decode {
        path: registry.clone(),
        encoding: encoding::detect(&bytes),
        reason: e.to_string(),
    })?;

    let bump = bump_registry_text(&decoded.text, now);
    if !bump.changed {
        return Ok(PointerOutcome::Unchanged { registry });
    }

    let out = encoding::encode(&bump.text, decoded.encoding);
    crate::io::write_atomic(&registry, &out).await?;

    Ok(PointerOutcome::Bumped {
        registry,
        build_id: bump.build_id,
        encoding: decoded.encoding,
    })
}
