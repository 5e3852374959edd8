//! Governance classification.
//!
//! Decides, per save, whether a document is a mirror target and/or a
//! fingerprint target. Extension checks come first, then the content-tag
//! gate. Nothing here touches the filesystem.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::document::GovernedDocument;

/// Extension-level eligibility of a path.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Eligibility {
    pub mirror_target: bool,
    pub fingerprint_target: bool,
}

impl Eligibility {
    pub fn any(&self) -> bool {
        self.mirror_target || self.fingerprint_target
    }
}

/// Why a document was not processed by a stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Extension is on the denylist.
    Denied,
    /// Extension is not in the stage's target set.
    NotTargeted,
    /// Tag window lacks `GEMINI MEM TAG` / `MY FULL PATH IS`.
    MissingContentTag,
    /// Tag window carries the generated-artifact marker.
    GeneratedArtifact,
    /// Tag passed but no quoted path could be extracted.
    MissingDeclaredPath,
    /// Path is a pointer registry location.
    PointerRegistry,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Denied => "denied extension",
            Self::NotTargeted => "extension not targeted",
            Self::MissingContentTag => "no governance content tag",
            Self::GeneratedArtifact => "generated artifact",
            Self::MissingDeclaredPath => "no declared path",
            Self::PointerRegistry => "pointer registry",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a stage gate.
pub type Gate = std::result::Result<(), SkipReason>;

/// Extension and content-tag classifier.
#[derive(Clone, Debug)]
pub struct Classifier {
    mirror_extensions: Vec<String>,
    fingerprint_extensions: Vec<String>,
    sidecar_suffix: String,
    denied_extensions: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}

/// Lowercase and ensure a leading dot.
fn normalize_extension(ext: &str) -> String {
    let lowered = ext.trim().to_lowercase();
    if lowered.starts_with('.') {
        lowered
    } else {
        format!(".{lowered}")
    }
}

fn file_name_lower(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_lowercase)
}

impl Classifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let normalize_all =
            |exts: &[String]| exts.iter().map(|e| normalize_extension(e)).collect::<Vec<_>>();
        Self {
            mirror_extensions: normalize_all(&config.mirror_extensions),
            fingerprint_extensions: normalize_all(&config.fingerprint_extensions),
            sidecar_suffix: config.sidecar_suffix.trim().to_lowercase(),
            denied_extensions: normalize_all(&config.denied_extensions),
        }
    }

    fn has_suffix(name: &str, suffixes: &[String]) -> bool {
        suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }

    /// Whether the extension is on the denylist.
    pub fn is_denied(&self, path: &Path) -> bool {
        file_name_lower(path).is_some_and(|name| Self::has_suffix(&name, &self.denied_extensions))
    }

    /// Extension-only classification. The denylist wins over both sets.
    pub fn eligibility(&self, path: &Path) -> Eligibility {
        let Some(name) = file_name_lower(path) else {
            return Eligibility::default();
        };
        if Self::has_suffix(&name, &self.denied_extensions) {
            return Eligibility::default();
        }
        let sidecar = !self.sidecar_suffix.is_empty() && name.ends_with(&self.sidecar_suffix);
        Eligibility {
            mirror_target: Self::has_suffix(&name, &self.mirror_extensions),
            fingerprint_target: sidecar || Self::has_suffix(&name, &self.fingerprint_extensions),
        }
    }

    fn extension_gate(&self, path: &Path, targeted: impl Fn(Eligibility) -> bool) -> Gate {
        if self.is_denied(path) {
            return Err(SkipReason::Denied);
        }
        if !targeted(self.eligibility(path)) {
            return Err(SkipReason::NotTargeted);
        }
        Ok(())
    }

    /// Gate for the fingerprint stamper.
    pub fn fingerprint_gate(&self, doc: &GovernedDocument) -> Gate {
        self.extension_gate(&doc.path, |e| e.fingerprint_target)?;
        if doc.generated {
            return Err(SkipReason::GeneratedArtifact);
        }
        if doc.tag.is_none() {
            return Err(SkipReason::MissingContentTag);
        }
        Ok(())
    }

    /// Gate for the mirror writer. Requires an extractable declared path.
    pub fn mirror_gate(&self, doc: &GovernedDocument) -> Gate {
        self.extension_gate(&doc.path, |e| e.mirror_target)?;
        if doc.generated {
            return Err(SkipReason::GeneratedArtifact);
        }
        if doc.tag.is_none() {
            return Err(SkipReason::MissingContentTag);
        }
        if doc.declared_path().is_none() {
            return Err(SkipReason::MissingDeclaredPath);
        }
        Ok(())
    }
}
