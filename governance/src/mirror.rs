//! Mirror writer.
//!
//! Every save of a runtime-format file (`.ahk`, `.ini`) produces a plain-text
//! shadow next to it at `<runtime path><suffix>`. The shadow opens with a
//! generated-artifact header declaring its own canonical path, followed by
//! the runtime text byte for byte, and is stored in the same encoding family
//! as the runtime file on disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::document::{GENERATED_MARKER, GovernedDocument, LineEnding};
use crate::encoding::{self, FileEncoding};
use crate::error::Result;
use crate::header::CommentPrefix;

/// Default suffix appended to the runtime path and declared path.
pub const DEFAULT_MIRROR_SUFFIX: &str = ".txt";

const RULE: &str = "------------------------------------------------------------------";

/// What to write, computed without touching the filesystem.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MirrorPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Canonical path declared inside the mirror header.
    pub declared_path: String,
    pub content: String,
}

/// Filesystem path of the mirror for `source`.
pub fn mirror_path(source: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = source.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Generated-artifact header, joined with `eol` and ready to prepend.
pub fn generated_header(declared_path: &str, prefix: CommentPrefix, eol: LineEnding) -> String {
    let lines = [
        format!("{prefix} {RULE}"),
        format!("{prefix} {GENERATED_MARKER} (GENERATED, DO NOT EDIT) - MY FULL PATH IS \"{declared_path}\""),
        format!("{prefix} {RULE}"),
        String::new(),
        String::new(),
    ];
    lines.join(eol.as_str())
}

/// Plan the mirror for a document that passed the mirror gate.
///
/// Returns `None` when the document has no declared path.
pub fn plan_mirror(doc: &GovernedDocument, suffix: &str) -> Option<MirrorPlan> {
    let declared = doc.declared_path()?;
    let declared_path = format!("{declared}{suffix}");
    let mut content = generated_header(&declared_path, doc.prefix, doc.eol);
    content.push_str(&doc.text);
    Some(MirrorPlan {
        source: doc.path.clone(),
        destination: mirror_path(&doc.path, suffix),
        declared_path,
        content,
    })
}

/// A completed mirror write.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MirrorWritten {
    pub destination: PathBuf,
    pub encoding: FileEncoding,
    pub bytes: usize,
}

/// Write `plan` in the source's on-disk encoding, replacing any previous
/// mirror wholesale.
pub async fn write_mirror(plan: &MirrorPlan) -> Result<MirrorWritten> {
    let encoding = encoding::detect_file(&plan.source).await;
    let bytes = encoding::encode(&plan.content, encoding);

    crate::io::write_atomic(&plan.destination, &bytes).await?;

    Ok(MirrorWritten {
        destination: plan.destination.clone(),
        encoding,
        bytes: bytes.len(),
    })
}
