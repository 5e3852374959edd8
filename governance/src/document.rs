//! Per-save view of a governed document.
//!
//! A [`GovernedDocument`] is re-derived from scratch on every save and never
//! cached: path, text, end-of-line style, located header block, comment
//! prefix and content tag.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::header::{self, CommentPrefix, HeaderBlock};

/// Lines scanned for the content tag.
pub const GEMINI_SCAN_LINES: usize = 12;

/// Marker phrase of the governance content tag (compared lowercased).
pub const TAG_MARKER: &str = "gemini mem tag";

/// Path-declaration phrase of the content tag (compared lowercased).
pub const PATH_PHRASE: &str = "my full path is";

/// Marker carried by every artifact this engine generates. Distinct from
/// [`TAG_MARKER`] so generated files never pass the content-tag gate.
pub const GENERATED_MARKER: &str = "AI SOT TEXT FILE";

/// End-of-line style of a document.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// `CrLf` if the text contains any `\r\n`, otherwise `Lf`.
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            Self::CrLf
        } else {
            Self::Lf
        }
    }
}

/// The governance tag found near the top of a document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContentTag {
    /// Canonical path declared by `MY FULL PATH IS "<value>"`, if parseable.
    pub declared_path: Option<String>,
}

fn declared_path_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)MY\s+FULL\s+PATH\s+IS\s+"([^"]+)""#).ok())
        .as_ref()
}

fn head(text: &str, tag_lines: usize) -> String {
    text.lines().take(tag_lines).collect::<Vec<_>>().join("\n")
}

/// Scan the first `tag_lines` lines for the governance content tag.
///
/// Both the marker phrase and the path-declaration phrase must be present
/// (case-insensitive). Returns `None` when the gate fails.
pub fn scan_content_tag(text: &str, tag_lines: usize) -> Option<ContentTag> {
    let top = head(text, tag_lines);
    let lowered = top.to_lowercase();
    if !(lowered.contains(TAG_MARKER) && lowered.contains(PATH_PHRASE)) {
        return None;
    }
    let declared_path = declared_path_re()
        .and_then(|re| re.captures(&top))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    Some(ContentTag { declared_path })
}

/// Whether the first `tag_lines` lines carry [`GENERATED_MARKER`].
pub fn has_generated_marker(text: &str, tag_lines: usize) -> bool {
    head(text, tag_lines)
        .to_uppercase()
        .contains(GENERATED_MARKER)
}

/// Everything the stages need to know about one save of one file.
#[derive(Clone, Debug)]
pub struct GovernedDocument {
    pub path: PathBuf,
    pub text: String,
    pub eol: LineEnding,
    pub header: Option<HeaderBlock>,
    pub prefix: CommentPrefix,
    pub tag: Option<ContentTag>,
    pub generated: bool,
}

impl GovernedDocument {
    pub fn analyze(path: &Path, text: &str, eol: LineEnding, scan: &ScanConfig) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        let header = header::locate(&lines, scan.header_lines);
        let prefix = header::detect_prefix(&lines, header, scan.header_lines);
        Self {
            path: path.to_path_buf(),
            text: text.to_string(),
            eol,
            header,
            prefix,
            tag: scan_content_tag(text, scan.tag_lines),
            generated: has_generated_marker(text, scan.tag_lines),
        }
    }

    /// Declared canonical path, when the tag gate passed and a value parsed.
    pub fn declared_path(&self) -> Option<&str> {
        self.tag.as_ref().and_then(|t| t.declared_path.as_deref())
    }
}
