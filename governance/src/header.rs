//! Header block location.
//!
//! A governed file opens with one or more comment-delimited blocks:
//!
//! ```text
//! ; ------------------------------------------------------------------
//! ; GEMINI MEM TAG (DO NOT EVER REMOVE OR EDIT) - MY FULL PATH IS "..."
//! ; ------------------------------------------------------------------
//! ```
//!
//! The locator finds the first pair of delimiter lines inside a bounded
//! window. It never guesses: if fewer than two delimiters are present the
//! block is absent, and nothing downstream may fabricate one.

use serde::{Deserialize, Serialize};

/// Lines scanned for header delimiters.
pub const HEADER_SCAN_LINES: usize = 200;

/// Minimum dash run for a modern delimiter line.
const MIN_DASH_RUN: usize = 10;

/// Comment prefixes recognized in governed headers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentPrefix {
    /// `;` (AutoHotkey, INI)
    Semicolon,
    /// `//` (JS, TS)
    DoubleSlash,
    /// `#` (Python, YAML, shell)
    Hash,
}

impl CommentPrefix {
    /// Prefix used when nothing in the window declares one.
    pub const DEFAULT: CommentPrefix = CommentPrefix::Semicolon;

    /// Order in which prefixes are tried when sniffing a line.
    const DETECTION_ORDER: [CommentPrefix; 3] = [
        CommentPrefix::DoubleSlash,
        CommentPrefix::Hash,
        CommentPrefix::Semicolon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semicolon => ";",
            Self::DoubleSlash => "//",
            Self::Hash => "#",
        }
    }

    /// Split a supported prefix off the start of `s`.
    pub fn strip_from(s: &str) -> Option<(CommentPrefix, &str)> {
        Self::DETECTION_ORDER
            .into_iter()
            .find_map(|p| s.strip_prefix(p.as_str()).map(|rest| (p, rest)))
    }

    /// Prefix a line starts with, ignoring leading whitespace.
    pub fn of_line(line: &str) -> Option<CommentPrefix> {
        Self::strip_from(line.trim_start()).map(|(p, _)| p)
    }
}

impl std::fmt::Display for CommentPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zero-based line indices of the opening and closing delimiters.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HeaderBlock {
    pub start_line: usize,
    pub end_line: usize,
}

/// Whether `line` is a header delimiter: `<prefix> ----------` (10+ dashes)
/// or the legacy `<prefix> ===`.
pub fn is_delimiter(line: &str) -> bool {
    let Some((_, rest)) = CommentPrefix::strip_from(line.trim()) else {
        return false;
    };
    let run = rest.trim();
    let dashes = run.len() >= MIN_DASH_RUN && run.bytes().all(|b| b == b'-');
    let legacy = !run.is_empty() && run.bytes().all(|b| b == b'=');
    dashes || legacy
}

/// Locate the first delimiter pair within the first `scan_lines` lines.
pub fn locate(lines: &[&str], scan_lines: usize) -> Option<HeaderBlock> {
    let window = &lines[..lines.len().min(scan_lines)];
    let start_line = window.iter().position(|l| is_delimiter(l))?;
    let end_line = window[start_line + 1..]
        .iter()
        .position(|l| is_delimiter(l))
        .map(|offset| start_line + 1 + offset)?;
    Some(HeaderBlock {
        start_line,
        end_line,
    })
}

/// Detect the comment prefix a header uses.
///
/// Tries the block's delimiter lines first, then the first commented line
/// in the scan window, then falls back to [`CommentPrefix::DEFAULT`].
pub fn detect_prefix(
    lines: &[&str],
    block: Option<HeaderBlock>,
    scan_lines: usize,
) -> CommentPrefix {
    let delimiters = block
        .into_iter()
        .flat_map(|b| [b.start_line, b.end_line])
        .filter_map(|idx| lines.get(idx));

    delimiters
        .chain(lines.iter().take(scan_lines))
        .find_map(|l| CommentPrefix::of_line(l))
        .unwrap_or(CommentPrefix::DEFAULT)
}
