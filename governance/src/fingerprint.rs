//! Content fingerprint tokens and the pre-commit stamper.
//!
//! A fingerprint is a change marker, not a hash: UTC time to the second plus
//! eight random characters. [`stamp_text`] is pure; the engine owns the
//! guard, the audit record and handing the new text back to the host.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::document::LineEnding;
use crate::header::{self, HeaderBlock};

/// Characters used for the random suffix.
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random suffix.
pub const SUFFIX_LEN: usize = 8;

/// Key of the fingerprint header line.
pub const FINGERPRINT_KEY: &str = "Content-Fingerprint";

/// `YYYY-MM-DDTHH-MM-SSZ`, the filesystem-safe UTC form used in tokens and
/// in the pointer registry.
pub fn utc_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}

/// A `YYYY-MM-DDTHH-MM-SSZ-XXXXXXXX` token.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// New token for the current instant.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| char::from(SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())]))
            .collect();
        Self::new_at(Utc::now(), &suffix)
    }

    /// Token for a fixed instant and suffix.
    pub fn new_at(now: DateTime<Utc>, suffix: &str) -> Self {
        Self(format!("{}-{suffix}", utc_stamp(now)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of stamping a text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StampOutcome {
    /// An existing fingerprint line had its value replaced.
    Replaced { text: String, previous: String },
    /// A fingerprint line was inserted before the closing delimiter.
    Inserted { text: String, line: usize },
    /// No header block in the scan window; the text is left alone.
    NoHeader,
}

impl StampOutcome {
    /// Replacement text, if the stamp changed anything.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Replaced { text, .. } | Self::Inserted { text, .. } => Some(text),
            Self::NoHeader => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Replaced { text, .. } | Self::Inserted { text, .. } => Some(text),
            Self::NoHeader => None,
        }
    }
}

fn fingerprint_line_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\s*(?:;|//|#)\s*Content-Fingerprint\s*:\s*)(.*)$").ok()
    })
    .as_ref()
}

/// Split a segment from `split_inclusive('\n')` into body and terminator.
fn split_terminator(segment: &str) -> (&str, &str) {
    if let Some(body) = segment.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = segment.strip_suffix('\n') {
        (body, "\n")
    } else {
        (segment, "")
    }
}

/// Replace the value of the first fingerprint line, keeping every other byte.
fn replace_value(segments: &[&str], token: &str) -> Option<StampOutcome> {
    let re = fingerprint_line_re()?;
    segments.iter().enumerate().find_map(|(idx, segment)| {
        let (body, terminator) = split_terminator(segment);
        let caps = re.captures(body)?;
        let lead = caps.get(1)?.as_str();
        let previous = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

        let mut text = String::with_capacity(segments.iter().map(|s| s.len()).sum::<usize>() + token.len());
        for s in &segments[..idx] {
            text.push_str(s);
        }
        text.push_str(lead);
        text.push_str(token);
        text.push_str(terminator);
        for s in &segments[idx + 1..] {
            text.push_str(s);
        }
        Some(StampOutcome::Replaced {
            text,
            previous: previous.to_string(),
        })
    })
}

fn insert_line(segments: &[&str], block: HeaderBlock, line: String) -> StampOutcome {
    let mut text = String::new();
    for (idx, s) in segments.iter().enumerate() {
        if idx == block.end_line {
            text.push_str(&line);
        }
        text.push_str(s);
    }
    StampOutcome::Inserted {
        text,
        line: block.end_line,
    }
}

/// Stamp `token` into `text`.
///
/// Fail-closed: without a header block in the first `header_lines` lines the
/// text is never modified. With one, the first fingerprint line anywhere in
/// the text has its value replaced; if there is none, a new line
/// `<prefix> Content-Fingerprint: <token><eol>` goes right before the
/// block's closing delimiter.
pub fn stamp_text(text: &str, eol: LineEnding, header_lines: usize, token: &str) -> StampOutcome {
    let lines: Vec<&str> = text.lines().collect();
    let Some(block) = header::locate(&lines, header_lines) else {
        return StampOutcome::NoHeader;
    };

    let segments: Vec<&str> = text.split_inclusive('\n').collect();
    if let Some(replaced) = replace_value(&segments, token) {
        return replaced;
    }

    let prefix = header::detect_prefix(&lines, Some(block), header_lines);
    let line = format!("{prefix} {FINGERPRINT_KEY}: {token}{}", eol.as_str());
    insert_line(&segments, block, line)
}
