//! Error types for governance operations
//!
//! Every fallible stage returns [`GovernanceError`]. The engine converts
//! these into FAIL audit records at the stage boundary; none of them ever
//! escape a save hook.

use std::path::PathBuf;
use thiserror::Error;

use crate::encoding::FileEncoding;

/// Governance result type alias
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Governance error taxonomy
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to decode {path} as {encoding}: {reason}")]
    Decode {
        path: PathBuf,
        encoding: FileEncoding,
        reason: String,
    },

    #[error("Failed to serialize JSON: {source}")]
    JsonSerialize { source: serde_json::Error },

    #[error("Path {path} is outside workspace root {root}")]
    OutsideWorkspace { path: PathBuf, root: PathBuf },

    #[error("{0}")]
    Other(String),
}

impl GovernanceError {
    /// Whether the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            GovernanceError::FileRead { source, .. } | GovernanceError::FileWrite { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<String> for GovernanceError {
    fn from(s: String) -> Self {
        GovernanceError::Other(s)
    }
}

impl From<&str> for GovernanceError {
    fn from(s: &str) -> Self {
        GovernanceError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_not_found_detection() {
        let err = GovernanceError::FileRead {
            path: "/tmp/missing.ini".into(),
            source: Error::new(ErrorKind::NotFound, "not found"),
        };
        assert!(err.is_not_found());

        let err = GovernanceError::FileWrite {
            path: "/tmp/locked.ini".into(),
            source: Error::new(ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_messages_carry_path() {
        let err = GovernanceError::Decode {
            path: "/tmp/odd.ini".into(),
            encoding: FileEncoding::Utf16Le,
            reason: "odd byte count".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/odd.ini"), "{msg}");
        assert!(msg.contains("utf16le"), "{msg}");
    }

    #[test]
    fn test_from_str() {
        let err: GovernanceError = "boom".into();
        assert_eq!(err.to_string(), "boom");
    }
}
