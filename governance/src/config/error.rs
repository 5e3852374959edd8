use std::path::PathBuf;
use thiserror::Error;

/// Why a governance configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--config` named a file that does not exist.
    #[error("Configuration file not found at path: {0}")]
    FileNotFound(PathBuf),

    /// A file or environment layer could not be parsed.
    #[error("Failed to parse configuration from {origin}: {reason}")]
    Parse { origin: String, reason: String },

    /// A key parsed but holds a value of the wrong type.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// Merging the layers failed for another reason.
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// The effective configuration could not be turned into JSON.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The embedded schema itself is unusable.
    #[error("Governance schema is invalid: {0}")]
    Schema(String),

    /// The configuration violates the schema.
    #[error("{}", violation_message(.0))]
    SchemaViolation(Vec<String>),

    /// Values are individually valid but contradict each other.
    #[error("Inconsistent configuration: {}", .0.join("; "))]
    Inconsistent(Vec<String>),
}

fn violation_message(errors: &[String]) -> String {
    format!(
        "Configuration validation failed ({} error{}):\n  - {}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" },
        errors.join("\n  - ")
    )
}

/// Type alias for Results using ConfigError
pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        let reason = err.to_string();
        match err {
            config::ConfigError::FileParse { uri, .. } => ConfigError::Parse {
                origin: uri.unwrap_or_else(|| "<inline source>".to_string()),
                reason,
            },
            config::ConfigError::Type { key, .. } => ConfigError::InvalidValue {
                key: key.unwrap_or_else(|| "<root>".to_string()),
                reason,
            },
            _ => ConfigError::Load(reason),
        }
    }
}
