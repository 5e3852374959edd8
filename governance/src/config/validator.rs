use crate::config::error::{ConfigError, Result};
use crate::config::loader::GovernanceConfig;
use crate::guard::min_self_write_window;
use crate::pointer;
use std::time::Duration;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Schema and consistency validator for [`GovernanceConfig`]
pub struct SchemaValidator {
    schema: JSONSchema,
}

impl SchemaValidator {
    /// Create a validator from the embedded schema.
    pub fn new() -> Result<Self> {
        let schema_str = include_str!("schemas/governance_config.schema.json");
        let schema_value: Value = serde_json::from_str(schema_str)
            .map_err(|e| ConfigError::Schema(format!("failed to parse: {e}")))?;

        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .map_err(|e| ConfigError::Schema(format!("failed to compile: {e}")))?;

        Ok(Self { schema })
    }

    /// Validate shape against the schema, then cross-field rules.
    pub fn validate(&self, config: &GovernanceConfig) -> Result<()> {
        let config_value = serde_json::to_value(config)?;

        if let Err(errors) = self.schema.validate(&config_value) {
            let error_messages: Vec<String> = errors
                .map(|e| {
                    let path_str = e.instance_path.to_string();
                    let path = if path_str.is_empty() {
                        "root".to_string()
                    } else {
                        path_str
                    };
                    format!("{e} at '{path}'")
                })
                .collect();

            return Err(ConfigError::SchemaViolation(error_messages));
        }

        validate_consistency(config)
    }
}

/// Rules the schema cannot express.
fn validate_consistency(config: &GovernanceConfig) -> Result<()> {
    let mut problems = Vec::new();

    if config.scan.tag_lines > config.scan.header_lines {
        problems.push(format!(
            "scan.tag_lines ({}) exceeds scan.header_lines ({})",
            config.scan.tag_lines, config.scan.header_lines
        ));
    }

    if config.mirror.suffix.trim().is_empty() {
        problems.push("mirror.suffix must not be empty".to_string());
    }

    // The echo of an engine write must still be in the ledger when the
    // debounced event for it arrives.
    let debounce = Duration::from_millis(config.watcher.debounce_ms);
    let required = min_self_write_window(debounce);
    if Duration::from_millis(config.watcher.self_write_window_ms) < required {
        problems.push(format!(
            "watcher.self_write_window_ms ({}) must be at least {} for watcher.debounce_ms ({})",
            config.watcher.self_write_window_ms,
            required.as_millis(),
            config.watcher.debounce_ms
        ));
    }

    // A registry on the watch list would re-trigger its own bump.
    let prefix = &config.pointer.project_prefix;
    for candidate in &config.pointer.candidates {
        let candidate_key = pointer::normalize(candidate, prefix);
        for entry in &config.pointer.watch {
            if pointer::normalize(entry, prefix) == candidate_key {
                problems.push(format!(
                    "pointer.watch entry '{entry}' names pointer candidate '{candidate}'"
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Inconsistent(problems))
    }
}

impl Default for SchemaValidator {
    #[allow(clippy::expect_used)] // Embedded schema is part of the build
    fn default() -> Self {
        Self::new().expect("Failed to create default schema validator")
    }
}
