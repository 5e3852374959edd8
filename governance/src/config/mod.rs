/// Configuration module for the governance engine
///
/// Layered configuration:
/// 1. Defaults (from code)
/// 2. Config file (governance.toml)
/// 3. Environment variables (PIPZ_* prefix)
///
/// # Example
///
/// ```no_run
/// use pipz_governance::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_file("./governance.toml")
///     .load()
///     .expect("Failed to load config");
/// ```
pub mod error;
pub mod loader;
pub mod validator;

pub use error::{ConfigError, Result};
pub use loader::{
    AuditConfig, ClassifierConfig, ConfigLoader, GovernanceConfig, MirrorConfig, PointerConfig,
    ScanConfig, WatcherConfig, CONFIG_FILE_NAME,
};
pub use validator::SchemaValidator;
