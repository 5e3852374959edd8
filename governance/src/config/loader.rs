use crate::config::error::{ConfigError, Result};
use crate::audit::DEFAULT_AUDIT_DIR;
use crate::document::GEMINI_SCAN_LINES;
use crate::header::HEADER_SCAN_LINES;
use crate::mirror::DEFAULT_MIRROR_SUFFIX;
use crate::pointer::{DEFAULT_CANDIDATES, DEFAULT_PROJECT_PREFIX, DEFAULT_WATCH};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up at the workspace root.
pub const CONFIG_FILE_NAME: &str = "governance.toml";

/// Environment prefix (`PIPZ_SCAN__HEADER_LINES=300`).
const ENV_PREFIX: &str = "PIPZ";

/// Keys whose environment values are comma-separated lists.
const LIST_KEYS: [&str; 6] = [
    "classifier.mirror_extensions",
    "classifier.fingerprint_extensions",
    "classifier.denied_extensions",
    "pointer.candidates",
    "pointer.watch",
    "watcher.ignore_dirs",
];

/// Root governance configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Header and content-tag scan windows
    #[serde(default)]
    pub scan: ScanConfig,

    /// Extension sets
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Mirror writer
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// Pointer registry and watch list
    #[serde(default)]
    pub pointer: PointerConfig,

    /// Audit trail
    #[serde(default)]
    pub audit: AuditConfig,

    /// Filesystem watcher host
    #[serde(default)]
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Lines searched for header delimiters
    #[serde(default = "default_header_lines")]
    pub header_lines: usize,

    /// Lines searched for the content tag
    #[serde(default = "default_tag_lines")]
    pub tag_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Runtime formats that get a plain-text mirror
    #[serde(default = "default_mirror_extensions")]
    pub mirror_extensions: Vec<String>,

    /// Formats that carry a fingerprint line
    #[serde(default = "default_fingerprint_extensions")]
    pub fingerprint_extensions: Vec<String>,

    /// Compound suffix for governance sidecars
    #[serde(default = "default_sidecar_suffix")]
    pub sidecar_suffix: String,

    /// Formats that can never be governed (no comment syntax)
    #[serde(default = "default_denied_extensions")]
    pub denied_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Appended to the runtime path and to its declared path
    #[serde(default = "default_mirror_suffix")]
    pub suffix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerConfig {
    /// Registry locations relative to the root, first existing wins
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,

    /// Folder name stripped from declared paths
    #[serde(default = "default_project_prefix")]
    pub project_prefix: String,

    /// Paths whose save bumps the build counter
    #[serde(default = "default_watch")]
    pub watch: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Write audit records
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Audit directory relative to the root
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Debounce window for filesystem events
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How long an engine write suppresses its own echo
    #[serde(default = "default_self_write_window_ms")]
    pub self_write_window_ms: u64,

    /// Directory names never dispatched
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_header_lines() -> usize {
    HEADER_SCAN_LINES
}
fn default_tag_lines() -> usize {
    GEMINI_SCAN_LINES
}
fn default_mirror_extensions() -> Vec<String> {
    strings(&[".ahk", ".ini"])
}
fn default_fingerprint_extensions() -> Vec<String> {
    strings(&[
        ".txt", ".js", ".ts", ".py", ".yml", ".yaml", ".md", ".ahk", ".ini",
    ])
}
fn default_sidecar_suffix() -> String {
    ".governance.txt".to_string()
}
fn default_denied_extensions() -> Vec<String> {
    strings(&[".json"])
}
fn default_mirror_suffix() -> String {
    DEFAULT_MIRROR_SUFFIX.to_string()
}
fn default_candidates() -> Vec<String> {
    strings(&DEFAULT_CANDIDATES)
}
fn default_project_prefix() -> String {
    DEFAULT_PROJECT_PREFIX.to_string()
}
fn default_watch() -> Vec<String> {
    strings(&DEFAULT_WATCH)
}
fn default_true() -> bool {
    true
}
fn default_audit_dir() -> PathBuf {
    PathBuf::from(DEFAULT_AUDIT_DIR)
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_self_write_window_ms() -> u64 {
    2000
}
fn default_ignore_dirs() -> Vec<String> {
    strings(&[".ORCH_AUDITLOG", ".git", "target"])
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            header_lines: default_header_lines(),
            tag_lines: default_tag_lines(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mirror_extensions: default_mirror_extensions(),
            fingerprint_extensions: default_fingerprint_extensions(),
            sidecar_suffix: default_sidecar_suffix(),
            denied_extensions: default_denied_extensions(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            suffix: default_mirror_suffix(),
        }
    }
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            project_prefix: default_project_prefix(),
            watch: default_watch(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            dir: default_audit_dir(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            self_write_window_ms: default_self_write_window_ms(),
            ignore_dirs: default_ignore_dirs(),
        }
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (PIPZ_ prefix)
    pub fn load(&self) -> Result<GovernanceConfig> {
        let mut builder = Config::builder();

        let defaults_json = serde_json::to_string(&GovernanceConfig::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Example: PIPZ_POINTER__WATCH=Interop.txt,Humanoid.txt
        let env = LIST_KEYS.iter().fold(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
            |env, key| env.with_list_parse_key(key),
        );
        builder = builder.add_source(env);

        let config = builder.build()?;
        let governance: GovernanceConfig = config.try_deserialize()?;

        crate::config::validator::SchemaValidator::new()?.validate(&governance)?;

        Ok(governance)
    }

    /// Locate the config file:
    /// 1. Workspace root: <root>/governance.toml
    /// 2. XDG config: ~/.config/pipz/governance.toml
    pub fn find_config_file(root: &Path) -> Option<PathBuf> {
        let local = root.join(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("pipz").join(CONFIG_FILE_NAME);
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Load configuration for a workspace root
    pub fn load_for_root(root: &Path) -> Result<GovernanceConfig> {
        let loader = if let Some(config_path) = Self::find_config_file(root) {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
