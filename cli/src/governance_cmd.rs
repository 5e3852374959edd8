//! Governance CLI commands
//!
//! Headless access to the same engine a host drives through save hooks.
//!
//! ## Commands
//!
//! - `pipz-gov [-C DIR] [--config FILE] save <FILE>... [--json]`
//! - `pipz-gov watch [--debounce-ms N]`
//! - `pipz-gov bump [--json]`
//! - `pipz-gov encoding <FILE> [--json]`
//! - `pipz-gov show-config`
//!
//! ## Exit Codes
//!
//! - 0: Success
//! - 2: Nothing to do (no pointer registry, registry without keys)
//! - 3: Infrastructure error (config load, unreadable file, failed write)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pipz_governance::config::{ConfigLoader, GovernanceConfig};
use pipz_governance::encoding;
use pipz_governance::guard::min_self_write_window;
use pipz_governance::watch::{WatchEvent, WorkspaceWatcher};
use pipz_governance::{
    FingerprintOutcome, GovernanceEngine, MirrorOutcome, PointerOutcome, SaveReport,
};
use tokio_util::sync::CancellationToken;

pub const EXIT_OK: i32 = 0;
pub const EXIT_NOTHING_TO_DO: i32 = 2;
pub const EXIT_INFRA_ERROR: i32 = 3;

/// Pipz governance engine: fingerprints, mirrors and build pointer
#[derive(Debug, Parser)]
#[command(name = "pipz-gov", version)]
pub struct GovernanceCli {
    /// Workspace root (defaults to current directory)
    #[arg(short = 'C', long = "cwd", value_name = "DIR", global = true)]
    pub cwd: Option<PathBuf>,

    /// Configuration file (defaults to <root>/governance.toml when present)
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: GovernanceSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum GovernanceSubcommand {
    /// Run the save lifecycle on files already on disk
    Save(SaveArgs),

    /// Watch the workspace and process every save until Ctrl+C
    Watch(WatchArgs),

    /// Advance the pointer registry build counter now
    Bump(BumpArgs),

    /// Print the detected on-disk encoding of a file
    Encoding(EncodingArgs),

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Debug, Parser)]
pub struct SaveArgs {
    /// Files to process (relative paths resolve against the root)
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Output reports as JSON instead of text
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct WatchArgs {
    /// Debounce window in milliseconds (overrides watcher.debounce_ms)
    #[arg(long = "debounce-ms", value_name = "N")]
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Parser)]
pub struct BumpArgs {
    /// Output as JSON instead of text
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct EncodingArgs {
    /// File to inspect
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output as JSON instead of text
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

impl GovernanceCli {
    /// Run the command and return the process exit code.
    pub async fn run(self) -> anyhow::Result<i32> {
        let cwd = match self.cwd {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        let root = std::fs::canonicalize(&cwd)
            .with_context(|| format!("Workspace root {} is not accessible", cwd.display()))?;

        let config = match load_config(&root, self.config.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e:#}");
                return Ok(EXIT_INFRA_ERROR);
            }
        };

        match self.command {
            GovernanceSubcommand::Save(args) => run_save(&root, config, args).await,
            GovernanceSubcommand::Watch(args) => run_watch(root, config, args).await,
            GovernanceSubcommand::Bump(args) => run_bump(&root, config, args).await,
            GovernanceSubcommand::Encoding(args) => run_encoding(&root, args).await,
            GovernanceSubcommand::ShowConfig => {
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(EXIT_OK)
            }
        }
    }
}

fn load_config(root: &Path, file: Option<&Path>) -> anyhow::Result<GovernanceConfig> {
    let config = match file {
        Some(path) => ConfigLoader::new().with_file(path).load(),
        None => ConfigLoader::load_for_root(root),
    };
    config.context("Failed to load governance configuration")
}

/// Resolve a user-supplied path against the root, the way `git -C` does.
fn resolve_arg(root: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf())
    } else {
        root.join(file)
    }
}

async fn run_save(root: &Path, config: GovernanceConfig, args: SaveArgs) -> anyhow::Result<i32> {
    let engine = GovernanceEngine::new(root, config);
    let mut reports = Vec::with_capacity(args.files.len());
    let mut exit_code = EXIT_OK;

    for file in &args.files {
        let path = resolve_arg(root, file);
        match engine.save_file(&path).await {
            Ok(report) => {
                if report_failed(&report) {
                    exit_code = EXIT_INFRA_ERROR;
                }
                if !args.json {
                    println!("{}", summarize(root, &report));
                }
                reports.push(report);
            }
            Err(e) => {
                eprintln!("Error: {e}");
                exit_code = EXIT_INFRA_ERROR;
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(exit_code)
}

/// Apply a `--debounce-ms` override, widening the self-write window so the
/// echo of the engine's own writes is still recognized.
fn watch_settings(
    mut config: GovernanceConfig,
    debounce_ms: Option<u64>,
) -> (GovernanceConfig, Duration) {
    let debounce = Duration::from_millis(debounce_ms.unwrap_or(config.watcher.debounce_ms));
    let required = min_self_write_window(debounce);
    if Duration::from_millis(config.watcher.self_write_window_ms) < required {
        let widened = u64::try_from(required.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            "Widening self-write window from {}ms to {widened}ms for {}ms debounce",
            config.watcher.self_write_window_ms,
            debounce.as_millis()
        );
        config.watcher.self_write_window_ms = widened;
    }
    (config, debounce)
}

async fn run_watch(root: PathBuf, config: GovernanceConfig, args: WatchArgs) -> anyhow::Result<i32> {
    let (config, debounce) = watch_settings(config, args.debounce_ms);
    let engine = Arc::new(GovernanceEngine::new(root.clone(), config));
    let watcher = WorkspaceWatcher::new(engine, debounce)?;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        shutdown_signal.cancel();
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = watcher.recv_event() => match event {
                Some(WatchEvent::Processed(report)) => println!("{}", summarize(&root, &report)),
                Some(WatchEvent::Failed { path, error }) => {
                    eprintln!("{}: {error}", display_relative(&root, &path));
                }
                None => break,
            },
        }
    }
    Ok(EXIT_OK)
}

async fn run_bump(root: &Path, config: GovernanceConfig, args: BumpArgs) -> anyhow::Result<i32> {
    let engine = GovernanceEngine::new(root, config);
    let outcome = engine.bump_now().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", describe_pointer(root, &outcome));
    }

    Ok(match outcome {
        PointerOutcome::Bumped { .. } => EXIT_OK,
        PointerOutcome::Failed { .. } => EXIT_INFRA_ERROR,
        _ => EXIT_NOTHING_TO_DO,
    })
}

async fn run_encoding(root: &Path, args: EncodingArgs) -> anyhow::Result<i32> {
    let path = resolve_arg(root, &args.file);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error: failed to read {}: {e}", path.display());
            return Ok(EXIT_INFRA_ERROR);
        }
    };
    let detected = encoding::detect(&bytes);

    if args.json {
        let json = serde_json::json!({
            "path": path,
            "encoding": detected,
            "bytes": bytes.len(),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{detected}");
    }
    Ok(EXIT_OK)
}

fn report_failed(report: &SaveReport) -> bool {
    matches!(report.fingerprint, FingerprintOutcome::Failed { .. })
        || matches!(report.mirror, MirrorOutcome::Failed { .. })
        || matches!(report.pointer, PointerOutcome::Failed { .. })
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

fn describe_fingerprint(outcome: &FingerprintOutcome) -> String {
    match outcome {
        FingerprintOutcome::Stamped { fingerprint, .. } => format!("stamped {fingerprint}"),
        FingerprintOutcome::Skipped { reason } => format!("skipped ({reason})"),
        FingerprintOutcome::NoHeader => "no header".to_string(),
        FingerprintOutcome::Busy => "busy".to_string(),
        FingerprintOutcome::Failed { error } => format!("FAILED ({error})"),
    }
}

fn describe_mirror(root: &Path, outcome: &MirrorOutcome) -> String {
    match outcome {
        MirrorOutcome::Written {
            destination,
            encoding,
        } => format!("{} [{encoding}]", display_relative(root, destination)),
        MirrorOutcome::Skipped { reason } => format!("skipped ({reason})"),
        MirrorOutcome::Busy => "busy".to_string(),
        MirrorOutcome::Failed { error } => format!("FAILED ({error})"),
    }
}

fn describe_pointer(root: &Path, outcome: &PointerOutcome) -> String {
    match outcome {
        PointerOutcome::Bumped {
            registry, build_id, ..
        } => format!(
            "{} BUILD_ID {}",
            display_relative(root, registry),
            build_id.as_deref().unwrap_or("-")
        ),
        PointerOutcome::Unchanged { registry } => {
            format!("{} unchanged (no BUILD_ID/UPDATED_UTC keys)", display_relative(root, registry))
        }
        PointerOutcome::NotWatched => "not watched".to_string(),
        PointerOutcome::NoRegistry => "no pointer registry".to_string(),
        PointerOutcome::Busy { .. } => "busy".to_string(),
        PointerOutcome::Failed { error } => format!("FAILED ({error})"),
    }
}

/// One line per processed file.
fn summarize(root: &Path, report: &SaveReport) -> String {
    format!(
        "{}: fingerprint {}; mirror {}; pointer {}",
        display_relative(root, &report.path),
        describe_fingerprint(&report.fingerprint),
        describe_mirror(root, &report.mirror),
        describe_pointer(root, &report.pointer),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipz_governance::classifier::SkipReason;
    use pipz_governance::encoding::FileEncoding;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = GovernanceCli::try_parse_from(["pipz-gov", "save", "a.ahk", "-C", "/ws", "--json"])
            .expect("parse");
        assert_eq!(cli.cwd, Some(PathBuf::from("/ws")));
        let GovernanceSubcommand::Save(args) = cli.command else {
            panic!("expected save");
        };
        assert_eq!(args.files, vec![PathBuf::from("a.ahk")]);
        assert!(args.json);
    }

    #[test]
    fn debounce_override_widens_echo_window() {
        let (config, debounce) = watch_settings(GovernanceConfig::default(), Some(3000));
        assert_eq!(debounce, Duration::from_millis(3000));
        assert_eq!(config.watcher.self_write_window_ms, 6250);

        let (config, debounce) = watch_settings(GovernanceConfig::default(), None);
        assert_eq!(debounce, Duration::from_millis(500));
        assert_eq!(config.watcher.self_write_window_ms, 2000);
    }

    #[test]
    fn save_requires_a_file() {
        assert!(GovernanceCli::try_parse_from(["pipz-gov", "save"]).is_err());
    }

    #[test]
    fn summary_line() {
        let root = Path::new("/ws");
        let report = SaveReport {
            path: PathBuf::from("/ws/config.ahk"),
            encoding: FileEncoding::Utf8,
            fingerprint: FingerprintOutcome::Stamped {
                fingerprint: "2025-01-01T00-00-00Z-ABCDEFGH".into(),
                inserted: false,
            },
            mirror: MirrorOutcome::Written {
                destination: PathBuf::from("/ws/config.ahk.txt"),
                encoding: FileEncoding::Utf16Le,
            },
            pointer: PointerOutcome::NotWatched,
        };
        assert_eq!(
            summarize(root, &report),
            "config.ahk: fingerprint stamped 2025-01-01T00-00-00Z-ABCDEFGH; mirror config.ahk.txt [utf16le]; pointer not watched"
        );
        assert!(!report_failed(&report));

        let failed = SaveReport {
            mirror: MirrorOutcome::Failed {
                error: "denied".into(),
            },
            fingerprint: FingerprintOutcome::Skipped {
                reason: SkipReason::MissingContentTag,
            },
            ..report
        };
        assert!(report_failed(&failed));
    }
}
