//! Pipz provenance engine
//!
//! Keeps verifiable provenance over the governed plain-text files of a
//! workspace: stamps a fresh content fingerprint into each tagged header on
//! save, mirrors runtime-format files (`.ahk`, `.ini`) into plain-text
//! shadows in their own encoding, and advances the shared pointer
//! registry's build counter when a watched file is saved.
//!
//! Hosts drive it through [`SaveHooks`]; the CLI and the watcher use the
//! disk-backed [`GovernanceEngine::save_file`].

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod audit;
pub mod classifier;
pub mod config;
pub mod document;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod guard;
pub mod header;
pub mod io;
pub mod mirror;
pub mod pointer;
pub mod watch;

pub use engine::{
    FingerprintOutcome, GovernanceEngine, MirrorOutcome, SaveEvent, SaveHooks, SaveReport,
};
pub use error::{GovernanceError, Result};
pub use pointer::PointerOutcome;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
