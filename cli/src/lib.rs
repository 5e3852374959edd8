//! `pipz-gov` command-line front end for the governance engine.

pub mod governance_cmd;

pub use governance_cmd::{EXIT_INFRA_ERROR, EXIT_NOTHING_TO_DO, EXIT_OK, GovernanceCli};
