#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared domain types for the `jobtree` job-tree manager.
//!
//! This crate carries no async runtime dependency: it holds the pieces the
//! engine and the command-line front end both need — job state, group
//! configuration, path validation, trigger-spec parsing and the error
//! vocabulary — without pulling in `tokio`.

mod error;
mod path;
mod state;
mod trigger;

pub use error::Error;
pub use path::validate_script_path;
pub use state::{GroupConfig, JobState};
pub use trigger::{parse_cron, parse_interval, Trigger};

/// Default name of the entry script inside a job-tree directory.
pub const DEFAULT_ENTRY_SCRIPT: &str = "entry";

/// Default Stats sampler interval.
pub const DEFAULT_STATS_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);
