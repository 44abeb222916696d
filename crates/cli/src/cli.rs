use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use jobtree_core::DEFAULT_ENTRY_SCRIPT;

/// Parse a millisecond-resolution duration: `<N>ms`, `<N>s`, or `<N>m`. A
/// sibling of `jobtree_core::parse_interval`'s `repeat` grammar, but with
/// millisecond resolution since the stats sampler's default (500ms) falls
/// below that grammar's finest unit (whole seconds).
fn parse_duration(input: &str) -> Result<Duration, String> {
    let bad = || format!("invalid duration {input:?} (expected e.g. \"500ms\", \"2s\", \"1m\")");
    let (digits, scale_ms) = if let Some(raw) = input.strip_suffix("ms") {
        (raw, 1u64)
    } else if let Some(raw) = input.strip_suffix('s') {
        (raw, 1_000u64)
    } else if let Some(raw) = input.strip_suffix('m') {
        (raw, 60_000u64)
    } else {
        return Err(bad());
    };
    let n: u64 = digits.parse().map_err(|_| bad())?;
    Ok(Duration::from_millis(n.saturating_mul(scale_ms)))
}

/// Run a job-tree directory as a long-lived supervisor.
#[derive(Debug, Clone, Parser)]
#[command(name = "jobtree", version, about = "Job-tree manager")]
pub struct Cli {
    /// The job-tree root directory.
    pub directory: PathBuf,

    /// Name of the entry script inside `directory`.
    #[arg(long, default_value = DEFAULT_ENTRY_SCRIPT)]
    pub entry: String,

    /// `StatsSampler` interval, e.g. "500ms", "2s".
    #[arg(long, value_parser = parse_duration, default_value = "500ms")]
    pub stats_interval: Duration,

    /// Arguments forwarded to the entry job.
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}
