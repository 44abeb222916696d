//! The engine's public embedding surface: `EngineConfig` in, `EngineHandle`
//! out. Everything under [`crate::manager`] and below is `pub(crate)` —
//! front ends (the `jobtree` binary, or a future embedder) only ever see
//! this module.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use jobtree_core::validate_script_path;

use crate::manager::{Manager, ManagerEvent};

/// How to start an engine: a job-tree root directory, the name of its
/// entry script, and the sampler interval for CPU-gated groups.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The job-tree root. Every script path is resolved relative to this.
    pub directory: PathBuf,
    /// Name of the entry script inside `directory` — configurable since
    /// the reference implementation and the distilled design disagree on
    /// its default.
    pub entry: String,
    /// Arguments forwarded to the entry job.
    pub entry_args: Vec<String>,
    /// `StatsSampler` interval.
    pub stats_interval: Duration,
}

impl EngineConfig {
    /// Build a config for `directory` with the crate's defaults (entry
    /// `"entry"`, 500ms sampling) and no entry arguments.
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            entry: jobtree_core::DEFAULT_ENTRY_SCRIPT.to_string(),
            entry_args: Vec::new(),
            stats_interval: jobtree_core::DEFAULT_STATS_INTERVAL,
        }
    }
}

/// Fatal configuration failure, surfaced before the engine's event loop
/// starts: reported and exited, never entered into the event loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The job-tree root does not exist, is not a directory, or the entry
    /// script does not exist, is not a regular file, or is not executable.
    #[error(transparent)]
    InvalidConfig(#[from] jobtree_core::Error),

    /// The entry script passed validation but could not be registered as a
    /// job (e.g. an ident collision, which cannot happen on a freshly
    /// created manager but is surfaced rather than unwrapped).
    #[error("failed to register entry job: {0}")]
    Registration(String),
}

/// A running engine, wrapping `Manager`. Dropping this does not stop the
/// engine; call [`EngineHandle::shutdown`] once
/// [`EngineHandle::run_until_done`] resolves.
pub struct EngineHandle {
    manager: std::sync::Arc<Manager>,
    entry_ident: String,
}

impl EngineHandle {
    /// Subscribe to [`ManagerEvent`]s (job started/finished), for a front
    /// end that wants to report progress as it happens.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<ManagerEvent> {
        self.manager.subscribe()
    }

    /// The entry job's ident, as returned by `start_engine`'s implicit
    /// `enqueue` of the entry script.
    pub fn entry_ident(&self) -> &str {
        &self.entry_ident
    }

    /// Request `SIGTERM` on every running job; used on graceful shutdown,
    /// e.g. Ctrl-C.
    pub fn kill_all(&self) {
        self.manager.kill_all();
    }

    /// Wait until the manager is idle (no active job, no registered
    /// trigger), then return the entry job's exit outcome.
    ///
    /// If the entry job finishes while recurring (`repeat`-registered)
    /// jobs are still scheduled, this keeps waiting: the manager is not
    /// idle until every trigger has also been torn down.
    pub async fn run_until_done(&self) -> Option<crate::job::JobExit> {
        loop {
            if self.manager.is_idle() {
                return self.manager.exit_of(&self.entry_ident);
            }
            self.manager.idle_changed().await;
        }
    }

    /// Tear down the trigger source and clear every registry. Call only
    /// after [`EngineHandle::run_until_done`] resolves (or after
    /// [`EngineHandle::kill_all`] followed by a final idle wait).
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}

/// Start an engine rooted at `config.directory`: validate the entry script,
/// spin up the manager's stats sampler, and enqueue the entry job.
///
/// Returns once the entry job is registered; it may still be `WAITING` on
/// admission to its group when this returns — `enqueue` returns the ident
/// immediately and lets admission happen in the background.
pub async fn start_engine(config: EngineConfig) -> Result<EngineHandle, EngineError> {
    validate_script_path(&config.directory, std::path::Path::new(&config.entry))?;

    let manager = Manager::new(config.directory, config.entry.clone(), config.stats_interval);

    let entry_ident = manager
        .enqueue(
            None,
            Some(config.entry.clone()),
            PathBuf::from(&config.entry),
            config.entry_args,
            None,
            false,
            0,
            0.0,
        )
        .map_err(|e| EngineError::Registration(e.to_string()))?;

    Ok(EngineHandle { manager, entry_ident })
}
