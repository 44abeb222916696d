use std::path::PathBuf;

/// Configuration and parsing failures surfaced before or outside the event loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The job-tree root (or a script referenced inside it) does not exist.
    #[error("path '{path}' does not exist")]
    NotFound {
        /// The offending path.
        path: PathBuf,
    },

    /// A path that was expected to be a directory is not one.
    #[error("path '{path}' is not a directory")]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// A path that was expected to be a regular file is not one.
    #[error("path '{path}' is not a regular file")]
    NotAFile {
        /// The offending path.
        path: PathBuf,
    },

    /// A script exists but lacks the executable bit.
    #[error("script '{path}' is not executable")]
    NotExecutable {
        /// The offending path.
        path: PathBuf,
    },

    /// An `-i` interval specifier failed to parse.
    #[error("invalid interval specifier '{0}'")]
    InvalidInterval(String),

    /// A `-c` cron specifier failed to parse.
    #[error("invalid cron specifier '{0}'")]
    InvalidCron(String),
}
