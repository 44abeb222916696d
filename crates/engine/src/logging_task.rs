//! Forwards a job's merged stdout/stderr to `tracing`, decoding the
//! inline log-level framing: a line is level-prefixed iff its second byte
//! is `0x1F` (ASCII Unit Separator), in which case the first
//! byte selects the level (`C`=CRITICAL, `E`=ERROR, `W`=WARNING,
//! `D`=DEBUG, anything else → INFO) and the rest of the line is the
//! message; an unprefixed line is logged whole, at INFO.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info_span;

use crate::pipe::PipeReader;

enum Level {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

fn split_prefix(line: &str) -> (Level, &str) {
    let bytes = line.as_bytes();
    if bytes.len() >= 2 && bytes[1] == 0x1F {
        let level = match bytes[0] {
            b'C' => Level::Critical,
            b'E' => Level::Error,
            b'W' => Level::Warning,
            b'D' => Level::Debug,
            _ => Level::Info,
        };
        return (level, &line[2..]);
    }
    (Level::Info, line)
}

fn emit(ident: &str, line: &str) {
    let (level, message) = split_prefix(line);
    match level {
        Level::Critical => tracing::error!(job = ident, is_critical = true, "{message}"),
        Level::Error => tracing::error!(job = ident, "{message}"),
        Level::Warning => tracing::warn!(job = ident, "{message}"),
        Level::Info => tracing::info!(job = ident, "{message}"),
        Level::Debug => tracing::debug!(job = ident, "{message}"),
    }
}

/// Drain `log` line by line until EOF (the child closed both stdout and
/// stderr, directly or by exiting), emitting each line as a `tracing`
/// event tagged with `ident`.
pub(crate) async fn run(ident: String, log: PipeReader) {
    let _span = info_span!("job", ident = %ident).entered();
    let mut lines = BufReader::new(log).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => emit(&ident, &line),
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(job = %ident, error = %err, "log pipe read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprefixed_line_defaults_to_info() {
        let (level, msg) = split_prefix("hello world");
        assert!(matches!(level, Level::Info));
        assert_eq!(msg, "hello world");
    }

    #[test]
    fn recognizes_critical_prefix() {
        let (level, msg) = split_prefix("C\u{1f}disk on fire");
        assert!(matches!(level, Level::Critical));
        assert_eq!(msg, "disk on fire");
    }

    #[test]
    fn recognizes_warning_prefix() {
        let (level, msg) = split_prefix("W\u{1f}low disk space");
        assert!(matches!(level, Level::Warning));
        assert_eq!(msg, "low disk space");
    }

    #[test]
    fn unknown_glyph_before_separator_defaults_to_info() {
        let (level, msg) = split_prefix("X\u{1f}whatever");
        assert!(matches!(level, Level::Info));
        assert_eq!(msg, "whatever");
    }

    #[test]
    fn short_line_is_not_mistaken_for_a_prefix() {
        let (level, msg) = split_prefix("C");
        assert!(matches!(level, Level::Info));
        assert_eq!(msg, "C");
    }
}
