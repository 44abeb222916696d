//! Wire-level parsing and framing for the command/reply protocol:
//! newline-delimited, shell-quoted command lines in, newline-delimited
//! status replies out.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ProtocolError {
    #[error("malformed command line: {0}")]
    Malformed(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unknown option: -{0}")]
    UnknownOption(char),
    #[error("option -{0} requires an argument")]
    MissingArgument(char),
    #[error("unknown job: {0}")]
    UnknownJob(String),
    #[error("unknown message: {0}")]
    UnknownMessage(String),
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// A parsed command line: the command name, short options with their
/// arguments, bare flags, and trailing positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) opts: HashMap<char, String>,
    pub(crate) flags: HashSet<char>,
    pub(crate) positional: Vec<String>,
}

impl Command {
    pub(crate) fn opt(&self, c: char) -> Option<&str> {
        self.opts.get(&c).map(|s| s.as_str())
    }

    pub(crate) fn flag(&self, c: char) -> bool {
        self.flags.contains(&c)
    }
}

/// Split a raw line into shell-quoted words and parse the first word as the
/// command name, the rest via `optstring`.
pub(crate) fn parse_line(line: &str, optstring: &str) -> Result<Command, ProtocolError> {
    let words = shlex::split(line).ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
    let mut iter = words.into_iter();
    let name = iter.next().ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
    let rest: Vec<String> = iter.collect();
    parse_command(name, &rest, optstring)
}

/// Split a raw line into shell-quoted words without interpreting any of
/// them as options, returning the command name and the untouched
/// remaining words. Used by `CommandTask` to pick the handler (and hence
/// the right `optstring`) before parsing options.
pub(crate) fn split_words(line: &str) -> Result<(String, Vec<String>), ProtocolError> {
    let words = shlex::split(line).ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
    let mut iter = words.into_iter();
    let name = iter.next().ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
    Ok((name, iter.collect()))
}

/// Parse an already-split command name plus its remaining words against
/// `optstring`.
pub(crate) fn parse_command(name: String, rest: &[String], optstring: &str) -> Result<Command, ProtocolError> {
    let (opts, flags, positional) = getopt(rest, optstring)?;
    Ok(Command {
        name,
        opts,
        flags,
        positional,
    })
}

/// A minimal getopt-style short-option parser. `optstring` lists each
/// recognized option letter; a following `:` means that option takes an
/// argument (e.g. `"Fg:m:c:"`: `-F` is a bare flag, `-g`/`-m`/`-c` each take
/// one argument). Parsing stops at the first non-option word, and
/// everything from there on (including it) is positional — matching how
/// each command handler defines its own optstring.
fn getopt(
    words: &[String],
    optstring: &str,
) -> Result<(HashMap<char, String>, HashSet<char>, Vec<String>), ProtocolError> {
    let takes_arg = |c: char| -> Option<bool> {
        let mut chars = optstring.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == c {
                return Some(chars.peek() == Some(&':'));
            }
        }
        None
    };

    let mut opts = HashMap::new();
    let mut flags = HashSet::new();
    let mut idx = 0;
    while idx < words.len() {
        let word = &words[idx];
        if word == "--" {
            idx += 1;
            break;
        }
        if !word.starts_with('-') || word == "-" {
            break;
        }
        let c = word.chars().nth(1).ok_or_else(|| ProtocolError::Malformed(word.clone()))?;
        match takes_arg(c) {
            Some(true) => {
                let arg = if word.len() > 2 {
                    word[2..].to_string()
                } else {
                    idx += 1;
                    words.get(idx).cloned().ok_or(ProtocolError::MissingArgument(c))?
                };
                opts.insert(c, arg);
            }
            Some(false) => {
                flags.insert(c);
            }
            None => return Err(ProtocolError::UnknownOption(c)),
        }
        idx += 1;
    }
    let positional = words[idx..].to_vec();
    Ok((opts, flags, positional))
}

/// A protocol reply. Every variant renders as exactly one line, except
/// `Success`'s payload form (`recvmsg`), which is length-framed across
/// three writes: commands are a single shell-quoted line in, and a
/// conforming child reads exactly one reply line per command it sends, so
/// no reply may ever span more than one line of its own.
pub(crate) enum Reply {
    /// `S\n` or, with a payload, `S <len>\n<bytes>\n` (`recvmsg`).
    Success(Option<Vec<u8>>),
    /// `S <text>\n` — success carrying a short textual result (e.g. an
    /// assigned ident).
    SuccessText(String),
    /// `S <ident1> <tok1> <ident2> <tok2> ...\n` — one space-joined line
    /// carrying the structured replies of `waitjobs`/`killjobs`
    /// (`<ident> T|N|<code>`) and `waitrecv` (`<ident> R|T`).
    Structured(Vec<String>),
    /// `T\n` — operation timed out (`waitjobs`/`waitrecv`).
    Timeout,
    /// `E <message>\n` — failure.
    Error(String),
}

impl Reply {
    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Success(None) => b"S\n".to_vec(),
            Reply::Success(Some(payload)) => {
                let mut out = format!("S {}\n", payload.len()).into_bytes();
                out.extend_from_slice(payload);
                out.push(b'\n');
                out
            }
            Reply::SuccessText(text) => format!("S {text}\n").into_bytes(),
            Reply::Structured(fields) => {
                let mut line = String::from("S");
                for field in fields {
                    line.push(' ');
                    line.push_str(field);
                }
                line.push('\n');
                line.into_bytes()
            }
            Reply::Timeout => b"T\n".to_vec(),
            Reply::Error(message) => format!("E {message}\n").into_bytes(),
        }
    }
}

impl From<ProtocolError> for Reply {
    fn from(err: ProtocolError) -> Self {
        Reply::Error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_options() {
        let cmd = parse_line("enqueue -F -g build -m 4 script.sh a b", "Fg:m:c:").unwrap();
        assert_eq!(cmd.name, "enqueue");
        assert!(cmd.flag('F'));
        assert_eq!(cmd.opt('g'), Some("build"));
        assert_eq!(cmd.opt('m'), Some("4"));
        assert_eq!(cmd.positional, vec!["script.sh", "a", "b"]);
    }

    #[test]
    fn parses_attached_option_argument() {
        let cmd = parse_line("enqueue -gbuild script.sh", "Fg:m:c:").unwrap();
        assert_eq!(cmd.opt('g'), Some("build"));
    }

    #[test]
    fn rejects_unknown_option() {
        let err = parse_line("enqueue -z script.sh", "Fg:m:c:").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownOption('z'));
    }

    #[test]
    fn rejects_missing_argument() {
        let err = parse_line("enqueue -g", "Fg:m:c:").unwrap_err();
        assert_eq!(err, ProtocolError::MissingArgument('g'));
    }

    #[test]
    fn respects_shell_quoting() {
        let cmd = parse_line("enqueue script.sh 'two words'", "Fg:m:c:").unwrap();
        assert_eq!(cmd.positional, vec!["script.sh", "two words"]);
    }

    #[test]
    fn encodes_replies() {
        assert_eq!(Reply::Success(None).encode(), b"S\n");
        assert_eq!(Reply::Timeout.encode(), b"T\n");
        assert_eq!(Reply::Error("bad job".into()).encode(), b"E bad job\n");
        assert_eq!(
            Reply::Success(Some(b"hi".to_vec())).encode(),
            b"S 2\nhi\n"
        );
    }
}
