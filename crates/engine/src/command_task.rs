//! Per-job control-pipe reader/dispatcher/writer.
//!
//! Reads newline-delimited, shell-quoted commands from the child's fd 3
//! (`self.pipes.commands`), dispatches each to a handler against the
//! `Manager`, and writes a newline-terminated reply to the child's fd 4
//! (`self.pipes.replies`). `sendmsg` is the one handler that also consumes
//! raw bytes straight off the same buffered reader, since its payload is
//! framed length-first rather than shell-quoted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use jobtree_core::{parse_cron, parse_interval, Trigger};

use crate::job::Job;
use crate::manager::{JobReport, Manager};
use crate::protocol::{parse_command, split_words, Command, ProtocolError, Reply};
use crate::supervisor::ControlPipes;

/// Drives one job's control pipe for the lifetime of its supervisor.
pub(crate) struct CommandTask {
    manager: Arc<Manager>,
    job: Arc<Job>,
    pipes: ControlPipes,
}

impl CommandTask {
    /// Build a task over `job`'s private control pipes.
    pub(crate) fn new(manager: Arc<Manager>, job: Arc<Job>, pipes: ControlPipes) -> Self {
        Self { manager, job, pipes }
    }

    /// Read-dispatch-reply until the child closes its write end (or sends
    /// a blank line, treated identically as EOF).
    pub(crate) async fn run(self) {
        let CommandTask { manager, job, pipes } = self;
        let mut reader = BufReader::new(pipes.commands);
        let mut writer = pipes.replies;

        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => return,
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    if trimmed.is_empty() {
                        return;
                    }
                    let reply = dispatch(&manager, &job, trimmed, &mut reader).await;
                    if writer.write_all(&reply.encode()).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(job = %job.ident, error = %err, "control pipe read failed");
                    return;
                }
            }
        }
    }
}

async fn dispatch<R>(manager: &Arc<Manager>, job: &Arc<Job>, line: &str, reader: &mut BufReader<R>) -> Reply
where
    R: tokio::io::AsyncRead + Unpin,
{
    match dispatch_inner(manager, job, line, reader).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::error!(job = %job.ident, command = %line, error = %err, "command failed");
            Reply::Error(err.to_string())
        }
    }
}

async fn dispatch_inner<R>(
    manager: &Arc<Manager>,
    job: &Arc<Job>,
    line: &str,
    reader: &mut BufReader<R>,
) -> Result<Reply, ProtocolError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let (name, rest) = split_words(line)?;
    match name.as_str() {
        "enqueue" => handle_enqueue(manager, job, parse_command(name, &rest, "Fg:m:c:")?),
        "repeat" => handle_repeat(manager, parse_command(name, &rest, "i:c:")?),
        "waitjobs" => handle_waitjobs(manager, parse_command(name, &rest, "t:")?).await,
        "killjobs" => handle_killjobs(manager, parse_command(name, &rest, "t:")?).await,
        "sendmsg" => handle_sendmsg(manager, parse_command(name, &rest, "")?, reader).await,
        "waitrecv" => handle_waitrecv(manager, parse_command(name, &rest, "t:")?).await,
        "recvmsg" => handle_recvmsg(manager, job, parse_command(name, &rest, "t:")?).await,
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn parse_timeout(cmd: &Command) -> Result<Option<Duration>, ProtocolError> {
    match cmd.opt('t') {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Duration::from_secs_f64)
            .map(Some)
            .map_err(|_| ProtocolError::InvalidArgument(format!("invalid -t value: {raw}"))),
    }
}

fn parse_max_jobs(cmd: &Command) -> Result<u32, ProtocolError> {
    match cmd.opt('m') {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| ProtocolError::InvalidArgument(format!("invalid -m value: {raw}"))),
    }
}

fn parse_max_cpu(cmd: &Command) -> Result<f64, ProtocolError> {
    match cmd.opt('c') {
        None => Ok(0.0),
        Some(raw) => raw
            .parse()
            .map_err(|_| ProtocolError::InvalidArgument(format!("invalid -c value: {raw}"))),
    }
}

/// `enqueue` (`Fg:m:c:`): register a new job with the sending job as its
/// parent.
fn handle_enqueue(manager: &Arc<Manager>, job: &Arc<Job>, cmd: Command) -> Result<Reply, ProtocolError> {
    let mut positional = cmd.positional.into_iter();
    let script = positional
        .next()
        .ok_or_else(|| ProtocolError::InvalidArgument("enqueue requires a script".into()))?;
    let args: Vec<String> = positional.collect();
    let forget = cmd.flag('F');
    let group = cmd.opt('g').map(str::to_string);
    let max_jobs = parse_max_jobs(&cmd)?;
    let max_cpu = parse_max_cpu(&cmd)?;

    let ident = manager.enqueue(
        Some(job.ident.clone()),
        None,
        PathBuf::from(script),
        args,
        group,
        forget,
        max_jobs,
        max_cpu,
    )?;
    Ok(Reply::SuccessText(ident))
}

/// `repeat` (`i:c:`): register a trigger. Exactly one of `-i`/`-c` must be
/// given.
fn handle_repeat(manager: &Arc<Manager>, cmd: Command) -> Result<Reply, ProtocolError> {
    let mut positional = cmd.positional.into_iter();
    let script = positional
        .next()
        .ok_or_else(|| ProtocolError::InvalidArgument("repeat requires a script".into()))?;
    let args: Vec<String> = positional.collect();

    let trigger = match (cmd.opt('i'), cmd.opt('c')) {
        (Some(interval), None) => {
            Trigger::Interval(parse_interval(interval).map_err(|e| ProtocolError::InvalidArgument(e.to_string()))?)
        }
        (None, Some(cron)) => {
            Trigger::Cron(Box::new(parse_cron(cron).map_err(|e| ProtocolError::InvalidArgument(e.to_string()))?))
        }
        _ => {
            return Err(ProtocolError::InvalidArgument(
                "repeat requires exactly one of -i or -c".into(),
            ))
        }
    };

    manager.repeat(PathBuf::from(script), args, trigger)?;
    Ok(Reply::Success(None))
}

/// `waitjobs` (`t:`): wait for each named job to finish or time out.
async fn handle_waitjobs(manager: &Arc<Manager>, cmd: Command) -> Result<Reply, ProtocolError> {
    let timeout = parse_timeout(&cmd)?;
    let reports = manager.waitjobs(&cmd.positional, timeout).await;
    Ok(Reply::Structured(render_job_reports(&reports)))
}

/// `killjobs` (`t:`): SIGTERM each named job, then behave like `waitjobs`.
async fn handle_killjobs(manager: &Arc<Manager>, cmd: Command) -> Result<Reply, ProtocolError> {
    let timeout = parse_timeout(&cmd)?;
    let reports = manager.killjobs(&cmd.positional, timeout).await;
    Ok(Reply::Structured(render_job_reports(&reports)))
}

fn render_job_reports(reports: &[(String, JobReport)]) -> Vec<String> {
    reports
        .iter()
        .map(|(ident, report)| format!("{ident} {}", report.token()))
        .collect()
}

/// `sendmsg`: `<ident> <length>`, followed by exactly `length` raw bytes
/// and a trailing newline read straight off the control pipe.
async fn handle_sendmsg<R>(manager: &Arc<Manager>, cmd: Command, reader: &mut BufReader<R>) -> Result<Reply, ProtocolError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut positional = cmd.positional.into_iter();
    let to = positional
        .next()
        .ok_or_else(|| ProtocolError::InvalidArgument("sendmsg requires a recipient ident".into()))?;
    let length: usize = positional
        .next()
        .ok_or_else(|| ProtocolError::InvalidArgument("sendmsg requires a length".into()))?
        .parse()
        .map_err(|_| ProtocolError::InvalidArgument("sendmsg length must be a non-negative integer".into()))?;

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ProtocolError::InvalidArgument(format!("failed to read message body: {e}")))?;
    let mut trailing_newline = [0u8; 1];
    let _ = reader.read_exact(&mut trailing_newline).await;

    let ident = manager.sendmsg(&to, body)?;
    Ok(Reply::SuccessText(ident))
}

/// `waitrecv` (`t:`): wait for each named message's delivery, without
/// consuming it.
async fn handle_waitrecv(manager: &Arc<Manager>, cmd: Command) -> Result<Reply, ProtocolError> {
    let timeout = parse_timeout(&cmd)?;
    let results = manager.waitrecv(&cmd.positional, timeout).await;
    let lines = results
        .into_iter()
        .map(|(ident, delivered)| format!("{ident} {}", if delivered { "R" } else { "T" }))
        .collect();
    Ok(Reply::Structured(lines))
}

/// `recvmsg` (`t:`): collect one message from the caller's own inbox,
/// framed length-first on success.
async fn handle_recvmsg(manager: &Arc<Manager>, job: &Arc<Job>, cmd: Command) -> Result<Reply, ProtocolError> {
    let timeout = parse_timeout(&cmd)?;
    match manager.recvmsg(&job.ident, timeout).await? {
        Some(body) => Ok(Reply::Success(Some(body))),
        None => Ok(Reply::Timeout),
    }
}
