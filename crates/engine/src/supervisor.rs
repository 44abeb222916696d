//! Spawns and reaps a job's child process, wiring up its fd contract:
//! fd 0 is `/dev/null`, fds 1 and 2 are merged onto one pipe read
//! by the [`crate::logging_task`], and fds 3 (child writes) / 4 (child
//! reads) carry the private command/reply pipes driven by the
//! [`crate::command_task`].
//!
//! `tokio::process::Child` only manages fds 0-2 directly; fds 3/4 are
//! wired by hand with a `pre_exec` closure that `dup2`s the pipe ends into
//! place and closes the originals, mirroring the `preexec_fn` +
//! `pass_fds` mechanism the reference implementation uses and the
//! `dup2`-in-`pre_exec` technique real async job-execution code in the wild
//! relies on for the same reason (`tokio::net::unix::pipe` targets named
//! FIFOs, not anonymous `pipe(2)` pairs, so it cannot carry these fds).

use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt as _;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::job::JobExit;
use crate::pipe::{anon_pipe, mark_cloexec, PipeReader, PipeWriter};

/// The parent-side ends of a spawned job's private control pipes.
pub(crate) struct ControlPipes {
    /// Reads commands the child writes to its fd 3.
    pub(crate) commands: PipeReader,
    /// Writes replies the child reads from its fd 4.
    pub(crate) replies: PipeWriter,
}

/// A spawned job: the live child handle plus its three parent-side pipe
/// ends.
pub(crate) struct Spawned {
    pub(crate) child: Child,
    pub(crate) control: ControlPipes,
    pub(crate) log: PipeReader,
}

/// Spawn `script` as a child of this process with the job-tree fd contract
/// wired up.
///
/// `ident` and `parent` become `CHAQUM_IDENT`/`CHAQUM_PARENT` in the
/// child's environment.
pub(crate) fn spawn(
    script: &Path,
    args: &[String],
    cwd: &Path,
    ident: &str,
    parent: Option<&str>,
) -> std::io::Result<Spawned> {
    let (cmd_read, cmd_write) = anon_pipe()?;
    let (reply_read, reply_write) = anon_pipe()?;
    let (log_read, log_write) = anon_pipe()?;

    mark_cloexec(cmd_read.as_raw_fd())?;
    mark_cloexec(reply_write.as_raw_fd())?;
    mark_cloexec(log_read.as_raw_fd())?;

    let child_cmd_write = cmd_write.as_raw_fd();
    let child_reply_read = reply_read.as_raw_fd();

    let log_write_stderr = log_write.try_clone()?;

    let mut command = Command::new(script);
    command.args(args);
    command.current_dir(cwd);
    command.env("CHAQUM_IDENT", ident);
    match parent {
        Some(parent) => {
            command.env("CHAQUM_PARENT", parent);
        }
        None => {
            command.env_remove("CHAQUM_PARENT");
        }
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::from(log_write));
    command.stderr(Stdio::from(log_write_stderr));
    command.kill_on_drop(true);

    // SAFETY: this closure runs in the forked child, between `fork` and
    // `exec`, with only async-signal-safe operations (`dup2`, `close`) on
    // fds that are valid in the child because the fork duplicated the
    // parent's fd table. It touches no Rust-managed allocator state.
    unsafe {
        command.pre_exec(move || {
            if child_cmd_write != 3 {
                nix::unistd::dup2(child_cmd_write, 3)?;
                nix::unistd::close(child_cmd_write)?;
            }
            if child_reply_read != 4 {
                nix::unistd::dup2(child_reply_read, 4)?;
                nix::unistd::close(child_reply_read)?;
            }
            Ok(())
        });
    }

    let child = command.spawn()?;

    // The parent's copies of the child-only pipe ends must close now that
    // the child has its own (forked) copies, or the pipes never see EOF.
    drop(cmd_write);
    drop(reply_read);

    Ok(Spawned {
        child,
        control: ControlPipes {
            commands: PipeReader::new(cmd_read)?,
            replies: PipeWriter::new(reply_write)?,
        },
        log: PipeReader::new(log_read)?,
    })
}

/// Send `SIGTERM` to a job's child process (`killjobs`).
pub(crate) fn terminate(child: &Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)
}

/// Wait for the child to exit and translate the result into a [`JobExit`].
pub(crate) async fn wait(child: &mut Child) -> std::io::Result<JobExit> {
    let status = child.wait().await?;
    Ok(match status.code() {
        Some(code) => JobExit::Code(code),
        None => match status.signal() {
            Some(_) => JobExit::Signaled,
            None => JobExit::Signaled,
        },
    })
}
