//! Async wrappers around raw anonymous pipes (`pipe(2)`), used to drive the
//! control channel (fds 3/4) and the merged stdout/stderr log pipe without
//! going through `tokio::process::Child`'s own stdio plumbing, which only
//! covers fds 0/1/2.
//!
//! `tokio::net::unix::pipe` targets named FIFOs and does not fit an
//! anonymous `pipe(2)` pair; instead each end is put in non-blocking mode
//! and wrapped in `tokio::io::unix::AsyncFd`, the same technique a
//! job-executor in the wild uses to drive raw worker-pipe fds under Tokio.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{self, pipe};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

/// Create an anonymous pipe whose read and write ends are both async and
/// both carried across `fork`/`exec` under the caller's control: the
/// returned `OwnedFd`s are plain, non-`CLOEXEC` fds, so the child-side end
/// survives `pre_exec`'s `dup2` dance while the parent is expected to mark
/// its own retained end `CLOEXEC` immediately via [`mark_cloexec`].
pub(crate) fn anon_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let (r, w) = pipe().map_err(io::Error::from)?;
    Ok((r, w))
}

/// Set `FD_CLOEXEC` on a parent-retained pipe end so it does not leak into
/// children spawned after this one: fds not part of the wire contract are
/// closed before exec.
pub(crate) fn mark_cloexec(fd: RawFd) -> io::Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC)).map_err(io::Error::from)?;
    Ok(())
}

/// The read end of a pipe, async-readable via `AsyncFd`.
pub(crate) struct PipeReader {
    inner: AsyncFd<OwnedFd>,
}

impl PipeReader {
    pub(crate) fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            inner: AsyncFd::new(fd)?,
        })
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            let mut guard = ready!(this.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();
                unistd::read(fd, unfilled).map_err(io::Error::from)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// The write end of a pipe, async-writable via `AsyncFd`.
pub(crate) struct PipeWriter {
    inner: AsyncFd<OwnedFd>,
}

impl PipeWriter {
    pub(crate) fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            inner: AsyncFd::new(fd)?,
        })
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            let mut guard = ready!(this.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();
                unistd::write(fd, buf).map_err(io::Error::from)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
