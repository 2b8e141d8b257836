use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::unistd;

use crate::error::{ProbeError, Result};

/// Aborts a probe that is waiting for its response.
///
/// Backed by a pipe: cancelling makes the read end readable, so the probe can
/// poll it alongside its socket and wake up at once.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Pipe>,
}

#[derive(Debug)]
struct Pipe {
    read_fd: RawFd,
    write_fd: RawFd,
    cancelled: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Result<Self> {
        let (read_fd, write_fd) =
            pipe_cloexec().map_err(|errno| ProbeError::transport("pipe", errno))?;
        Ok(CancelToken {
            inner: Arc::new(Pipe {
                read_fd,
                write_fd,
                cancelled: AtomicBool::new(false),
            }),
        })
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(errno) = unistd::write(self.inner.write_fd, &[1]) {
            tracing::warn!("could not signal cancellation: {}", errno);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn as_raw_fd(&self) -> RawFd {
        self.inner.read_fd
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn pipe_cloexec() -> nix::Result<(RawFd, RawFd)> {
    unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn pipe_cloexec() -> nix::Result<(RawFd, RawFd)> {
    let (read_fd, write_fd) = unistd::pipe()?;
    let marked =
        crate::socket::set_cloexec(read_fd).and_then(|_| crate::socket::set_cloexec(write_fd));
    if let Err(errno) = marked {
        let _ = unistd::close(read_fd);
        let _ = unistd::close(write_fd);
        return Err(errno);
    }
    Ok((read_fd, write_fd))
}

impl Drop for Pipe {
    fn drop(&mut self) {
        let _ = unistd::close(self.read_fd);
        let _ = unistd::close(self.write_fd);
    }
}
