use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{self, AddressFamily, MsgFlags, SockAddr, SockFlag, SockType};
use nix::unistd;

use crate::cancel::CancelToken;
use crate::error::{ProbeError, Result};

/// A UDP socket owned by a single probe. The descriptor is closed on drop,
/// whichever way the probe ends.
#[derive(Debug)]
pub(crate) struct ProbeSocket {
    fd: RawFd,
}

impl ProbeSocket {
    pub fn open(family: AddressFamily) -> Result<Self> {
        let fd = open_cloexec(family).map_err(|errno| ProbeError::transport("socket", errno))?;
        Ok(ProbeSocket { fd })
    }

    pub fn bind(&self, addr: &SockAddr) -> Result<()> {
        socket::bind(self.fd, addr).map_err(|errno| ProbeError::transport("bind", errno))
    }

    pub fn local_addr(&self) -> Result<SockAddr> {
        socket::getsockname(self.fd).map_err(|errno| ProbeError::transport("getsockname", errno))
    }

    pub fn send_to(&self, buf: &[u8], addr: &SockAddr) -> Result<usize> {
        socket::sendto(self.fd, buf, addr, MsgFlags::empty())
            .map_err(|errno| ProbeError::transport("sendto", errno))
    }

    /// Blocks until the socket is readable, the timeout elapses or `cancel`
    /// fires. A timeout too large to represent as an instant never elapses.
    pub fn wait_readable(&self, timeout: Duration, cancel: Option<&CancelToken>) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        // poll(2) skips negative descriptors
        let cancel_fd = cancel.map_or(-1, CancelToken::as_raw_fd);
        loop {
            if cancel.map_or(false, CancelToken::is_cancelled) {
                return Err(ProbeError::Cancelled);
            }
            let wait = match deadline {
                Some(deadline) => poll_millis(deadline.saturating_duration_since(Instant::now())),
                None => -1,
            };
            let mut fds = [
                PollFd::new(self.fd, PollFlags::POLLIN),
                PollFd::new(cancel_fd, PollFlags::POLLIN),
            ];
            match poll(&mut fds, wait) {
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(ProbeError::transport("poll", errno)),
                Ok(0) => {
                    if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                        return Err(ProbeError::Timeout(timeout));
                    }
                }
                Ok(_) => {
                    if is_ready(&fds[1]) {
                        return Err(ProbeError::Cancelled);
                    }
                    if is_ready(&fds[0]) {
                        return Ok(());
                    }
                }
            }
        }
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<(usize, Option<SockAddr>)> {
        socket::recvfrom(self.fd, buf).map_err(|errno| ProbeError::transport("recvfrom", errno))
    }
}

impl Drop for ProbeSocket {
    fn drop(&mut self) {
        let _ = unistd::close(self.fd);
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_cloexec(family: AddressFamily) -> nix::Result<RawFd> {
    socket::socket(family, SockType::Datagram, SockFlag::SOCK_CLOEXEC, None)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn open_cloexec(family: AddressFamily) -> nix::Result<RawFd> {
    let fd = socket::socket(family, SockType::Datagram, SockFlag::empty(), None)?;
    if let Err(errno) = set_cloexec(fd) {
        let _ = unistd::close(fd);
        return Err(errno);
    }
    Ok(fd)
}

/// Marks `fd` close-on-exec where the descriptor could not be created so.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_cloexec(fd: RawFd) -> nix::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(drop)
}

fn is_ready(fd: &PollFd) -> bool {
    fd.revents().map_or(false, |events| !events.is_empty())
}

/// Rounds up so a sub-millisecond remainder does not turn into a busy loop.
fn poll_millis(remaining: Duration) -> i32 {
    let millis = (remaining.as_micros() + 999) / 1000;
    millis.min(i32::MAX as u128) as i32
}
