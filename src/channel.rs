use std::convert::TryFrom;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

/// A connection's duplex byte stream as seen by a session.
pub trait Channel: Read + Write {
    /// Wait until bytes (or end of stream) can be read without blocking.
    ///
    /// Returns false if `timeout` passes first. A zero timeout checks readiness without waiting.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Shut down both directions.
    fn close(&mut self) -> io::Result<()>;
}

impl Channel for TcpStream {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        poll_readable(self.as_raw_fd(), timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        (**self).wait_readable(timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Safe wrapper for `poll` on a single descriptor, restarted if interrupted by a signal.
fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = libc::c_int::try_from(remaining.as_millis()).unwrap_or(libc::c_int::MAX);
        match poll(&mut fds, millis) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(nix::Error::Sys(Errno::EINTR)) => continue,
            Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}
