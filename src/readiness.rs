//! Bounded readiness wait.
//!
//! Blocks until a descriptor becomes readable or writable or a deadline
//! elapses, without performing the I/O itself. This is the one place the
//! crate sleeps on behalf of a timeout-bounded operation.

use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::error::SocketError;

/// Which direction of readiness a caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    /// Readable (receive).
    Read,
    /// Writable (connect, send).
    Write,
}

/// Wait for `fd` to become ready, for at most `remaining`.
///
/// `timeout` is the full configured budget, carried only so the timeout
/// error can report it. Outcomes map onto the error taxonomy directly:
/// ready is `Ok`, the deadline elapsing is `Timeout`, a signal is
/// `Interrupted`, anything else is `Io`.
pub(crate) fn wait(
    fd: BorrowedFd<'_>,
    interest: Interest,
    remaining: Duration,
    op: &'static str,
    timeout: Duration,
) -> Result<(), SocketError> {
    if remaining.is_zero() {
        return Err(SocketError::Timeout { op, timeout });
    }

    let events = match interest {
        Interest::Read => PollFlags::POLLIN,
        Interest::Write => PollFlags::POLLOUT,
    };
    let mut fds = [PollFd::new(&fd, events)];

    // Round the budget up to whole milliseconds so the wait never expires
    // before the configured deadline.
    let millis = remaining
        .as_millis()
        .saturating_add(1)
        .min(libc::c_int::MAX as u128) as libc::c_int;

    match poll(&mut fds, millis) {
        Ok(0) => Err(SocketError::Timeout { op, timeout }),
        // A positive count includes POLLERR/POLLHUP; the retry of the
        // actual operation surfaces the terminal error in that case.
        Ok(_) => Ok(()),
        Err(Errno::EINTR) => Err(SocketError::Interrupted { op }),
        Err(errno) => Err(SocketError::Io {
            op,
            source: io::Error::from(errno),
        }),
    }
}
