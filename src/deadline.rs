//! Deadline-bounded I/O engine.
//!
//! One primitive implements connect-with-timeout, send-with-timeout and
//! receive-with-timeout uniformly: a non-blocking attempt, a bounded
//! readiness wait, and at most one retry. No background timer thread.

use std::io;
use std::os::fd::AsFd;
use std::time::Instant;

use socket2::Socket as OsSocket;

use crate::error::SocketError;
use crate::readiness::{self, Interest};
use crate::socket::Socket;

/// Run `attempt` under the handle's configured timeout.
///
/// With a zero timeout the attempt runs once in blocking mode and any
/// failure is terminal. Otherwise the handle is flipped to non-blocking,
/// the attempt runs once, a would-block result leads to a readiness wait
/// for the remaining budget followed by exactly one retry, and any other
/// error propagates immediately. Blocking mode is restored on every path
/// out, so the handle is blocking between calls.
pub(crate) fn run_bounded<T, F>(
    sock: &Socket,
    op: &'static str,
    interest: Interest,
    mut attempt: F,
) -> Result<T, SocketError>
where
    F: FnMut(&OsSocket) -> io::Result<T>,
{
    let timeout = sock.timeout();
    let inner = sock.inner(op)?;

    if timeout.is_zero() {
        return attempt(inner).map_err(|source| SocketError::Io { op, source });
    }

    sock.set_blocking(false)?;
    let started = Instant::now();

    let outcome = match attempt(inner) {
        Ok(value) => Ok(value),
        Err(err) if would_block(&err) => {
            let remaining = timeout.saturating_sub(started.elapsed());
            readiness::wait(inner.as_fd(), interest, remaining, op, timeout)
                .and_then(|()| attempt(inner).map_err(|source| SocketError::Io { op, source }))
        }
        Err(source) => Err(SocketError::Io { op, source }),
    };

    let restored = sock.set_blocking(true);
    let value = outcome?;
    restored?;
    Ok(value)
}

/// The non-blocking "not ready yet" results: EWOULDBLOCK/EAGAIN, and
/// EINPROGRESS from a non-blocking connect.
pub(crate) fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}
