//! Error types for socket operations.
//!
//! Every OS-call failure is wrapped with the originating syscall name and
//! the OS-reported error, then propagated to the immediate caller. Nothing
//! in this crate swallows an errno.

use std::io;
use std::time::Duration;

/// Errors for socket operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// The OS refused to create a descriptor.
    #[error("socket: {source}")]
    Create {
        #[source]
        source: io::Error,
    },

    /// A socket-option or blocking-flag call failed.
    #[error("{op}: {source}")]
    SockOpt {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// getpeername/getsockname failed, usually because the descriptor is
    /// not connected yet.
    #[error("{op}: {source}")]
    Info {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// bind(2) failed.
    #[error("bind: {source}")]
    Bind {
        #[source]
        source: io::Error,
    },

    /// listen(2) failed.
    #[error("listen: {source}")]
    Listen {
        #[source]
        source: io::Error,
    },

    /// accept(2) failed with something other than a transient race.
    #[error("accept: {source}")]
    Accept {
        #[source]
        source: io::Error,
    },

    /// A connect/send/receive failure not covered by a more specific kind.
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The configured deadline elapsed while waiting for readiness.
    /// Recoverable: the handle is left open and the caller decides whether
    /// to retry or close.
    #[error("{op}: timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        timeout: Duration,
    },

    /// The readiness wait was interrupted by a signal.
    #[error("{op}: interrupted by signal")]
    Interrupted { op: &'static str },

    /// An operation was invoked out of sequence, e.g. accept before
    /// listen, or anything on a closed handle.
    #[error("{op}: socket is {state}")]
    State {
        op: &'static str,
        state: &'static str,
    },

    /// The system resolver could not be consulted.
    #[error("resolve {host}: {source}")]
    Resolver {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The resolver answered but knows no such host.
    #[error("resolve {host}: host not found")]
    HostNotFound { host: String },
}

impl From<SocketError> for io::Error {
    fn from(err: SocketError) -> io::Error {
        let kind = match &err {
            SocketError::Timeout { .. } => io::ErrorKind::TimedOut,
            SocketError::Interrupted { .. } => io::ErrorKind::Interrupted,
            SocketError::State { .. } => io::ErrorKind::NotConnected,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_name_the_syscall() {
        let err = SocketError::SockOpt {
            op: "fcntl",
            source: io::Error::from_raw_os_error(libc::EBADF),
        };
        assert!(err.to_string().starts_with("fcntl: "));

        let err = SocketError::Timeout {
            op: "recv",
            timeout: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("recv"));
        assert!(err.to_string().contains("timed out"));

        let err = SocketError::State {
            op: "accept",
            state: "bound",
        };
        assert_eq!(err.to_string(), "accept: socket is bound");
    }

    #[test]
    fn test_io_error_conversion_keeps_kind() {
        let timeout = SocketError::Timeout {
            op: "send",
            timeout: Duration::from_millis(250),
        };
        assert_eq!(io::Error::from(timeout).kind(), io::ErrorKind::TimedOut);

        let interrupted = SocketError::Interrupted { op: "recv" };
        assert_eq!(
            io::Error::from(interrupted).kind(),
            io::ErrorKind::Interrupted
        );

        let plain = SocketError::Io {
            op: "send",
            source: io::Error::from_raw_os_error(libc::EPIPE),
        };
        assert_eq!(io::Error::from(plain).kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error;

        let err = SocketError::Bind {
            source: io::Error::from_raw_os_error(libc::EADDRINUSE),
        };
        let source = err.source().expect("bind error carries its OS error");
        assert_eq!(
            source.downcast_ref::<io::Error>().unwrap().raw_os_error(),
            Some(libc::EADDRINUSE)
        );
    }
}
