//! TCP socket.
//!
//! Stream-oriented handle with timeout-bounded connect, send and receive,
//! plus a line-oriented read protocol on top of the receive path.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use socket2::{SockAddr, Socket as OsSocket};

use crate::deadline::{self, run_bounded};
use crate::error::SocketError;
use crate::readiness::{self, Interest};
use crate::resolver;
use crate::socket::{AddressFamily, Protocol, Socket, SocketKind};

/// Result of one `readline` call.
///
/// Keeps "the peer closed before sending anything" distinct from "the peer
/// sent an empty line", which a plain string result cannot express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A line with content. The terminator is stripped and CR bytes are
    /// dropped, so CRLF- and LF-terminated input read identically. Also
    /// produced when the peer closes mid-line with bytes accumulated.
    Text(String),
    /// A line with no content: `"\n"`, `"\r\n"`, or a lone CR before
    /// end-of-stream.
    Empty,
    /// End of stream with no bytes received at all.
    Eof,
}

/// TCP socket handle.
pub struct TcpSocket {
    sock: Socket,
}

impl TcpSocket {
    /// Create an unconnected TCP socket.
    pub fn new(family: AddressFamily) -> Result<Self, SocketError> {
        Ok(Self {
            sock: Socket::open(family, SocketKind::Stream, Protocol::Tcp, Duration::ZERO)?,
        })
    }

    /// Create a socket and connect it, with `timeout` applying to the
    /// connect and to every later send/receive. The address family is
    /// derived from the resolved address, so IPv6-only hosts work too.
    pub fn connect_to(host: &str, port: u16, timeout: Duration) -> Result<Self, SocketError> {
        let ip = resolver::resolve(host)?;
        let family = match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        };
        let mut sock = Self::new(family)?;
        sock.set_timeout(timeout);
        sock.connect_addr(SocketAddr::new(ip, port))?;
        Ok(sock)
    }

    /// Adopt a descriptor handed over by accept. Fresh blocking state, no
    /// configured timeout.
    pub(crate) fn from_accepted(inner: OsSocket, family: AddressFamily) -> Self {
        Self {
            sock: Socket::adopt(inner, family),
        }
    }

    /// Connect to `host:port`.
    ///
    /// The host is resolved first; resolution failure is fatal to the
    /// call. With a timeout configured, a connect that cannot complete in
    /// time fails with [`SocketError::Timeout`] and the caller should
    /// close the handle rather than retry blindly.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), SocketError> {
        let ip = resolver::resolve(host)?;
        self.connect_addr(SocketAddr::new(ip, port))
    }

    fn connect_addr(&mut self, addr: SocketAddr) -> Result<(), SocketError> {
        tracing::debug!(%addr, "connecting");

        let timeout = self.sock.timeout();
        let inner = self.sock.inner("connect")?;

        if timeout.is_zero() {
            return inner
                .connect(&SockAddr::from(addr))
                .map_err(|source| SocketError::Io { op: "connect", source });
        }

        self.sock.set_blocking(false)?;
        let outcome = connect_bounded(inner, addr, timeout);
        let restored = self.sock.set_blocking(true);
        outcome?;
        restored?;
        Ok(())
    }

    /// Send the whole buffer.
    ///
    /// Loops over bounded single sends, accumulating bytes written, until
    /// everything is transmitted or a terminal error occurs. Each attempt
    /// carries the full timeout budget.
    pub fn send(&mut self, buf: &[u8]) -> Result<(), SocketError> {
        let mut sent = 0;
        while sent < buf.len() {
            let n = self.send_once(&buf[sent..])?;
            if n == 0 {
                return Err(SocketError::Io {
                    op: "send",
                    source: io::ErrorKind::WriteZero.into(),
                });
            }
            sent += n;
        }
        Ok(())
    }

    /// Send text.
    pub fn send_str(&mut self, text: &str) -> Result<(), SocketError> {
        self.send(text.as_bytes())
    }

    /// One bounded send attempt, exposing the partial count.
    pub fn send_once(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
        run_bounded(&self.sock, "send", Interest::Write, |s| s.send(buf))
    }

    /// One bounded receive attempt.
    ///
    /// Returns the bytes read, possibly fewer than `buf.len()`. Zero
    /// signals peer-initiated close (end of stream), which is not an
    /// error.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        run_bounded(&self.sock, "recv", Interest::Read, |s| {
            let mut s = s;
            io::Read::read(&mut s, buf)
        })
    }

    /// Read one logical line.
    ///
    /// Performs 1-byte receives until a line feed or end-of-stream, so a
    /// peer that never sends a terminator and never closes eventually
    /// times out under the configured timeout. CR bytes are dropped.
    pub fn readline(&mut self) -> Result<Line, SocketError> {
        let mut line = Vec::new();
        let mut saw_bytes = false;
        let mut byte = [0u8; 1];

        loop {
            let n = self.recv(&mut byte)?;
            if n == 0 {
                if !saw_bytes {
                    return Ok(Line::Eof);
                }
                break;
            }
            saw_bytes = true;
            match byte[0] {
                b'\n' => break,
                b'\r' => {}
                b => line.push(b),
            }
        }

        if line.is_empty() {
            Ok(Line::Empty)
        } else {
            Ok(Line::Text(String::from_utf8_lossy(&line).into_owned()))
        }
    }

    /// Release the descriptor. Idempotent.
    pub fn close(&mut self) {
        self.sock.close();
    }

    /// Set the per-operation timeout. `Duration::ZERO` blocks forever.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.sock.set_timeout(timeout);
    }

    /// Connected peer address and port.
    pub fn peer_info(&mut self) -> Result<(std::net::IpAddr, u16), SocketError> {
        self.sock.peer_info()
    }

    /// Local address and port.
    pub fn local_info(&mut self) -> Result<(std::net::IpAddr, u16), SocketError> {
        self.sock.local_info()
    }

    /// The underlying socket handle.
    pub fn socket(&self) -> &Socket {
        &self.sock
    }

    /// The underlying socket handle, mutably.
    pub fn socket_mut(&mut self) -> &mut Socket {
        &mut self.sock
    }
}

/// Bounded connect: one non-blocking attempt, a writability wait, then the
/// POSIX completion check via SO_ERROR. Retrying connect(2) itself would
/// report EISCONN on success, so the retry step reads the pending error
/// instead.
fn connect_bounded(
    inner: &OsSocket,
    addr: SocketAddr,
    timeout: Duration,
) -> Result<(), SocketError> {
    use std::os::fd::AsFd;

    let started = Instant::now();
    match inner.connect(&SockAddr::from(addr)) {
        Ok(()) => Ok(()),
        Err(err) if deadline::would_block(&err) => {
            let remaining = timeout.saturating_sub(started.elapsed());
            readiness::wait(inner.as_fd(), Interest::Write, remaining, "connect", timeout)?;
            match inner.take_error() {
                Ok(None) => Ok(()),
                Ok(Some(source)) | Err(source) => {
                    Err(SocketError::Io { op: "connect", source })
                }
            }
        }
        Err(source) => Err(SocketError::Io { op: "connect", source }),
    }
}

impl io::Read for TcpSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf).map_err(io::Error::from)
    }
}

impl io::Write for TcpSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send_once(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
