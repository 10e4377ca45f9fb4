//! Socket handle.
//!
//! Owns one OS socket descriptor and its lifecycle. Construction opens a
//! descriptor (or adopts one produced by accept), `close` releases it at
//! most once, and everything in between is a thin, error-tagged layer over
//! the `socket2` crate plus raw fcntl/getsockopt/setsockopt calls.

use std::io;
use std::net::IpAddr;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use socket2::{Domain, Protocol as RawProtocol, Socket as OsSocket, Type};

use crate::error::SocketError;

/// Address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl From<AddressFamily> for Domain {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        }
    }
}

/// Socket kind.
///
/// Closed enumeration decoupled from any OS header's numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Stream socket (TCP)
    Stream,
    /// Datagram socket (UDP)
    Datagram,
    /// Raw socket
    Raw,
    /// Reliably-delivered message socket
    ReliableMsg,
    /// Sequenced-packet socket
    SeqPacket,
}

impl From<SocketKind> for Type {
    fn from(kind: SocketKind) -> Self {
        match kind {
            SocketKind::Stream => Type::STREAM,
            SocketKind::Datagram => Type::DGRAM,
            SocketKind::Raw => Type::RAW,
            SocketKind::ReliableMsg => Type::from(libc::SOCK_RDM),
            SocketKind::SeqPacket => Type::SEQPACKET,
        }
    }
}

/// Transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Let the OS pick the protocol appropriate for the kind
    Ip,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
    /// Raw IP
    Raw,
}

impl From<Protocol> for RawProtocol {
    fn from(proto: Protocol) -> Self {
        match proto {
            Protocol::Ip => RawProtocol::from(0),
            Protocol::Tcp => RawProtocol::TCP,
            Protocol::Udp => RawProtocol::UDP,
            Protocol::Icmp => RawProtocol::ICMPV4,
            Protocol::Raw => RawProtocol::from(libc::IPPROTO_RAW),
        }
    }
}

/// Socket handle.
///
/// Exactly one live OS descriptor per handle. The handle is blocking
/// between calls; timeout-bounded operations flip the non-blocking flag
/// only for the duration of one call and always restore it. The configured
/// timeout applies to each of connect, send and receive;
/// `Duration::ZERO` means block indefinitely.
pub struct Socket {
    inner: Option<OsSocket>,
    family: AddressFamily,
    kind: SocketKind,
    protocol: Protocol,
    timeout: Duration,
    peer: Option<(IpAddr, u16)>,
    local: Option<(IpAddr, u16)>,
}

impl Socket {
    /// Open a new socket descriptor.
    ///
    /// # Arguments
    ///
    /// * `family` - Address family (IPv4 or IPv6)
    /// * `kind` - Socket kind (stream, datagram, ...)
    /// * `protocol` - Transport protocol
    /// * `timeout` - Per-operation timeout; `Duration::ZERO` blocks forever
    ///
    /// # Returns
    ///
    /// * `Ok(Socket)` - Created handle
    /// * `Err(SocketError::Create)` - The OS call failed
    pub fn open(
        family: AddressFamily,
        kind: SocketKind,
        protocol: Protocol,
        timeout: Duration,
    ) -> Result<Self, SocketError> {
        let inner = OsSocket::new(family.into(), kind.into(), Some(protocol.into()))
            .map_err(|source| SocketError::Create { source })?;

        Ok(Self {
            inner: Some(inner),
            family,
            kind,
            protocol,
            timeout,
            peer: None,
            local: None,
        })
    }

    /// Adopt a descriptor produced by an accept operation.
    ///
    /// The adopted handle starts in blocking mode with no configured
    /// timeout, regardless of how the listening socket was set up.
    pub(crate) fn adopt(inner: OsSocket, family: AddressFamily) -> Self {
        Self {
            inner: Some(inner),
            family,
            kind: SocketKind::Stream,
            protocol: Protocol::Tcp,
            timeout: Duration::ZERO,
            peer: None,
            local: None,
        }
    }

    /// Release the descriptor.
    ///
    /// Idempotent and best-effort: a failing close(2) is logged and the
    /// handle is considered closed either way. Any later operation fails
    /// with `SocketError::State`.
    pub fn close(&mut self) {
        if let Some(sock) = self.inner.take() {
            let fd = sock.into_raw_fd();
            if let Err(errno) = nix::unistd::close(fd) {
                tracing::warn!(fd, error = %errno, "close failed");
            }
        }
    }

    /// Whether the descriptor is in blocking mode.
    ///
    /// Queries the OS flag rather than a cached value, so it reflects the
    /// truth even mid-way through a timeout-bounded call.
    pub fn is_blocking(&self) -> Result<bool, SocketError> {
        let flags = fcntl(self.fd("fcntl")?, FcntlArg::F_GETFL).map_err(|errno| {
            SocketError::SockOpt {
                op: "fcntl",
                source: io::Error::from(errno),
            }
        })?;
        Ok(!OFlag::from_bits_truncate(flags).contains(OFlag::O_NONBLOCK))
    }

    /// Toggle the OS non-blocking flag.
    pub fn set_blocking(&self, on: bool) -> Result<(), SocketError> {
        self.inner("fcntl")?
            .set_nonblocking(!on)
            .map_err(|source| SocketError::SockOpt {
                op: "fcntl",
                source,
            })
    }

    /// Raw getsockopt pass-through.
    ///
    /// Reads the option value into `value` and returns the length the OS
    /// reported.
    pub fn option(&self, level: i32, name: i32, value: &mut [u8]) -> Result<usize, SocketError> {
        let fd = self.fd("getsockopt")?;
        let mut len = value.len() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(fd, level, name, value.as_mut_ptr().cast(), &mut len)
        };
        if rc == -1 {
            return Err(SocketError::SockOpt {
                op: "getsockopt",
                source: io::Error::last_os_error(),
            });
        }
        Ok(len as usize)
    }

    /// Raw setsockopt pass-through.
    pub fn set_option(&self, level: i32, name: i32, value: &[u8]) -> Result<(), SocketError> {
        let fd = self.fd("setsockopt")?;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                value.as_ptr().cast(),
                value.len() as libc::socklen_t,
            )
        };
        if rc == -1 {
            return Err(SocketError::SockOpt {
                op: "setsockopt",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Set SO_REUSEADDR.
    pub fn set_reuse_address(&self, reuse: bool) -> Result<(), SocketError> {
        self.inner("setsockopt")?
            .set_reuse_address(reuse)
            .map_err(|source| SocketError::SockOpt {
                op: "setsockopt",
                source,
            })
    }

    /// Connected peer address and port.
    ///
    /// Populated lazily from getpeername and cached afterwards; the cache
    /// may be stale if the connection has since moved on. Fails with
    /// `SocketError::Info` while the descriptor is not connected.
    pub fn peer_info(&mut self) -> Result<(IpAddr, u16), SocketError> {
        if let Some(info) = self.peer {
            return Ok(info);
        }
        let addr = self.inner("getpeername")?.peer_addr().map_err(|source| {
            SocketError::Info {
                op: "getpeername",
                source,
            }
        })?;
        let addr = addr.as_socket().ok_or_else(|| SocketError::Info {
            op: "getpeername",
            source: io::Error::new(io::ErrorKind::InvalidData, "non-inet peer address"),
        })?;
        let info = (addr.ip(), addr.port());
        self.peer = Some(info);
        Ok(info)
    }

    /// Local address and port, cached like [`Socket::peer_info`].
    pub fn local_info(&mut self) -> Result<(IpAddr, u16), SocketError> {
        if let Some(info) = self.local {
            return Ok(info);
        }
        let addr = self.inner("getsockname")?.local_addr().map_err(|source| {
            SocketError::Info {
                op: "getsockname",
                source,
            }
        })?;
        let addr = addr.as_socket().ok_or_else(|| SocketError::Info {
            op: "getsockname",
            source: io::Error::new(io::ErrorKind::InvalidData, "non-inet local address"),
        })?;
        let info = (addr.ip(), addr.port());
        self.local = Some(info);
        Ok(info)
    }

    /// Set the per-operation timeout. `Duration::ZERO` blocks forever.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The configured per-operation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The address family this handle was opened with.
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// The socket kind this handle was opened with.
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// The protocol this handle was opened with.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub(crate) fn inner(&self, op: &'static str) -> Result<&OsSocket, SocketError> {
        self.inner.as_ref().ok_or(SocketError::State {
            op,
            state: "closed",
        })
    }

    fn fd(&self, op: &'static str) -> Result<RawFd, SocketError> {
        Ok(self.inner(op)?.as_raw_fd())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}
