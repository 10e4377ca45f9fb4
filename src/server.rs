//! Listening socket and accept dispatch.
//!
//! A listening socket walks one-directionally through
//! `Created → Bound → Listening`; calling anything out of order is a state
//! error, not undefined behavior. Accepted connections are handed off
//! either synchronously (`accept`, `dispatch`) or to a spawned thread the
//! caller does not wait for (`dispatch_detached`), so the concurrency
//! shape stays in the caller's hands.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::SockAddr;

use crate::error::SocketError;
use crate::resolver;
use crate::socket::{AddressFamily, Protocol, Socket, SocketKind};
use crate::tcp::TcpSocket;

/// Default backlog capacity.
pub const DEFAULT_BACKLOG: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Created,
    Bound,
    Listening,
}

impl ServerState {
    fn name(self) -> &'static str {
        match self {
            ServerState::Created => "created",
            ServerState::Bound => "bound",
            ServerState::Listening => "listening",
        }
    }
}

/// TCP listening socket.
pub struct TcpServer {
    sock: Socket,
    state: ServerState,
    backlog: u32,
}

impl TcpServer {
    /// Create an unbound listening socket.
    pub fn new(family: AddressFamily) -> Result<Self, SocketError> {
        Ok(Self {
            sock: Socket::open(family, SocketKind::Stream, Protocol::Tcp, Duration::ZERO)?,
            state: ServerState::Created,
            backlog: DEFAULT_BACKLOG,
        })
    }

    /// Bind to `(address, port)`.
    ///
    /// An empty address means any interface. A non-empty address that does
    /// not resolve fails the call; resolution is never silently papered
    /// over with a wildcard bind.
    pub fn bind(&mut self, port: u16, address: &str, backlog: u32) -> Result<(), SocketError> {
        self.expect_state(ServerState::Created, "bind")?;

        let ip = if address.is_empty() {
            match self.sock.family() {
                AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }
        } else {
            resolver::resolve(address)?
        };

        let addr = SocketAddr::new(ip, port);
        tracing::debug!(%addr, "binding listening socket");
        self.sock
            .inner("bind")?
            .bind(&SockAddr::from(addr))
            .map_err(|source| SocketError::Bind { source })?;

        self.backlog = backlog;
        self.state = ServerState::Bound;
        Ok(())
    }

    /// Mark the socket ready to accept, with the backlog given to `bind`.
    pub fn listen(&mut self) -> Result<(), SocketError> {
        self.expect_state(ServerState::Bound, "listen")?;

        tracing::debug!(backlog = self.backlog, "listening");
        self.sock
            .inner("listen")?
            .listen(self.backlog as i32)
            .map_err(|source| SocketError::Listen { source })?;

        self.state = ServerState::Listening;
        Ok(())
    }

    /// Block until a connection arrives and return it.
    ///
    /// The accepted handle inherits the listening socket's family but
    /// starts blocking with no configured timeout. Transient accept races
    /// (EINTR, the peer aborting between queueing and accept) are retried
    /// internally; anything else is [`SocketError::Accept`].
    pub fn accept(&self) -> Result<TcpSocket, SocketError> {
        self.expect_state(ServerState::Listening, "accept")?;
        let inner = self.sock.inner("accept")?;

        loop {
            match inner.accept() {
                Ok((conn, peer)) => {
                    tracing::debug!(peer = ?peer.as_socket(), "accepted connection");
                    return Ok(TcpSocket::from_accepted(conn, self.sock.family()));
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::Interrupted | std::io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue;
                }
                Err(source) => return Err(SocketError::Accept { source }),
            }
        }
    }

    /// Accept one connection, run `handler` against it to completion on
    /// the calling thread, then close it.
    pub fn dispatch<F>(&self, handler: F) -> Result<(), SocketError>
    where
        F: FnOnce(&mut TcpSocket),
    {
        let mut conn = self.accept()?;
        handler(&mut conn);
        conn.close();
        Ok(())
    }

    /// Accept one connection, then run `handler` + close on a spawned
    /// thread without waiting for it. Callers wanting concurrent handling
    /// of many connections call this in a loop and let the handles run.
    pub fn dispatch_detached<F>(&self, handler: F) -> Result<JoinHandle<()>, SocketError>
    where
        F: FnOnce(&mut TcpSocket) + Send + 'static,
    {
        let mut conn = self.accept()?;
        Ok(thread::spawn(move || {
            handler(&mut conn);
            conn.close();
        }))
    }

    /// Local address and port, useful after binding to port 0.
    pub fn local_info(&mut self) -> Result<(IpAddr, u16), SocketError> {
        self.sock.local_info()
    }

    /// Release the listening descriptor. Idempotent.
    pub fn close(&mut self) {
        self.sock.close();
    }

    /// The underlying socket handle.
    pub fn socket(&self) -> &Socket {
        &self.sock
    }

    fn expect_state(&self, expected: ServerState, op: &'static str) -> Result<(), SocketError> {
        if self.state != expected {
            return Err(SocketError::State {
                op,
                state: self.state.name(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::Line;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_accept_before_listen_is_a_state_error() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        assert!(matches!(
            server.accept(),
            Err(SocketError::State { op: "accept", state: "created" })
        ));

        server.bind(0, "", 1).unwrap();
        assert!(matches!(
            server.accept(),
            Err(SocketError::State { op: "accept", state: "bound" })
        ));
    }

    #[test]
    fn test_listen_before_bind_is_a_state_error() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        assert!(matches!(
            server.listen(),
            Err(SocketError::State { op: "listen", state: "created" })
        ));
    }

    #[test]
    fn test_bind_twice_is_a_state_error() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        server.bind(0, "", 1).unwrap();
        assert!(matches!(
            server.bind(0, "", 1),
            Err(SocketError::State { op: "bind", state: "bound" })
        ));
    }

    #[test]
    fn test_bind_unresolvable_address_fails() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        let result = server.bind(0, "no.such.host.invalid", 1);
        assert!(matches!(
            result,
            Err(SocketError::Resolver { .. }) | Err(SocketError::HostNotFound { .. })
        ));
    }

    #[test]
    fn test_bind_loopback_literal() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        server.bind(0, "127.0.0.1", 1).unwrap();
        server.listen().unwrap();

        let (ip, port) = server.local_info().unwrap();
        assert!(ip.is_loopback());
        assert_ne!(port, 0);
    }

    #[test]
    fn test_ping_pong_scenario() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        server.bind(0, "", 1).unwrap();
        server.listen().unwrap();
        let (_, port) = server.local_info().unwrap();

        let serving = thread::spawn(move || {
            let mut conn = server.accept().unwrap();
            assert_eq!(conn.readline().unwrap(), Line::Text("ping".to_string()));
            conn.send_str("pong\n").unwrap();
            conn.close();
        });

        let mut client = TcpSocket::connect_to("127.0.0.1", port, Duration::ZERO).unwrap();
        client.send_str("ping\n").unwrap();
        assert_eq!(client.readline().unwrap(), Line::Text("pong".to_string()));

        serving.join().unwrap();
    }

    #[test]
    fn test_accepted_connection_starts_blocking_without_timeout() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        server.bind(0, "", 1).unwrap();
        server.listen().unwrap();
        let (_, port) = server.local_info().unwrap();

        let client = thread::spawn(move || {
            let mut sock =
                TcpSocket::connect_to("127.0.0.1", port, Duration::from_secs(2)).unwrap();
            // Keep the peer alive until the server has inspected the
            // accepted handle.
            let _ = sock.readline();
        });

        let mut conn = server.accept().unwrap();
        assert!(conn.socket().is_blocking().unwrap());
        assert_eq!(conn.socket().timeout(), Duration::ZERO);
        conn.send_str("done\n").unwrap();
        conn.close();

        client.join().unwrap();
    }

    #[test]
    fn test_dispatch_runs_handler_to_completion() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        server.bind(0, "", 1).unwrap();
        server.listen().unwrap();
        let (_, port) = server.local_info().unwrap();

        let client = thread::spawn(move || {
            let mut sock = TcpSocket::connect_to("127.0.0.1", port, Duration::ZERO).unwrap();
            sock.send_str("hello\n").unwrap();
            assert_eq!(sock.readline().unwrap(), Line::Text("HELLO".to_string()));
        });

        server
            .dispatch(|conn| {
                let Line::Text(line) = conn.readline().unwrap() else {
                    panic!("expected a line");
                };
                conn.send_str(&format!("{}\n", line.to_uppercase())).unwrap();
            })
            .unwrap();

        client.join().unwrap();
    }

    #[test]
    fn test_dispatch_detached_does_not_wait() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        server.bind(0, "", 1).unwrap();
        server.listen().unwrap();
        let (_, port) = server.local_info().unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_handler = Arc::clone(&ran);

        let client = thread::spawn(move || {
            let mut sock = TcpSocket::connect_to("127.0.0.1", port, Duration::ZERO).unwrap();
            sock.send_str("bye\n").unwrap();
            // Wait for the handler's close.
            assert_eq!(sock.readline().unwrap(), Line::Eof);
        });

        let handle = server
            .dispatch_detached(move |conn| {
                assert_eq!(conn.readline().unwrap(), Line::Text("bye".to_string()));
                ran_in_handler.store(true, Ordering::SeqCst);
            })
            .unwrap();

        handle.join().unwrap();
        assert!(ran.load(Ordering::SeqCst));
        client.join().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let mut server = TcpServer::new(AddressFamily::Ipv4).unwrap();
        server.bind(0, "", 1).unwrap();
        server.listen().unwrap();
        server.close();
        server.close();

        assert!(matches!(
            server.accept(),
            Err(SocketError::State { op: "accept", state: "closed" })
        ));
    }
}
