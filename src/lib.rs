//! High-level TCP sockets.
//!
//! A thin, policy-carrying layer directly above the OS socket primitives:
//! connection establishment with an optional timeout, timeout-aware send
//! and receive, a line-oriented read protocol, and a listening-socket
//! accept/dispatch model.
//!
//! ## Overview
//!
//! - **[`Socket`]**: owns one descriptor; blocking-mode and raw option
//!   access, lazy peer/local address info, idempotent close.
//! - **[`TcpSocket`]**: stream handle. Every connect/send/receive either
//!   completes within the configured timeout or fails distinctly for
//!   would-block, real error, or deadline elapsed. `Duration::ZERO` means
//!   block indefinitely. [`TcpSocket::readline`] assembles bytes into
//!   logical lines, normalizing CRLF and LF endings.
//! - **[`TcpServer`]**: bind → listen → accept, with a synchronous
//!   [`TcpServer::dispatch`] and a fire-and-forget
//!   [`TcpServer::dispatch_detached`] so callers choose the concurrency
//!   shape per connection.
//!
//! A handle is blocking between calls: timeout-bounded operations flip the
//! non-blocking flag only for the duration of one call and always restore
//! it. One handle must not be used from two threads without external
//! synchronization; a listening server may be shared for repeated accepts.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use linewire::{Line, TcpSocket};
//!
//! fn main() -> Result<(), linewire::SocketError> {
//!     let mut client = TcpSocket::connect_to("localhost", 7777, Duration::from_secs(2))?;
//!     client.send_str("ping\n")?;
//!     if let Line::Text(reply) = client.readline()? {
//!         println!("{reply}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod resolver;
pub mod server;
pub mod socket;
pub mod tcp;

mod deadline;
mod readiness;

pub use error::SocketError;
pub use server::{TcpServer, DEFAULT_BACKLOG};
pub use socket::{AddressFamily, Protocol, Socket, SocketKind};
pub use tcp::{Line, TcpSocket};
