//! Host-name resolution.
//!
//! Called once per connect/bind; a failure here is fatal to that
//! operation. "Name not found" and "resolver unavailable" are reported as
//! distinct errors so callers can tell a typo from a broken resolver.

use std::net::{IpAddr, ToSocketAddrs};

use crate::error::SocketError;

/// Resolve `host` to a numeric address.
///
/// IP literals are parsed directly without touching the system resolver.
/// Otherwise the first address returned by the system resolver wins.
pub fn resolve(host: &str) -> Result<IpAddr, SocketError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|source| SocketError::Resolver {
            host: host.to_string(),
            source,
        })?;

    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| SocketError::HostNotFound {
            host: host.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_resolve_v4_literal() {
        let ip = resolve("127.0.0.1").unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_resolve_v6_literal() {
        let ip = resolve("::1").unwrap();
        assert_eq!(ip, IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn test_resolve_localhost() {
        let ip = resolve("localhost").unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn test_resolve_unknown_host() {
        // .invalid is reserved (RFC 2606) and must never resolve.
        let result = resolve("no.such.host.invalid");
        assert!(matches!(
            result,
            Err(SocketError::Resolver { .. }) | Err(SocketError::HostNotFound { .. })
        ));
    }
}
