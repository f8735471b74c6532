//! Socket creation, connect, accept, read and write, abstracted over
//! UDP/TCP/TLS (`SPEC_FULL.md` §4.2, Design Notes "Polymorphism over
//! transport").

#[cfg(feature = "socket_tokio_tcp")]
pub mod tcp;
#[cfg(feature = "socket_tokio_tcp")]
pub mod udp;
#[cfg(feature = "socket_tokio_tcp")]
pub mod tls;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which of the three transports a `PeerChannel` is running over.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Transport {
    Tcp,
    Tls,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Tcp => "TCP",
            Transport::Tls => "TLS",
            Transport::Udp => "UDP",
        })
    }
}

/// The role an endpoint or peer plays in a given association.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Role {
    Active,
    Passive,
}

/// An opaque identifier for a socket known to an `Endpoint`'s peer table.
///
/// The original implementation keys its peer table by the raw OS socket
/// descriptor. This crate keys it by a monotonically increasing ID
/// assigned at `PeerChannel` creation time instead: the engine never
/// needs to recover a `SocketHandle` from a raw fd, and an opaque ID
/// keeps the peer table free of any `unsafe`-sourced raw-fd juggling.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SocketHandle(u64);

impl SocketHandle {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SocketHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Formats an address the way the original implementation's
/// `PrintAddress`/`SetRemoteAddress` do: IPv6 addresses are bracketed
/// when concatenated with a port (`SPEC_FULL.md` §6).
pub fn format_addr_port(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(a) => format!("{}:{}", a.ip(), a.port()),
        SocketAddr::V6(a) => format!("[{}]:{}", a.ip(), a.port()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_handles_are_distinct_and_monotonic() {
        let a = SocketHandle::next();
        let b = SocketHandle::next();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn ipv6_addresses_are_bracketed() {
        let addr: SocketAddr = "[::1]:1234".parse().unwrap();
        assert_eq!(format_addr_port(addr), "[::1]:1234");
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert_eq!(format_addr_port(addr), "127.0.0.1:1234");
    }
}
