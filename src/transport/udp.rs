//! UDP socket backend.
//!
//! Grounded on the same `bind`/non-blocking-by-construction shape as
//! `transport::tcp`, minus the stream-only keepalive tuning (`SPEC_FULL.md`
//! §4.2 notes this tuning is stream-only).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::{ErrorKind, Result, ResultWrappedExt};
use crate::message::BFCP_MAX_ALLOWED_SIZE;

/// An `Arc`-wrapped datagram socket: cheap to clone so the event loop can
/// wait on `readable()` through an owned handle without ever pulling the
/// owning `PeerChannel` out of the peer table (`SPEC_FULL.md` §4.4 step 1).
#[derive(Clone)]
pub struct Socket {
    inner: Arc<UdpSocket>,
}

/// Binds a UDP socket at `addr`. Used both for an endpoint's anchor
/// socket in UDP mode and for every `add_client`-allocated peer.
pub async fn bind(addr: SocketAddr) -> Result<Socket> {
    let inner = UdpSocket::bind(addr).await.wrapped(ErrorKind::TransportSetupError)?;
    Ok(Socket { inner: Arc::new(inner) })
}

impl Socket {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().wrapped(ErrorKind::TransportSetupError)
    }

    /// Reads one datagram, up to `BFCP_MAX_ALLOWED_SIZE` bytes.
    pub async fn recv_from(&self, buf: &mut [u8; BFCP_MAX_ALLOWED_SIZE]) -> Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await.wrapped(ErrorKind::TransportSetupError)
    }

    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        self.inner.send_to(buf, addr).await.wrapped(ErrorKind::TransportSetupError)
    }

    pub fn readable(&self) -> impl std::future::Future<Output = std::io::Result<()>> + '_ {
        self.inner.readable()
    }
}
