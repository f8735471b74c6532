//! TCP socket backend, grounded on the teacher crate's
//! `communication::socket::async_std_tcp` module, re-targeted at
//! `tokio::net` (this crate's default `socket_tokio_tcp` feature).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener as TokioListener, TcpStream};

use crate::error::{ErrorKind, Result, ResultWrappedExt};

pub struct Listener {
    inner: TokioListener,
}

/// An `Arc`-wrapped stream: cheap to clone so the event loop can wait on
/// `readable()` through an owned handle without holding the peer table's
/// lock across the wait (`SPEC_FULL.md` §4.4 step 1).
#[derive(Clone)]
pub struct Socket {
    inner: Arc<TcpStream>,
}

/// Applies the stream-socket tuning the original implementation performs
/// right after `socket()`: `SO_REUSEADDR`, `SO_KEEPALIVE`, and TCP
/// keepalive idle=60s/count=10/interval=10s (`SPEC_FULL.md` §4.2).
///
/// Unlike the original, which must set these options before `bind`/
/// `connect`, `socket2::SockRef` lets us tune an already-created tokio
/// socket in place, so this runs once right after the socket exists
/// regardless of which path created it.
fn tune_stream_socket(raw: SockRef<'_>) -> Result<()> {
    raw.set_reuse_address(true).wrapped(ErrorKind::TransportSetupError)?;
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let keepalive = keepalive.with_retries(10);
    raw.set_tcp_keepalive(&keepalive).wrapped(ErrorKind::TransportSetupError)?;
    Ok(())
}

/// Binds a listening socket at `addr` (passive role, non-UDP transport).
pub fn bind(addr: SocketAddr) -> Result<Listener> {
    let std_listener = std::net::TcpListener::bind(addr).wrapped(ErrorKind::TransportSetupError)?;
    std_listener.set_nonblocking(true).wrapped(ErrorKind::TransportSetupError)?;
    tune_stream_socket(SockRef::from(&std_listener))?;
    let inner = TokioListener::from_std(std_listener).wrapped(ErrorKind::TransportSetupError)?;
    Ok(Listener { inner })
}

/// Connects to `addr` (active role).
pub async fn connect(addr: SocketAddr) -> Result<Socket> {
    let inner = TcpStream::connect(addr).await.wrapped(ErrorKind::ConnectError)?;
    tune_stream_socket(SockRef::from(&inner))?;
    Ok(Socket { inner: Arc::new(inner) })
}

impl Listener {
    pub async fn accept(&self) -> Result<(Socket, SocketAddr)> {
        let (inner, addr) = self.inner.accept().await.wrapped(ErrorKind::TransportSetupError)?;
        tune_stream_socket(SockRef::from(&inner))?;
        Ok((Socket { inner: Arc::new(inner) }, addr))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().wrapped(ErrorKind::TransportSetupError)
    }
}

impl Socket {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().wrapped(ErrorKind::TransportSetupError)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().wrapped(ErrorKind::TransportSetupError)
    }

    pub fn readable(&self) -> impl std::future::Future<Output = std::io::Result<()>> + '_ {
        self.inner.readable()
    }

    /// Reads into `buf` through a shared reference, using `TcpStream`'s
    /// `&self` readiness/try_read pair so this never needs exclusive
    /// ownership of the socket.
    pub async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            self.inner.readable().await?;
            match self.inner.try_read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn write_all(&self, mut buf: &[u8]) -> std::io::Result<()> {
        while !buf.is_empty() {
            self.inner.writable().await?;
            match self.inner.try_write(buf) {
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Consumes the wrapper, handing back the raw tokio stream — used to
    /// hand the socket off to the TLS handshake, which needs ownership to
    /// wrap it in a `tokio_util::compat` adapter. Only ever called right
    /// after `connect`/`accept`, before the socket is cloned anywhere.
    pub fn into_inner(self) -> TcpStream {
        Arc::try_unwrap(self.inner).unwrap_or_else(|_| panic!("tcp socket already shared"))
    }

    pub async fn shutdown(&self) {
        let _ = SockRef::from(&*self.inner).shutdown(std::net::Shutdown::Both);
    }
}
