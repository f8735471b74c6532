//! TLS transport: the TCP transport with an added handshake
//! (`SPEC_FULL.md` §1). Crypto and the record layer are `rustls`'s and
//! `async-tls`'s job; this module only wires the connector/acceptor
//! into the framing path, bridging tokio's IO traits into the
//! `futures::io` traits `async-tls` expects via `tokio-util`'s `compat`
//! feature (grounded on the teacher crate's own dependency table, which
//! provisions exactly this combination).

use std::sync::Arc;

use async_tls::{client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream};
use async_tls::{TlsAcceptor, TlsConnector};
use rustls::{ClientConfig, ServerConfig};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::error::{Error, ErrorKind, Result};
use crate::transport::tcp::Socket as TcpSocket;

/// A connected, handshaked TLS client stream over a tokio TCP socket.
pub struct ClientSocket {
    inner: ClientTlsStream<Compat<tokio::net::TcpStream>>,
}

/// An accepted, handshaked TLS server stream over a tokio TCP socket.
pub struct ServerSocket {
    inner: ServerTlsStream<Compat<tokio::net::TcpStream>>,
}

/// Performs the client-side TLS handshake over an already-connected TCP
/// socket, using `hostname` for SNI and certificate verification.
pub async fn handshake_client(
    config: Arc<ClientConfig>,
    hostname: &str,
    tcp: TcpSocket,
) -> Result<ClientSocket> {
    let connector: TlsConnector = config.into();
    let compat = tcp.into_inner().compat();
    let inner = connector
        .connect(hostname, compat)
        .await
        .map_err(|e| Error::wrapped(ErrorKind::ConnectError, e))?;
    Ok(ClientSocket { inner })
}

/// Performs the server-side TLS handshake over an accepted TCP socket.
pub async fn handshake_server(config: Arc<ServerConfig>, tcp: TcpSocket) -> Result<ServerSocket> {
    let acceptor: TlsAcceptor = config.into();
    let compat = tcp.into_inner().compat();
    let inner = acceptor
        .accept(compat)
        .await
        .map_err(|e| Error::wrapped(ErrorKind::ConnectError, e))?;
    Ok(ServerSocket { inner })
}

impl ClientSocket {
    pub fn reader_writer(&mut self) -> &mut ClientTlsStream<Compat<tokio::net::TcpStream>> {
        &mut self.inner
    }
}

impl ServerSocket {
    pub fn reader_writer(&mut self) -> &mut ServerTlsStream<Compat<tokio::net::TcpStream>> {
        &mut self.inner
    }
}
