//! Two UDP `Endpoint`s perform a Hello/HelloAck session establishment,
//! the BFCP equivalent of a TCP handshake (`SPEC_FULL.md` §2.1, §8
//! scenario 1).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use bfcp_engine::endpoint::{Endpoint, EndpointConfig, EndpointHandler};
use bfcp_engine::message::{BfcpMessage, Header, Primitive};
use bfcp_engine::transport::{Role, SocketHandle, Transport};

enum Event {
    Message(SocketHandle, BfcpMessage),
}

/// Forwards upcalls onto a channel: `EndpointHandler` methods run inline
/// on the event loop's task and must never block on endpoint I/O.
struct ChannelHandler {
    tx: mpsc::UnboundedSender<Event>,
}

impl EndpointHandler for ChannelHandler {
    fn on_connected(&self, socket: SocketHandle, remote_addr: SocketAddr) {
        println!("{socket} connected to {remote_addr}");
    }
    fn on_disconnected(&self, socket: SocketHandle) {
        println!("{socket} disconnected");
    }
    fn on_message(&self, socket: SocketHandle, message: BfcpMessage) {
        let _ = self.tx.send(Event::Message(socket, message));
    }
}

#[tokio::main]
async fn main() {
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let server = Arc::new(Endpoint::new(
        Arc::new(ChannelHandler { tx: server_tx }),
        EndpointConfig {
            transport: Transport::Udp,
            role: Role::Passive,
            local_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..Default::default()
        },
    ));
    assert!(server.connect().await);
    let server_addr = server.server_info().await.expect("server bound a local address");
    println!("server listening on {server_addr}");

    // Reply to every Hello with a HelloAck carrying the same transaction
    // ID, same as a floor control server's session establishment step.
    let replies = server.clone();
    tokio::spawn(async move {
        while let Some(Event::Message(handle, msg)) = server_rx.recv().await {
            if msg.primitive() == Some(Primitive::Hello) {
                let ack = BfcpMessage::new(Header::new(Primitive::HelloAck, msg.transaction_id()), &[]);
                let _ = replies.send(handle, ack, false).await;
            }
        }
    });

    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    let client = Arc::new(Endpoint::new(
        Arc::new(ChannelHandler { tx: client_tx }),
        EndpointConfig {
            transport: Transport::Udp,
            role: Role::Active,
            remote_addr: Some(server_addr),
            ..Default::default()
        },
    ));
    assert!(client.connect().await);

    let anchor = client.anchor_handle();
    let hello = BfcpMessage::new(Header::new(Primitive::Hello, 1), &[]);
    client.send(anchor, hello, false).await.expect("send Hello");

    let transaction_id = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Event::Message(_, msg)) = client_rx.recv().await {
            if msg.primitive() == Some(Primitive::HelloAck) {
                return msg.transaction_id();
            }
        }
        0
    })
    .await
    .expect("HelloAck within 2s");

    println!("received HelloAck for transaction {transaction_id}");

    client.disconnect().await;
    server.disconnect().await;
}
