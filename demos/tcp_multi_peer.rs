//! A passive TCP `Endpoint` accepts connections from several active
//! peers concurrently, each driving its own Hello/HelloAck exchange
//! (`SPEC_FULL.md` §8 scenario 3, "passive TCP two-peer accept").

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use bfcp_engine::endpoint::{Endpoint, EndpointConfig, EndpointHandler};
use bfcp_engine::message::{BfcpMessage, Header, Primitive};
use bfcp_engine::transport::{Role, SocketHandle, Transport};

enum Event {
    Connected(SocketHandle, SocketAddr),
    Message(SocketHandle, BfcpMessage),
}

struct ChannelHandler {
    tx: mpsc::UnboundedSender<Event>,
}

impl EndpointHandler for ChannelHandler {
    fn on_connected(&self, socket: SocketHandle, remote_addr: SocketAddr) {
        let _ = self.tx.send(Event::Connected(socket, remote_addr));
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
    const PEER_COUNT: usize = 3;

    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let server = Arc::new(Endpoint::new(
        Arc::new(ChannelHandler { tx: server_tx }),
        EndpointConfig {
            transport: Transport::Tcp,
            role: Role::Passive,
            local_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..Default::default()
        },
    ));
    assert!(server.connect().await);
    let server_addr = server.server_info().await.expect("server bound a local address");
    println!("server listening on {server_addr}");

    let replies = server.clone();
    tokio::spawn(async move {
        let mut accepted = 0usize;
        while let Some(event) = server_rx.recv().await {
            match event {
                Event::Connected(handle, addr) => {
                    accepted += 1;
                    println!("accepted peer {handle} from {addr} ({accepted}/{PEER_COUNT})");
                }
                Event::Message(handle, msg) if msg.primitive() == Some(Primitive::Hello) => {
                    let ack = BfcpMessage::new(Header::new(Primitive::HelloAck, msg.transaction_id()), &[]);
                    let _ = replies.send(handle, ack, false).await;
                }
                Event::Message(_, _) => {}
            }
        }
    });

    let mut clients = Vec::with_capacity(PEER_COUNT);
    for i in 0..PEER_COUNT {
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Endpoint::new(
            Arc::new(ChannelHandler { tx: client_tx }),
            EndpointConfig {
                transport: Transport::Tcp,
                role: Role::Active,
                remote_addr: Some(server_addr),
                ..Default::default()
            },
        ));
        assert!(client.connect().await);

        let anchor = client.anchor_handle();
        let hello = BfcpMessage::new(Header::new(Primitive::Hello, (i + 1) as u16), &[]);
        client.send(anchor, hello, false).await.expect("send Hello");

        let transaction_id = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = client_rx.recv().await {
                if let Event::Message(_, msg) = event {
                    if msg.primitive() == Some(Primitive::HelloAck) {
                        return msg.transaction_id();
                    }
                }
            }
            0
        })
        .await
        .expect("HelloAck within 2s");
        println!("client #{i} received HelloAck for transaction {transaction_id}");

        clients.push(client);
    }

    for client in clients {
        client.disconnect().await;
    }
    server.disconnect().await;
}
