//! Shared `EndpointHandler` test double: forwards every upcall onto a
//! channel the test can drain and assert against, since the handler
//! trait's methods are synchronous and must not block on endpoint I/O.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use bfcp_engine::endpoint::EndpointHandler;
use bfcp_engine::message::BfcpMessage;
use bfcp_engine::transport::SocketHandle;

#[derive(Debug)]
#[allow(dead_code)]
pub enum Event {
    Connected(SocketHandle, SocketAddr),
    Disconnected(SocketHandle),
    Message(SocketHandle, BfcpMessage),
}

pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Event>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingHandler { tx }), rx)
    }
}

impl EndpointHandler for RecordingHandler {
    fn on_connected(&self, socket: SocketHandle, remote_addr: SocketAddr) {
        let _ = self.tx.send(Event::Connected(socket, remote_addr));
    }
    fn on_disconnected(&self, socket: SocketHandle) {
        let _ = self.tx.send(Event::Disconnected(socket));
    }
    fn on_message(&self, socket: SocketHandle, message: BfcpMessage) {
        let _ = self.tx.send(Event::Message(socket, message));
    }
}

#[allow(dead_code)]
pub async fn recv_event(rx: &mut mpsc::UnboundedReceiver<Event>, timeout: Duration) -> Event {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("event within timeout")
        .expect("handler channel closed unexpectedly")
}
