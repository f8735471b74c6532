mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream as RawTcp;

use bfcp_engine::endpoint::{Endpoint, EndpointConfig};
use bfcp_engine::message::{BfcpMessage, Header, Primitive, HEADER_LENGTH};
use bfcp_engine::transport::{Role, Transport};

use common::{recv_event, Event, RecordingHandler};

/// A TCP peer that trickles a message in over several writes never
/// produces `on_message` until the full frame (header then payload)
/// has actually arrived.
#[tokio::test]
async fn tcp_stream_reassembles_a_segmented_message() {
    let (handler, mut events) = RecordingHandler::new();
    let endpoint = Arc::new(Endpoint::new(
        handler,
        EndpointConfig {
            transport: Transport::Tcp,
            role: Role::Passive,
            local_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..Default::default()
        },
    ));
    assert!(endpoint.connect().await);
    let server_addr = endpoint.server_info().await.unwrap();

    let mut client = RawTcp::connect(server_addr).await.unwrap();
    let _socket = match recv_event(&mut events, Duration::from_secs(1)).await {
        Event::Connected(handle, _) => handle,
        other => panic!("expected Connected, got {other:?}"),
    };

    let payload = [7u8; 8];
    let msg = BfcpMessage::new(Header::new(Primitive::FloorQuery, 9), &payload);
    let full = msg.as_bytes();
    assert_eq!(full.len(), HEADER_LENGTH + 8);

    // First half of the header only.
    client.write_all(&full[0..6]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err(), "message delivered before header complete");

    // Rest of the header; still no payload.
    client.write_all(&full[6..HEADER_LENGTH]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err(), "message delivered before payload complete");

    // Payload arrives in two bursts.
    client.write_all(&full[HEADER_LENGTH..HEADER_LENGTH + 4]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err(), "message delivered before payload complete");

    client.write_all(&full[HEADER_LENGTH + 4..]).await.unwrap();

    match recv_event(&mut events, Duration::from_secs(1)).await {
        Event::Message(_, delivered) => {
            assert_eq!(delivered.primitive(), Some(Primitive::FloorQuery));
            assert_eq!(delivered.transaction_id(), 9);
            assert_eq!(delivered.as_bytes(), full);
        }
        other => panic!("expected Message, got {other:?}"),
    }

    endpoint.disconnect().await;
}
