mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket as RawUdp;

use bfcp_engine::endpoint::{Endpoint, EndpointConfig};
use bfcp_engine::message::{BfcpMessage, Header, Primitive, HEADER_LENGTH};
use bfcp_engine::transport::{Role, Transport};

use common::{recv_event, Event, RecordingHandler};

/// After answering a `Goodbye` with `GoodbyeAck`, the association is
/// kept alive long enough to re-answer a retransmitted `Goodbye` from
/// the cache; once that cached answer's own T1 window elapses,
/// `on_disconnected` fires and not before.
#[tokio::test]
async fn goodbye_ack_is_cached_until_its_own_window_elapses() {
    let (handler, mut events) = RecordingHandler::new();
    let endpoint = Arc::new(Endpoint::new(
        handler,
        EndpointConfig {
            transport: Transport::Udp,
            role: Role::Passive,
            local_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..Default::default()
        },
    ));
    assert!(endpoint.connect().await);
    let server_addr = endpoint.server_info().await.unwrap();
    let anchor = endpoint.anchor_handle();

    let client = RawUdp::bind("127.0.0.1:0").await.unwrap();
    let goodbye = BfcpMessage::new(Header::new(Primitive::Goodbye, 99), &[]);
    client.send_to(goodbye.as_bytes(), server_addr).await.unwrap();

    let socket = match recv_event(&mut events, Duration::from_secs(1)).await {
        Event::Message(handle, msg) => {
            assert_eq!(msg.primitive(), Some(Primitive::Goodbye));
            assert_eq!(msg.transaction_id(), 99);
            handle
        }
        other => panic!("expected Message, got {other:?}"),
    };
    assert_eq!(socket, anchor);

    let ack = BfcpMessage::new(Header::new(Primitive::GoodbyeAck, 99), &[]);
    endpoint.send(socket, ack, false).await.unwrap();

    let mut buf = [0u8; HEADER_LENGTH];
    let (n, _) = client.recv_from(&mut buf).await.unwrap();
    assert_eq!(n, HEADER_LENGTH);
    let header = Header::deserialize_from(&buf).unwrap();
    assert_eq!(header.primitive(), Some(Primitive::GoodbyeAck));

    // A retransmitted Goodbye within the retention window gets the
    // cached GoodbyeAck resent, with no second on_message.
    client.send_to(goodbye.as_bytes(), server_addr).await.unwrap();
    let mut dup = [0u8; HEADER_LENGTH];
    let (n, _) = client.recv_from(&mut dup).await.unwrap();
    assert_eq!(n, HEADER_LENGTH);
    let header = Header::deserialize_from(&dup).unwrap();
    assert_eq!(header.primitive(), Some(Primitive::GoodbyeAck));

    let result = tokio::time::timeout(Duration::from_millis(300), recv_event(&mut events, Duration::from_secs(5)));
    assert!(result.await.is_err(), "duplicate Goodbye should not redeliver to the application");

    // Once the cached answer's own window elapses, the association is
    // torn down.
    match recv_event(&mut events, Duration::from_secs(3)).await {
        Event::Disconnected(handle) => assert_eq!(handle, anchor),
        other => panic!("expected Disconnected, got {other:?}"),
    }

    endpoint.disconnect().await;
}
