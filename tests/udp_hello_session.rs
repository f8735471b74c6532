mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket as RawUdp;

use bfcp_engine::endpoint::{Endpoint, EndpointConfig};
use bfcp_engine::message::{BfcpMessage, Header, Primitive, HEADER_LENGTH};
use bfcp_engine::transport::{Role, Transport};

use common::{recv_event, Event, RecordingHandler};

/// Active UDP connect + Hello/HelloAck: the remote echoes a matching
/// `HelloAck`, `on_connected`/`on_message` each fire once, and the
/// outbound transaction is gone afterward — observed indirectly, since
/// no retransmission shows up at the remote once T1 has passed.
#[tokio::test]
async fn active_udp_connect_completes_hello_exchange() {
    let remote = RawUdp::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote.local_addr().unwrap();

    let (handler, mut events) = RecordingHandler::new();
    let endpoint = Arc::new(Endpoint::new(
        handler,
        EndpointConfig {
            transport: Transport::Udp,
            role: Role::Active,
            remote_addr: Some(remote_addr),
            ..Default::default()
        },
    ));
    assert!(endpoint.connect().await);

    match recv_event(&mut events, Duration::from_secs(1)).await {
        Event::Connected(_, addr) => assert_eq!(addr, remote_addr),
        other => panic!("expected Connected, got {other:?}"),
    }

    let anchor = endpoint.anchor_handle();
    let hello = BfcpMessage::new(Header::new(Primitive::Hello, 7), &[]);
    endpoint.send(anchor, hello, false).await.unwrap();

    let mut buf = [0u8; HEADER_LENGTH];
    let (n, from) = remote.recv_from(&mut buf).await.unwrap();
    assert_eq!(n, HEADER_LENGTH);
    let header = Header::deserialize_from(&buf).unwrap();
    assert_eq!(header.primitive(), Some(Primitive::Hello));
    assert_eq!(header.transaction_id, 7);

    let ack = BfcpMessage::new(Header::new(Primitive::HelloAck, 7), &[]);
    remote.send_to(ack.as_bytes(), from).await.unwrap();

    match recv_event(&mut events, Duration::from_secs(1)).await {
        Event::Message(_, msg) => {
            assert_eq!(msg.primitive(), Some(Primitive::HelloAck));
            assert_eq!(msg.transaction_id(), 7);
        }
        other => panic!("expected Message, got {other:?}"),
    }

    // No retransmission should follow: the answer closed the outbound
    // transaction, so nothing fires before the next, much-later T1.
    let mut extra = [0u8; HEADER_LENGTH];
    let result = tokio::time::timeout(Duration::from_millis(700), remote.recv_from(&mut extra)).await;
    assert!(result.is_err(), "unexpected retransmission after HelloAck");

    endpoint.disconnect().await;
}
