mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket as RawUdp;

use bfcp_engine::endpoint::{Endpoint, EndpointConfig};
use bfcp_engine::message::{BfcpMessage, Header, Primitive, HEADER_LENGTH};
use bfcp_engine::transport::{Role, Transport};

use common::{recv_event, Event, RecordingHandler};

/// A `Hello` that's never answered follows the T1 backoff schedule
/// (cumulative 500ms, 1.5s, 3.5s, 7.5s, 15.5s) and then disconnects,
/// without ever firing a 6th retransmission. This waits out the real
/// schedule (~32s) rather than faking the clock, since the engine's
/// timers are driven by `futures-timer`, which doesn't observe tokio's
/// paused test clock.
#[tokio::test]
async fn lost_helloack_backs_off_then_disconnects() {
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
    let _ = recv_event(&mut events, Duration::from_secs(1)).await; // Connected

    let anchor = endpoint.anchor_handle();
    let hello = BfcpMessage::new(Header::new(Primitive::Hello, 11), &[]);
    let start = Instant::now();
    endpoint.send(anchor, hello, false).await.unwrap();

    let mut buf = [0u8; HEADER_LENGTH];
    let (n, _) = remote.recv_from(&mut buf).await.unwrap();
    assert_eq!(n, HEADER_LENGTH);

    let expected_cumulative_ms: [i64; 5] = [500, 1500, 3500, 7500, 15500];
    for &target in &expected_cumulative_ms {
        let (n, _) = remote.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, HEADER_LENGTH);
        let header = Header::deserialize_from(&buf).unwrap();
        assert_eq!(header.primitive(), Some(Primitive::Hello));
        assert_eq!(header.transaction_id, 11);
        let elapsed = start.elapsed().as_millis() as i64;
        assert!(
            (elapsed - target).abs() < 750,
            "retransmission observed at {elapsed}ms, expected near {target}ms"
        );
    }

    // The 5th retransmission's own 16s window must elapse, with no 6th
    // retransmission along the way, before the association gives up.
    let result = tokio::time::timeout(Duration::from_millis(17_000), remote.recv_from(&mut buf)).await;
    assert!(result.is_err(), "unexpected 6th retransmission");

    match recv_event(&mut events, Duration::from_secs(3)).await {
        Event::Disconnected(_) => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }

    endpoint.disconnect().await;
}
