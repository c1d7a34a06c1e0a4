//! The mock-snmp-responder binary driven through `MockResponder`.

use std::net::Ipv4Addr;
use std::time::Duration;

use monitor_harness_core::alloc::{Protocol, allocate_port};
use monitor_harness_core::responder::{MockResponder, ResponderMap, ResponderState};
use monitor_harness_core::snmp::{Oid, SnmpValue, SnmpVersion, decode_get_response, encode_get_request};
use tokio::net::UdpSocket;

const RESPONDER: &str = env!("CARGO_BIN_EXE_mock-snmp-responder");

fn map() -> ResponderMap {
    ResponderMap::new()
        .with(&[1, 0], SnmpValue::OctetString("3".into()))
        .with(&[1, 1], SnmpValue::Counter64(5))
}

async fn query(port: u16, oid: &str) -> Option<Vec<u8>> {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let oid: Oid = oid.parse().unwrap();
    let request = encode_get_request(SnmpVersion::V2c, "public", 42, &[oid]).unwrap();
    socket
        .send_to(&request, (Ipv4Addr::LOCALHOST, port))
        .await
        .unwrap();
    let mut buf = vec![0u8; 1500];
    let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .ok()?
        .ok()?;
    Some(buf[..len].to_vec())
}

#[tokio::test]
async fn responder_serves_after_rendezvous() {
    let lease = allocate_port(Protocol::Udp).unwrap();
    let mut responder = MockResponder::new(RESPONDER, lease.port(), map());
    responder.start(Duration::from_secs(5)).await.unwrap();
    assert_eq!(responder.state(), ResponderState::Serving);

    let response = query(lease.port(), "2.25.1.1").await.unwrap();
    let (request_id, binds) = decode_get_response(&response).unwrap();
    assert_eq!(request_id, 42);
    assert_eq!(binds[0].value, SnmpValue::Counter64(5));

    responder.terminate().await;
    assert_eq!(responder.state(), ResponderState::Terminated);
}

#[tokio::test]
async fn unmapped_oid_stops_the_responder() {
    let lease = allocate_port(Protocol::Udp).unwrap();
    let mut responder = MockResponder::new(RESPONDER, lease.port(), map());
    responder.start(Duration::from_secs(5)).await.unwrap();

    assert!(query(lease.port(), "2.25.9.9").await.is_none());
    let mut status = None;
    for _ in 0..50 {
        status = responder.exit_status();
        if status.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!status.unwrap().success());
    responder.terminate().await;
}

#[tokio::test]
async fn busy_port_fails_the_rendezvous() {
    let holder = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = holder.local_addr().unwrap().port();
    let mut responder = MockResponder::new(RESPONDER, port, map());

    let err = responder
        .start(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "responder-startup");
    assert_eq!(responder.state(), ResponderState::Terminated);
}
