#![cfg(target_os = "linux")]

use std::net::UdpSocket;
use std::time::Duration;

use tokio::time::timeout;

use relaycast::proto::relay_client::RelayClient;
use relaycast::proto::SubscribeRequest;
use relaycast::{ListenerConfig, Relay, RelayConfig};

const GROUP: &str = "239.255.255.250";

fn free_udp_port() -> u16 {
    let probe = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    probe.local_addr().unwrap().port()
}

fn relay_config(port: u16) -> RelayConfig {
    RelayConfig {
        listener: ListenerConfig {
            multicast_ip: GROUP.to_string(),
            port,
            loopback: true,
            ..Default::default()
        },
        grpc_addr: "127.0.0.1:0".parse().unwrap(),
        shutdown_grace: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn end_to_end_stream_subscribe() {
    let port = free_udp_port();
    let relay = Relay::start(relay_config(port)).await.unwrap();

    let mut client = RelayClient::connect(format!("http://{}", relay.local_addr()))
        .await
        .unwrap();
    let mut stream = client
        .subscribe(SubscribeRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(relay.subscriber_count(), 1);

    let sender = UdpSocket::bind(("0.0.0.0", 0)).unwrap();
    let payload = b"end-to-end integration test payload";
    sender.send_to(payload, (GROUP, port)).unwrap();

    let message = timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("timed out waiting for stream message")
        .unwrap()
        .expect("stream ended early");
    assert_eq!(message.payload, payload);
    let received_at = message.received_at.expect("timestamp populated");
    assert!(received_at.seconds > 0);

    drop(stream);
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn graceful_shutdown_under_load() {
    let port = free_udp_port();
    let relay = Relay::start(relay_config(port)).await.unwrap();
    let metrics = relay.metrics();
    let addr = relay.local_addr();

    let mut client_a = RelayClient::connect(format!("http://{addr}")).await.unwrap();
    let mut client_b = RelayClient::connect(format!("http://{addr}")).await.unwrap();
    let mut stream_a = client_a
        .subscribe(SubscribeRequest {})
        .await
        .unwrap()
        .into_inner();
    let mut stream_b = client_b
        .subscribe(SubscribeRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(relay.subscriber_count(), 2);

    // Keep datagrams flowing while the relay shuts down.
    let sender_task = tokio::spawn(async move {
        let sender = UdpSocket::bind(("0.0.0.0", 0)).unwrap();
        loop {
            let _ = sender.send_to(b"load", (GROUP, port));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    // Both subscribers are live before shutdown begins.
    timeout(Duration::from_secs(5), stream_a.message())
        .await
        .expect("subscriber a saw no traffic")
        .unwrap();
    timeout(Duration::from_secs(5), stream_b.message())
        .await
        .expect("subscriber b saw no traffic")
        .unwrap();

    timeout(Duration::from_secs(3), relay.shutdown())
        .await
        .expect("shutdown exceeded grace budget")
        .unwrap();
    sender_task.abort();

    // Streams end cleanly: remaining queue items drain, then end-of-stream.
    let drain = async {
        while let Some(_message) = stream_a.message().await.unwrap() {}
        while let Some(_message) = stream_b.message().await.unwrap() {}
    };
    timeout(Duration::from_secs(2), drain)
        .await
        .expect("streams did not end after shutdown");

    assert_eq!(metrics.subscriber_count.get(), 0);
}
