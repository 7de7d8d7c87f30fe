use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use relaycast::{Bus, Packet, RelayMetrics};

fn packet(seq: u64) -> Arc<Packet> {
    Arc::new(Packet::new(vec![seq as u8; 8].into_boxed_slice(), seq))
}

#[tokio::test]
async fn slow_subscriber_never_blocks_publish() {
    let metrics = Arc::new(RelayMetrics::new().unwrap());
    let bus = Bus::new(Arc::clone(&metrics));

    // One subscriber that never reads with the smallest possible queue,
    // one healthy subscriber.
    let (slow_tx, _slow_rx) = mpsc::channel(1);
    let (fast_tx, mut fast_rx) = mpsc::channel(16);
    let slow = bus.attach(slow_tx);
    let fast = bus.attach(fast_tx);

    let start = Instant::now();
    bus.publish(packet(0));
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(fast_rx.recv().await.unwrap().received_at, 0);

    let start = Instant::now();
    for seq in 1..11 {
        bus.publish(packet(seq));
    }
    assert!(start.elapsed() < Duration::from_millis(100));

    // The fast subscriber saw every packet, in publish order.
    for seq in 1..11 {
        assert_eq!(fast_rx.recv().await.unwrap().received_at, seq);
    }

    // The slow queue absorbed one packet; the other ten were dropped and
    // counted, without disconnecting the subscriber.
    assert_eq!(bus.dropped(slow), Some(10));
    assert_eq!(bus.dropped(fast), Some(0));
    assert_eq!(metrics.slow_subscriber_drops().get(), 10);
    assert_eq!(bus.subscriber_count(), 2);
}

#[tokio::test]
async fn detached_queue_receives_nothing_further() {
    let metrics = Arc::new(RelayMetrics::new().unwrap());
    let bus = Bus::new(metrics);

    let (tx, mut rx) = mpsc::channel(8);
    let id = bus.attach(tx);

    bus.publish(packet(1));
    bus.detach(id);
    bus.publish(packet(2));
    bus.publish(packet(3));

    assert_eq!(rx.recv().await.unwrap().received_at, 1);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn subscriber_count_returns_to_zero() {
    let metrics = Arc::new(RelayMetrics::new().unwrap());
    let bus = Bus::new(Arc::clone(&metrics));

    let (tx_a, _rx_a) = mpsc::channel(8);
    let (tx_b, _rx_b) = mpsc::channel(8);
    let a = bus.attach(tx_a);
    assert_eq!(bus.subscriber_count(), 1);
    let b = bus.attach(tx_b);
    assert_eq!(bus.subscriber_count(), 2);
    assert_eq!(metrics.subscriber_count.get(), 2);

    bus.detach(a);
    bus.detach(b);
    assert_eq!(bus.subscriber_count(), 0);
    assert_eq!(metrics.subscriber_count.get(), 0);
}
