use std::sync::Arc;
use std::time::Duration;

use relaycast::{Error, ListenerConfig, Receiver, RelayMetrics};

fn metrics() -> Arc<RelayMetrics> {
    Arc::new(RelayMetrics::new().unwrap())
}

#[test]
fn unparseable_group_is_rejected() {
    let config = ListenerConfig {
        multicast_ip: "invalid".to_string(),
        ..Default::default()
    };
    let err = Receiver::new(&config, metrics()).unwrap_err();
    assert!(err.to_string().contains("invalid multicast IP"));
}

#[test]
fn unicast_group_is_rejected() {
    let config = ListenerConfig {
        multicast_ip: "192.168.1.1".to_string(),
        ..Default::default()
    };
    let err = Receiver::new(&config, metrics()).unwrap_err();
    assert!(err.to_string().contains("not a multicast address"));
}

#[test]
fn unknown_interface_is_rejected() {
    let config = ListenerConfig {
        interface: Some("definitely-not-a-nic0".to_string()),
        ..Default::default()
    };
    match Receiver::new(&config, metrics()).unwrap_err() {
        Error::InterfaceNotFound(name) => assert_eq!(name, "definitely-not-a-nic0"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn zero_read_timeout_is_rejected() {
    let config = ListenerConfig {
        read_timeout: Duration::ZERO,
        ..Default::default()
    };
    assert!(matches!(
        Receiver::new(&config, metrics()).unwrap_err(),
        Error::InvalidConfig(_)
    ));
}
