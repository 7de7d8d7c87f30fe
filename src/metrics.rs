use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::Result;

/// Label value recorded when a packet is dropped because a subscriber's
/// queue was full at publish time.
pub const DROP_REASON_SLOW_SUBSCRIBER: &str = "slow_subscriber";

/// Prometheus instruments for the relay.
///
/// The registry is owned here and exposed through [`RelayMetrics::registry`];
/// serving it (HTTP scrape endpoint, push gateway, ...) is the embedding
/// process's concern.
#[derive(Debug)]
pub struct RelayMetrics {
    registry: Registry,

    pub subscriber_count: IntGauge,
    pub datagrams_received_total: IntCounter,
    pub bytes_received_total: IntCounter,
    pub datagrams_dropped_total: IntCounterVec,
    pub socket_read_errors_total: IntCounter,
    pub build_info: IntGaugeVec,
}

impl RelayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let subscriber_count = IntGauge::new(
            "relaycast_subscriber_count",
            "Number of currently attached stream subscribers",
        )?;
        let datagrams_received_total = IntCounter::new(
            "relaycast_datagrams_received_total",
            "Datagrams read from the multicast socket",
        )?;
        let bytes_received_total = IntCounter::new(
            "relaycast_bytes_received_total",
            "Payload bytes read from the multicast socket",
        )?;
        let datagrams_dropped_total = IntCounterVec::new(
            Opts::new(
                "relaycast_datagrams_dropped_total",
                "Datagrams dropped instead of being enqueued to a subscriber",
            ),
            &["reason"],
        )?;
        let socket_read_errors_total = IntCounter::new(
            "relaycast_socket_read_errors_total",
            "Non-timeout errors returned by the multicast socket read",
        )?;
        let build_info = IntGaugeVec::new(
            Opts::new("relaycast_build_info", "Build information"),
            &["version"],
        )?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        registry.register(Box::new(subscriber_count.clone()))?;
        registry.register(Box::new(datagrams_received_total.clone()))?;
        registry.register(Box::new(bytes_received_total.clone()))?;
        registry.register(Box::new(datagrams_dropped_total.clone()))?;
        registry.register(Box::new(socket_read_errors_total.clone()))?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            subscriber_count,
            datagrams_received_total,
            bytes_received_total,
            datagrams_dropped_total,
            socket_read_errors_total,
            build_info,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Convenience accessor for the slow-subscriber drop counter.
    pub fn slow_subscriber_drops(&self) -> IntCounter {
        self.datagrams_dropped_total
            .with_label_values(&[DROP_REASON_SLOW_SUBSCRIBER])
    }
}
