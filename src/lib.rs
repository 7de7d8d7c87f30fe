//! UDP multicast to gRPC stream relay.
//!
//! One receiver thread joins an IPv4 multicast group and reads datagrams
//! with a bounded socket deadline; each datagram is stamped, copied, and
//! fanned out through an in-memory bus to every connected gRPC stream
//! subscriber. Subscribers are isolated from one another: a full subscriber
//! queue drops the packet for that subscriber and counts the loss, it never
//! back-pressures the receive loop.

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod packet;
pub mod receiver;
pub mod relay;
pub mod server;

/// Generated types for the `relaycast.v1` wire schema.
pub mod proto {
    tonic::include_proto!("relaycast.v1");
}

pub use bus::{Bus, SubscriberId};
pub use clock::{Clock, SystemClock, TscClock};
pub use config::ListenerConfig;
pub use error::{Error, Result};
pub use metrics::RelayMetrics;
pub use packet::Packet;
pub use receiver::Receiver;
pub use relay::{Relay, RelayConfig};
pub use server::RelayService;
