use std::net::Ipv4Addr;
use std::time::Duration;

use crate::{Error, Result};

/// Configuration for the multicast listener.
///
/// Immutable after construction; `validate` is called by the receiver
/// before any socket is opened.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Multicast group to join. Must parse to an IPv4 address in 224.0.0.0/4.
    pub multicast_ip: String,

    /// UDP port of the multicast group.
    pub port: u16,

    /// Join the group on this interface. `None` lets the kernel choose.
    pub interface: Option<String>,

    /// Size of the per-read scratch buffer; also the maximum datagram size
    /// delivered to subscribers.
    pub read_buffer: usize,

    /// Requested `SO_RCVBUF` size. The kernel may clamp this.
    pub socket_buffer: usize,

    /// Read deadline for each blocking receive. Bounds how long cancellation
    /// can go unobserved.
    pub read_timeout: Duration,

    /// Enable `IP_MULTICAST_LOOP` so the host sees its own datagrams.
    /// Intended for self-test setups only.
    pub loopback: bool,

    /// Capacity of each subscriber queue.
    pub channel_buffer: usize,
}

impl ListenerConfig {
    pub const DEFAULT_MULTICAST_IP: &'static str = "239.0.0.1";
    pub const DEFAULT_PORT: u16 = 5000;
    pub const DEFAULT_READ_BUFFER: usize = 65535;
    pub const DEFAULT_SOCKET_BUFFER: usize = 8 * 1024 * 1024;
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);
    pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

    /// Checks the config and resolves the group address.
    pub fn validate(&self) -> Result<Ipv4Addr> {
        let group: Ipv4Addr = self
            .multicast_ip
            .parse()
            .map_err(|_| Error::InvalidMulticastIp(self.multicast_ip.clone()))?;
        if !group.is_multicast() {
            return Err(Error::NotMulticast(group));
        }
        if self.read_buffer == 0 {
            return Err(Error::InvalidConfig("read_buffer must be > 0"));
        }
        if self.socket_buffer == 0 {
            return Err(Error::InvalidConfig("socket_buffer must be > 0"));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::InvalidConfig("read_timeout must be > 0"));
        }
        if self.channel_buffer == 0 {
            return Err(Error::InvalidConfig("channel_buffer must be > 0"));
        }
        Ok(group)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            multicast_ip: Self::DEFAULT_MULTICAST_IP.to_string(),
            port: Self::DEFAULT_PORT,
            interface: None,
            read_buffer: Self::DEFAULT_READ_BUFFER,
            socket_buffer: Self::DEFAULT_SOCKET_BUFFER,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            loopback: false,
            channel_buffer: Self::DEFAULT_CHANNEL_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ListenerConfig::default();
        assert_eq!(config.validate().unwrap(), Ipv4Addr::new(239, 0, 0, 1));
    }

    #[test]
    fn rejects_unparseable_ip() {
        let config = ListenerConfig {
            multicast_ip: "invalid".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid multicast IP"));
    }

    #[test]
    fn rejects_unicast_ip() {
        let config = ListenerConfig {
            multicast_ip: "192.168.1.1".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a multicast address"));
    }

    #[test]
    fn rejects_zero_sizes() {
        let config = ListenerConfig {
            read_buffer: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InvalidConfig(_)
        ));

        let config = ListenerConfig {
            read_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InvalidConfig(_)
        ));
    }
}
