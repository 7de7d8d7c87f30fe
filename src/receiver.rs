//! UDP multicast receive loop.
//!
//! The receiver owns the multicast socket and a [`Bus`]. It performs
//! blocking reads with a kernel-level deadline (`SO_RCVTIMEO`) so that
//! cancellation is observed within one read timeout, stamps each datagram
//! as soon as the kernel hands it over, copies it into owned storage, and
//! publishes it. The read path is deliberately synchronous: the only
//! asynchrony it needs is "observe cancellation", and the socket deadline
//! provides that.

use std::ffi::CString;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Arc;

use log::{debug, error, info, warn};
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, SubscriberId};
use crate::clock::{Clock, TscClock};
use crate::config::ListenerConfig;
use crate::metrics::RelayMetrics;
use crate::packet::Packet;
use crate::{Error, Result};

/// Receives multicast datagrams and publishes them to the bus.
///
/// Construction validates the config, opens and binds the socket, and joins
/// the group; any failure there is a startup error. `run` then loops until
/// the cancellation token fires.
#[derive(Debug)]
pub struct Receiver<C: Clock = TscClock> {
    socket: UdpSocket,
    bus: Arc<Bus>,
    read_buffer: usize,
    clock: C,
    metrics: Arc<RelayMetrics>,
}

impl Receiver<TscClock> {
    pub fn new(config: &ListenerConfig, metrics: Arc<RelayMetrics>) -> Result<Self> {
        Self::with_clock(config, metrics, TscClock::new())
    }
}

impl<C: Clock> Receiver<C> {
    /// Opens a receiver with a custom timestamp source.
    pub fn with_clock(
        config: &ListenerConfig,
        metrics: Arc<RelayMetrics>,
        clock: C,
    ) -> Result<Self> {
        let group = config.validate()?;
        let socket = open_socket(config, group)?;
        info!(
            "joined multicast group {}:{} (interface: {})",
            group,
            config.port,
            config.interface.as_deref().unwrap_or("kernel-chosen"),
        );
        Ok(Self {
            socket,
            bus: Arc::new(Bus::new(Arc::clone(&metrics))),
            read_buffer: config.read_buffer,
            clock,
            metrics,
        })
    }

    /// The bus this receiver publishes to.
    pub fn bus(&self) -> Arc<Bus> {
        Arc::clone(&self.bus)
    }

    /// Registers a subscriber queue. May be called before or after `run`.
    pub fn subscribe(&self, sender: Sender<Arc<Packet>>) -> SubscriberId {
        self.bus.attach(sender)
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Blocks reading datagrams until the token is cancelled.
    ///
    /// Cancellation is observed within one read timeout. Returns `Ok` on
    /// cancellation or when the socket is closed underneath us; transient
    /// read errors are logged and counted, never fatal.
    pub fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut scratch = vec![0u8; self.read_buffer];
        loop {
            if shutdown.is_cancelled() {
                info!("receiver stopping: shutdown requested");
                return Ok(());
            }
            match self.socket.recv_from(&mut scratch) {
                Ok((n, _src)) => {
                    // Stamp before the copy so the timestamp reflects wire
                    // arrival, not allocator latency.
                    let received_at = self.clock.now_ns();
                    self.metrics.datagrams_received_total.inc();
                    self.metrics.bytes_received_total.inc_by(n as u64);
                    if n == 0 {
                        debug!("ignoring zero-length datagram");
                        continue;
                    }
                    let data = scratch[..n].to_vec().into_boxed_slice();
                    self.bus.publish(Arc::new(Packet::new(data, received_at)));
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    // Deadline tick; loop back around to check cancellation.
                }
                Err(err) if err.raw_os_error() == Some(libc::EBADF) => {
                    info!("receiver stopping: socket closed");
                    return Ok(());
                }
                Err(err) => {
                    self.metrics.socket_read_errors_total.inc();
                    error!("multicast read failed: {err}");
                }
            }
        }
    }
}

/// Resolves an interface name to its kernel index.
fn interface_index(name: &str) -> Result<u32> {
    let cname =
        CString::new(name).map_err(|_| Error::InterfaceNotFound(name.to_string()))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(Error::InterfaceNotFound(name.to_string()));
    }
    Ok(index)
}

fn open_socket(config: &ListenerConfig, group: Ipv4Addr) -> Result<UdpSocket> {
    // Resolve the interface first so a bad name fails before any socket
    // state exists.
    let interface = match &config.interface {
        Some(name) => Some((name.as_str(), interface_index(name)?)),
        None => None,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::bind("udp socket create failed", e))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| Error::bind("SO_REUSEADDR failed", e))?;

    let bind_addr = SocketAddrV4::new(group, config.port);
    socket
        .bind(&bind_addr.into())
        .map_err(|e| Error::bind("udp bind failed", e))?;

    match interface {
        Some((name, index)) => {
            socket
                .join_multicast_v4_n(&group, &InterfaceIndexOrAddress::Index(index))
                .map_err(|e| Error::bind("multicast join failed", e))?;
            debug!("joined {group} on interface {name} (index {index})");
        }
        None => {
            socket
                .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
                .map_err(|e| Error::bind("multicast join failed", e))?;
        }
    }

    socket
        .set_recv_buffer_size(config.socket_buffer)
        .map_err(|e| Error::bind("SO_RCVBUF failed", e))?;
    let granted = socket
        .recv_buffer_size()
        .map_err(|e| Error::bind("SO_RCVBUF readback failed", e))?;
    if granted < config.socket_buffer {
        warn!(
            "kernel clamped SO_RCVBUF to {granted} bytes (requested {})",
            config.socket_buffer
        );
    } else {
        debug!("SO_RCVBUF granted: {granted} bytes");
    }

    if config.loopback {
        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| Error::bind("IP_MULTICAST_LOOP failed", e))?;
    }

    socket
        .set_read_timeout(Some(config.read_timeout))
        .map_err(|e| Error::bind("SO_RCVTIMEO failed", e))?;

    Ok(socket.into())
}
