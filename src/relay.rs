//! Top-level composition: one receiver, one bus, one stream server, one
//! cancellation token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::bus::Bus;
use crate::config::ListenerConfig;
use crate::metrics::RelayMetrics;
use crate::proto::relay_server::RelayServer;
use crate::receiver::Receiver;
use crate::server::RelayService;
use crate::{Error, Result};

/// Configuration for the whole relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listener: ListenerConfig,

    /// Listen address for the gRPC stream endpoint. Port 0 binds an
    /// ephemeral port; the actual address is available via
    /// [`Relay::local_addr`].
    pub grpc_addr: SocketAddr,

    /// How long shutdown waits for in-flight streams to drain before the
    /// server task is aborted.
    pub shutdown_grace: Duration,
}

impl RelayConfig {
    pub const DEFAULT_GRPC_PORT: u16 = 50051;
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            grpc_addr: SocketAddr::from(([0, 0, 0, 0], Self::DEFAULT_GRPC_PORT)),
            shutdown_grace: Self::DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// A running relay.
///
/// `start` wires the receiver thread and the gRPC server to a shared bus
/// and a shared cancellation token; a fatal error in either worker cancels
/// the token, which the embedding process can observe through
/// [`Relay::shutdown_token`].
pub struct Relay {
    shutdown: CancellationToken,
    bus: Arc<Bus>,
    metrics: Arc<RelayMetrics>,
    grpc_addr: SocketAddr,
    shutdown_grace: Duration,
    receiver_thread: Option<thread::JoinHandle<()>>,
    server_task: tokio::task::JoinHandle<std::result::Result<(), tonic::transport::Error>>,
}

impl Relay {
    pub async fn start(config: RelayConfig) -> Result<Relay> {
        let metrics = Arc::new(RelayMetrics::new()?);
        let mut receiver = Receiver::new(&config.listener, Arc::clone(&metrics))?;
        let bus = receiver.bus();
        let shutdown = CancellationToken::new();

        let listener = TcpListener::bind(config.grpc_addr)
            .await
            .map_err(|e| Error::bind("grpc listener bind failed", e))?;
        let grpc_addr = listener.local_addr()?;

        let receiver_token = shutdown.child_token();
        let fatal = shutdown.clone();
        let receiver_thread = thread::Builder::new()
            .name("relay-receiver".to_string())
            .spawn(move || {
                if let Err(err) = receiver.run(receiver_token) {
                    error!("receiver exited: {err}");
                    fatal.cancel();
                }
            })?;

        let service = RelayService::new(
            Arc::clone(&bus),
            config.listener.channel_buffer,
            shutdown.clone(),
        );
        let fatal = shutdown.clone();
        let signal = shutdown.clone().cancelled_owned();
        let server_task = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(RelayServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await;
            if let Err(ref err) = result {
                error!("grpc server exited: {err}");
                fatal.cancel();
            }
            result
        });

        info!("relay up, streaming on {grpc_addr}");
        Ok(Relay {
            shutdown,
            bus,
            metrics,
            grpc_addr,
            shutdown_grace: config.shutdown_grace,
            receiver_thread: Some(receiver_thread),
            server_task,
        })
    }

    /// Actual gRPC listen address (resolves ephemeral ports).
    pub fn local_addr(&self) -> SocketAddr {
        self.grpc_addr
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Cancelled when shutdown begins or either worker hits a fatal error.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels the token, joins the receiver, and drains the server.
    ///
    /// The receiver observes cancellation within one read timeout. Streams
    /// are ended by closing the bus; if the server has not finished within
    /// the grace period it is aborted.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();

        if let Some(handle) = self.receiver_thread.take() {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!("receiver thread panicked"),
                Err(err) => warn!("receiver join task failed: {err}"),
            }
        }

        // Drop every subscriber sender so in-flight streams end once their
        // queues drain.
        self.bus.close();

        match tokio::time::timeout(self.shutdown_grace, &mut self.server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => return Err(Error::Transport(err)),
            Ok(Err(join_err)) => warn!("grpc server task failed: {join_err}"),
            Err(_) => {
                warn!("shutdown grace period elapsed, aborting grpc server");
                self.server_task.abort();
            }
        }

        info!("relay stopped");
        Ok(())
    }
}
