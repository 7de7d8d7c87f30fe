//! gRPC stream endpoint.
//!
//! Each `Subscribe` call gets its own bounded queue on the bus and a
//! response stream that drains it. The stream holds a guard that detaches
//! from the bus when it is dropped, so client disconnect, send failure, and
//! server shutdown all tear the subscription down through the same path.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use log::info;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

use crate::bus::{Bus, SubscriberId};
use crate::packet::Packet;
use crate::proto::relay_server::Relay;
use crate::proto::{PayloadMessage, SubscribeRequest};

/// Implementation of the `relaycast.v1.Relay` service.
pub struct RelayService {
    bus: Arc<Bus>,
    channel_buffer: usize,
    shutdown: CancellationToken,
}

impl RelayService {
    pub fn new(bus: Arc<Bus>, channel_buffer: usize, shutdown: CancellationToken) -> Self {
        Self {
            bus,
            channel_buffer,
            shutdown,
        }
    }
}

/// Detaches the subscription when the response stream is dropped.
#[derive(Debug)]
struct DetachGuard {
    bus: Arc<Bus>,
    id: SubscriberId,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.bus.detach(self.id);
        info!("subscriber {} disconnected", self.id);
    }
}

/// Response stream: queued packets translated to wire messages.
#[derive(Debug)]
pub struct PacketStream {
    inner: ReceiverStream<Arc<Packet>>,
    _guard: DetachGuard,
}

impl Stream for PacketStream {
    type Item = std::result::Result<PayloadMessage, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(packet)) => Poll::Ready(Some(Ok(to_message(&packet)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn to_message(packet: &Packet) -> PayloadMessage {
    PayloadMessage {
        payload: packet.data.to_vec(),
        received_at: Some(prost_types::Timestamp {
            seconds: (packet.received_at / 1_000_000_000) as i64,
            nanos: (packet.received_at % 1_000_000_000) as i32,
        }),
    }
}

#[tonic::async_trait]
impl Relay for RelayService {
    type SubscribeStream = PacketStream;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> std::result::Result<Response<Self::SubscribeStream>, Status> {
        if self.shutdown.is_cancelled() {
            return Err(Status::unavailable("relay is shutting down"));
        }

        let (tx, rx) = mpsc::channel(self.channel_buffer);
        let id = self.bus.attach(tx);
        match request.remote_addr() {
            Some(addr) => info!("subscriber {id} connected from {addr}"),
            None => info!("subscriber {id} connected"),
        }

        Ok(Response::new(PacketStream {
            inner: ReceiverStream::new(rx),
            _guard: DetachGuard {
                bus: Arc::clone(&self.bus),
                id,
            },
        }))
    }
}
