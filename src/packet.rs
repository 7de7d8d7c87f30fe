/// A single datagram as read off the wire.
///
/// `data` is an owned copy of the receiver's scratch buffer, so a packet's
/// lifetime is bound only by its consumers. Packets are shared between
/// subscriber queues as `Arc<Packet>` and never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Datagram bytes, length 1..=read_buffer.
    pub data: Box<[u8]>,

    /// Nanoseconds since the UNIX epoch, stamped immediately after the
    /// kernel returned the datagram and before any copy.
    pub received_at: u64,
}

impl Packet {
    pub fn new(data: Box<[u8]>, received_at: u64) -> Self {
        Self { data, received_at }
    }
}
