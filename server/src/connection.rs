//! Per-connection state and socket I/O.
//!
//! Each accepted socket gets two helper tasks: a reader that decodes frames
//! into [`ClientPacket`]s and a writer that drains the outbound queue. The
//! maintenance loop never touches the socket directly; it pumps decoded
//! packets with [`Connection::receive`] and queues replies with
//! [`Connection::send`], neither of which blocks.

use crate::admission::DestinationResolver;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{ClientPacket, ServerPacket};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Connections keyed by id. Lobbies refer to members through this map.
pub type ConnectionMap = HashMap<u64, Connection>;

/// Decoded packets buffered per connection. A full inbox stops the reader
/// task, which stops reading the socket.
pub const INBOX_CAPACITY: usize = 256;

/// Events produced by the reader task.
#[derive(Debug)]
pub(crate) enum Inbound {
    Packet(ClientPacket),
    Closed(String),
}

pub struct Connection {
    id: u64,
    peer: SocketAddr,
    active: bool,
    pub(crate) lobby: Option<u64>,
    pub(crate) destination_id: u64,
    pub(crate) priority: u32,
    outbox: Option<mpsc::UnboundedSender<ServerPacket>>,
    inbox: mpsc::Receiver<Inbound>,
    pending: VecDeque<ClientPacket>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Connection {
    /// Takes ownership of an accepted socket and starts its I/O tasks.
    /// Must be called from within a tokio runtime.
    pub fn spawn(id: u64, stream: TcpStream, peer: SocketAddr) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("[{}] Failed to set TCP_NODELAY: {}", id, e);
        }
        let (read_half, write_half) = stream.into_split();
        let (inbound_tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let (outbox, outbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(id, read_half, inbound_tx));
        let writer = tokio::spawn(write_loop(id, write_half, outbound_rx));

        Self {
            id,
            peer,
            active: true,
            lobby: None,
            destination_id: 0,
            priority: 0,
            outbox: Some(outbox),
            inbox,
            pending: VecDeque::new(),
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// Handshake step run by the accept loop before anything is sent.
    pub fn begin(&mut self, resolver: &dyn DestinationResolver) {
        self.destination_id = resolver.resolve(self.id, self.peer);
        debug!(
            "[{}] Connection from {} routed to destination {}",
            self.id, self.peer, self.destination_id
        );
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn lobby(&self) -> Option<u64> {
        self.lobby
    }

    pub fn destination_id(&self) -> u64 {
        self.destination_id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Queues a packet for the writer task. Packets sent after a disconnect
    /// are dropped.
    pub fn send(&self, packet: ServerPacket) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        if outbox.send(packet).is_err() {
            debug!("[{}] Dropped packet, writer is gone", self.id);
        }
    }

    /// Moves what the reader task decoded since the last call into the
    /// pending queue, up to [`INBOX_CAPACITY`] pending packets. A closed socket
    /// flips the connection inactive.
    pub fn receive(&mut self) {
        if !self.active {
            return;
        }
        while self.pending.len() < INBOX_CAPACITY {
            match self.inbox.try_recv() {
                Ok(Inbound::Packet(packet)) => self.pending.push_back(packet),
                Ok(Inbound::Closed(reason)) => {
                    info!("[{}] Connection closed: {}", self.id, reason);
                    self.shutdown(true);
                    break;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.shutdown(true);
                    break;
                }
            }
        }
    }

    /// Next packet waiting for dispatch, if the connection is still active.
    pub fn next_packet(&mut self) -> Option<ClientPacket> {
        if !self.active {
            return None;
        }
        self.pending.pop_front()
    }

    /// Starts teardown and marks the connection inactive.
    ///
    /// A forced disconnect aborts both I/O tasks at once. Otherwise the writer
    /// is left to flush whatever is already queued before it closes the
    /// socket. Lobby membership is the caller's business.
    pub fn disconnect(&mut self, force: bool) {
        if !self.active {
            return;
        }
        info!(
            "[{}] Disconnecting{}",
            self.id,
            if force { " (forced)" } else { "" }
        );
        self.shutdown(force);
    }

    fn shutdown(&mut self, force: bool) {
        self.active = false;
        self.outbox = None;
        self.pending.clear();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            if force {
                writer.abort();
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

async fn read_loop(id: u64, read_half: OwnedReadHalf, inbound: mpsc::Sender<Inbound>) {
    let mut frames = FramedRead::new(read_half, shared::frame_codec());

    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => match shared::decode::<ClientPacket>(&frame) {
                Ok(packet) => {
                    if inbound.send(Inbound::Packet(packet)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("[{}] Malformed packet skipped: {}", id, e),
            },
            Some(Err(e)) => break e.to_string(),
            None => break "closed by peer".to_string(),
        }
    };

    let _ = inbound.send(Inbound::Closed(reason)).await;
}

async fn write_loop(
    id: u64,
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<ServerPacket>,
) {
    let mut frames = FramedWrite::new(write_half, shared::frame_codec());

    while let Some(packet) = outbound.recv().await {
        let bytes = match shared::encode(&packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[{}] Failed to encode {:?}: {}", id, packet, e);
                continue;
            }
        };
        if let Err(e) = frames.send(Bytes::from(bytes)).await {
            debug!("[{}] Write failed: {}", id, e);
            return;
        }
    }

    if let Err(e) = SinkExt::<Bytes>::close(&mut frames).await {
        debug!("[{}] Failed to close socket: {}", id, e);
    }
}

/// The far side of a connection built by [`Connection::detached`].
#[cfg(test)]
pub(crate) struct Remote {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::UnboundedReceiver<ServerPacket>,
}

#[cfg(test)]
impl Remote {
    pub fn push(&self, packet: ClientPacket) {
        self.inbound.try_send(Inbound::Packet(packet)).unwrap();
    }

    pub fn close(&self) {
        self.inbound
            .try_send(Inbound::Closed("test close".to_string()))
            .unwrap();
    }

    pub fn drain(&mut self) -> Vec<ServerPacket> {
        let mut packets = Vec::new();
        while let Ok(packet) = self.outbound.try_recv() {
            packets.push(packet);
        }
        packets
    }
}

#[cfg(test)]
impl Connection {
    /// A connection backed by channels instead of a socket.
    pub(crate) fn detached(id: u64) -> (Self, Remote) {
        let (inbound, inbox) = mpsc::channel(INBOX_CAPACITY);
        let (outbox, outbound) = mpsc::unbounded_channel();
        let connection = Self {
            id,
            peer: SocketAddr::from(([127, 0, 0, 1], 40000 + (id % 20000) as u16)),
            active: true,
            lobby: None,
            destination_id: id,
            priority: 0,
            outbox: Some(outbox),
            inbox,
            pending: VecDeque::new(),
            reader: None,
            writer: None,
        };
        (connection, Remote { inbound, outbound })
    }
}
