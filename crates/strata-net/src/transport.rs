//! The seam between the connection manager and the network.
//!
//! A [`Transport`] owns the physical peers and exchanges whole packets with
//! the tick thread. It never blocks: [`poll`](Transport::poll) returns
//! immediately when nothing is pending.

use std::fmt;
use std::net::SocketAddr;

use crate::framing::FrameError;

/// Identifies one physical peer of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Something that happened on the network since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { peer: PeerId, addr: SocketAddr },
    /// One complete packet.
    Received { peer: PeerId, payload: Vec<u8> },
    /// The peer went away on its own.
    Disconnected { peer: PeerId },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown or closed {0}")]
    PeerNotFound(PeerId),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("transport already started")]
    AlreadyStarted,
    #[error("transport not started")]
    NotStarted,
}

/// Non-blocking packet transport.
pub trait Transport: Send {
    /// Next pending event, if any.
    fn poll(&mut self) -> Option<TransportEvent>;

    /// Queue one packet for `peer`.
    fn send(&mut self, peer: PeerId, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Close `peer` after packets already queued for it are delivered.
    ///
    /// No `Disconnected` event is reported for peers closed this way.
    fn disconnect(&mut self, peer: PeerId);

    fn local_addr(&self) -> Option<SocketAddr>;

    /// Stop accepting peers and close every open one.
    fn shutdown(&mut self);
}
