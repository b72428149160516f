//! In-process transport for tests and tools.
//!
//! A [`MemoryTransport`] and its [`MemoryPeer`] handles share one hub; peers
//! push packets the way a network client would and read what the server sent
//! them.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;

use crate::protocol::{CodecError, Message};
use crate::transport::{PeerId, Transport, TransportError, TransportEvent};

#[derive(Default)]
struct PeerSlot {
    inbox: VecDeque<Vec<u8>>,
    open: bool,
}

#[derive(Default)]
struct Hub {
    events: VecDeque<TransportEvent>,
    peers: FxHashMap<PeerId, PeerSlot>,
    next_peer: u64,
    shut_down: bool,
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(|e| e.into_inner())
}

/// Server side of the in-process transport. Cloning shares the hub.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new peer; the server sees a `Connected` event.
    pub fn connect(&self) -> MemoryPeer {
        let mut hub = lock(&self.hub);
        hub.next_peer += 1;
        let peer = PeerId(hub.next_peer);
        let slot = PeerSlot {
            open: !hub.shut_down,
            ..PeerSlot::default()
        };
        hub.peers.insert(peer, slot);
        if !hub.shut_down {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 40_000 + (peer.0 % 20_000) as u16));
            hub.events.push_back(TransportEvent::Connected { peer, addr });
        }
        MemoryPeer {
            id: peer,
            hub: Arc::clone(&self.hub),
        }
    }

    /// Peers the server has not closed.
    pub fn open_peers(&self) -> usize {
        lock(&self.hub).peers.values().filter(|p| p.open).count()
    }
}

impl Transport for MemoryTransport {
    fn poll(&mut self) -> Option<TransportEvent> {
        lock(&self.hub).events.pop_front()
    }

    fn send(&mut self, peer: PeerId, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut hub = lock(&self.hub);
        match hub.peers.get_mut(&peer) {
            Some(slot) if slot.open => {
                slot.inbox.push_back(payload);
                Ok(())
            }
            _ => Err(TransportError::PeerNotFound(peer)),
        }
    }

    fn disconnect(&mut self, peer: PeerId) {
        if let Some(slot) = lock(&self.hub).peers.get_mut(&peer) {
            slot.open = false;
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn shutdown(&mut self) {
        let mut hub = lock(&self.hub);
        hub.shut_down = true;
        for slot in hub.peers.values_mut() {
            slot.open = false;
        }
        hub.events.clear();
    }
}

/// Client end of an in-process connection.
pub struct MemoryPeer {
    id: PeerId,
    hub: Arc<Mutex<Hub>>,
}

impl MemoryPeer {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Send raw packet bytes. Ignored once the connection is closed.
    pub fn send_raw(&self, payload: Vec<u8>) {
        let mut hub = lock(&self.hub);
        let open = hub.peers.get(&self.id).is_some_and(|p| p.open);
        if open {
            hub.events.push_back(TransportEvent::Received {
                peer: self.id,
                payload,
            });
        }
    }

    pub fn send(&self, message: &Message) -> Result<(), CodecError> {
        self.send_raw(message.encode()?);
        Ok(())
    }

    /// Next packet from the server, still encoded.
    pub fn recv_raw(&self) -> Option<Vec<u8>> {
        lock(&self.hub)
            .peers
            .get_mut(&self.id)
            .and_then(|p| p.inbox.pop_front())
    }

    pub fn recv(&self) -> Option<Result<Message, CodecError>> {
        self.recv_raw().map(|bytes| Message::decode(&bytes))
    }

    /// Every decodable packet received so far.
    pub fn drain(&self) -> Vec<Message> {
        std::iter::from_fn(|| self.recv())
            .filter_map(Result::ok)
            .collect()
    }

    /// Whether the server still has this connection open.
    pub fn is_open(&self) -> bool {
        lock(&self.hub).peers.get(&self.id).is_some_and(|p| p.open)
    }

    /// Close from the client side; the server sees `Disconnected`.
    pub fn close(&self) {
        let mut hub = lock(&self.hub);
        let was_open = hub
            .peers
            .get_mut(&self.id)
            .map(|p| std::mem::replace(&mut p.open, false))
            .unwrap_or(false);
        if was_open {
            hub.events
                .push_back(TransportEvent::Disconnected { peer: self.id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AuthResponse;

    #[test]
    fn test_connect_send_and_close() {
        let mut transport = MemoryTransport::new();
        let peer = transport.connect();

        assert!(matches!(
            transport.poll(),
            Some(TransportEvent::Connected { peer: p, .. }) if p == peer.id()
        ));

        peer.send_raw(vec![1, 2]);
        assert_eq!(
            transport.poll(),
            Some(TransportEvent::Received {
                peer: peer.id(),
                payload: vec![1, 2]
            })
        );

        peer.close();
        assert_eq!(
            transport.poll(),
            Some(TransportEvent::Disconnected { peer: peer.id() })
        );
        assert_eq!(transport.poll(), None);
    }

    #[test]
    fn test_server_send_and_disconnect() {
        let mut transport = MemoryTransport::new();
        let peer = transport.connect();
        let message = Message::from(AuthResponse { accepted: true });

        transport.send(peer.id(), message.encode().unwrap()).unwrap();
        transport.disconnect(peer.id());

        // Queued packets survive the disconnect.
        assert_eq!(peer.drain(), vec![message]);
        assert!(!peer.is_open());
        assert!(transport.send(peer.id(), vec![0]).is_err());

        // Closing an already dropped peer reports nothing.
        while transport.poll().is_some() {}
        peer.close();
        assert_eq!(transport.poll(), None);
    }

    #[test]
    fn test_shutdown_closes_everyone() {
        let mut transport = MemoryTransport::new();
        let a = transport.connect();
        let b = transport.connect();
        assert_eq!(transport.open_peers(), 2);

        transport.shutdown();
        assert!(!a.is_open() && !b.is_open());
        assert_eq!(transport.poll(), None);
        assert!(!transport.connect().is_open());
    }
}
