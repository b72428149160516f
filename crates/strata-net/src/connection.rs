//! Per-client connection records and the table that owns them.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use rustc_hash::FxHashMap;
use strata_voxel::ChunkCoord;

use crate::protocol::{MAX_STRING_LEN, Message};
use crate::transport::PeerId;

/// Server-side identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Lifecycle of a connection, shared by the server table and [`GameClient`](crate::GameClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is up; not authenticated yet.
    Connecting,
    /// Authenticated and exchanging packets.
    Connected,
    /// Marked for teardown, or already closed.
    Disconnected,
}

/// Weak reference to the player a connection controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRef {
    pub world: String,
    pub player: u64,
}

/// Why a username was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameRejection {
    #[error("username is empty")]
    Empty,
    #[error("username is longer than {MAX_STRING_LEN} bytes")]
    TooLong,
    #[error("username '{0}' is already in use")]
    Taken(String),
}

/// One client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: PeerId,
    address: SocketAddr,
    username: String,
    state: ConnectionState,
    connected_at: Instant,
    last_response: Instant,
    controller: Option<ControllerRef>,
    /// Subscribed chunks, mapped to whether their data was sent since subscribing.
    subscriptions: FxHashMap<ChunkCoord, bool>,
    malformed: u32,
}

impl Connection {
    fn new(id: ConnectionId, peer: PeerId, address: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            peer,
            address,
            username: String::new(),
            state: ConnectionState::Connecting,
            connected_at: now,
            last_response: now,
            controller: None,
            subscriptions: FxHashMap::default(),
            malformed: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Empty until authenticated.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_authenticated(&self) -> bool {
        !self.username.is_empty()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_response(&self) -> Instant {
        self.last_response
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_response = now;
    }

    pub fn controller(&self) -> Option<&ControllerRef> {
        self.controller.as_ref()
    }

    pub fn set_controller(&mut self, controller: Option<ControllerRef>) {
        self.controller = controller;
    }

    /// Subscribe to a chunk. Returns `false` if already subscribed.
    pub fn subscribe(&mut self, chunk: ChunkCoord) -> bool {
        if self.subscriptions.contains_key(&chunk) {
            return false;
        }
        self.subscriptions.insert(chunk, false);
        true
    }

    pub fn unsubscribe(&mut self, chunk: ChunkCoord) -> bool {
        self.subscriptions.remove(&chunk).is_some()
    }

    pub fn is_subscribed(&self, chunk: ChunkCoord) -> bool {
        self.subscriptions.contains_key(&chunk)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.subscriptions.keys().copied()
    }

    /// Whether `chunk` was sent since the subscription started.
    pub fn chunk_sent(&self, chunk: ChunkCoord) -> bool {
        self.subscriptions.get(&chunk).copied().unwrap_or(false)
    }

    pub fn mark_chunk_sent(&mut self, chunk: ChunkCoord) {
        if let Some(sent) = self.subscriptions.get_mut(&chunk) {
            *sent = true;
        }
    }

    pub fn malformed_count(&self) -> u32 {
        self.malformed
    }

    pub(crate) fn record_malformed(&mut self) -> u32 {
        self.malformed += 1;
        self.malformed
    }
}

/// All connections of one manager, plus the packets queued for them.
///
/// Handlers get mutable access through their context; queued packets are
/// flushed by the manager after dispatch.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: FxHashMap<ConnectionId, Connection>,
    by_peer: FxHashMap<PeerId, ConnectionId>,
    outbox: Vec<(ConnectionId, Message)>,
    next_id: u64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&mut self, peer: PeerId, address: SocketAddr, now: Instant) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.connections
            .insert(id, Connection::new(id, peer, address, now));
        self.by_peer.insert(peer, id);
        id
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        self.by_peer.remove(&connection.peer);
        Some(connection)
    }

    pub(crate) fn id_for_peer(&self, peer: PeerId) -> Option<ConnectionId> {
        self.by_peer.get(&peer).copied()
    }

    /// Assign `username` to `id` and promote it to `Connected`.
    ///
    /// The name is checked again here, so two connections can never end up
    /// sharing one even if both passed an earlier [`check_username`](Self::check_username).
    pub fn authenticate(&mut self, id: ConnectionId, username: &str) -> Result<(), UsernameRejection> {
        self.check_username(username)?;
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.username = username.to_string();
            connection.state = ConnectionState::Connected;
        }
        Ok(())
    }

    /// Whether `username` could be assigned right now.
    pub fn check_username(&self, username: &str) -> Result<(), UsernameRejection> {
        if username.trim().is_empty() {
            return Err(UsernameRejection::Empty);
        }
        if username.len() > MAX_STRING_LEN {
            return Err(UsernameRejection::TooLong);
        }
        if self.is_username_taken(username) {
            return Err(UsernameRejection::Taken(username.to_string()));
        }
        Ok(())
    }

    pub fn is_username_taken(&self, username: &str) -> bool {
        self.connections.values().any(|c| c.username == username)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn by_username(&self, username: &str) -> Option<&Connection> {
        self.connections
            .values()
            .find(|c| c.is_authenticated() && c.username == username)
    }

    /// Authenticated connections that are not marked for teardown.
    pub fn authenticated(&self) -> impl Iterator<Item = &Connection> {
        self.connections
            .values()
            .filter(|c| c.is_authenticated() && c.state != ConnectionState::Disconnected)
    }

    pub fn authenticated_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections
            .values_mut()
            .filter(|c| c.is_authenticated() && c.state != ConnectionState::Disconnected)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue a packet for one connection.
    pub fn send(&mut self, to: ConnectionId, message: impl Into<Message>) {
        self.outbox.push((to, message.into()));
    }

    /// Queue a packet for every authenticated connection.
    pub fn broadcast(&mut self, message: impl Into<Message>) {
        let message = message.into();
        let targets: Vec<ConnectionId> = self.authenticated().map(|c| c.id).collect();
        for id in targets {
            self.outbox.push((id, message.clone()));
        }
    }

    /// Mark a connection for teardown at the end of the current pass.
    pub fn kick(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) => {
                connection.state = ConnectionState::Disconnected;
                true
            }
            None => false,
        }
    }

    pub(crate) fn kick_all(&mut self) {
        for connection in self.connections.values_mut() {
            connection.state = ConnectionState::Disconnected;
        }
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<(ConnectionId, Message)> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending_sends(&self) -> usize {
        self.outbox.len()
    }

    /// Remove and return every connection marked `Disconnected`.
    pub(crate) fn drain_disconnected(&mut self) -> Vec<Connection> {
        let marked: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.state == ConnectionState::Disconnected)
            .map(|c| c.id)
            .collect();
        marked.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Unauthenticated connections older than `deadline`.
    pub(crate) fn stale_unauthenticated(&self, deadline: Instant) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| {
                !c.is_authenticated()
                    && c.state == ConnectionState::Connecting
                    && c.connected_at <= deadline
            })
            .map(|c| c.id)
            .collect()
    }
}
