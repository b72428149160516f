//! Connection manager: turns transport events into authenticated sessions
//! and dispatched packets.
//!
//! Everything here runs on the tick thread. One call to
//! [`ConnectionManager::process_client_connections`] drains the transport,
//! dispatches what arrived, flushes queued packets, enforces the
//! authentication timeout and tears down connections marked for removal.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use strata_log::Diagnostics;

use crate::connection::{Connection, ConnectionId, ConnectionState, ConnectionTable, ControllerRef};
use crate::dispatch::{DispatchRegistry, HandlerContext};
use crate::protocol::{AuthResponse, Message, PacketType};
use crate::transport::{Transport, TransportError, TransportEvent};

/// Default time an unauthenticated connection may stay silent.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of undecodable packets tolerated from one client.
pub const DEFAULT_MAX_MALFORMED: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub auth_timeout: Duration,
    /// Disconnect once this many malformed packets were received. Zero disables the limit.
    pub max_malformed: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            max_malformed: DEFAULT_MAX_MALFORMED,
        }
    }
}

/// An authenticated client that went away during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectedClient {
    pub id: ConnectionId,
    pub username: String,
    pub address: SocketAddr,
    pub controller: Option<ControllerRef>,
}

impl DisconnectedClient {
    fn from_connection(connection: &Connection) -> Self {
        Self {
            id: connection.id(),
            username: connection.username().to_string(),
            address: connection.address(),
            controller: connection.controller().cloned(),
        }
    }
}

/// What one processing pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// Connections opened this pass.
    pub connected: Vec<ConnectionId>,
    /// Connections that authenticated this pass.
    pub authenticated: Vec<ConnectionId>,
    /// Authenticated clients that left this pass, for any reason.
    pub disconnected: Vec<DisconnectedClient>,
    /// Packets handed to the dispatch registry.
    pub dispatched: usize,
}

/// Accepts `Authenticate` when the requested name is free.
pub fn default_authenticate<S>(message: Message, ctx: &mut HandlerContext<'_, S>) -> bool {
    let Message::Authenticate(auth) = message else {
        return false;
    };
    match ctx.connections.authenticate(ctx.sender, &auth.username) {
        Ok(()) => true,
        Err(rejection) => {
            ctx.diag
                .info(format_args!("{} refused: {rejection}", ctx.sender));
            false
        }
    }
}

/// Owns the transport, the connection table and the dispatch registry.
///
/// `S` is the application state handed to packet handlers.
pub struct ConnectionManager<S> {
    transport: Option<Box<dyn Transport>>,
    connections: ConnectionTable,
    registry: DispatchRegistry<S>,
    config: ManagerConfig,
    diag: Diagnostics,
}

impl<S: 'static> ConnectionManager<S> {
    /// A stopped manager with the default `Authenticate` handler registered.
    pub fn new(config: ManagerConfig, diag: Diagnostics) -> Self {
        let mut registry = DispatchRegistry::new();
        registry.register_fn(PacketType::Authenticate, default_authenticate::<S>);
        Self {
            transport: None,
            connections: ConnectionTable::new(),
            registry,
            config,
            diag,
        }
    }
}

impl<S> ConnectionManager<S> {
    /// Start serving peers of `transport`, which is already bound.
    pub fn start(&mut self, transport: Box<dyn Transport>) -> Result<(), TransportError> {
        if self.transport.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        match transport.local_addr() {
            Some(addr) => self.diag.info(format_args!("Accepting clients on {addr}")),
            None => self.diag.info("Accepting in-process clients"),
        }
        self.transport = Some(transport);
        Ok(())
    }

    /// Shut the transport down and forget every connection.
    ///
    /// Packets still queued are dropped; call [`disconnect_clients`](Self::disconnect_clients)
    /// and run one more pass first for a cooperative shutdown.
    pub fn stop(&mut self) -> Result<(), TransportError> {
        let mut transport = self.transport.take().ok_or(TransportError::NotStarted)?;
        transport.shutdown();
        let dropped = self.connections.len();
        self.connections.kick_all();
        self.connections.drain_disconnected();
        self.connections.take_outbox();
        self.diag
            .info(format_args!("Stopped, {dropped} connection(s) closed"));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(|t| t.local_addr())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &DispatchRegistry<S> {
        &self.registry
    }

    /// Register or replace packet handlers.
    pub fn registry_mut(&mut self) -> &mut DispatchRegistry<S> {
        &mut self.registry
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionTable {
        &mut self.connections
    }

    /// Authenticated clients, as of the last pass.
    pub fn connected_clients(&self) -> impl Iterator<Item = &Connection> {
        self.connections.authenticated()
    }

    pub fn client(&self, username: &str) -> Option<&Connection> {
        self.connections.by_username(username)
    }

    /// Mark every connection for teardown on the next pass.
    pub fn disconnect_clients(&mut self) {
        self.connections.kick_all();
    }

    pub fn process_client_connections(&mut self, state: &mut S) -> ProcessReport {
        self.process_client_connections_at(state, Instant::now())
    }

    /// One pass with an explicit clock, used by tests to drive timeouts.
    pub fn process_client_connections_at(&mut self, state: &mut S, now: Instant) -> ProcessReport {
        let mut report = ProcessReport::default();
        let Some(transport) = self.transport.as_mut() else {
            return report;
        };

        while let Some(event) = transport.poll() {
            match event {
                TransportEvent::Connected { peer, addr } => {
                    let id = self.connections.open(peer, addr, now);
                    self.diag
                        .debug(format_args!("{id} opened from {addr} ({peer})"));
                    report.connected.push(id);
                }
                TransportEvent::Received { peer, payload } => {
                    let Some(id) = self.connections.id_for_peer(peer) else {
                        continue;
                    };
                    on_packet(
                        &mut self.connections,
                        &self.registry,
                        &self.config,
                        &self.diag,
                        state,
                        id,
                        &payload,
                        now,
                        &mut report,
                    );
                }
                TransportEvent::Disconnected { peer } => {
                    let Some(id) = self.connections.id_for_peer(peer) else {
                        continue;
                    };
                    if let Some(connection) = self.connections.remove(id) {
                        self.diag.info(format_args!(
                            "{id} ({}) disconnected",
                            display_name(&connection)
                        ));
                        if connection.is_authenticated() {
                            report
                                .disconnected
                                .push(DisconnectedClient::from_connection(&connection));
                        }
                    }
                }
            }
        }

        self.flush();
        self.enforce_auth_timeout(now);
        self.teardown(&mut report);
        report
    }

    /// Encode and hand every queued packet to the transport.
    ///
    /// Connections whose packets cannot be delivered are marked for teardown.
    pub fn flush(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        for (to, message) in self.connections.take_outbox() {
            let Some(peer) = self.connections.get(to).map(Connection::peer) else {
                continue;
            };
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.diag
                        .error(format_args!("Dropping {:?} for {to}: {e}", message.tag()));
                    continue;
                }
            };
            if let Err(e) = transport.send(peer, bytes) {
                self.diag.warning(format_args!("Send to {to} failed: {e}"));
                self.connections.kick(to);
            }
        }
    }

    fn enforce_auth_timeout(&mut self, now: Instant) {
        let Some(deadline) = now.checked_sub(self.config.auth_timeout) else {
            return;
        };
        for id in self.connections.stale_unauthenticated(deadline) {
            self.diag.info(format_args!(
                "{id} did not authenticate within {:?}",
                self.config.auth_timeout
            ));
            self.connections.kick(id);
        }
    }

    fn teardown(&mut self, report: &mut ProcessReport) {
        let closed = self.connections.drain_disconnected();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        for connection in closed {
            transport.disconnect(connection.peer());
            self.diag.info(format_args!(
                "{} ({}) closed by server",
                connection.id(),
                display_name(&connection)
            ));
            if connection.is_authenticated() {
                report
                    .disconnected
                    .push(DisconnectedClient::from_connection(&connection));
            }
        }
    }
}

fn display_name(connection: &Connection) -> &str {
    if connection.is_authenticated() {
        connection.username()
    } else {
        "unauthenticated"
    }
}

#[allow(clippy::too_many_arguments)]
fn on_packet<S>(
    connections: &mut ConnectionTable,
    registry: &DispatchRegistry<S>,
    config: &ManagerConfig,
    diag: &Diagnostics,
    state: &mut S,
    id: ConnectionId,
    payload: &[u8],
    now: Instant,
    report: &mut ProcessReport,
) {
    let Some(connection) = connections.get_mut(id) else {
        return;
    };
    if connection.state() == ConnectionState::Disconnected {
        return;
    }
    connection.touch(now);
    let authenticated = connection.is_authenticated();
    let decoded = Message::decode(payload);

    if !authenticated {
        // Before authentication the only acceptable packet is Authenticate.
        let username = match &decoded {
            Ok(Message::Authenticate(auth)) => auth.username.clone(),
            Ok(other) => {
                diag.warning(format_args!(
                    "{id} sent {:?} before authenticating",
                    other.tag()
                ));
                connections.kick(id);
                return;
            }
            Err(e) => {
                diag.warning(format_args!("{id} sent garbage before authenticating: {e}"));
                connections.kick(id);
                return;
            }
        };
        let Ok(message) = decoded else {
            return;
        };

        let resolved = {
            let mut ctx = HandlerContext {
                sender: id,
                connections: &mut *connections,
                state,
                diag,
            };
            registry.resolve(message, &mut ctx)
        };
        report.dispatched += 1;

        let already = connections.get(id).is_some_and(Connection::is_authenticated);
        if resolved && !already {
            if let Err(rejection) = connections.authenticate(id, &username) {
                diag.info(format_args!("{id} refused: {rejection}"));
            }
        }
        let accepted = resolved && connections.get(id).is_some_and(Connection::is_authenticated);

        connections.send(id, AuthResponse { accepted });
        if accepted {
            diag.info(format_args!("{id} authenticated as '{username}'"));
            report.authenticated.push(id);
        } else {
            connections.kick(id);
        }
        return;
    }

    match decoded {
        Ok(Message::Authenticate(_)) => {
            diag.warning(format_args!("{id} is already authenticated, ignoring Authenticate"));
        }
        Ok(message) => {
            let mut ctx = HandlerContext {
                sender: id,
                connections: &mut *connections,
                state,
                diag,
            };
            registry.resolve(message, &mut ctx);
            report.dispatched += 1;
        }
        Err(e) => {
            let count = connection_malformed(connections, id);
            diag.warning(format_args!("Malformed packet from {id} ({count}): {e}"));
            if config.max_malformed > 0 && count >= config.max_malformed {
                diag.warning(format_args!("{id} exceeded the malformed packet limit"));
                connections.kick(id);
            }
        }
    }
}

fn connection_malformed(connections: &mut ConnectionTable, id: ConnectionId) -> u32 {
    connections
        .get_mut(id)
        .map(Connection::record_malformed)
        .unwrap_or(0)
}
