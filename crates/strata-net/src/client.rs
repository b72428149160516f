//! TCP client for a strata server.
//!
//! [`GameClient::connect`] performs the authentication handshake before it
//! returns. Afterwards a reader task decodes inbound frames into
//! [`Message`]s and a writer task drains the outbound queue. State changes
//! are broadcast via a [`watch`] channel so any number of consumers can react
//! without polling.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::connection::ConnectionState;
use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};
use crate::protocol::{Authenticate, CodecError, Message};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("no authentication response within {0:?}")]
    Timeout(Duration),
    #[error("server refused username '{0}'")]
    Rejected(String),
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// An authenticated session with a server.
pub struct GameClient {
    username: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Message>,
    /// Packets that arrived while waiting for the handshake.
    buffered: VecDeque<Message>,
    state: Arc<ConnectionStateWatch>,
    shutdown_tx: watch::Sender<bool>,
    config: FrameConfig,
}

impl GameClient {
    /// Connect to `addr` and authenticate as `username`.
    ///
    /// `timeout` bounds the whole handshake. On failure the session is torn
    /// down before the error is returned.
    pub async fn connect(
        addr: SocketAddr,
        username: &str,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Self::connect_with_config(addr, username, timeout, FrameConfig::default()).await
    }

    pub async fn connect_with_config(
        addr: SocketAddr,
        username: &str,
        timeout: Duration,
        config: FrameConfig,
    ) -> Result<Self, ClientError> {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                state.set(ConnectionState::Disconnected);
                return Err(ClientError::Connect { addr, source });
            }
            Err(_) => {
                state.set(ConnectionState::Disconnected);
                return Err(ClientError::Timeout(timeout));
            }
        };
        stream
            .set_nodelay(true)
            .map_err(|source| ClientError::Connect { addr, source })?;

        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(write_loop(writer, outbound_rx, config, shutdown_rx.clone()));
        tokio::spawn(read_loop(
            reader,
            inbound_tx,
            config,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let mut client = Self {
            username: username.to_string(),
            outbound,
            inbound,
            buffered: VecDeque::new(),
            state,
            shutdown_tx,
            config,
        };

        match client.handshake(timeout).await {
            Ok(()) => {
                client.state.set(ConnectionState::Connected);
                tracing::info!("Connected to {addr} as '{username}'");
                Ok(client)
            }
            Err(e) => {
                client.disconnect();
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, timeout: Duration) -> Result<(), ClientError> {
        self.send(&Message::from(Authenticate {
            username: self.username.clone(),
        }))?;

        let inbound = &mut self.inbound;
        let buffered = &mut self.buffered;
        let accepted = tokio::time::timeout(timeout, async {
            loop {
                match inbound.recv().await {
                    Some(Message::AuthResponse(response)) => return Ok(response.accepted),
                    Some(other) => buffered.push_back(other),
                    None => return Err(ClientError::Closed),
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout(timeout))??;

        if accepted {
            Ok(())
        } else {
            Err(ClientError::Rejected(self.username.clone()))
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    pub fn state_watch(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Queue a packet for the server.
    pub fn send(&self, message: &Message) -> Result<(), ClientError> {
        let bytes = message.encode()?;
        self.config.check(bytes.len())?;
        self.outbound.send(bytes).map_err(|_| ClientError::Closed)
    }

    /// Wait for the next packet. `None` once the connection is closed and
    /// everything received was consumed.
    pub async fn recv(&mut self) -> Option<Message> {
        if let Some(message) = self.buffered.pop_front() {
            return Some(message);
        }
        self.inbound.recv().await
    }

    /// Next packet if one is already here.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.buffered
            .pop_front()
            .or_else(|| self.inbound.try_recv().ok())
    }

    /// Close the session. Packets already queued are still written.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.set(ConnectionState::Disconnected);
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Message>,
    config: FrameConfig,
    state: Arc<ConnectionStateWatch>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = read_frame(&mut reader, &config) => {
                match result {
                    Ok(bytes) => match Message::decode(&bytes) {
                        Ok(message) => {
                            if inbound.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Dropping undecodable packet: {e}"),
                    },
                    Err(e) => {
                        if !matches!(e, FrameError::ConnectionClosed) {
                            tracing::debug!("Read failed: {e}");
                        }
                        state.set(ConnectionState::Disconnected);
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    config: FrameConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(bytes) = next else { break };
                if let Err(e) = write_frame(&mut writer, &bytes, &config).await {
                    tracing::debug!("Write failed: {e}");
                    return;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    // Flush what was queued before the disconnect.
                    while let Ok(bytes) = outbound.try_recv() {
                        if write_frame(&mut writer, &bytes, &config).await.is_err() {
                            return;
                        }
                    }
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AuthResponse, ChatMessage};
    use tokio::net::TcpListener;

    /// One-connection server that answers Authenticate according to `accept`,
    /// optionally sending a chat line first.
    async fn fake_server(accept: Option<bool>, chat_first: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let config = FrameConfig::default();
            let (mut stream, _) = listener.accept().await.unwrap();
            let bytes = read_frame(&mut stream, &config).await.unwrap();
            assert!(matches!(Message::decode(&bytes), Ok(Message::Authenticate(_))));

            if chat_first {
                let chat = Message::from(ChatMessage {
                    timestamp: 3,
                    sender: "server".into(),
                    text: "welcome".into(),
                });
                write_frame(&mut stream, &chat.encode().unwrap(), &config)
                    .await
                    .unwrap();
            }
            if let Some(accepted) = accept {
                let response = Message::from(AuthResponse { accepted });
                write_frame(&mut stream, &response.encode().unwrap(), &config)
                    .await
                    .unwrap();
            }
            // Keep the socket open until the client goes away.
            let _ = read_frame(&mut stream, &config).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_connect_authenticates() {
        let addr = fake_server(Some(true), false).await;
        let client = GameClient::connect(addr, "alice", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.username(), "alice");
    }

    #[tokio::test]
    async fn test_rejection_is_error() {
        let addr = fake_server(Some(false), false).await;
        let result = GameClient::connect(addr, "alice", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ClientError::Rejected(name)) if name == "alice"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let addr = fake_server(None, false).await;
        let result = GameClient::connect(addr, "alice", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_packets_before_response_are_kept() {
        let addr = fake_server(Some(true), true).await;
        let mut client = GameClient::connect(addr, "bob", Duration::from_secs(2))
            .await
            .unwrap();
        let Some(Message::ChatMessage(chat)) = client.try_recv() else {
            panic!("expected the buffered chat line");
        };
        assert_eq!(chat.text, "welcome");
    }

    #[tokio::test]
    async fn test_disconnect_updates_state() {
        let addr = fake_server(Some(true), false).await;
        let client = GameClient::connect(addr, "carol", Duration::from_secs(2))
            .await
            .unwrap();
        let mut watch = client.state_watch().subscribe();
        client.disconnect();
        assert_eq!(*watch.borrow_and_update(), ConnectionState::Disconnected);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_watch_starts_disconnected() {
        let watch = ConnectionStateWatch::new();
        assert_eq!(watch.current(), ConnectionState::Disconnected);
        watch.set(ConnectionState::Connecting);
        assert_eq!(*watch.subscribe().borrow(), ConnectionState::Connecting);
    }
}
