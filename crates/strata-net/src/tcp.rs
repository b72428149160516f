//! TCP transport built on tokio.
//!
//! The accept loop and one reader plus one writer task per peer run on the
//! tokio runtime. They only exchange bytes with the tick thread: inbound
//! events travel over an unbounded mpsc channel that [`TcpTransport::poll`]
//! drains with `try_recv`, outbound packets over a per-peer channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};
use crate::transport::{PeerId, Transport, TransportError, TransportEvent};

struct PeerHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Tells the reader task to stop without reporting a disconnect.
    close: watch::Sender<bool>,
}

type PeerMap = Arc<Mutex<FxHashMap<PeerId, PeerHandle>>>;

fn lock(peers: &PeerMap) -> MutexGuard<'_, FxHashMap<PeerId, PeerHandle>> {
    peers.lock().unwrap_or_else(|e| e.into_inner())
}

/// Listening TCP transport.
pub struct TcpTransport {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    peers: PeerMap,
    config: FrameConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl TcpTransport {
    /// Bind `addr` and start accepting peers on the current tokio runtime.
    ///
    /// Peers beyond `max_connections` are closed right after accept.
    pub async fn bind(addr: &str, max_connections: usize) -> Result<Self, TransportError> {
        Self::bind_with_config(addr, max_connections, FrameConfig::default()).await
    }

    pub async fn bind_with_config(
        addr: &str,
        max_connections: usize,
        config: FrameConfig,
    ) -> Result<Self, TransportError> {
        let bind_err = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let peers: PeerMap = Arc::new(Mutex::new(FxHashMap::default()));

        tokio::spawn(accept_loop(
            listener,
            max_connections,
            config,
            Arc::clone(&peers),
            events_tx,
            shutdown_rx,
        ));
        tracing::info!("Listening on {local_addr}");

        Ok(Self {
            local_addr,
            events,
            peers,
            config,
            shutdown_tx,
        })
    }

    /// Number of peers with open sockets.
    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }
}

impl Transport for TcpTransport {
    fn poll(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    fn send(&mut self, peer: PeerId, payload: Vec<u8>) -> Result<(), TransportError> {
        self.config.check(payload.len())?;
        let peers = lock(&self.peers);
        let handle = peers.get(&peer).ok_or(TransportError::PeerNotFound(peer))?;
        handle
            .outbound
            .send(payload)
            .map_err(|_| TransportError::PeerNotFound(peer))
    }

    fn disconnect(&mut self, peer: PeerId) {
        // Dropping the outbound sender lets the writer drain and close.
        if let Some(handle) = lock(&self.peers).remove(&peer) {
            let _ = handle.close.send(true);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for (_, handle) in lock(&self.peers).drain() {
            let _ = handle.close.send(true);
        }
        tracing::info!("Transport on {} shut down", self.local_addr);
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for (_, handle) in lock(&self.peers).drain() {
            let _ = handle.close.send(true);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    max_connections: usize,
    config: FrameConfig,
    peers: PeerMap,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let next_peer = AtomicU64::new(1);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {e}");
                        continue;
                    }
                };
                let peer = PeerId(next_peer.fetch_add(1, Ordering::Relaxed));
                if let Err(e) = admit(stream, addr, peer, max_connections, config, &peers, &events) {
                    tracing::warn!("Rejected {addr}: {e}");
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

#[derive(Debug, thiserror::Error)]
enum AdmitError {
    #[error("connection limit of {0} reached")]
    Full(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn admit(
    stream: TcpStream,
    addr: SocketAddr,
    peer: PeerId,
    max_connections: usize,
    config: FrameConfig,
    peers: &PeerMap,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<(), AdmitError> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = watch::channel(false);

    {
        let mut map = lock(peers);
        if map.len() >= max_connections {
            return Err(AdmitError::Full(max_connections));
        }
        map.insert(
            peer,
            PeerHandle {
                outbound: outbound_tx,
                close: close_tx,
            },
        );
    }

    let _ = events.send(TransportEvent::Connected { peer, addr });
    tracing::debug!("Accepted {peer} from {addr}");

    tokio::spawn(write_loop(writer, outbound_rx, config));
    tokio::spawn(read_loop(
        reader,
        peer,
        config,
        Arc::clone(peers),
        events.clone(),
        close_rx,
    ));
    Ok(())
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    peer: PeerId,
    config: FrameConfig,
    peers: PeerMap,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = read_frame(&mut reader, &config) => {
                match result {
                    Ok(payload) => {
                        if events.send(TransportEvent::Received { peer, payload }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if !matches!(e, FrameError::ConnectionClosed) {
                            tracing::debug!("{peer} read failed: {e}");
                        }
                        // Report only if the server side did not close it first.
                        if lock(&peers).remove(&peer).is_some() {
                            let _ = events.send(TransportEvent::Disconnected { peer });
                        }
                        break;
                    }
                }
            }
            _ = close_rx.changed() => {
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    config: FrameConfig,
) {
    while let Some(payload) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &payload, &config).await {
            tracing::debug!("Write failed: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_event(transport: &mut TcpTransport) -> TransportEvent {
        for _ in 0..200 {
            if let Some(event) = transport.poll() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no transport event within one second");
    }

    #[tokio::test]
    async fn test_bind_failure_is_error() {
        let first = TcpTransport::bind("127.0.0.1:0", 4).await.unwrap();
        let taken = first.local_addr().unwrap().to_string();
        let result = TcpTransport::bind(&taken, 4).await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_packets_flow_both_ways() {
        let mut transport = TcpTransport::bind("127.0.0.1:0", 4).await.unwrap();
        let addr = transport.local_addr().unwrap();
        let config = FrameConfig::default();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let TransportEvent::Connected { peer, .. } = next_event(&mut transport).await else {
            panic!("expected connect");
        };

        write_frame(&mut client, b"ping", &config).await.unwrap();
        assert_eq!(
            next_event(&mut transport).await,
            TransportEvent::Received {
                peer,
                payload: b"ping".to_vec()
            }
        );

        transport.send(peer, b"pong".to_vec()).unwrap();
        assert_eq!(read_frame(&mut client, &config).await.unwrap(), b"pong");

        drop(client);
        assert_eq!(
            next_event(&mut transport).await,
            TransportEvent::Disconnected { peer }
        );
        assert_eq!(transport.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_delivers_queued_packets_first() {
        let mut transport = TcpTransport::bind("127.0.0.1:0", 4).await.unwrap();
        let addr = transport.local_addr().unwrap();
        let config = FrameConfig::default();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let TransportEvent::Connected { peer, .. } = next_event(&mut transport).await else {
            panic!("expected connect");
        };

        transport.send(peer, b"bye".to_vec()).unwrap();
        transport.disconnect(peer);

        assert_eq!(read_frame(&mut client, &config).await.unwrap(), b"bye");
        assert!(matches!(
            read_frame(&mut client, &config).await,
            Err(FrameError::ConnectionClosed)
        ));
        assert!(transport.send(peer, b"late".to_vec()).is_err());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let mut transport = TcpTransport::bind("127.0.0.1:0", 1).await.unwrap();
        let addr = transport.local_addr().unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            next_event(&mut transport).await,
            TransportEvent::Connected { .. }
        ));

        let mut second = TcpStream::connect(addr).await.unwrap();
        let result = read_frame(&mut second, &FrameConfig::default()).await;
        assert!(result.is_err());
        assert_eq!(transport.peer_count(), 1);
    }
}
