//! Networking: framing, the packet codec, transports, connection management
//! and packet dispatch.

pub mod client;
pub mod connection;
pub mod dispatch;
pub mod framing;
pub mod manager;
pub mod memory;
pub mod protocol;
pub mod tcp;
pub mod transport;

pub use client::{ClientError, ConnectionStateWatch, GameClient};
pub use connection::{
    Connection, ConnectionId, ConnectionState, ConnectionTable, ControllerRef, UsernameRejection,
};
pub use dispatch::{DispatchRegistry, HandlerContext, PacketHandler};
pub use framing::{DEFAULT_MAX_PAYLOAD, FrameConfig, FrameError, read_frame, write_frame};
pub use manager::{
    ConnectionManager, DEFAULT_AUTH_TIMEOUT, DEFAULT_MAX_MALFORMED, DisconnectedClient,
    ManagerConfig, ProcessReport, default_authenticate,
};
pub use memory::{MemoryPeer, MemoryTransport};
pub use protocol::{
    AuthResponse, Authenticate, ChatMessage, ChunkSubscribe, ChunkUnsubscribe, ChunkVoxelData,
    CodecError, MAX_STRING_LEN, Message, Packet, PacketType, REQUEST_PARAMETERS_LEN, Request,
    VoxelInfoBundle, VoxelUpdate,
};
pub use tcp::TcpTransport;
pub use transport::{PeerId, Transport, TransportError, TransportEvent};
