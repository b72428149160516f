//! Packet catalogue and wire codec.
//!
//! Every packet is `[tag: u16 LE][postcard payload]`. The tag names exactly
//! one payload type; decoding rejects unknown tags before looking at the
//! payload and rejects payloads with trailing bytes. Tags are append-only:
//! never reorder or remove an existing [`PacketType`].

use glam::IVec3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_voxel::{CHUNK_VOLUME, ChunkCoord, Voxel};

/// Maximum encoded length of any string field, in bytes.
pub const MAX_STRING_LEN: usize = 255;

/// Size of the opaque parameter block in a [`Request`].
pub const REQUEST_PARAMETERS_LEN: usize = 16;

/// Wire tag of every packet kind.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Authenticate = 0,
    AuthResponse = 1,
    ChatMessage = 2,
    Request = 3,
    ChunkSubscribe = 4,
    ChunkUnsubscribe = 5,
    ChunkVoxelData = 6,
    VoxelUpdate = 7,
    VoxelInfoBundle = 8,
}

impl PacketType {
    pub const ALL: [PacketType; 9] = [
        PacketType::Authenticate,
        PacketType::AuthResponse,
        PacketType::ChatMessage,
        PacketType::Request,
        PacketType::ChunkSubscribe,
        PacketType::ChunkUnsubscribe,
        PacketType::ChunkVoxelData,
        PacketType::VoxelUpdate,
        PacketType::VoxelInfoBundle,
    ];

    pub fn from_u16(tag: u16) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Client asks to join under `username`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticate {
    pub username: String,
}

/// Server verdict on an [`Authenticate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub accepted: bool,
}

/// Chat line. The server overwrites `sender` and `timestamp` before relaying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub sender: String,
    pub text: String,
}

/// Ask the server to send a packet of type `requested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub requested: PacketType,
    /// Caller-defined parameters, meaning depends on `requested`.
    pub parameters: [u8; REQUEST_PARAMETERS_LEN],
}

impl Request {
    pub fn new(requested: PacketType) -> Self {
        Self {
            requested,
            parameters: [0; REQUEST_PARAMETERS_LEN],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSubscribe {
    pub chunk: ChunkCoord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUnsubscribe {
    pub chunk: ChunkCoord,
}

/// Full voxel contents of one chunk, in chunk index order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkVoxelData {
    pub chunk: ChunkCoord,
    pub voxels: Vec<Voxel>,
}

/// Set the voxel at a world position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelUpdate {
    pub position: IVec3,
    pub voxel: Voxel,
}

/// The server's voxel catalogue document, byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelInfoBundle {
    pub document: Vec<u8>,
}

/// Any packet, tagged by its [`PacketType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Authenticate(Authenticate),
    AuthResponse(AuthResponse),
    ChatMessage(ChatMessage),
    Request(Request),
    ChunkSubscribe(ChunkSubscribe),
    ChunkUnsubscribe(ChunkUnsubscribe),
    ChunkVoxelData(ChunkVoxelData),
    VoxelUpdate(VoxelUpdate),
    VoxelInfoBundle(VoxelInfoBundle),
}

/// A payload type with a fixed tag.
pub trait Packet: Serialize + DeserializeOwned + Sized {
    const TYPE: PacketType;

    fn into_message(self) -> Message;

    /// The payload, or the message back if it is another variant.
    fn from_message(message: Message) -> Result<Self, Message>;
}

macro_rules! packets {
    ($($name:ident),* $(,)?) => {
        $(
            impl Packet for $name {
                const TYPE: PacketType = PacketType::$name;

                fn into_message(self) -> Message {
                    Message::$name(self)
                }

                fn from_message(message: Message) -> Result<Self, Message> {
                    match message {
                        Message::$name(payload) => Ok(payload),
                        other => Err(other),
                    }
                }
            }

            impl From<$name> for Message {
                fn from(payload: $name) -> Self {
                    Message::$name(payload)
                }
            }
        )*

        impl Message {
            /// Tag written on the wire for this message.
            pub fn tag(&self) -> PacketType {
                match self {
                    $(Message::$name(_) => PacketType::$name,)*
                }
            }

            fn encode_payload(&self, buf: Vec<u8>) -> Result<Vec<u8>, postcard::Error> {
                match self {
                    $(Message::$name(payload) => postcard::to_extend(payload, buf),)*
                }
            }

            fn decode_payload(tag: PacketType, bytes: &[u8]) -> Result<Message, CodecError> {
                match tag {
                    $(PacketType::$name => take_exact::<$name>(bytes),)*
                }
            }
        }
    };
}

packets!(
    Authenticate,
    AuthResponse,
    ChatMessage,
    Request,
    ChunkSubscribe,
    ChunkUnsubscribe,
    ChunkVoxelData,
    VoxelUpdate,
    VoxelInfoBundle,
);

/// Errors encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("packet shorter than its tag")]
    MissingTag,
    #[error("unknown packet tag {0}")]
    UnknownTag(u16),
    #[error("malformed {tag:?} payload: {source}")]
    Payload {
        tag: PacketType,
        #[source]
        source: postcard::Error,
    },
    #[error("{tag:?} payload has {count} trailing bytes")]
    TrailingBytes { tag: PacketType, count: usize },
    #[error("field '{field}' is {len} bytes, maximum is {MAX_STRING_LEN}")]
    StringTooLong { field: &'static str, len: usize },
    #[error("chunk data holds {0} voxels, expected {CHUNK_VOLUME}")]
    VoxelCount(usize),
    #[error("chunk {0} is outside the world")]
    ChunkOutOfRange(ChunkCoord),
}

fn take_exact<T: Packet>(bytes: &[u8]) -> Result<Message, CodecError> {
    let (payload, rest) = postcard::take_from_bytes::<T>(bytes).map_err(|source| {
        CodecError::Payload {
            tag: T::TYPE,
            source,
        }
    })?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes {
            tag: T::TYPE,
            count: rest.len(),
        });
    }
    Ok(payload.into_message())
}

fn check_chunk(chunk: ChunkCoord) -> Result<(), CodecError> {
    if !chunk.is_in_range() {
        return Err(CodecError::ChunkOutOfRange(chunk));
    }
    Ok(())
}

fn check_str(field: &'static str, value: &str) -> Result<(), CodecError> {
    if value.len() > MAX_STRING_LEN {
        return Err(CodecError::StringTooLong {
            field,
            len: value.len(),
        });
    }
    Ok(())
}

impl Message {
    /// Check field limits that the type system can't express.
    pub fn validate(&self) -> Result<(), CodecError> {
        match self {
            Message::Authenticate(auth) => check_str("username", &auth.username),
            Message::ChatMessage(chat) => {
                check_str("sender", &chat.sender)?;
                check_str("text", &chat.text)
            }
            Message::ChunkSubscribe(subscribe) => check_chunk(subscribe.chunk),
            Message::ChunkUnsubscribe(unsubscribe) => check_chunk(unsubscribe.chunk),
            Message::ChunkVoxelData(data) => {
                check_chunk(data.chunk)?;
                if data.voxels.len() != CHUNK_VOLUME {
                    return Err(CodecError::VoxelCount(data.voxels.len()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Encode to `[tag][payload]`.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.validate()?;
        let tag = self.tag();
        let buf = tag.as_u16().to_le_bytes().to_vec();
        self.encode_payload(buf)
            .map_err(|source| CodecError::Payload { tag, source })
    }

    /// Decode one packet. The whole buffer must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
        let (tag_bytes, payload) = bytes.split_first_chunk::<2>().ok_or(CodecError::MissingTag)?;
        let raw_tag = u16::from_le_bytes(*tag_bytes);
        let tag = PacketType::from_u16(raw_tag).ok_or(CodecError::UnknownTag(raw_tag))?;
        let message = Message::decode_payload(tag, payload)?;
        message.validate()?;
        Ok(message)
    }
}
