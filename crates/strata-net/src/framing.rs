//! Length-prefixed framing for TCP streams.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   packet           |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length excludes the prefix itself. Each frame carries exactly one
//! encoded packet (see [`protocol`](crate::protocol)).

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Default maximum packet size: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD: u32 = 1_048_576;

/// Limits applied to frames in both directions.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// Largest packet accepted or sent, in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl FrameConfig {
    /// Reject `len` if it exceeds the configured maximum.
    pub fn check(&self, len: usize) -> Result<(), FrameError> {
        if len > self.max_payload_size as usize {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.max_payload_size,
            });
        }
        Ok(())
    }
}

/// Errors reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet is larger than [`FrameConfig::max_payload_size`].
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Size of the offending packet.
        size: usize,
        /// The configured maximum.
        max: u32,
    },

    /// The peer closed the stream, possibly mid-frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn eof_is_closed(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read one frame and return its packet bytes.
///
/// Waits until the whole frame has arrived. A zero-length frame yields an
/// empty packet. Returns [`FrameError::ConnectionClosed`] if the peer hangs
/// up before the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(eof_is_closed)?;

    let len = u32::from_le_bytes(len_buf) as usize;
    config.check(len)?;

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(eof_is_closed)?;
    }
    Ok(payload)
}

/// Write one frame and flush it.
///
/// Oversized packets are rejected before anything reaches the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    config.check(payload.len())?;

    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_stay_separate() {
        let (mut client, mut server) = duplex(1024);
        let config = FrameConfig::default();

        write_frame(&mut client, b"auth", &config).await.unwrap();
        write_frame(&mut client, b"", &config).await.unwrap();
        write_frame(&mut client, b"chat", &config).await.unwrap();

        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"auth");
        assert!(read_frame(&mut server, &config).await.unwrap().is_empty());
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"chat");
    }

    #[tokio::test]
    async fn test_small_pipe_reassembles_frame() {
        let (mut client, mut server) = duplex(8);
        let config = FrameConfig::default();
        let payload = vec![7u8; 300];

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &payload, &config).await.unwrap();
        });
        let received = read_frame(&mut server, &config).await.unwrap();
        writer.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_prefix_layout() {
        let (mut client, mut server) = duplex(64);
        write_frame(&mut client, &[1, 2, 3], &FrameConfig::default())
            .await
            .unwrap();

        let mut raw = [0u8; 7];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [3, 0, 0, 0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_size_limit_both_directions() {
        let config = FrameConfig {
            max_payload_size: 8,
        };
        let (mut client, mut server) = duplex(64);

        let result = write_frame(&mut client, &[0u8; 9], &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { size: 9, .. })));

        client.write_all(&100u32.to_le_bytes()).await.unwrap();
        let result = read_frame(&mut server, &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { size: 100, .. })));
    }

    #[tokio::test]
    async fn test_close_mid_frame() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }
}
