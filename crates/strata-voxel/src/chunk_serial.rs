//! Chunk file format and the persistence seam used by chunks and worlds.
//!
//! ## Binary layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `"SVCK"` |
//! | 4 | 1 | Format version (`u8`, currently 1) |
//! | 5 | 12 | Chunk coordinate (3 × `i32`, little-endian) |
//! | 17 | N | LZ4 block with prepended size: `CHUNK_VOLUME` voxels, 4 bytes each |

use std::path::{Path, PathBuf};

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::coords::{CHUNK_VOLUME, ChunkCoord};
use crate::voxel::Voxel;

const MAGIC: [u8; 4] = *b"SVCK";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 12;

/// File extension of chunk files.
pub const CHUNK_FILE_EXTENSION: &str = "chunk";

/// Errors reading or writing persisted chunks.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("chunk I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("unsupported chunk format version: {0}")]
    UnsupportedVersion(u8),
    #[error("chunk data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("chunk payload could not be decompressed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    #[error("chunk holds {actual} voxels, expected {expected}")]
    VoxelCount { expected: usize, actual: usize },
    #[error("chunk file is for {found}, expected {expected}")]
    CoordMismatch {
        expected: ChunkCoord,
        found: ChunkCoord,
    },
}

/// Storage backend for chunk voxel data.
pub trait ChunkPersistence: Send {
    /// `Ok(None)` when nothing was ever saved for `coord`.
    fn load_chunk(&mut self, coord: ChunkCoord) -> Result<Option<Vec<Voxel>>, PersistError>;

    fn save_chunk(&mut self, coord: ChunkCoord, voxels: &[Voxel]) -> Result<(), PersistError>;
}

/// Encode a chunk's voxels into the chunk file format.
pub fn encode_chunk(coord: ChunkCoord, voxels: &[Voxel]) -> Result<Vec<u8>, PersistError> {
    if voxels.len() != CHUNK_VOLUME {
        return Err(PersistError::VoxelCount {
            expected: CHUNK_VOLUME,
            actual: voxels.len(),
        });
    }

    let mut raw = Vec::with_capacity(CHUNK_VOLUME * Voxel::ENCODED_LEN);
    for voxel in voxels {
        raw.extend_from_slice(&voxel.to_bytes());
    }
    let compressed = compress_prepend_size(&raw);

    let mut buf = Vec::with_capacity(HEADER_LEN + compressed.len());
    buf.extend_from_slice(&MAGIC);
    buf.push(FORMAT_VERSION);
    for component in [coord.x, coord.y, coord.z] {
        buf.extend_from_slice(&component.to_le_bytes());
    }
    buf.extend_from_slice(&compressed);
    Ok(buf)
}

/// Decode a chunk file into its coordinate and voxels.
pub fn decode_chunk(data: &[u8]) -> Result<(ChunkCoord, Vec<Voxel>), PersistError> {
    if data.len() < MAGIC.len() || data[..4] != MAGIC {
        return Err(PersistError::InvalidMagic);
    }
    if data.len() < HEADER_LEN {
        return Err(PersistError::Truncated {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    let version = data[4];
    if version != FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }

    let read_i32 = |offset: usize| {
        i32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ])
    };
    let coord = ChunkCoord::new(read_i32(5), read_i32(9), read_i32(13));

    let raw = decompress_size_prepended(&data[HEADER_LEN..])?;
    let expected = CHUNK_VOLUME * Voxel::ENCODED_LEN;
    if raw.len() != expected {
        return Err(PersistError::VoxelCount {
            expected: CHUNK_VOLUME,
            actual: raw.len() / Voxel::ENCODED_LEN,
        });
    }

    let voxels = raw
        .chunks_exact(Voxel::ENCODED_LEN)
        .map(|b| Voxel::from_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((coord, voxels))
}

/// One file per chunk inside a directory, named `x_y_z.chunk`.
#[derive(Debug, Clone)]
pub struct ChunkFiles {
    dir: PathBuf,
}

impl ChunkFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, coord: ChunkCoord) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.{CHUNK_FILE_EXTENSION}",
            coord.x, coord.y, coord.z
        ))
    }
}

impl ChunkPersistence for ChunkFiles {
    fn load_chunk(&mut self, coord: ChunkCoord) -> Result<Option<Vec<Voxel>>, PersistError> {
        let path = self.path_for(coord);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (found, voxels) = decode_chunk(&data)?;
        if found != coord {
            return Err(PersistError::CoordMismatch {
                expected: coord,
                found,
            });
        }
        Ok(Some(voxels))
    }

    fn save_chunk(&mut self, coord: ChunkCoord, voxels: &[Voxel]) -> Result<(), PersistError> {
        let bytes = encode_chunk(coord, voxels)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(coord), bytes)?;
        Ok(())
    }
}
