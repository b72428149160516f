//! Chunk-grid and chunk-local coordinates.
//!
//! World positions are integer voxel coordinates ([`IVec3`]). A world
//! position belongs to exactly one chunk; negative coordinates round toward
//! negative infinity, so world x = -1 lives in chunk x = -1 at local x = 15.

use std::fmt;

use glam::IVec3;
use serde::{Deserialize, Serialize};

/// Voxels along each chunk edge.
pub const CHUNK_SIZE: usize = 16;

/// Voxels in one chunk.
pub const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

const SIZE_I32: i32 = CHUNK_SIZE as i32;

/// Lowest chunk coordinate whose voxels have `i32` world positions.
pub const CHUNK_COORD_MIN: i32 = i32::MIN / SIZE_I32;

/// Highest chunk coordinate whose voxels have `i32` world positions.
pub const CHUNK_COORD_MAX: i32 = i32::MAX / SIZE_I32;

/// Position of a chunk in the chunk grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Whether every voxel of this chunk has a world position. Chunks
    /// outside this range can't be generated, edited or stored.
    pub fn is_in_range(self) -> bool {
        let range = CHUNK_COORD_MIN..=CHUNK_COORD_MAX;
        range.contains(&self.x) && range.contains(&self.y) && range.contains(&self.z)
    }

    /// World position of the chunk's (0, 0, 0) voxel, `None` out of range.
    pub fn checked_origin(self) -> Option<IVec3> {
        Some(IVec3::new(
            self.x.checked_mul(SIZE_I32)?,
            self.y.checked_mul(SIZE_I32)?,
            self.z.checked_mul(SIZE_I32)?,
        ))
    }

    /// World position of the chunk's (0, 0, 0) voxel. Saturates for chunks
    /// outside [`is_in_range`](Self::is_in_range).
    pub fn origin(self) -> IVec3 {
        IVec3::new(
            self.x.saturating_mul(SIZE_I32),
            self.y.saturating_mul(SIZE_I32),
            self.z.saturating_mul(SIZE_I32),
        )
    }

    /// World position of `local` inside this chunk, `None` out of range.
    pub fn world_pos(self, local: LocalPos) -> Option<IVec3> {
        let origin = self.checked_origin()?;
        Some(IVec3::new(
            origin.x.checked_add(i32::from(local.x))?,
            origin.y.checked_add(i32::from(local.y))?,
            origin.z.checked_add(i32::from(local.z))?,
        ))
    }

    /// Chebyshev distance in chunks.
    pub fn distance(self, other: ChunkCoord) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        let dz = self.z.abs_diff(other.z);
        dx.max(dy).max(dz)
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Position of a voxel inside its chunk. Always in bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalPos {
    x: u8,
    y: u8,
    z: u8,
}

impl LocalPos {
    /// `None` if any component is `>= CHUNK_SIZE`.
    pub fn new(x: u8, y: u8, z: u8) -> Option<Self> {
        let bound = CHUNK_SIZE as u8;
        (x < bound && y < bound && z < bound).then_some(Self { x, y, z })
    }

    pub fn x(self) -> u8 {
        self.x
    }

    pub fn y(self) -> u8 {
        self.y
    }

    pub fn z(self) -> u8 {
        self.z
    }

    /// Index into the chunk's voxel array: `x + z * 16 + y * 256`.
    pub fn index(self) -> usize {
        self.x as usize + self.z as usize * CHUNK_SIZE + self.y as usize * CHUNK_SIZE * CHUNK_SIZE
    }

    /// Inverse of [`index`](Self::index). `None` past the chunk volume.
    pub fn from_index(index: usize) -> Option<Self> {
        if index >= CHUNK_VOLUME {
            return None;
        }
        let x = index % CHUNK_SIZE;
        let z = (index / CHUNK_SIZE) % CHUNK_SIZE;
        let y = index / (CHUNK_SIZE * CHUNK_SIZE);
        Some(Self {
            x: x as u8,
            y: y as u8,
            z: z as u8,
        })
    }
}

/// Split a world position into its chunk and the position inside it.
pub fn world_to_chunk(pos: IVec3) -> (ChunkCoord, LocalPos) {
    let chunk = ChunkCoord::new(
        pos.x.div_euclid(SIZE_I32),
        pos.y.div_euclid(SIZE_I32),
        pos.z.div_euclid(SIZE_I32),
    );
    let local = LocalPos {
        x: pos.x.rem_euclid(SIZE_I32) as u8,
        y: pos.y.rem_euclid(SIZE_I32) as u8,
        z: pos.z.rem_euclid(SIZE_I32) as u8,
    };
    (chunk, local)
}
