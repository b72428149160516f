//! Voxel storage for the Strata server: voxels, chunks and their lifecycle,
//! the per-world chunk store, the deferred edit queue, the voxel type
//! catalogue and the chunk file format.

mod chunk;
mod chunk_serial;
mod chunk_store;
mod coords;
mod editor;
mod registry;
mod voxel;

pub use chunk::{Chunk, ChunkError, ChunkState, NETWORK_DIRTY, SAVE_DIRTY};
pub use chunk_serial::{
    CHUNK_FILE_EXTENSION, ChunkFiles, ChunkPersistence, PersistError, decode_chunk, encode_chunk,
};
pub use chunk_store::{ChunkSource, ChunkStore};
pub use coords::{
    CHUNK_COORD_MAX, CHUNK_COORD_MIN, CHUNK_SIZE, CHUNK_VOLUME, ChunkCoord, LocalPos,
    world_to_chunk,
};
pub use editor::{ApplyReport, RegionPredicate, VoxelEditor};
pub use registry::{CatalogueError, GraphicsHints, VoxelTypeDef, VoxelTypeRegistry};
pub use voxel::{AIR_ID, Voxel};
