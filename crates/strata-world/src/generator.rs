//! World generators.
//!
//! A generator fills a chunk in two passes. [`generate_chunk`] drives a new
//! chunk through `Loading -> Generating -> Populating -> Ready` around them.

use strata_voxel::{CHUNK_SIZE, Chunk, ChunkCoord, ChunkError, ChunkState, LocalPos, Voxel};

/// Name under which the default generator is registered.
pub const DEFAULT_GENERATOR: &str = "default";

pub trait WorldGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Lay down the base terrain. The chunk is `Generating`.
    fn generate(&self, seed: u64, chunk: &mut Chunk) -> Result<(), ChunkError>;

    /// Add features on top of the terrain. The chunk is `Populating`.
    fn populate(&self, _seed: u64, _chunk: &mut Chunk) -> Result<(), ChunkError> {
        Ok(())
    }
}

/// Build a ready chunk at `coord` with `generator`.
pub fn generate_chunk(
    generator: &dyn WorldGenerator,
    seed: u64,
    coord: ChunkCoord,
) -> Result<Chunk, ChunkError> {
    let mut chunk = Chunk::new(coord);
    chunk.transition(ChunkState::Generating)?;
    generator.generate(seed, &mut chunk)?;
    chunk.transition(ChunkState::Populating)?;
    generator.populate(seed, &mut chunk)?;
    chunk.transition(ChunkState::Ready)?;
    Ok(chunk)
}

/// Flat terrain: `ground` below y = -1, `surface` at y = -1, air above.
#[derive(Debug, Clone)]
pub struct FlatGenerator {
    pub ground: Voxel,
    pub surface: Voxel,
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self {
            ground: Voxel::new(1),
            surface: Voxel::new(3),
        }
    }
}

impl FlatGenerator {
    fn voxel_at(&self, world_y: i32) -> Voxel {
        match world_y {
            y if y < -1 => self.ground,
            -1 => self.surface,
            _ => Voxel::AIR,
        }
    }
}

impl WorldGenerator for FlatGenerator {
    fn name(&self) -> &str {
        DEFAULT_GENERATOR
    }

    fn generate(&self, _seed: u64, chunk: &mut Chunk) -> Result<(), ChunkError> {
        let base_y = chunk.coord().origin().y;
        if base_y >= 0 {
            // Entirely above ground: new chunks are already air.
            return Ok(());
        }
        if base_y + (CHUNK_SIZE as i32) <= -1 {
            return chunk.fill(self.ground);
        }
        let size = CHUNK_SIZE as u8;
        for y in 0..size {
            let voxel = self.voxel_at(base_y + i32::from(y));
            if voxel.is_air() {
                continue;
            }
            for z in 0..size {
                for x in 0..size {
                    if let Some(pos) = LocalPos::new(x, y, z) {
                        chunk.set(pos, voxel)?;
                    }
                }
            }
        }
        Ok(())
    }
}
