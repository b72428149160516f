//! Owner of all loaded chunks of one world, keyed by [`ChunkCoord`].

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

use crate::chunk::{Chunk, ChunkError};
use crate::coords::ChunkCoord;

/// Produces chunks that are not loaded yet.
///
/// Implementations return a `Ready` chunk for `coord`, restored from storage
/// or freshly generated.
pub trait ChunkSource {
    fn provide_chunk(&mut self, coord: ChunkCoord) -> Result<Chunk, ChunkError>;
}

impl<F> ChunkSource for F
where
    F: FnMut(ChunkCoord) -> Result<Chunk, ChunkError>,
{
    fn provide_chunk(&mut self, coord: ChunkCoord) -> Result<Chunk, ChunkError> {
        self(coord)
    }
}

/// Loaded chunks with O(1) lookup.
///
/// Lookups never load anything implicitly; [`get_or_load`](Self::get_or_load)
/// is the one explicit loading path.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: FxHashMap<ChunkCoord, Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    pub fn get_chunk_mut(&mut self, coord: ChunkCoord) -> Option<&mut Chunk> {
        self.chunks.get_mut(&coord)
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    /// Insert a chunk at its own coordinate, returning any chunk it replaced.
    pub fn load_chunk(&mut self, chunk: Chunk) -> Option<Chunk> {
        self.chunks.insert(chunk.coord(), chunk)
    }

    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> Option<Chunk> {
        self.chunks.remove(&coord)
    }

    /// Drop every chunk, returning how many were loaded.
    ///
    /// Only for world shutdown; never during an edit pass or tick.
    pub fn unload_all(&mut self) -> usize {
        let count = self.chunks.len();
        self.chunks.clear();
        count
    }

    /// Loaded chunk at `coord`, loading it synchronously through `source`
    /// when missing.
    pub fn get_or_load(
        &mut self,
        coord: ChunkCoord,
        source: &mut dyn ChunkSource,
    ) -> Result<&mut Chunk, ChunkError> {
        match self.chunks.entry(coord) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let chunk = source.provide_chunk(coord)?;
                if chunk.coord() != coord {
                    return Err(ChunkError::LoadFailed {
                        coord,
                        reason: format!("source produced chunk {}", chunk.coord()),
                    });
                }
                Ok(entry.insert(chunk))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.chunks.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChunkCoord, &Chunk)> {
        self.chunks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ChunkCoord, &mut Chunk)> {
        self.chunks.iter_mut()
    }

    /// Coordinates of chunks with the given dirty flag set.
    pub fn dirty_coords(&self, flag: u8) -> Vec<ChunkCoord> {
        self.chunks
            .iter()
            .filter(|(_, chunk)| chunk.has_flag(flag))
            .map(|(coord, _)| *coord)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkState, SAVE_DIRTY};
    use crate::coords::{CHUNK_VOLUME, LocalPos};
    use crate::voxel::Voxel;

    fn restored(coord: ChunkCoord) -> Chunk {
        Chunk::restored(coord, vec![Voxel::AIR; CHUNK_VOLUME]).unwrap()
    }

    #[test]
    fn test_get_does_not_load() {
        let store = ChunkStore::new();
        assert!(store.get_chunk(ChunkCoord::new(0, 0, 0)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_replace_unload() {
        let mut store = ChunkStore::new();
        let coord = ChunkCoord::new(1, 2, 3);
        assert!(store.load_chunk(restored(coord)).is_none());
        assert!(store.load_chunk(restored(coord)).is_some());
        assert_eq!(store.len(), 1);

        assert!(store.unload_chunk(coord).is_some());
        assert!(store.unload_chunk(coord).is_none());
        assert!(!store.contains(coord));
    }

    #[test]
    fn test_get_or_load_uses_source_once() {
        let mut store = ChunkStore::new();
        let mut calls = 0;
        let mut source = |coord: ChunkCoord| -> Result<Chunk, ChunkError> {
            calls += 1;
            Ok(restored(coord))
        };
        let coord = ChunkCoord::new(0, -1, 0);
        store.get_or_load(coord, &mut source).unwrap();
        let chunk = store.get_or_load(coord, &mut source).unwrap();
        assert_eq!(chunk.state(), ChunkState::Ready);
        drop(source);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_get_or_load_propagates_failure() {
        let mut store = ChunkStore::new();
        let mut source = |coord: ChunkCoord| -> Result<Chunk, ChunkError> {
            Err(ChunkError::LoadFailed {
                coord,
                reason: "offline".into(),
            })
        };
        assert!(store.get_or_load(ChunkCoord::default(), &mut source).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_or_load_rejects_wrong_coordinate() {
        let mut store = ChunkStore::new();
        let mut source =
            |_coord: ChunkCoord| -> Result<Chunk, ChunkError> { Ok(restored(ChunkCoord::new(5, 5, 5))) };
        let result = store.get_or_load(ChunkCoord::default(), &mut source);
        assert!(matches!(result, Err(ChunkError::LoadFailed { .. })));
    }

    #[test]
    fn test_unload_all_and_dirty_coords() {
        let mut store = ChunkStore::new();
        for x in 0..3 {
            store.load_chunk(restored(ChunkCoord::new(x, 0, 0)));
        }
        let edited = ChunkCoord::new(1, 0, 0);
        store
            .get_chunk_mut(edited)
            .unwrap()
            .set(LocalPos::new(0, 0, 0).unwrap(), Voxel::new(1))
            .unwrap();
        assert_eq!(store.dirty_coords(SAVE_DIRTY), vec![edited]);

        assert_eq!(store.unload_all(), 3);
        assert!(store.is_empty());
    }
}
