//! A fixed-size voxel grid with lifecycle state and dirty tracking.
//!
//! Chunks move through `Loading -> Generating -> Populating -> Ready`, or
//! straight from `Loading` to `Ready` when restored from storage. The chunk
//! doesn't drive these transitions itself; the generator pipeline does.
//! Voxel data may only change while generating, populating or ready, and
//! only ready chunks are ticked, saved or exposed to gameplay.

use std::fmt;

use crate::chunk_serial::{ChunkPersistence, PersistError};
use crate::coords::{CHUNK_VOLUME, ChunkCoord, LocalPos};
use crate::voxel::Voxel;

/// Dirty-flag bit: chunk needs saving.
pub const SAVE_DIRTY: u8 = 0b0000_0001;
/// Dirty-flag bit: chunk needs to be resent to subscribed clients.
pub const NETWORK_DIRTY: u8 = 0b0000_0010;

const ALL_DIRTY: u8 = SAVE_DIRTY | NETWORK_DIRTY;

/// Lifecycle state of a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// Exists but holds no meaningful voxel data yet.
    Loading,
    Generating,
    Populating,
    Ready,
}

impl ChunkState {
    fn can_transition_to(self, next: ChunkState) -> bool {
        matches!(
            (self, next),
            (ChunkState::Loading, ChunkState::Generating)
                | (ChunkState::Loading, ChunkState::Ready)
                | (ChunkState::Generating, ChunkState::Populating)
                | (ChunkState::Populating, ChunkState::Ready)
        )
    }

    fn is_writable(self) -> bool {
        !matches!(self, ChunkState::Loading)
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors from chunk operations.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("invalid chunk transition {from} -> {to}")]
    InvalidTransition { from: ChunkState, to: ChunkState },
    #[error("chunk voxels are not writable while {0}")]
    NotWritable(ChunkState),
    #[error("chunk is not ready (state {0})")]
    NotReady(ChunkState),
    #[error("expected {expected} voxels, got {actual}")]
    VoxelCount { expected: usize, actual: usize },
    #[error("chunk {coord} failed to load: {reason}")]
    LoadFailed { coord: ChunkCoord, reason: String },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// One chunk of voxels.
#[derive(Clone, Debug)]
pub struct Chunk {
    coord: ChunkCoord,
    state: ChunkState,
    voxels: Box<[Voxel]>,
    dirty: u8,
    /// Incremented on every voxel write.
    version: u64,
    ticks: u64,
}

impl Chunk {
    /// New air-filled chunk in the `Loading` state.
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            state: ChunkState::Loading,
            voxels: vec![Voxel::AIR; CHUNK_VOLUME].into_boxed_slice(),
            dirty: 0,
            version: 0,
            ticks: 0,
        }
    }

    /// Chunk restored from storage, transitioned straight to `Ready`.
    ///
    /// Restored chunks start clean.
    pub fn restored(coord: ChunkCoord, voxels: Vec<Voxel>) -> Result<Self, ChunkError> {
        if voxels.len() != CHUNK_VOLUME {
            return Err(ChunkError::VoxelCount {
                expected: CHUNK_VOLUME,
                actual: voxels.len(),
            });
        }
        let mut chunk = Self::new(coord);
        chunk.voxels = voxels.into_boxed_slice();
        chunk.transition(ChunkState::Ready)?;
        Ok(chunk)
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChunkState::Ready
    }

    /// Move to `next`, rejecting anything outside the lifecycle graph.
    pub fn transition(&mut self, next: ChunkState) -> Result<(), ChunkError> {
        if !self.state.can_transition_to(next) {
            return Err(ChunkError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn get(&self, pos: LocalPos) -> Voxel {
        self.voxels[pos.index()]
    }

    /// Write one voxel and mark the chunk dirty.
    pub fn set(&mut self, pos: LocalPos, voxel: Voxel) -> Result<(), ChunkError> {
        if !self.state.is_writable() {
            return Err(ChunkError::NotWritable(self.state));
        }
        self.voxels[pos.index()] = voxel;
        self.dirty |= ALL_DIRTY;
        self.version += 1;
        Ok(())
    }

    /// Overwrite every voxel.
    pub fn fill(&mut self, voxel: Voxel) -> Result<(), ChunkError> {
        if !self.state.is_writable() {
            return Err(ChunkError::NotWritable(self.state));
        }
        self.voxels.fill(voxel);
        self.dirty |= ALL_DIRTY;
        self.version += 1;
        Ok(())
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    /// Whether voxel data changed since the last successful save.
    pub fn is_dirty(&self) -> bool {
        self.dirty & SAVE_DIRTY != 0
    }

    pub fn set_dirty(&mut self) {
        self.dirty |= SAVE_DIRTY;
    }

    pub fn dirty_flags(&self) -> u8 {
        self.dirty
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.dirty & flag == flag
    }

    pub fn mark_dirty(&mut self, flags: u8) {
        self.dirty |= flags;
    }

    pub fn clear_dirty(&mut self, flags: u8) {
        self.dirty &= !flags;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of ticks this chunk has received while ready.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Advance the chunk by one simulation step.
    pub fn tick(&mut self, _dt: f32) -> Result<(), ChunkError> {
        if !self.is_ready() {
            return Err(ChunkError::NotReady(self.state));
        }
        self.ticks += 1;
        Ok(())
    }

    /// Write the chunk if it is dirty.
    ///
    /// Returns whether anything was written. The save flag is cleared only
    /// after the backend accepted the data.
    pub fn save<P: ChunkPersistence + ?Sized>(&mut self, persistence: &mut P) -> Result<bool, ChunkError> {
        if !self.is_ready() {
            return Err(ChunkError::NotReady(self.state));
        }
        if !self.is_dirty() {
            return Ok(false);
        }
        persistence.save_chunk(self.coord, &self.voxels)?;
        self.clear_dirty(SAVE_DIRTY);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingPersistence {
        saved: Vec<ChunkCoord>,
        fail: bool,
    }

    impl ChunkPersistence for RecordingPersistence {
        fn load_chunk(&mut self, _coord: ChunkCoord) -> Result<Option<Vec<Voxel>>, PersistError> {
            Ok(None)
        }

        fn save_chunk(&mut self, coord: ChunkCoord, _voxels: &[Voxel]) -> Result<(), PersistError> {
            if self.fail {
                return Err(PersistError::Io(std::io::Error::other("disk full")));
            }
            self.saved.push(coord);
            Ok(())
        }
    }

    fn pos(x: u8, y: u8, z: u8) -> LocalPos {
        LocalPos::new(x, y, z).unwrap()
    }

    fn ready_chunk() -> Chunk {
        let mut chunk = Chunk::new(ChunkCoord::default());
        chunk.transition(ChunkState::Generating).unwrap();
        chunk.transition(ChunkState::Populating).unwrap();
        chunk.transition(ChunkState::Ready).unwrap();
        chunk
    }

    #[test]
    fn test_generation_path() {
        let chunk = ready_chunk();
        assert!(chunk.is_ready());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut chunk = Chunk::new(ChunkCoord::default());
        assert!(matches!(
            chunk.transition(ChunkState::Populating),
            Err(ChunkError::InvalidTransition { .. })
        ));
        assert_eq!(chunk.state(), ChunkState::Loading);

        let mut ready = ready_chunk();
        assert!(ready.transition(ChunkState::Generating).is_err());
        assert!(ready.transition(ChunkState::Ready).is_err());
    }

    #[test]
    fn test_loading_chunk_not_writable() {
        let mut chunk = Chunk::new(ChunkCoord::default());
        let result = chunk.set(pos(0, 0, 0), Voxel::new(1));
        assert!(matches!(result, Err(ChunkError::NotWritable(ChunkState::Loading))));
        assert_eq!(chunk.get(pos(0, 0, 0)), Voxel::AIR);
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn test_set_marks_dirty() {
        let mut chunk = ready_chunk();
        chunk.set(pos(1, 2, 3), Voxel::new(4)).unwrap();
        assert_eq!(chunk.get(pos(1, 2, 3)), Voxel::new(4));
        assert!(chunk.is_dirty());
        assert!(chunk.has_flag(NETWORK_DIRTY));
        assert_eq!(chunk.version(), 1);
    }

    #[test]
    fn test_tick_requires_ready() {
        let mut chunk = Chunk::new(ChunkCoord::default());
        assert!(matches!(chunk.tick(0.1), Err(ChunkError::NotReady(_))));
        assert_eq!(chunk.tick_count(), 0);

        let mut ready = ready_chunk();
        ready.tick(0.1).unwrap();
        assert_eq!(ready.tick_count(), 1);
    }

    #[test]
    fn test_save_requires_ready() {
        let mut persistence = RecordingPersistence::default();
        let mut chunk = Chunk::new(ChunkCoord::default());
        chunk.transition(ChunkState::Generating).unwrap();
        chunk.set(pos(0, 0, 0), Voxel::new(1)).unwrap();

        assert!(matches!(
            chunk.save(&mut persistence),
            Err(ChunkError::NotReady(ChunkState::Generating))
        ));
        assert!(persistence.saved.is_empty());
        assert!(chunk.is_dirty());
    }

    #[test]
    fn test_save_clears_dirty_only_on_success() {
        let mut persistence = RecordingPersistence {
            fail: true,
            ..Default::default()
        };
        let mut chunk = ready_chunk();
        chunk.set(pos(0, 0, 0), Voxel::new(1)).unwrap();

        assert!(chunk.save(&mut persistence).is_err());
        assert!(chunk.is_dirty());

        persistence.fail = false;
        assert!(chunk.save(&mut persistence).unwrap());
        assert!(!chunk.is_dirty());
        assert!(chunk.has_flag(NETWORK_DIRTY));

        // Clean chunks are skipped.
        assert!(!chunk.save(&mut persistence).unwrap());
        assert_eq!(persistence.saved.len(), 1);
    }

    #[test]
    fn test_restored_chunk_is_ready_and_clean() {
        let voxels = vec![Voxel::new(2); CHUNK_VOLUME];
        let chunk = Chunk::restored(ChunkCoord::new(1, 1, 1), voxels).unwrap();
        assert!(chunk.is_ready());
        assert!(!chunk.is_dirty());
        assert_eq!(chunk.get(pos(15, 15, 15)), Voxel::new(2));

        let short = Chunk::restored(ChunkCoord::default(), vec![Voxel::AIR; 3]);
        assert!(matches!(short, Err(ChunkError::VoxelCount { .. })));
    }
}
