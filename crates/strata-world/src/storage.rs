//! Where a world keeps its settings document and chunks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use strata_config::{ConfigError, WorldSettings};
use strata_voxel::{
    ChunkCoord, ChunkFiles, ChunkPersistence, PersistError, Voxel, decode_chunk, encode_chunk,
};

/// Sub-directory of a world directory holding its chunk files.
pub const CHUNKS_DIR_NAME: &str = "chunks";

/// Settings document plus chunk persistence for one world.
pub trait WorldStorage: ChunkPersistence {
    /// Read the settings document. Missing or invalid documents are errors.
    fn load_settings(&mut self) -> Result<WorldSettings, ConfigError>;

    fn save_settings(&mut self, settings: &WorldSettings) -> Result<(), ConfigError>;

    /// Whether a settings document exists.
    fn exists(&self) -> bool;

    /// Remove everything stored for this world.
    fn delete(&mut self) -> Result<(), PersistError>;
}

/// `<worlds>/<name>/leveldata.json` and `<worlds>/<name>/chunks/x_y_z.chunk`.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    world_dir: PathBuf,
    chunks: ChunkFiles,
}

impl DiskStorage {
    pub fn new(worlds_dir: &Path, name: &str) -> Self {
        let world_dir = worlds_dir.join(name);
        let chunks = ChunkFiles::new(world_dir.join(CHUNKS_DIR_NAME));
        Self { world_dir, chunks }
    }

    pub fn world_dir(&self) -> &Path {
        &self.world_dir
    }
}

impl ChunkPersistence for DiskStorage {
    fn load_chunk(&mut self, coord: ChunkCoord) -> Result<Option<Vec<Voxel>>, PersistError> {
        self.chunks.load_chunk(coord)
    }

    fn save_chunk(&mut self, coord: ChunkCoord, voxels: &[Voxel]) -> Result<(), PersistError> {
        self.chunks.save_chunk(coord, voxels)
    }
}

impl WorldStorage for DiskStorage {
    fn load_settings(&mut self) -> Result<WorldSettings, ConfigError> {
        WorldSettings::load(&self.world_dir)
    }

    fn save_settings(&mut self, settings: &WorldSettings) -> Result<(), ConfigError> {
        settings.save(&self.world_dir)?;
        tracing::debug!("Wrote settings of '{}' to {}", settings.name, self.world_dir.display());
        Ok(())
    }

    fn exists(&self) -> bool {
        self.world_dir
            .join(strata_config::LEVEL_DATA_FILE_NAME)
            .exists()
    }

    fn delete(&mut self) -> Result<(), PersistError> {
        match std::fs::remove_dir_all(&self.world_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    settings: Option<Vec<u8>>,
    chunks: FxHashMap<ChunkCoord, Vec<u8>>,
}

/// In-memory storage. Clones share contents, so tests can inspect what a
/// world wrote after handing it a clone.
///
/// Contents go through the same encoders as [`DiskStorage`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage already holding `settings`.
    pub fn with_settings(settings: &WorldSettings) -> Result<Self, ConfigError> {
        let mut storage = Self::new();
        storage.save_settings(settings)?;
        Ok(storage)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn chunk_count(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn has_chunk(&self, coord: ChunkCoord) -> bool {
        self.lock().chunks.contains_key(&coord)
    }

    /// Replace the stored settings bytes, valid or not.
    pub fn put_raw_settings(&self, bytes: Vec<u8>) {
        self.lock().settings = Some(bytes);
    }
}

impl ChunkPersistence for MemoryStorage {
    fn load_chunk(&mut self, coord: ChunkCoord) -> Result<Option<Vec<Voxel>>, PersistError> {
        let inner = self.lock();
        let Some(bytes) = inner.chunks.get(&coord) else {
            return Ok(None);
        };
        let (found, voxels) = decode_chunk(bytes)?;
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
        self.lock().chunks.insert(coord, bytes);
        Ok(())
    }
}

impl WorldStorage for MemoryStorage {
    fn load_settings(&mut self) -> Result<WorldSettings, ConfigError> {
        let inner = self.lock();
        let bytes = inner
            .settings
            .as_deref()
            .ok_or_else(|| ConfigError::NotFound(PathBuf::from(strata_config::LEVEL_DATA_FILE_NAME)))?;
        WorldSettings::from_json(bytes)
    }

    fn save_settings(&mut self, settings: &WorldSettings) -> Result<(), ConfigError> {
        let bytes = settings.to_json()?;
        self.lock().settings = Some(bytes);
        Ok(())
    }

    fn exists(&self) -> bool {
        self.lock().settings.is_some()
    }

    fn delete(&mut self) -> Result<(), PersistError> {
        let mut inner = self.lock();
        inner.settings = None;
        inner.chunks.clear();
        Ok(())
    }
}
