//! World error types.

use strata_config::ConfigError;
use strata_voxel::{ChunkError, PersistError};

use crate::entity::EntityId;
use crate::world::WorldState;

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The operation is not valid in the world's current lifecycle state.
    #[error("world '{world}' is {actual:?}, expected {expected:?}")]
    InvalidState {
        world: String,
        expected: WorldState,
        actual: WorldState,
    },

    /// Immediate registry changes are not allowed while the world ticks.
    #[error("world '{0}' is ticking; queue the change instead")]
    TickInProgress(String),

    #[error("unknown world generator '{0}'")]
    UnknownGenerator(String),

    #[error("unknown game mode '{0}'")]
    UnknownGameMode(String),

    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    #[error("world settings: {0}")]
    Settings(#[from] ConfigError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),
}
