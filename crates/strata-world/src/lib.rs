//! Worlds for the Strata server: lifecycle, tick order, entities and players,
//! generators, game modes and where a world is stored.

mod entity;
mod error;
mod game_mode;
mod generator;
mod registry;
mod storage;
mod world;

pub use entity::{
    Entity, EntityBehavior, EntityCore, EntityId, EntityLocation, Player, Transform,
};
pub use error::WorldError;
pub use game_mode::{DEFAULT_GAME_MODE, DefaultGameMode, GameMode};
pub use generator::{DEFAULT_GENERATOR, FlatGenerator, WorldGenerator, generate_chunk};
pub use registry::{GameModeFactory, WorldRegistries};
pub use storage::{CHUNKS_DIR_NAME, DiskStorage, MemoryStorage, WorldStorage};
pub use world::{World, WorldState};
