//! Server error types.

use strata_config::ConfigError;
use strata_net::TransportError;
use strata_voxel::CatalogueError;
use strata_world::WorldError;

use crate::server::ServerState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server already started")]
    AlreadyStarted,

    #[error("server is {0:?}, expected Running")]
    NotRunning(ServerState),

    #[error("server settings: {0}")]
    Settings(#[from] ConfigError),

    #[error("voxel catalogue: {0}")]
    Catalogue(#[from] CatalogueError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error("world '{0}' does not exist")]
    WorldNotFound(String),

    #[error("world '{0}' already exists")]
    WorldExists(String),

    #[error("world '{0}' is already loaded")]
    WorldLoaded(String),

    /// The world clients spawn in could not be loaded or created.
    #[error("default world '{name}' is unavailable: {reason}")]
    DefaultWorld { name: String, reason: String },
}
