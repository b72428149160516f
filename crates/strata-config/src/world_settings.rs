//! Per-world settings document, stored as JSON next to the world's chunks.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the settings document inside a world directory.
pub const LEVEL_DATA_FILE_NAME: &str = "leveldata.json";

/// Settings describing one world.
///
/// Unlike [`ServerSettings`](crate::ServerSettings), missing values are not
/// defaulted when loading: a world with an unknown generator or game mode
/// could be damaged by silently picking another one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorldSettings {
    /// Unique world name.
    pub name: String,
    /// Registered generator name.
    pub generator: String,
    /// Registered game-mode name.
    pub game_mode: String,
    /// Seed handed to the generator.
    pub seed: u64,
    /// Chunk radius kept around players.
    pub render_distance: u32,
    /// When false, `save` keeps everything in memory.
    pub enable_saving: bool,
}

impl WorldSettings {
    /// Default settings for a newly created world.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generator: "default".to_string(),
            game_mode: "default".to_string(),
            seed: 0,
            render_distance: 8,
            enable_saving: true,
        }
    }

    /// Parse a settings document and check required values.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let settings: WorldSettings =
            serde_json::from_slice(bytes).map_err(ConfigError::JsonError)?;
        settings.check()?;
        Ok(settings)
    }

    /// Serialize to a pretty JSON document.
    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        serde_json::to_vec_pretty(self).map_err(ConfigError::JsonError)
    }

    /// Load `leveldata.json` from a world directory.
    pub fn load(world_dir: &Path) -> Result<Self, ConfigError> {
        let path = world_dir.join(LEVEL_DATA_FILE_NAME);
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let bytes = std::fs::read(&path).map_err(ConfigError::ReadError)?;
        Self::from_json(&bytes)
    }

    /// Write `leveldata.json` into a world directory, creating it if needed.
    pub fn save(&self, world_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(world_dir).map_err(ConfigError::WriteError)?;
        let bytes = self.to_json()?;
        std::fs::write(world_dir.join(LEVEL_DATA_FILE_NAME), bytes)
            .map_err(ConfigError::WriteError)
    }

    /// Reject documents with empty required names.
    pub fn check(&self) -> Result<(), ConfigError> {
        let required = [
            ("name", &self.name),
            ("generator", &self.generator),
            ("gameMode", &self.game_mode),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}
