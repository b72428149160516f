//! Game modes: the pluggable rules a world consults every tick.

use strata_config::WorldSettings;

use crate::world::World;

/// Name under which [`DefaultGameMode`] is registered.
pub const DEFAULT_GAME_MODE: &str = "default";

pub trait GameMode: Send {
    fn name(&self) -> &str;

    /// Called once the world finished loading.
    fn load(&mut self, _settings: &WorldSettings) {}

    /// Called at the start of every world save.
    fn save(&mut self, _settings: &WorldSettings) {}

    /// Last step of every world tick.
    fn tick(&mut self, _dt: f32, _world: &mut World) {}
}

/// Game mode without rules of its own.
#[derive(Debug, Default)]
pub struct DefaultGameMode {
    ticks: u64,
}

impl DefaultGameMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl GameMode for DefaultGameMode {
    fn name(&self) -> &str {
        DEFAULT_GAME_MODE
    }

    fn load(&mut self, settings: &WorldSettings) {
        tracing::debug!("Default game mode active in '{}'", settings.name);
    }

    fn tick(&mut self, _dt: f32, _world: &mut World) {
        self.ticks += 1;
    }
}
