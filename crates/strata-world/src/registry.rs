//! Named generators and game modes worlds resolve while loading.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::game_mode::{DEFAULT_GAME_MODE, DefaultGameMode, GameMode};
use crate::generator::{FlatGenerator, WorldGenerator};

/// Builds a fresh game mode for one world.
pub type GameModeFactory = Box<dyn Fn() -> Box<dyn GameMode> + Send + Sync>;

/// Generators are shared between worlds; each world gets its own game mode.
#[derive(Default)]
pub struct WorldRegistries {
    generators: FxHashMap<String, Arc<dyn WorldGenerator>>,
    game_modes: FxHashMap<String, GameModeFactory>,
}

impl WorldRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registries holding the flat generator and the default game mode.
    pub fn with_defaults() -> Self {
        let mut registries = Self::new();
        registries.register_generator(Arc::new(FlatGenerator::default()));
        registries.register_game_mode(DEFAULT_GAME_MODE, || Box::new(DefaultGameMode::new()));
        registries
    }

    /// Register `generator` under its own name, replacing any previous one.
    pub fn register_generator(&mut self, generator: Arc<dyn WorldGenerator>) {
        self.generators
            .insert(generator.name().to_string(), generator);
    }

    pub fn register_game_mode<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn GameMode> + Send + Sync + 'static,
    {
        self.game_modes.insert(name.to_string(), Box::new(factory));
    }

    pub fn generator(&self, name: &str) -> Option<Arc<dyn WorldGenerator>> {
        self.generators.get(name).cloned()
    }

    pub fn create_game_mode(&self, name: &str) -> Option<Box<dyn GameMode>> {
        self.game_modes.get(name).map(|factory| factory())
    }

    pub fn generator_names(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }

    pub fn game_mode_names(&self) -> impl Iterator<Item = &str> {
        self.game_modes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DEFAULT_GENERATOR;

    #[test]
    fn test_defaults_resolve() {
        let registries = WorldRegistries::with_defaults();
        assert_eq!(
            registries.generator(DEFAULT_GENERATOR).unwrap().name(),
            DEFAULT_GENERATOR
        );
        let mode = registries.create_game_mode(DEFAULT_GAME_MODE).unwrap();
        assert_eq!(mode.name(), DEFAULT_GAME_MODE);
        assert!(registries.generator("caves").is_none());
        assert!(registries.create_game_mode("survival").is_none());
    }

    struct Named(&'static str);

    impl WorldGenerator for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn generate(&self, _seed: u64, _chunk: &mut strata_voxel::Chunk) -> Result<(), strata_voxel::ChunkError> {
            Ok(())
        }
    }

    #[test]
    fn test_registration_replaces_by_name() {
        let mut registries = WorldRegistries::with_defaults();
        registries.register_generator(Arc::new(Named("islands")));
        registries.register_generator(Arc::new(Named("islands")));

        let mut names: Vec<_> = registries.generator_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec![DEFAULT_GENERATOR, "islands"]);
        assert_eq!(registries.game_mode_names().count(), 1);
    }
}
