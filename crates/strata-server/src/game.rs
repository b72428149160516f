//! Server-side game state shared with packet handlers: loaded worlds, the
//! world registries and the voxel catalogue.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_config::WorldSettings;
use strata_log::Diagnostics;
use strata_net::DisconnectedClient;
use strata_voxel::{NETWORK_DIRTY, VoxelTypeRegistry};
use strata_world::{
    DEFAULT_GAME_MODE, DEFAULT_GENERATOR, DefaultGameMode, DiskStorage, EntityId, FlatGenerator,
    World, WorldRegistries, WorldStorage,
};

use crate::error::ServerError;

pub struct GameState {
    worlds: BTreeMap<String, World>,
    registries: WorldRegistries,
    catalogue: VoxelTypeRegistry,
    worlds_dir: PathBuf,
    default_world: Option<String>,
    diag: Diagnostics,
}

impl GameState {
    pub(crate) fn new(diag: Diagnostics) -> Self {
        Self {
            worlds: BTreeMap::new(),
            registries: WorldRegistries::new(),
            catalogue: VoxelTypeRegistry::default_catalogue(),
            worlds_dir: PathBuf::new(),
            default_world: None,
            diag,
        }
    }

    /// Install the catalogue and worlds directory, and register the default
    /// generator and game mode unless something else took their names.
    pub(crate) fn configure(&mut self, worlds_dir: PathBuf, catalogue: VoxelTypeRegistry) {
        self.worlds_dir = worlds_dir;
        self.catalogue = catalogue;
        if self.registries.generator(DEFAULT_GENERATOR).is_none() {
            self.registries
                .register_generator(Arc::new(FlatGenerator::default()));
        }
        if self.registries.create_game_mode(DEFAULT_GAME_MODE).is_none() {
            self.registries
                .register_game_mode(DEFAULT_GAME_MODE, || Box::new(DefaultGameMode::new()));
        }
    }

    /// Load or create every world in `names`. The first one is where new
    /// players spawn and must be available; the others are best effort.
    pub(crate) fn open_default_worlds(&mut self, names: &[String]) -> Result<(), ServerError> {
        let Some((first, rest)) = names.split_first() else {
            self.diag
                .warning("No default worlds configured; clients will be refused");
            return Ok(());
        };

        self.open_world(first).map_err(|e| ServerError::DefaultWorld {
            name: first.clone(),
            reason: e.to_string(),
        })?;
        self.default_world = Some(first.clone());

        for name in rest {
            if let Err(e) = self.open_world(name) {
                self.diag
                    .error(format_args!("Could not open world '{name}': {e}"));
            }
        }
        Ok(())
    }

    fn open_world(&mut self, name: &str) -> Result<(), ServerError> {
        if self.worlds.contains_key(name) {
            return Ok(());
        }
        if self.storage(name).exists() {
            self.load_world(name)
        } else {
            self.diag
                .info(format_args!("Creating world '{name}'"));
            self.create_world(WorldSettings::new(name))
        }
    }

    fn storage(&self, name: &str) -> DiskStorage {
        DiskStorage::new(&self.worlds_dir, name)
    }

    pub fn worlds_dir(&self) -> &Path {
        &self.worlds_dir
    }

    pub fn catalogue(&self) -> &VoxelTypeRegistry {
        &self.catalogue
    }

    pub fn registries(&self) -> &WorldRegistries {
        &self.registries
    }

    pub fn registries_mut(&mut self) -> &mut WorldRegistries {
        &mut self.registries
    }

    pub fn default_world(&self) -> Option<&str> {
        self.default_world.as_deref()
    }

    pub fn world(&self, name: &str) -> Option<&World> {
        self.worlds.get(name)
    }

    pub fn world_mut(&mut self, name: &str) -> Option<&mut World> {
        self.worlds.get_mut(name)
    }

    /// Loaded worlds, sorted by name.
    pub fn worlds(&self) -> impl Iterator<Item = &World> {
        self.worlds.values()
    }

    /// Loaded, or stored in the worlds directory.
    pub fn world_exists(&self, name: &str) -> bool {
        self.worlds.contains_key(name) || self.storage(name).exists()
    }

    pub fn load_world(&mut self, name: &str) -> Result<(), ServerError> {
        if self.worlds.contains_key(name) {
            return Err(ServerError::WorldLoaded(name.to_string()));
        }
        let storage = self.storage(name);
        if !storage.exists() {
            return Err(ServerError::WorldNotFound(name.to_string()));
        }
        let mut world = World::new(name, Box::new(storage), self.diag.scoped("world"));
        world.load(&self.registries)?;
        self.worlds.insert(name.to_string(), world);
        Ok(())
    }

    pub fn create_world(&mut self, settings: WorldSettings) -> Result<(), ServerError> {
        if self.world_exists(&settings.name) {
            return Err(ServerError::WorldExists(settings.name));
        }
        let storage = self.storage(&settings.name);
        let mut world = World::new(
            settings.name.clone(),
            Box::new(storage),
            self.diag.scoped("world"),
        );
        world.write_settings(&settings)?;
        world.load(&self.registries)?;
        self.worlds.insert(settings.name, world);
        Ok(())
    }

    /// Unload a world, saving it first if asked. A failed save keeps the
    /// world loaded.
    pub fn unload_world(&mut self, name: &str, save: bool) -> Result<(), ServerError> {
        let world = self
            .worlds
            .get_mut(name)
            .ok_or_else(|| ServerError::WorldNotFound(name.to_string()))?;
        if save && world.is_running() {
            world.save()?;
        }
        if let Some(mut world) = self.worlds.remove(name)
            && world.is_running()
        {
            world.unload()?;
        }
        if self.default_world.as_deref() == Some(name) {
            self.diag.warning(format_args!(
                "Default world '{name}' unloaded; new clients will be refused"
            ));
        }
        Ok(())
    }

    /// Remove a world from disk, unloading it without saving if needed.
    pub fn delete_world(&mut self, name: &str) -> Result<(), ServerError> {
        if !self.world_exists(name) {
            return Err(ServerError::WorldNotFound(name.to_string()));
        }
        if self.worlds.contains_key(name) {
            self.unload_world(name, false)?;
        }
        let mut world = World::new(name, Box::new(self.storage(name)), self.diag.scoped("world"));
        world.delete()?;
        self.diag.info(format_args!("Deleted world '{name}'"));
        Ok(())
    }

    /// Save every running world. Returns how many chunks were written.
    pub fn save_all(&mut self) -> usize {
        let mut saved = 0;
        for world in self.worlds.values_mut().filter(|w| w.is_running()) {
            match world.save() {
                Ok(count) => saved += count,
                Err(e) => self
                    .diag
                    .error(format_args!("Saving '{}' failed: {e}", world.name())),
            }
        }
        saved
    }

    /// Save (if asked) and unload every world.
    pub(crate) fn close_all(&mut self, save: bool) {
        if save {
            let chunks = self.save_all();
            self.diag
                .info(format_args!("Saved {chunks} chunk(s) before shutdown"));
        }
        for (name, mut world) in std::mem::take(&mut self.worlds) {
            if world.is_running()
                && let Err(e) = world.unload()
            {
                self.diag
                    .error(format_args!("Unloading '{name}' failed: {e}"));
            }
        }
        self.default_world = None;
    }

    pub(crate) fn tick_worlds(&mut self, dt: f32) {
        for world in self.worlds.values_mut().filter(|w| w.is_running()) {
            if let Err(e) = world.tick(dt) {
                self.diag
                    .error(format_args!("Tick of '{}' failed: {e}", world.name()));
            }
        }
    }

    pub(crate) fn clear_network_dirty(&mut self) {
        for world in self.worlds.values_mut() {
            for (_, chunk) in world.chunks_mut().iter_mut() {
                chunk.clear_dirty(NETWORK_DIRTY);
            }
        }
    }

    /// Remove the player a departed client controlled.
    pub(crate) fn despawn(&mut self, client: &DisconnectedClient) {
        let Some(controller) = &client.controller else {
            return;
        };
        let Some(world) = self.worlds.get_mut(&controller.world) else {
            return;
        };
        if let Err(e) = world.remove_player(EntityId::from_raw(controller.player)) {
            self.diag.error(format_args!(
                "Could not despawn '{}' from '{}': {e}",
                client.username, controller.world
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_log::Severity;

    fn configured(dir: &Path) -> GameState {
        let (diag, _) = Diagnostics::memory("server");
        let mut game = GameState::new(diag);
        game.configure(dir.join("worlds"), VoxelTypeRegistry::default_catalogue());
        game
    }

    #[test]
    fn test_default_worlds_are_created_then_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        let names = vec!["main".to_string(), "nether".to_string()];

        let mut game = configured(tmp.path());
        game.open_default_worlds(&names).unwrap();
        assert_eq!(game.default_world(), Some("main"));
        assert_eq!(game.worlds().count(), 2);
        assert!(tmp.path().join("worlds/main/leveldata.json").is_file());
        game.close_all(true);
        assert_eq!(game.worlds().count(), 0);

        let mut again = configured(tmp.path());
        again.open_default_worlds(&names).unwrap();
        assert!(again.world("nether").unwrap().is_running());
    }

    #[test]
    fn test_broken_default_world_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = WorldSettings::new("main");
        settings.generator = "caves".into();
        settings.save(&tmp.path().join("worlds/main")).unwrap();

        let mut game = configured(tmp.path());
        let result = game.open_default_worlds(&["main".to_string()]);
        assert!(matches!(result, Err(ServerError::DefaultWorld { name, .. }) if name == "main"));
        assert!(game.default_world().is_none());
    }

    #[test]
    fn test_world_management() {
        let tmp = tempfile::tempdir().unwrap();
        let mut game = configured(tmp.path());

        game.create_world(WorldSettings::new("arena")).unwrap();
        assert!(matches!(
            game.create_world(WorldSettings::new("arena")),
            Err(ServerError::WorldExists(_))
        ));
        assert!(matches!(game.load_world("arena"), Err(ServerError::WorldLoaded(_))));

        game.unload_world("arena", true).unwrap();
        assert!(game.world("arena").is_none());
        assert!(game.world_exists("arena"));
        game.load_world("arena").unwrap();

        game.delete_world("arena").unwrap();
        assert!(!game.world_exists("arena"));
        assert!(matches!(game.load_world("arena"), Err(ServerError::WorldNotFound(_))));
        assert!(matches!(game.delete_world("arena"), Err(ServerError::WorldNotFound(_))));
    }

    #[test]
    fn test_unloading_default_world_warns() {
        let tmp = tempfile::tempdir().unwrap();
        let (diag, sink) = Diagnostics::memory("server");
        let mut game = GameState::new(diag);
        game.configure(tmp.path().to_path_buf(), VoxelTypeRegistry::default_catalogue());
        game.open_default_worlds(&["home".to_string()]).unwrap();

        game.unload_world("home", false).unwrap();
        assert!(sink.contains(Severity::Warning, "Default world 'home' unloaded"));
    }
}
