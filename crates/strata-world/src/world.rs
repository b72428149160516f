//! One world: chunks, pending voxel edits, entities and players, driven by a
//! lifecycle state machine.
//!
//! ```text
//! Unloaded --load--> Loading --ok--> Running <--save--> Saving
//!     ^                 |               |
//!     +-----failed------+               |
//!     +-------------unload--------------+
//! ```
//!
//! Ticks, saves and registry changes are only valid while `Running`.

use std::fmt;
use std::sync::Arc;

use glam::{IVec3, Vec3};
use rustc_hash::FxHashMap;
use strata_config::WorldSettings;
use strata_log::Diagnostics;
use strata_voxel::{
    Chunk, ChunkCoord, ChunkError, ChunkSource, ChunkStore, Voxel, VoxelEditor,
};

use crate::entity::{Entity, EntityId, Player, Transform};
use crate::error::WorldError;
use crate::game_mode::GameMode;
use crate::generator::{WorldGenerator, generate_chunk};
use crate::registry::WorldRegistries;
use crate::storage::WorldStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldState {
    Unloaded,
    Loading,
    Running,
    Saving,
}

/// Loads chunks for a running world: storage first, the generator otherwise.
struct WorldChunkSource<'a> {
    storage: &'a mut dyn WorldStorage,
    generator: &'a dyn WorldGenerator,
    seed: u64,
}

impl ChunkSource for WorldChunkSource<'_> {
    fn provide_chunk(&mut self, coord: ChunkCoord) -> Result<Chunk, ChunkError> {
        match self.storage.load_chunk(coord)? {
            Some(voxels) => Chunk::restored(coord, voxels),
            None => generate_chunk(self.generator, self.seed, coord),
        }
    }
}

/// Everything that only exists while the world is loaded.
struct Loaded {
    settings: WorldSettings,
    generator: Arc<dyn WorldGenerator>,
    game_mode: Option<Box<dyn GameMode>>,
}

pub struct World {
    name: String,
    state: WorldState,
    storage: Box<dyn WorldStorage>,
    loaded: Option<Loaded>,
    chunks: ChunkStore,
    editor: VoxelEditor,
    entities: FxHashMap<EntityId, Entity>,
    players: FxHashMap<EntityId, Player>,
    entity_queue: Vec<Entity>,
    chunk_requests: Vec<ChunkCoord>,
    in_tick: bool,
    ticks: u64,
    diag: Diagnostics,
}

impl World {
    /// An unloaded world backed by `storage`.
    pub fn new(name: impl Into<String>, storage: Box<dyn WorldStorage>, diag: Diagnostics) -> Self {
        Self {
            name: name.into(),
            state: WorldState::Unloaded,
            storage,
            loaded: None,
            chunks: ChunkStore::new(),
            editor: VoxelEditor::new(),
            entities: FxHashMap::default(),
            players: FxHashMap::default(),
            entity_queue: Vec::new(),
            chunk_requests: Vec::new(),
            in_tick: false,
            ticks: 0,
            diag,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorldState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == WorldState::Running
    }

    fn expect_state(&self, expected: WorldState) -> Result<(), WorldError> {
        if self.state != expected {
            return Err(WorldError::InvalidState {
                world: self.name.clone(),
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn expect_idle(&self) -> Result<(), WorldError> {
        self.expect_state(WorldState::Running)?;
        if self.in_tick {
            return Err(WorldError::TickInProgress(self.name.clone()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Whether storage holds a settings document for this world.
    pub fn exists(&self) -> bool {
        self.storage.exists()
    }

    /// Write `settings` to storage. Only valid while unloaded.
    pub fn write_settings(&mut self, settings: &WorldSettings) -> Result<(), WorldError> {
        self.expect_state(WorldState::Unloaded)?;
        settings.check()?;
        self.storage.save_settings(settings)?;
        Ok(())
    }

    /// Load settings from storage and resolve generator and game mode.
    ///
    /// Any failure is logged and leaves the world `Unloaded`.
    pub fn load(&mut self, registries: &WorldRegistries) -> Result<(), WorldError> {
        self.expect_state(WorldState::Unloaded)?;
        self.state = WorldState::Loading;

        match self.resolve(registries) {
            Ok(mut loaded) => {
                if let Some(mode) = loaded.game_mode.as_mut() {
                    mode.load(&loaded.settings);
                }
                self.chunks = ChunkStore::new();
                self.editor = VoxelEditor::new();
                self.loaded = Some(loaded);
                self.state = WorldState::Running;
                self.diag
                    .info(format_args!("Loaded world '{}'", self.name));
                Ok(())
            }
            Err(e) => {
                self.state = WorldState::Unloaded;
                self.diag
                    .error(format_args!("Failed to load world '{}': {e}", self.name));
                Err(e)
            }
        }
    }

    fn resolve(&mut self, registries: &WorldRegistries) -> Result<Loaded, WorldError> {
        let settings = self.storage.load_settings()?;
        if settings.name != self.name {
            self.diag.warning(format_args!(
                "World '{}' has settings named '{}'",
                self.name, settings.name
            ));
        }
        let generator = registries
            .generator(&settings.generator)
            .ok_or_else(|| WorldError::UnknownGenerator(settings.generator.clone()))?;
        let game_mode = registries
            .create_game_mode(&settings.game_mode)
            .ok_or_else(|| WorldError::UnknownGameMode(settings.game_mode.clone()))?;
        Ok(Loaded {
            settings,
            generator,
            game_mode: Some(game_mode),
        })
    }

    /// Persist the game mode, the settings document and every dirty chunk.
    ///
    /// With saving disabled only the game mode hook runs. Returns the number
    /// of chunks written; chunks that fail are logged and stay dirty.
    pub fn save(&mut self) -> Result<usize, WorldError> {
        self.expect_state(WorldState::Running)?;
        self.state = WorldState::Saving;
        let result = self.write_all();
        self.state = WorldState::Running;
        result
    }

    fn write_all(&mut self) -> Result<usize, WorldError> {
        let Some(loaded) = self.loaded.as_mut() else {
            return Ok(0);
        };
        if let Some(mode) = loaded.game_mode.as_mut() {
            mode.save(&loaded.settings);
        }
        if !loaded.settings.enable_saving {
            return Ok(0);
        }
        if let Err(e) = self.storage.save_settings(&loaded.settings) {
            self.diag
                .error(format_args!("Failed to save settings of '{}': {e}", self.name));
            return Err(e.into());
        }

        let mut saved = 0;
        for (coord, chunk) in self.chunks.iter_mut() {
            if !chunk.is_ready() {
                continue;
            }
            match chunk.save(&mut *self.storage) {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => self
                    .diag
                    .error(format_args!("Failed to save chunk {coord} of '{}': {e}", self.name)),
            }
        }
        self.diag
            .debug(format_args!("Saved {saved} chunk(s) of '{}'", self.name));
        Ok(saved)
    }

    /// Drop all chunks, entities and players. Nothing is saved.
    pub fn unload(&mut self) -> Result<(), WorldError> {
        self.expect_idle()?;
        let chunks = self.chunks.unload_all();
        self.editor.clear();
        self.entities.clear();
        self.players.clear();
        self.entity_queue.clear();
        self.chunk_requests.clear();
        self.loaded = None;
        self.state = WorldState::Unloaded;
        self.diag.info(format_args!(
            "Unloaded world '{}' ({chunks} chunk(s))",
            self.name
        ));
        Ok(())
    }

    /// Remove everything storage holds for this world. Only valid while unloaded.
    pub fn delete(&mut self) -> Result<(), WorldError> {
        self.expect_state(WorldState::Unloaded)?;
        self.storage.delete()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance the world by `dt` seconds.
    ///
    /// Order: voxel edits and requested chunks, queued entity admission,
    /// players, entities, ready chunks, game mode.
    pub fn tick(&mut self, dt: f32) -> Result<(), WorldError> {
        self.expect_idle()?;
        self.in_tick = true;

        self.apply_edits_and_requests();

        for mut entity in std::mem::take(&mut self.entity_queue) {
            entity.place(&self.name);
            self.entities.insert(entity.id(), entity);
        }

        for player in self.players.values_mut() {
            if !player.is_marked_for_destroy() {
                player.tick(dt);
            }
        }
        self.players.retain(|_, p| !p.is_marked_for_destroy());

        for entity in self.entities.values_mut() {
            if !entity.is_marked_for_destroy() {
                entity.tick(dt);
            }
        }
        self.entities.retain(|_, e| !e.is_marked_for_destroy());

        for (_, chunk) in self.chunks.iter_mut() {
            if chunk.is_ready() {
                // Only fails for chunks that are not ready.
                let _ = chunk.tick(dt);
            }
        }

        let mode = self.loaded.as_mut().and_then(|l| l.game_mode.take());
        if let Some(mut mode) = mode {
            mode.tick(dt, self);
            if let Some(loaded) = self.loaded.as_mut() {
                loaded.game_mode = Some(mode);
            }
        }

        self.in_tick = false;
        self.ticks += 1;
        Ok(())
    }

    fn apply_edits_and_requests(&mut self) {
        let Some(loaded) = self.loaded.as_ref() else {
            return;
        };
        let mut source = WorldChunkSource {
            storage: &mut *self.storage,
            generator: &*loaded.generator,
            seed: loaded.settings.seed,
        };

        if self.editor.has_pending() {
            let report = self
                .editor
                .apply_pending_changes(&mut self.chunks, &mut source, &self.diag);
            if report.dropped > 0 {
                self.diag.warning(format_args!(
                    "{} of {} edit(s) in '{}' were dropped",
                    report.dropped,
                    report.applied + report.dropped,
                    self.name
                ));
            }
        }

        for coord in std::mem::take(&mut self.chunk_requests) {
            if let Err(e) = self.chunks.get_or_load(coord, &mut source) {
                self.diag.error(format_args!(
                    "Failed to load chunk {coord} of '{}': {e}",
                    self.name
                ));
            }
        }
    }

    /// Completed ticks since creation.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn is_ticking(&self) -> bool {
        self.in_tick
    }

    // -----------------------------------------------------------------------
    // Chunks and voxels
    // -----------------------------------------------------------------------

    pub fn settings(&self) -> Option<&WorldSettings> {
        self.loaded.as_ref().map(|l| &l.settings)
    }

    pub fn seed(&self) -> Option<u64> {
        self.settings().map(|s| s.seed)
    }

    /// How far, in chunks, players may see. Zero while not loaded.
    pub fn render_distance(&self) -> u32 {
        self.settings().map_or(0, |s| s.render_distance)
    }

    /// Whether `coord` is within render distance of `player`'s chunk.
    pub fn in_view_of(&self, player: EntityId, coord: ChunkCoord) -> bool {
        self.player(player).is_some_and(|p| {
            coord.is_in_range() && p.transform().chunk().distance(coord) <= self.render_distance()
        })
    }

    pub fn generator(&self) -> Option<&dyn WorldGenerator> {
        self.loaded.as_ref().map(|l| &*l.generator)
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn chunks_mut(&mut self) -> &mut ChunkStore {
        &mut self.chunks
    }

    pub fn editor_mut(&mut self) -> &mut VoxelEditor {
        &mut self.editor
    }

    /// Queue a single voxel write for the next tick.
    pub fn queue_voxel_update(&mut self, position: IVec3, voxel: Voxel) {
        self.editor.queue_update(position, voxel);
    }

    /// Ask for `coord` to be loaded at the start of the next tick.
    /// Ask for `coord` to be loaded at the next tick. Chunks outside the
    /// world are refused.
    pub fn request_chunk(&mut self, coord: ChunkCoord) -> bool {
        if !coord.is_in_range() {
            self.diag.warning(format_args!(
                "Refused request for chunk {coord} outside '{}'",
                self.name
            ));
            return false;
        }
        if !self.chunks.contains(coord) && !self.chunk_requests.contains(&coord) {
            self.chunk_requests.push(coord);
        }
        true
    }

    pub fn pending_chunk_requests(&self) -> usize {
        self.chunk_requests.len()
    }

    /// Save `coord` if needed and drop it from memory.
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> Result<bool, WorldError> {
        self.expect_idle()?;
        let saving = self.settings().is_some_and(|s| s.enable_saving);
        let Some(chunk) = self.chunks.get_chunk_mut(coord) else {
            return Ok(false);
        };
        if saving && chunk.is_ready() {
            chunk.save(&mut *self.storage)?;
        }
        self.chunks.unload_chunk(coord);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Entities and players
    // -----------------------------------------------------------------------

    /// Where new players appear.
    pub fn spawn_point(&self) -> Vec3 {
        Vec3::new(0.5, 0.0, 0.5)
    }

    /// Queue `entity` for admission at the start of the next tick.
    pub fn queue_entity_add(&mut self, entity: Entity) -> Result<EntityId, WorldError> {
        self.expect_state(WorldState::Running)?;
        let id = entity.id();
        self.entity_queue.push(entity);
        Ok(id)
    }

    /// Add `entity` right away. Not allowed during a tick.
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<EntityId, WorldError> {
        self.expect_idle()?;
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(WorldError::DuplicateEntity(id));
        }
        entity.place(&self.name);
        self.entities.insert(id, entity);
        Ok(id)
    }

    /// Spawn a player at the spawn point. Not allowed during a tick.
    pub fn add_player(&mut self, username: &str) -> Result<EntityId, WorldError> {
        self.expect_idle()?;
        let mut player = Player::new(username, Transform::from_position(self.spawn_point()));
        player.place(&self.name);
        let id = player.id();
        self.players.insert(id, player);
        self.diag
            .info(format_args!("'{username}' joined '{}' as {id}", self.name));
        Ok(id)
    }

    pub fn remove_player(&mut self, id: EntityId) -> Result<Option<Player>, WorldError> {
        self.expect_idle()?;
        let player = self.players.remove(&id);
        if let Some(player) = &player {
            self.diag.info(format_args!(
                "'{}' left '{}'",
                player.username(),
                self.name
            ));
        }
        Ok(player)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn player(&self, id: EntityId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: EntityId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn player_by_name(&self, username: &str) -> Option<&Player> {
        self.players.values().find(|p| p.username() == username)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn queued_entities(&self) -> usize {
        self.entity_queue.len()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("chunks", &self.chunks.len())
            .field("players", &self.players.len())
            .field("entities", &self.entities.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityBehavior, EntityCore};
    use crate::storage::MemoryStorage;
    use std::sync::Mutex;
    use strata_log::{MemorySink, Severity};
    use strata_voxel::{ChunkPersistence, LocalPos, CHUNK_VOLUME};

    fn world_with(settings: WorldSettings) -> (World, MemoryStorage, Arc<MemorySink>) {
        let storage = MemoryStorage::with_settings(&settings).unwrap();
        let (diag, sink) = Diagnostics::memory("world");
        let world = World::new(settings.name.clone(), Box::new(storage.clone()), diag);
        (world, storage, sink)
    }

    fn running() -> (World, MemoryStorage, Arc<MemorySink>) {
        let (mut world, storage, sink) = world_with(WorldSettings::new("test"));
        world.load(&WorldRegistries::with_defaults()).unwrap();
        (world, storage, sink)
    }

    #[test]
    fn test_load_resolves_and_runs() {
        let (world, _, sink) = running();
        assert_eq!(world.state(), WorldState::Running);
        assert_eq!(world.generator().unwrap().name(), "default");
        assert!(world.chunks().is_empty());
        assert!(sink.contains(Severity::Info, "Loaded world 'test'"));
    }

    #[test]
    fn test_load_with_unknown_generator_stays_unloaded() {
        let mut settings = WorldSettings::new("broken");
        settings.generator = "caves".into();
        let (mut world, _, sink) = world_with(settings);

        let result = world.load(&WorldRegistries::with_defaults());
        assert!(matches!(result, Err(WorldError::UnknownGenerator(name)) if name == "caves"));
        assert_eq!(world.state(), WorldState::Unloaded);
        assert!(world.settings().is_none());
        assert_eq!(sink.count(Severity::Error), 1);
    }

    #[test]
    fn test_load_without_settings_fails() {
        let (diag, _) = Diagnostics::memory("world");
        let mut world = World::new("void", Box::new(MemoryStorage::new()), diag);
        assert!(matches!(
            world.load(&WorldRegistries::with_defaults()),
            Err(WorldError::Settings(_))
        ));
        assert_eq!(world.state(), WorldState::Unloaded);
    }

    #[test]
    fn test_load_twice_is_rejected_without_changes() {
        let (mut world, _, _) = running();
        world.queue_voxel_update(IVec3::new(1, 1, 1), Voxel::new(2));
        world.tick(0.05).unwrap();
        let chunks = world.chunks().len();

        let result = world.load(&WorldRegistries::with_defaults());
        assert!(matches!(
            result,
            Err(WorldError::InvalidState {
                expected: WorldState::Unloaded,
                actual: WorldState::Running,
                ..
            })
        ));
        assert_eq!(world.state(), WorldState::Running);
        assert_eq!(world.chunks().len(), chunks);
    }

    #[test]
    fn test_tick_requires_running() {
        let (mut world, _, _) = world_with(WorldSettings::new("test"));
        assert!(matches!(world.tick(0.05), Err(WorldError::InvalidState { .. })));
        assert!(matches!(world.save(), Err(WorldError::InvalidState { .. })));
    }

    #[test]
    fn test_voxel_update_visible_after_one_tick() {
        let (mut world, _, _) = running();
        let voxel = Voxel::new(2);
        world.queue_voxel_update(IVec3::new(5, 5, 5), voxel);
        assert!(world.chunks().get_chunk(ChunkCoord::new(0, 0, 0)).is_none());

        world.tick(0.05).unwrap();
        let chunk = world.chunks().get_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        assert_eq!(chunk.get(LocalPos::new(5, 5, 5).unwrap()), voxel);
        assert!(chunk.is_dirty());
        assert!(chunk.is_ready());
    }

    #[test]
    fn test_queued_entity_admitted_next_tick() {
        let (mut world, _, _) = running();
        let id = world.queue_entity_add(Entity::new(Transform::default())).unwrap();
        assert!(world.entity(id).is_none());
        assert_eq!(world.queued_entities(), 1);

        world.tick(0.05).unwrap();
        let entity = world.entity(id).unwrap();
        assert_eq!(entity.location().unwrap().world, "test");
        assert_eq!(entity.tick_count(), 1);
    }

    struct SelfDestruct;

    impl EntityBehavior for SelfDestruct {
        fn tick(&mut self, _dt: f32, entity: &mut EntityCore) {
            entity.destroy();
        }
    }

    #[test]
    fn test_entity_destroyed_during_its_tick_is_gone() {
        let (mut world, _, _) = running();
        let doomed = world
            .add_entity(Entity::new(Transform::default()).with_behavior(SelfDestruct))
            .unwrap();
        let survivor = world.add_entity(Entity::new(Transform::default())).unwrap();

        world.tick(0.05).unwrap();
        assert!(world.entity(doomed).is_none());
        assert!(world.entity(survivor).is_some());
    }

    #[test]
    fn test_players_marked_for_destroy_are_removed() {
        let (mut world, _, _) = running();
        let alice = world.add_player("alice").unwrap();
        let bob = world.add_player("bob").unwrap();
        world.player_mut(bob).unwrap().destroy();

        world.tick(0.05).unwrap();
        assert!(world.player(alice).is_some());
        assert!(world.player(bob).is_none());
        assert_eq!(world.player_by_name("alice").unwrap().id(), alice);
        assert_eq!(
            world.player(alice).unwrap().location().unwrap().chunk,
            ChunkCoord::new(0, 0, 0)
        );

        assert!(world.remove_player(alice).unwrap().is_some());
        assert_eq!(world.player_count(), 0);
    }

    /// Records what it could observe from inside the world tick.
    struct Probe {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl GameMode for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn tick(&mut self, _dt: f32, world: &mut World) {
            let immediate = world.add_entity(Entity::new(Transform::default()));
            let queued = world.queue_entity_add(Entity::new(Transform::default()));
            let mut seen = self.seen.lock().unwrap();
            seen.push(format!(
                "entities={} immediate={} queued={}",
                world.entity_count(),
                matches!(immediate, Err(WorldError::TickInProgress(_))),
                queued.is_ok()
            ));
        }
    }

    #[test]
    fn test_game_mode_ticks_last_and_cannot_add_immediately() {
        let mut settings = WorldSettings::new("probed");
        settings.game_mode = "probe".into();
        let (mut world, _, _) = world_with(settings);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registries = WorldRegistries::with_defaults();
        let shared = Arc::clone(&seen);
        registries.register_game_mode("probe", move || {
            Box::new(Probe {
                seen: Arc::clone(&shared),
            })
        });
        world.load(&registries).unwrap();

        world.queue_entity_add(Entity::new(Transform::default())).unwrap();
        world.tick(0.05).unwrap();
        world.tick(0.05).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "entities=1 immediate=true queued=true".to_string(),
                "entities=2 immediate=true queued=true".to_string(),
            ]
        );
        assert!(!world.is_ticking());
    }

    #[test]
    fn test_requested_chunks_prefer_storage() {
        let (mut world, mut storage, _) = running();
        let stored = ChunkCoord::new(3, 0, 0);
        storage.save_chunk(stored, &vec![Voxel::new(9); CHUNK_VOLUME]).unwrap();

        world.request_chunk(stored);
        world.request_chunk(stored);
        world.request_chunk(ChunkCoord::new(0, -1, 0));
        assert_eq!(world.pending_chunk_requests(), 2);
        world.tick(0.05).unwrap();

        let restored = world.chunks().get_chunk(stored).unwrap();
        assert!(restored.is_ready());
        assert!(!restored.is_dirty());
        assert_eq!(restored.voxels()[0], Voxel::new(9));

        let generated = world.chunks().get_chunk(ChunkCoord::new(0, -1, 0)).unwrap();
        assert!(generated.is_ready());
        assert_eq!(generated.get(LocalPos::new(0, 15, 0).unwrap()), Voxel::new(3));
    }

    #[test]
    fn test_chunks_outside_the_world_are_refused() {
        let (mut world, _, sink) = running();
        assert!(!world.request_chunk(ChunkCoord::new(i32::MAX, -1, 0)));
        assert_eq!(world.pending_chunk_requests(), 0);
        assert!(sink.contains(Severity::Warning, "outside 'test'"));

        world.tick(0.05).unwrap();
        assert!(world.chunks().is_empty());
    }

    #[test]
    fn test_view_is_bounded_by_render_distance() {
        let mut settings = WorldSettings::new("test");
        settings.render_distance = 2;
        let (mut world, _, _) = world_with(settings);
        world.load(&WorldRegistries::with_defaults()).unwrap();
        let player = world.add_player("alice").unwrap();

        assert_eq!(world.render_distance(), 2);
        assert!(world.in_view_of(player, ChunkCoord::new(0, 0, 0)));
        assert!(world.in_view_of(player, ChunkCoord::new(-2, 2, 1)));
        assert!(!world.in_view_of(player, ChunkCoord::new(3, 0, 0)));
        assert!(!world.in_view_of(player, ChunkCoord::new(i32::MAX, -1, 0)));
        assert!(!world.in_view_of(EntityId::next(), ChunkCoord::new(0, 0, 0)));
    }

    #[test]
    fn test_save_writes_dirty_chunks_and_settings() {
        let (mut world, storage, _) = running();
        world.queue_voxel_update(IVec3::new(1, 2, 3), Voxel::new(1));
        world.queue_voxel_update(IVec3::new(20, 2, 3), Voxel::new(1));
        world.tick(0.05).unwrap();

        assert_eq!(world.save().unwrap(), 2);
        assert_eq!(world.state(), WorldState::Running);
        assert_eq!(storage.chunk_count(), 2);
        assert!(world.chunks().iter().all(|(_, c)| !c.is_dirty()));

        // Nothing left to write.
        assert_eq!(world.save().unwrap(), 0);
    }

    #[test]
    fn test_saving_disabled_writes_nothing() {
        let mut settings = WorldSettings::new("scratch");
        settings.enable_saving = false;
        let (mut world, storage, _) = world_with(settings);
        world.load(&WorldRegistries::with_defaults()).unwrap();

        world.queue_voxel_update(IVec3::ZERO, Voxel::new(1));
        world.tick(0.05).unwrap();
        assert_eq!(world.save().unwrap(), 0);
        assert_eq!(storage.chunk_count(), 0);
    }

    #[test]
    fn test_unload_clears_everything() {
        let (mut world, _, _) = running();
        world.add_player("alice").unwrap();
        world.queue_voxel_update(IVec3::ZERO, Voxel::new(1));
        world.tick(0.05).unwrap();

        world.unload().unwrap();
        assert_eq!(world.state(), WorldState::Unloaded);
        assert!(world.chunks().is_empty());
        assert_eq!(world.player_count(), 0);
        assert!(matches!(world.unload(), Err(WorldError::InvalidState { .. })));

        // Loading again starts fresh.
        world.load(&WorldRegistries::with_defaults()).unwrap();
        assert!(world.is_running());
    }

    #[test]
    fn test_unload_chunk_saves_first() {
        let (mut world, storage, _) = running();
        world.queue_voxel_update(IVec3::new(1, 1, 1), Voxel::new(2));
        world.tick(0.05).unwrap();

        assert!(world.unload_chunk(ChunkCoord::new(0, 0, 0)).unwrap());
        assert!(storage.has_chunk(ChunkCoord::new(0, 0, 0)));
        assert!(!world.unload_chunk(ChunkCoord::new(0, 0, 0)).unwrap());
    }
}
