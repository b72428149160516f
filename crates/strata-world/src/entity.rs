//! Entities and players living in a world.
//!
//! Entities are stored by value in the world's registries and refer back to
//! their world and chunk by name and coordinate only.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{IVec3, Quat, Vec3};
use strata_voxel::{ChunkCoord, world_to_chunk};

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Rebuild an id stored elsewhere, e.g. in a connection's controller reference.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Position, orientation and scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// The voxel containing `position`.
    pub fn voxel(&self) -> IVec3 {
        self.position.floor().as_ivec3()
    }

    pub fn chunk(&self) -> ChunkCoord {
        world_to_chunk(self.voxel()).0
    }
}

/// Where an entity is. Resolved by lookup, never owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLocation {
    pub world: String,
    pub chunk: ChunkCoord,
}

/// Per-entity update hook.
pub trait EntityBehavior: Send {
    fn tick(&mut self, dt: f32, entity: &mut EntityCore);
}

/// The part of an entity its behavior may change.
#[derive(Debug, Clone)]
pub struct EntityCore {
    pub transform: Transform,
    destroy: bool,
}

impl EntityCore {
    /// Remove this entity during the current entity pass.
    pub fn destroy(&mut self) {
        self.destroy = true;
    }

    pub fn is_marked_for_destroy(&self) -> bool {
        self.destroy
    }
}

/// A simulated object in a world.
pub struct Entity {
    id: EntityId,
    core: EntityCore,
    location: Option<EntityLocation>,
    behavior: Option<Box<dyn EntityBehavior>>,
    ticks: u64,
}

impl Entity {
    pub fn new(transform: Transform) -> Self {
        Self {
            id: EntityId::next(),
            core: EntityCore {
                transform,
                destroy: false,
            },
            location: None,
            behavior: None,
            ticks: 0,
        }
    }

    pub fn with_behavior(mut self, behavior: impl EntityBehavior + 'static) -> Self {
        self.behavior = Some(Box::new(behavior));
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn transform(&self) -> &Transform {
        &self.core.transform
    }

    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.core.transform
    }

    /// `None` until the entity was admitted into a world.
    pub fn location(&self) -> Option<&EntityLocation> {
        self.location.as_ref()
    }

    pub fn destroy(&mut self) {
        self.core.destroy();
    }

    pub fn is_marked_for_destroy(&self) -> bool {
        self.core.is_marked_for_destroy()
    }

    /// Updates this entity has received.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub(crate) fn place(&mut self, world: &str) {
        self.location = Some(EntityLocation {
            world: world.to_string(),
            chunk: self.core.transform.chunk(),
        });
    }

    pub(crate) fn tick(&mut self, dt: f32) {
        if let Some(mut behavior) = self.behavior.take() {
            behavior.tick(dt, &mut self.core);
            self.behavior = Some(behavior);
        }
        self.ticks += 1;
        let chunk = self.core.transform.chunk();
        if let Some(location) = self.location.as_mut() {
            location.chunk = chunk;
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("core", &self.core)
            .field("location", &self.location)
            .field("has_behavior", &self.behavior.is_some())
            .finish()
    }
}

/// An entity controlled by a connected client.
#[derive(Debug)]
pub struct Player {
    entity: Entity,
    username: String,
}

impl Player {
    pub fn new(username: impl Into<String>, transform: Transform) -> Self {
        Self {
            entity: Entity::new(transform),
            username: username.into(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.entity.id()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }

    pub fn transform(&self) -> &Transform {
        self.entity.transform()
    }

    pub fn location(&self) -> Option<&EntityLocation> {
        self.entity.location()
    }

    pub fn destroy(&mut self) {
        self.entity.destroy();
    }

    pub fn is_marked_for_destroy(&self) -> bool {
        self.entity.is_marked_for_destroy()
    }

    pub(crate) fn place(&mut self, world: &str) {
        self.entity.place(world);
    }

    pub(crate) fn tick(&mut self, dt: f32) {
        self.entity.tick(dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Walk(Vec3);

    impl EntityBehavior for Walk {
        fn tick(&mut self, dt: f32, entity: &mut EntityCore) {
            entity.transform.position += self.0 * dt;
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Entity::new(Transform::default());
        let b = Entity::new(Transform::default());
        assert_ne!(a.id(), b.id());
        assert_eq!(EntityId::from_raw(a.id().raw()), a.id());
    }

    #[test]
    fn test_tick_runs_behavior_and_tracks_chunk() {
        let mut entity =
            Entity::new(Transform::from_position(Vec3::new(15.5, 0.0, 0.0))).with_behavior(Walk(Vec3::X));
        entity.place("overworld");
        assert_eq!(entity.location().unwrap().chunk, ChunkCoord::new(0, 0, 0));

        entity.tick(1.0);
        assert_eq!(entity.transform().position.x, 16.5);
        assert_eq!(entity.location().unwrap().chunk, ChunkCoord::new(1, 0, 0));
        assert_eq!(entity.tick_count(), 1);
    }

    #[test]
    fn test_negative_positions_floor() {
        let transform = Transform::from_position(Vec3::new(-0.5, -16.0, -17.0));
        assert_eq!(transform.voxel(), IVec3::new(-1, -16, -17));
        assert_eq!(transform.chunk(), ChunkCoord::new(-1, -1, -2));
    }
}
