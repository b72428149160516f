//! Voxel type catalogue: id and name lookup for voxel types.
//!
//! The catalogue is loaded once at server start from a JSON document of the
//! form `{ "voxelTypes": [ ... ] }`. The document bytes are kept as loaded so
//! they can be handed to clients verbatim.

use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::voxel::AIR_ID;

/// Client-side rendering hints. The server only stores and forwards them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphicsHints {
    pub animation_frames: u32,
    pub mesh: String,
    pub texture_index: u32,
    pub transparent: bool,
}

/// One voxel type record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoxelTypeDef {
    pub name: String,
    pub id: u16,
    /// Whether entities collide with this voxel.
    #[serde(default)]
    pub collision: bool,
    /// Movement speed multiplier for entities passing through.
    #[serde(default)]
    pub pass_through_speed: f32,
    /// Time factor to break the voxel.
    #[serde(default)]
    pub strength: f32,
    /// Light emission level (0 = none, 15 = max).
    #[serde(default)]
    pub emissive_light: u8,
    #[serde(flatten)]
    pub graphics: GraphicsHints,
}

impl VoxelTypeDef {
    pub fn new(name: impl Into<String>, id: u16) -> Self {
        Self {
            name: name.into(),
            id,
            collision: true,
            pass_through_speed: 0.0,
            strength: 1.0,
            emissive_light: 0,
            graphics: GraphicsHints {
                mesh: "cube".to_string(),
                ..GraphicsHints::default()
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogueDocument {
    voxel_types: Vec<VoxelTypeDef>,
}

/// Errors building or loading the voxel catalogue.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("duplicate voxel type id: {0}")]
    DuplicateId(u16),
    #[error("duplicate voxel type name: {0}")]
    DuplicateName(String),
    #[error("invalid voxel catalogue: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read voxel catalogue: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write voxel catalogue: {0}")]
    Write(#[source] std::io::Error),
}

/// Registered voxel types with O(1) lookup by id and by name.
#[derive(Debug, Clone, Default)]
pub struct VoxelTypeRegistry {
    types: Vec<VoxelTypeDef>,
    by_id: FxHashMap<u16, usize>,
    by_name: FxHashMap<String, u16>,
    /// Catalogue document as sent to clients.
    document: Vec<u8>,
}

impl VoxelTypeRegistry {
    /// Empty registry. Most callers want [`default_catalogue`](Self::default_catalogue).
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in catalogue: air, stone, dirt and grass.
    pub fn default_catalogue() -> Self {
        let mut registry = Self::new();
        let mut air = VoxelTypeDef::new("air", AIR_ID);
        air.collision = false;
        air.pass_through_speed = 1.0;
        air.strength = 0.0;
        air.graphics.mesh = String::new();
        air.graphics.transparent = true;

        let defs = [
            air,
            VoxelTypeDef::new("stone", 1),
            VoxelTypeDef::new("dirt", 2),
            VoxelTypeDef::new("grass", 3),
        ];
        for def in defs {
            // Static ids and names above are distinct.
            let _ = registry.insert(def);
        }
        registry.document = registry.to_json().unwrap_or_default();
        registry
    }

    /// Register a voxel type. Ids and names must be unique.
    pub fn register(&mut self, def: VoxelTypeDef) -> Result<(), CatalogueError> {
        self.insert(def)?;
        self.document = self.to_json()?;
        Ok(())
    }

    fn insert(&mut self, def: VoxelTypeDef) -> Result<(), CatalogueError> {
        if self.by_id.contains_key(&def.id) {
            return Err(CatalogueError::DuplicateId(def.id));
        }
        if self.by_name.contains_key(&def.name) {
            return Err(CatalogueError::DuplicateName(def.name));
        }
        self.by_id.insert(def.id, self.types.len());
        self.by_name.insert(def.name.clone(), def.id);
        self.types.push(def);
        Ok(())
    }

    /// Parse a catalogue document, keeping its bytes for clients.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CatalogueError> {
        let doc: CatalogueDocument = serde_json::from_slice(bytes)?;
        let mut registry = Self::new();
        for def in doc.voxel_types {
            registry.insert(def)?;
        }
        registry.document = bytes.to_vec();
        Ok(registry)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CatalogueError> {
        let doc = CatalogueDocument {
            voxel_types: self.types.clone(),
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    /// Load the catalogue at `path`, writing the built-in one there if it
    /// does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, CatalogueError> {
        if path.exists() {
            let bytes = std::fs::read(path).map_err(CatalogueError::Read)?;
            let registry = Self::from_json(&bytes)?;
            tracing::info!(
                "Loaded {} voxel types from {}",
                registry.len(),
                path.display()
            );
            return Ok(registry);
        }

        let registry = Self::default_catalogue();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CatalogueError::Write)?;
        }
        std::fs::write(path, registry.document()).map_err(CatalogueError::Write)?;
        tracing::info!("Created default voxel catalogue at {}", path.display());
        Ok(registry)
    }

    pub fn get(&self, id: u16) -> Option<&VoxelTypeDef> {
        self.by_id.get(&id).map(|&index| &self.types[index])
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&VoxelTypeDef> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn contains(&self, id: u16) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoxelTypeDef> {
        self.types.iter()
    }

    /// Catalogue document bytes, exactly as loaded.
    pub fn document(&self) -> &[u8] {
        &self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "voxelTypes": [
            { "name": "air", "id": 0, "collision": false, "transparent": true },
            {
                "name": "lamp", "id": 12, "collision": true, "emissiveLight": 14,
                "passThroughSpeed": 0.0, "strength": 2.5,
                "animationFrames": 4, "mesh": "cube", "textureIndex": 30
            }
        ]
    }"#;

    #[test]
    fn test_from_json_lookups() {
        let registry = VoxelTypeRegistry::from_json(SAMPLE.as_bytes()).unwrap();
        assert_eq!(registry.len(), 2);

        let lamp = registry.get(12).unwrap();
        assert_eq!(lamp.name, "lamp");
        assert_eq!(lamp.emissive_light, 14);
        assert_eq!(lamp.graphics.animation_frames, 4);
        assert_eq!(lamp.graphics.texture_index, 30);
        assert!(registry.lookup_by_name("air").unwrap().graphics.transparent);
        assert!(registry.get(5).is_none());
    }

    #[test]
    fn test_document_kept_verbatim() {
        let registry = VoxelTypeRegistry::from_json(SAMPLE.as_bytes()).unwrap();
        assert_eq!(registry.document(), SAMPLE.as_bytes());
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut registry = VoxelTypeRegistry::default_catalogue();
        assert!(matches!(
            registry.register(VoxelTypeDef::new("other", 1)),
            Err(CatalogueError::DuplicateId(1))
        ));
        assert!(matches!(
            registry.register(VoxelTypeDef::new("stone", 40)),
            Err(CatalogueError::DuplicateName(_))
        ));

        let doc = r#"{"voxelTypes": [{"name": "a", "id": 1}, {"name": "b", "id": 1}]}"#;
        assert!(VoxelTypeRegistry::from_json(doc.as_bytes()).is_err());
    }

    #[test]
    fn test_register_refreshes_document() {
        let mut registry = VoxelTypeRegistry::default_catalogue();
        registry.register(VoxelTypeDef::new("glass", 20)).unwrap();
        let reparsed = VoxelTypeRegistry::from_json(registry.document()).unwrap();
        assert!(reparsed.contains(20));
        assert_eq!(reparsed.len(), 5);
    }

    #[test]
    fn test_invalid_json() {
        let result = VoxelTypeRegistry::from_json(b"{\"voxelTypes\": 3}");
        assert!(matches!(result, Err(CatalogueError::Json(_))));
    }

    #[test]
    fn test_load_or_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxeltypes.json");

        let created = VoxelTypeRegistry::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert!(created.contains(AIR_ID));

        let loaded = VoxelTypeRegistry::load_or_create(&path).unwrap();
        assert_eq!(loaded.len(), created.len());
        assert_eq!(loaded.document(), created.document());
    }
}
