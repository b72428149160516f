use serde::{Deserialize, Serialize};

/// Voxel type id reserved for empty space.
pub const AIR_ID: u16 = 0;

/// One grid cell: block type, free-form metadata and light level.
///
/// Copied by value in and out of chunks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voxel {
    /// Voxel type id, see [`VoxelTypeRegistry`](crate::VoxelTypeRegistry).
    pub id: u16,
    pub metadata: u8,
    pub light: u8,
}

impl Voxel {
    pub const AIR: Voxel = Voxel::new(AIR_ID);

    /// Size of one voxel in the chunk file payload.
    pub const ENCODED_LEN: usize = 4;

    pub const fn new(id: u16) -> Self {
        Self {
            id,
            metadata: 0,
            light: 0,
        }
    }

    pub const fn with_metadata(mut self, metadata: u8) -> Self {
        self.metadata = metadata;
        self
    }

    pub const fn with_light(mut self, light: u8) -> Self {
        self.light = light;
        self
    }

    pub fn is_air(&self) -> bool {
        self.id == AIR_ID
    }

    /// `[id lo, id hi, metadata, light]`.
    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let id = self.id.to_le_bytes();
        [id[0], id[1], self.metadata, self.light]
    }

    pub fn from_bytes(bytes: [u8; Self::ENCODED_LEN]) -> Self {
        Self {
            id: u16::from_le_bytes([bytes[0], bytes[1]]),
            metadata: bytes[2],
            light: bytes[3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_is_default() {
        assert_eq!(Voxel::default(), Voxel::AIR);
        assert!(Voxel::AIR.is_air());
        assert!(!Voxel::new(3).is_air());
    }

    #[test]
    fn test_byte_layout() {
        let voxel = Voxel::new(0x0102).with_metadata(7).with_light(15);
        assert_eq!(voxel.to_bytes(), [0x02, 0x01, 7, 15]);
        assert_eq!(Voxel::from_bytes(voxel.to_bytes()), voxel);
    }
}
