use std::fmt;

pub const TILE_SIZE: u32 = 256;
pub const ATLAS_SIZE: u32 = 4096;
pub const MAX_LAYERS: u32 = 16;
pub const MAX_LOD: u8 = 4;
pub const BASE_WORLD_SIZE: f64 = 4.0;
pub const POOL_SIZE: usize = 4;
pub const TARGET_FREE_SLOTS: u32 = 512;

/// Bytes per decoded tile: `TILE_SIZE² × 4` (RGBA8).
pub const TILE_BYTES: usize = (TILE_SIZE as usize) * (TILE_SIZE as usize) * 4;

pub type ImageId = u32;
pub type Lod = u8;

/// Stable identity of one tile of one image at one level of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub image_id: ImageId,
    pub lod: Lod,
    pub tile_x: u32,
    pub tile_y: u32,
}

impl TileKey {
    pub const fn new(image_id: ImageId, lod: Lod, tile_x: u32, tile_y: u32) -> Self {
        Self {
            image_id,
            lod,
            tile_x,
            tile_y,
        }
    }
}

/// Physical position of one tile-sized rectangle in the layered atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotAddress {
    pub layer: u32,
    pub slot_x: u32,
    pub slot_y: u32,
}

impl SlotAddress {
    pub fn slot_index(self, slots_per_row: u32) -> u32 {
        assert!(slots_per_row > 0, "slots_per_row must be at least 1");
        assert!(
            self.slot_x < slots_per_row,
            "slot_x {} out of range for {} slots per row",
            self.slot_x,
            slots_per_row
        );
        self.slot_y * slots_per_row + self.slot_x
    }

    pub fn from_slot_index(layer: u32, index: u32, slots_per_row: u32) -> Self {
        assert!(slots_per_row > 0, "slots_per_row must be at least 1");
        Self {
            layer,
            slot_x: index % slots_per_row,
            slot_y: index / slots_per_row,
        }
    }

    pub fn pixel_origin(self, tile_size: u32) -> (u32, u32) {
        (
            self.slot_x
                .checked_mul(tile_size)
                .expect("slot pixel origin x overflow"),
            self.slot_y
                .checked_mul(tile_size)
                .expect("slot pixel origin y overflow"),
        )
    }

    pub fn uv_offset(self, tile_size: u32, atlas_size: u32) -> (f32, f32) {
        assert!(atlas_size > 0, "atlas_size must be at least 1");
        let (origin_x, origin_y) = self.pixel_origin(tile_size);
        (
            origin_x as f32 / atlas_size as f32,
            origin_y as f32 / atlas_size as f32,
        )
    }

    pub fn uv_scale(tile_size: u32, atlas_size: u32) -> f32 {
        assert!(atlas_size > 0, "atlas_size must be at least 1");
        tile_size as f32 / atlas_size as f32
    }
}

/// One renderable quad: a slot plus its placement in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileInstance {
    pub slot: SlotAddress,
    pub world_x: f32,
    pub world_y: f32,
    pub world_z: f32,
    pub tile_world_w: f32,
    pub tile_world_h: f32,
    pub rotation: f32,
}

/// Axis-aligned box in world units. Camera and visibility math stays in f64.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Aabb {
    pub fn from_center_half_extents(
        center_x: f64,
        center_y: f64,
        half_x: f64,
        half_y: f64,
    ) -> Self {
        Self {
            min_x: center_x - half_x,
            min_y: center_y - half_y,
            max_x: center_x + half_x,
            max_y: center_y + half_y,
        }
    }

    pub fn intersects(self, other: Aabb) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn half_extent_x(self) -> f64 {
        (self.max_x - self.min_x) / 2.0
    }

    pub fn half_extent_y(self) -> f64 {
        (self.max_y - self.min_y) / 2.0
    }
}

/// Where the pose's pivot sits relative to the image content.
///
/// Grid layouts pin the pivot at the content's top-left corner; stacked
/// layouts rotate cards about their center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseAnchor {
    TopLeft,
    Center,
}

/// World placement of one image: pivot position, stacking depth, rotation
/// about the anchor, uniform scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f32,
    pub rotation: f32,
    pub scale: f32,
    pub anchor: PoseAnchor,
}

impl Pose {
    /// Map a pivot-relative point (+x right, -y down) into world units.
    pub fn local_to_world(&self, local_x: f64, local_y: f64) -> (f64, f64) {
        let sin = f64::from(self.rotation).sin();
        let cos = f64::from(self.rotation).cos();
        (
            self.x + local_x * cos - local_y * sin,
            self.y + local_x * sin + local_y * cos,
        )
    }

    /// World AABB of a square image of `base_size` world units under this
    /// pose. The tile mesh is placed with the same local/rotation math, so
    /// bounds and drawn extent agree by construction.
    pub fn world_aabb(&self, base_size: f64) -> Aabb {
        let half = base_size * f64::from(self.scale) / 2.0;
        let sin = f64::from(self.rotation).sin();
        let cos = f64::from(self.rotation).cos();
        let (center_x, center_y) = match self.anchor {
            // Content extends +x/-y from the pivot; its unrotated center is
            // (half, -half), rotated about the pivot.
            PoseAnchor::TopLeft => self.local_to_world(half, -half),
            PoseAnchor::Center => (self.x, self.y),
        };
        let half_extent = half * (sin.abs() + cos.abs());
        Aabb::from_center_half_extents(center_x, center_y, half_extent, half_extent)
    }
}

/// Owned RGBA8 pixels for exactly one tile, y-flipped for GPU convention.
#[derive(Clone, PartialEq, Eq)]
pub struct TileBitmap {
    pixels: Vec<u8>,
}

impl TileBitmap {
    pub fn new(pixels: Vec<u8>, tile_size: u32) -> Result<Self, TileBitmapError> {
        let expected = (tile_size as usize) * (tile_size as usize) * 4;
        if pixels.len() != expected {
            return Err(TileBitmapError::LengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self { pixels })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels
    }
}

impl fmt::Debug for TileBitmap {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TileBitmap")
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileBitmapError {
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for TileBitmapError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileBitmapError::LengthMismatch { expected, actual } => {
                write!(
                    formatter,
                    "tile bitmap must hold {expected} bytes, got {actual}"
                )
            }
        }
    }
}

impl std::error::Error for TileBitmapError {}

/// Fixed shape of the slotted atlas, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasConfig {
    tile_size: u32,
    atlas_size: u32,
    max_layers: u32,
}

impl AtlasConfig {
    pub fn new(tile_size: u32, atlas_size: u32, max_layers: u32) -> Result<Self, AtlasConfigError> {
        if tile_size == 0 {
            return Err(AtlasConfigError::TileSizeZero);
        }
        if max_layers == 0 {
            return Err(AtlasConfigError::MaxLayersZero);
        }
        if atlas_size < tile_size || atlas_size % tile_size != 0 {
            return Err(AtlasConfigError::AtlasNotTileAligned);
        }
        let slots_per_row = atlas_size / tile_size;
        let slots_per_layer = slots_per_row
            .checked_mul(slots_per_row)
            .ok_or(AtlasConfigError::TooManySlots)?;
        slots_per_layer
            .checked_mul(max_layers)
            .ok_or(AtlasConfigError::TooManySlots)?;
        Ok(Self {
            tile_size,
            atlas_size,
            max_layers,
        })
    }

    pub fn tile_size(self) -> u32 {
        self.tile_size
    }

    pub fn atlas_size(self) -> u32 {
        self.atlas_size
    }

    pub fn max_layers(self) -> u32 {
        self.max_layers
    }

    pub fn slots_per_row(self) -> u32 {
        self.atlas_size / self.tile_size
    }

    pub fn slots_per_layer(self) -> u32 {
        self.slots_per_row() * self.slots_per_row()
    }

    pub fn total_slots(self) -> u32 {
        self.slots_per_layer() * self.max_layers
    }
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self::new(TILE_SIZE, ATLAS_SIZE, MAX_LAYERS).expect("default atlas config must be valid")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasConfigError {
    TileSizeZero,
    MaxLayersZero,
    AtlasNotTileAligned,
    TooManySlots,
}

impl fmt::Display for AtlasConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtlasConfigError::TileSizeZero => write!(formatter, "tile size must be at least 1"),
            AtlasConfigError::MaxLayersZero => write!(formatter, "max layers must be at least 1"),
            AtlasConfigError::AtlasNotTileAligned => {
                write!(
                    formatter,
                    "atlas size must be a positive multiple of tile size"
                )
            }
            AtlasConfigError::TooManySlots => {
                write!(formatter, "atlas slot count exceeds supported range")
            }
        }
    }
}

impl std::error::Error for AtlasConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_round_trips_through_address() {
        let address = SlotAddress {
            layer: 3,
            slot_x: 5,
            slot_y: 2,
        };
        let index = address.slot_index(16);
        assert_eq!(index, 37);
        assert_eq!(SlotAddress::from_slot_index(3, index, 16), address);
    }

    #[test]
    fn uv_offset_scales_by_atlas_size() {
        let address = SlotAddress {
            layer: 0,
            slot_x: 1,
            slot_y: 2,
        };
        let (u, v) = address.uv_offset(256, 4096);
        assert!((u - 0.0625).abs() < 1e-9);
        assert!((v - 0.125).abs() < 1e-9);
        assert!((SlotAddress::uv_scale(256, 4096) - 0.0625).abs() < 1e-9);
    }

    #[test]
    fn default_atlas_config_capacity() {
        let config = AtlasConfig::default();
        assert_eq!(config.slots_per_row(), 16);
        assert_eq!(config.slots_per_layer(), 256);
        assert_eq!(config.total_slots(), 4096);
    }

    #[test]
    fn atlas_config_rejects_unaligned_sizes() {
        assert_eq!(
            AtlasConfig::new(256, 1000, 4),
            Err(AtlasConfigError::AtlasNotTileAligned)
        );
        assert_eq!(
            AtlasConfig::new(0, 4096, 4),
            Err(AtlasConfigError::TileSizeZero)
        );
        assert_eq!(
            AtlasConfig::new(256, 4096, 0),
            Err(AtlasConfigError::MaxLayersZero)
        );
    }

    #[test]
    fn tile_bitmap_rejects_wrong_length() {
        assert!(TileBitmap::new(vec![0; TILE_BYTES], TILE_SIZE).is_ok());
        assert!(TileBitmap::new(vec![0; 16], 2).is_ok());
        assert_eq!(
            TileBitmap::new(vec![0; 3], TILE_SIZE).err(),
            Some(TileBitmapError::LengthMismatch {
                expected: TILE_BYTES,
                actual: 3,
            })
        );
    }

    #[test]
    fn top_left_pose_aabb_extends_right_and_down() {
        let pose = Pose {
            x: 10.0,
            y: 20.0,
            z: 0.0,
            rotation: 0.0,
            scale: 1.0,
            anchor: PoseAnchor::TopLeft,
        };
        let aabb = pose.world_aabb(4.0);
        assert!((aabb.min_x - 10.0).abs() < 1e-9);
        assert!((aabb.max_x - 14.0).abs() < 1e-9);
        assert!((aabb.min_y - 16.0).abs() < 1e-9);
        assert!((aabb.max_y - 20.0).abs() < 1e-9);
    }

    #[test]
    fn rotated_pose_aabb_grows_by_rotation_extent() {
        let pose = Pose {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            rotation: std::f32::consts::FRAC_PI_4,
            scale: 2.0,
            anchor: PoseAnchor::Center,
        };
        let aabb = pose.world_aabb(4.0);
        // half = 4, rotated 45 degrees: half extent = 4 * sqrt(2)
        let expected = 4.0 * std::f64::consts::SQRT_2;
        assert!((aabb.half_extent_x() - expected).abs() < 1e-6);
        assert!((aabb.half_extent_y() - expected).abs() < 1e-6);
    }

    #[test]
    fn aabb_intersection_is_inclusive_at_edges() {
        let a = Aabb {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        };
        let b = Aabb {
            min_x: 1.0,
            min_y: 1.0,
            max_x: 2.0,
            max_y: 2.0,
        };
        let c = Aabb {
            min_x: 1.1,
            min_y: 1.1,
            max_x: 2.0,
            max_y: 2.0,
        };
        assert!(a.intersects(b));
        assert!(!a.intersects(c));
    }
}
