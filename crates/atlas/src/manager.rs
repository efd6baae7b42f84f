use model::{AtlasConfig, SlotAddress, TileBitmap, TileKey};

use crate::SlotAllocator;

/// One queued pixel upload. Stays queued until the GPU side drains it, so
/// tiles uploaded before the backing texture is realized are not lost.
#[derive(Debug)]
pub struct PendingUpload {
    pub address: SlotAddress,
    pub bitmap: TileBitmap,
}

/// CPU-side draw instance: `translate · rotate_z · scale` model matrix plus
/// the atlas attributes the shader needs to address one slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceRecord {
    pub model: [[f32; 4]; 4],
    pub uv_offset: [f32; 2],
    pub uv_scale: [f32; 2],
    pub layer: f32,
}

/// Owns the slot allocator, the queue of pending pixel uploads, and the
/// per-frame instance staging list. The GPU backend reads all three; nothing
/// here touches the graphics API.
#[derive(Debug)]
pub struct AtlasManager {
    allocator: SlotAllocator,
    pending_uploads: Vec<PendingUpload>,
    instances: Vec<InstanceRecord>,
    revision: u64,
}

impl AtlasManager {
    pub fn new(config: AtlasConfig) -> Self {
        Self {
            allocator: SlotAllocator::new(config),
            pending_uploads: Vec::new(),
            instances: Vec::new(),
            revision: 0,
        }
    }

    pub fn config(&self) -> AtlasConfig {
        self.allocator.config()
    }

    /// Allocates a slot for `key` and queues the pixel upload. `None` means
    /// the atlas is full; nothing is queued in that case.
    pub fn upload_tile(&mut self, key: TileKey, bitmap: TileBitmap) -> Option<SlotAddress> {
        let tile_size = self.allocator.config().tile_size() as usize;
        let expected = tile_size * tile_size * 4;
        if bitmap.bytes().len() != expected {
            panic!(
                "tile bitmap holds {} bytes, atlas slots hold {expected}",
                bitmap.bytes().len()
            );
        }
        let address = self.allocator.allocate(key)?;
        self.pending_uploads.push(PendingUpload { address, bitmap });
        Some(address)
    }

    /// Releases the slot. Pixels are not cleared; the next upload into the
    /// slot overwrites them.
    pub fn free_tile(&mut self, key: TileKey) -> bool {
        self.allocator.free(key)
    }

    pub fn has_tile(&self, key: TileKey) -> bool {
        self.allocator.has(key)
    }

    pub fn slot_of(&self, key: TileKey) -> Option<SlotAddress> {
        self.allocator.get(key)
    }

    /// Appends a draw instance for `slot`. Returns the instance index, or
    /// `None` (silently) when the slot argument is absent.
    pub fn add_instance_with_z(
        &mut self,
        slot: Option<SlotAddress>,
        x: f32,
        y: f32,
        z: f32,
        scale_x: f32,
        scale_y: f32,
        rotation: f32,
    ) -> Option<u32> {
        let slot = slot?;
        let capacity = self.allocator.total_slots() as usize;
        if self.instances.len() >= capacity {
            panic!(
                "instance staging overflow: {} instances exceed atlas capacity {}",
                self.instances.len() + 1,
                capacity
            );
        }
        let config = self.allocator.config();
        let (offset_u, offset_v) = slot.uv_offset(config.tile_size(), config.atlas_size());
        let uv_scale = SlotAddress::uv_scale(config.tile_size(), config.atlas_size());
        let sin = rotation.sin();
        let cos = rotation.cos();
        let record = InstanceRecord {
            model: [
                [cos * scale_x, sin * scale_x, 0.0, 0.0],
                [-sin * scale_y, cos * scale_y, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [x, y, z, 1.0],
            ],
            uv_offset: [offset_u, offset_v],
            uv_scale: [uv_scale, uv_scale],
            layer: slot.layer as f32,
        };
        let index = self.instances.len() as u32;
        self.instances.push(record);
        Some(index)
    }

    pub fn clear_instances(&mut self) {
        self.instances.clear();
    }

    /// Marks the staged instances ready for the GPU side to re-upload.
    pub fn update(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    /// Hands the queued uploads to the GPU side. Called only once the
    /// backing texture exists; until then uploads accumulate here.
    pub fn drain_uploads(&mut self) -> Vec<PendingUpload> {
        std::mem::take(&mut self.pending_uploads)
    }

    pub fn pending_upload_count(&self) -> usize {
        self.pending_uploads.len()
    }

    pub fn used_slot_count(&self) -> u32 {
        self.allocator.used_count()
    }

    pub fn total_slots(&self) -> u32 {
        self.allocator.total_slots()
    }

    pub fn free_slots(&self) -> u32 {
        self.allocator.free_slots()
    }

    /// Number of resident tiles (identical to the used slot count; kept as
    /// its own accessor for call sites that speak in tiles).
    pub fn tile_count(&self) -> u32 {
        self.allocator.used_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{TileBitmap, TileKey, TILE_BYTES};

    fn manager() -> AtlasManager {
        AtlasManager::new(AtlasConfig::default())
    }

    fn bitmap(fill: u8) -> TileBitmap {
        TileBitmap::new(vec![fill; TILE_BYTES], model::TILE_SIZE).expect("create tile bitmap")
    }

    #[test]
    fn upload_allocates_and_queues() {
        let mut manager = manager();
        let key = TileKey::new(1, 0, 0, 0);
        let address = manager.upload_tile(key, bitmap(7)).expect("upload tile");
        assert_eq!(address.layer, 0);
        assert_eq!(manager.pending_upload_count(), 1);
        assert_eq!(manager.used_slot_count(), 1);

        let drained = manager.drain_uploads();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].address, address);
        assert_eq!(manager.pending_upload_count(), 0);
    }

    #[test]
    fn free_tile_releases_slot_without_touching_queue() {
        let mut manager = manager();
        let key = TileKey::new(1, 0, 0, 0);
        manager.upload_tile(key, bitmap(0)).expect("upload tile");
        assert!(manager.free_tile(key));
        assert_eq!(manager.used_slot_count(), 0);
        // The queued upload stays; the slot may be rewritten by a later tile.
        assert_eq!(manager.pending_upload_count(), 1);
        assert!(!manager.free_tile(key));
    }

    #[test]
    fn absent_slot_fails_silently() {
        let mut manager = manager();
        assert_eq!(
            manager.add_instance_with_z(None, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0),
            None
        );
        assert_eq!(manager.instance_count(), 0);
    }

    #[test]
    fn instance_records_transform_and_uv() {
        let mut manager = manager();
        let key = TileKey::new(2, 1, 1, 2);
        let address = manager.upload_tile(key, bitmap(0)).expect("upload tile");
        let index = manager
            .add_instance_with_z(Some(address), 3.0, -2.0, 0.5, 2.0, 4.0, 0.0)
            .expect("add instance");
        assert_eq!(index, 0);

        let record = manager.instances()[0];
        assert_eq!(record.model[3], [3.0, -2.0, 0.5, 1.0]);
        assert_eq!(record.model[0][0], 2.0);
        assert_eq!(record.model[1][1], 4.0);
        assert_eq!(record.uv_scale, [0.0625, 0.0625]);
        assert_eq!(record.layer, 0.0);
    }

    #[test]
    fn update_bumps_revision_and_clear_empties_staging() {
        let mut manager = manager();
        let key = TileKey::new(1, 0, 0, 0);
        let address = manager.upload_tile(key, bitmap(0)).expect("upload tile");
        manager
            .add_instance_with_z(Some(address), 0.0, 0.0, 0.0, 1.0, 1.0, 0.0)
            .expect("add instance");
        let before = manager.revision();
        manager.update();
        assert_eq!(manager.revision(), before + 1);
        manager.clear_instances();
        assert_eq!(manager.instance_count(), 0);
    }
}
