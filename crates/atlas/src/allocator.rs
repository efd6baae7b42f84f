use std::collections::HashMap;

use bitvec::prelude::{BitVec, Lsb0};
use model::{AtlasConfig, SlotAddress, TileKey};

#[derive(Debug)]
struct LayerOccupancy {
    bits: BitVec<u64, Lsb0>,
    used: u32,
}

impl LayerOccupancy {
    fn new(slots_per_layer: u32) -> Self {
        Self {
            bits: BitVec::repeat(false, slots_per_layer as usize),
            used: 0,
        }
    }

    fn lowest_free_index(&self) -> Option<u32> {
        self.bits.iter_zeros().next().map(|index| index as u32)
    }
}

/// Assigns and recycles tile-sized slots in the layered atlas.
///
/// Allocation order is deterministic: the first layer with free capacity,
/// the lowest free slot index within it. Freed slots are reused before the
/// scan advances, so tests can assert exact positions.
#[derive(Debug)]
pub struct SlotAllocator {
    config: AtlasConfig,
    layers: Vec<LayerOccupancy>,
    slots_by_key: HashMap<TileKey, SlotAddress>,
}

impl SlotAllocator {
    pub fn new(config: AtlasConfig) -> Self {
        let layers = (0..config.max_layers())
            .map(|_| LayerOccupancy::new(config.slots_per_layer()))
            .collect();
        Self {
            config,
            layers,
            slots_by_key: HashMap::new(),
        }
    }

    pub fn config(&self) -> AtlasConfig {
        self.config
    }

    /// Returns the existing slot when `key` is already allocated; otherwise
    /// claims the lowest free slot. `None` means every layer is saturated.
    pub fn allocate(&mut self, key: TileKey) -> Option<SlotAddress> {
        if let Some(existing) = self.slots_by_key.get(&key) {
            return Some(*existing);
        }
        for (layer_index, layer) in self.layers.iter_mut().enumerate() {
            let Some(slot_index) = layer.lowest_free_index() else {
                continue;
            };
            layer.bits.set(slot_index as usize, true);
            layer.used = layer
                .used
                .checked_add(1)
                .expect("layer used count overflow");
            let address = SlotAddress::from_slot_index(
                layer_index as u32,
                slot_index,
                self.config.slots_per_row(),
            );
            self.slots_by_key.insert(key, address);
            return Some(address);
        }
        None
    }

    /// No-op if `key` is absent.
    pub fn free(&mut self, key: TileKey) -> bool {
        let Some(address) = self.slots_by_key.remove(&key) else {
            return false;
        };
        let layer = self
            .layers
            .get_mut(address.layer as usize)
            .expect("freed slot layer must be in range");
        let slot_index = address.slot_index(self.config.slots_per_row()) as usize;
        let was_used = layer.bits.replace(slot_index, false);
        if !was_used {
            panic!("freed slot {address:?} was not marked used");
        }
        layer.used = layer
            .used
            .checked_sub(1)
            .expect("layer used count underflow");
        true
    }

    pub fn has(&self, key: TileKey) -> bool {
        self.slots_by_key.contains_key(&key)
    }

    pub fn get(&self, key: TileKey) -> Option<SlotAddress> {
        self.slots_by_key.get(&key).copied()
    }

    pub fn used_count(&self) -> u32 {
        self.layers.iter().map(|layer| layer.used).sum()
    }

    pub fn total_slots(&self) -> u32 {
        self.config.total_slots()
    }

    pub fn free_slots(&self) -> u32 {
        self.total_slots() - self.used_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> AtlasConfig {
        // 1 layer of 2x2 slots.
        AtlasConfig::new(2, 4, 1).expect("create tiny atlas config")
    }

    fn key(index: u32) -> TileKey {
        TileKey::new(index, 0, index, 0)
    }

    #[test]
    fn allocates_lowest_layer_lowest_index_first() {
        let config = AtlasConfig::new(2, 4, 2).expect("create atlas config");
        let mut allocator = SlotAllocator::new(config);
        let mut addresses = Vec::new();
        for index in 0..8 {
            addresses.push(allocator.allocate(key(index)).expect("allocate slot"));
        }
        assert_eq!(
            addresses[0],
            SlotAddress {
                layer: 0,
                slot_x: 0,
                slot_y: 0
            }
        );
        assert_eq!(
            addresses[3],
            SlotAddress {
                layer: 0,
                slot_x: 1,
                slot_y: 1
            }
        );
        assert_eq!(
            addresses[4],
            SlotAddress {
                layer: 1,
                slot_x: 0,
                slot_y: 0
            }
        );
        assert_eq!(allocator.allocate(key(99)), None);
    }

    #[test]
    fn freed_slot_is_reused_before_advancing() {
        let mut allocator = SlotAllocator::new(tiny_config());
        for index in 0..4 {
            allocator.allocate(key(index)).expect("allocate slot");
        }
        assert!(allocator.free(key(1)));
        let reused = allocator.allocate(key(10)).expect("allocate freed slot");
        assert_eq!(
            reused,
            SlotAddress {
                layer: 0,
                slot_x: 1,
                slot_y: 0
            }
        );
    }

    #[test]
    fn allocate_is_idempotent_per_key() {
        let mut allocator = SlotAllocator::new(tiny_config());
        let first = allocator.allocate(key(0)).expect("allocate slot");
        let second = allocator.allocate(key(0)).expect("re-allocate same key");
        assert_eq!(first, second);
        assert_eq!(allocator.used_count(), 1);
    }

    #[test]
    fn free_restores_used_count_and_ignores_absent_keys() {
        let mut allocator = SlotAllocator::new(tiny_config());
        let before = allocator.used_count();
        allocator.allocate(key(0)).expect("allocate slot");
        assert_eq!(allocator.used_count(), before + 1);
        assert!(allocator.free(key(0)));
        assert_eq!(allocator.used_count(), before);
        assert!(!allocator.free(key(0)));
        assert!(!allocator.has(key(0)));
    }

    #[test]
    fn capacity_accounting() {
        let mut allocator = SlotAllocator::new(tiny_config());
        assert_eq!(allocator.total_slots(), 4);
        assert_eq!(allocator.free_slots(), 4);
        allocator.allocate(key(0)).expect("allocate slot");
        allocator.allocate(key(1)).expect("allocate slot");
        assert_eq!(allocator.free_slots(), 2);
        assert_eq!(allocator.get(key(1)).map(|address| address.slot_x), Some(1));
    }
}
