//! Per-(image, LOD) tile data store: what is resident, what is in flight,
//! what LOD each image was last asked for, and the incremental eviction
//! policy that keeps the atlas from filling up.
//!
//! The store never touches the slot allocator directly; it frees tiles
//! through the atlas manager, which owns the slots.

use std::collections::{HashMap, HashSet};

use atlas::AtlasManager;
use decoder::{DecodeResult, DecodeTicket};
use model::{ImageId, Lod, TileInstance, TileKey};

/// Resident tiles of one image at one LOD. Invariant: one instance per tile
/// key, and every key holds a live atlas slot.
#[derive(Debug)]
pub struct LodEntry {
    pub instances: Vec<TileInstance>,
    pub tile_keys: Vec<TileKey>,
}

#[derive(Debug)]
pub struct TileStore {
    entries: HashMap<ImageId, HashMap<Lod, LodEntry>>,
    loading: HashMap<(ImageId, Lod), DecodeTicket>,
    requested_lod: HashMap<ImageId, Lod>,
    max_lod: Lod,
}

impl TileStore {
    pub fn new(max_lod: Lod) -> Self {
        Self {
            entries: HashMap::new(),
            loading: HashMap::new(),
            requested_lod: HashMap::new(),
            max_lod,
        }
    }

    pub fn max_lod(&self) -> Lod {
        self.max_lod
    }

    pub fn has(&self, image_id: ImageId, lod: Lod) -> bool {
        self.entries
            .get(&image_id)
            .is_some_and(|lods| lods.contains_key(&lod))
    }

    pub fn get(&self, image_id: ImageId, lod: Lod) -> Option<&LodEntry> {
        self.entries.get(&image_id)?.get(&lod)
    }

    /// Installs a completed entry. Panics when the instance and key lists
    /// disagree or the pair is still marked in flight; completion handling
    /// clears the loading mark first.
    pub fn set(
        &mut self,
        image_id: ImageId,
        lod: Lod,
        instances: Vec<TileInstance>,
        tile_keys: Vec<TileKey>,
    ) {
        if instances.len() != tile_keys.len() {
            panic!(
                "entry for image {image_id} lod {lod} has {} instances but {} tile keys",
                instances.len(),
                tile_keys.len()
            );
        }
        if self.loading.contains_key(&(image_id, lod)) {
            panic!("cannot install entry for image {image_id} lod {lod} while it is loading");
        }
        self.entries.entry(image_id).or_default().insert(
            lod,
            LodEntry {
                instances,
                tile_keys,
            },
        );
    }

    pub fn remove(&mut self, image_id: ImageId, lod: Lod) -> Option<LodEntry> {
        let lods = self.entries.get_mut(&image_id)?;
        let removed = lods.remove(&lod);
        if lods.is_empty() {
            self.entries.remove(&image_id);
        }
        removed
    }

    pub fn is_loading(&self, image_id: ImageId, lod: Lod) -> bool {
        self.loading.contains_key(&(image_id, lod))
    }

    pub fn get_loading(&self, image_id: ImageId, lod: Lod) -> Option<&DecodeTicket> {
        self.loading.get(&(image_id, lod))
    }

    pub fn set_loading(&mut self, image_id: ImageId, lod: Lod, ticket: DecodeTicket) {
        if self.has(image_id, lod) {
            panic!("image {image_id} lod {lod} is already resident; refusing duplicate load");
        }
        let previous = self.loading.insert((image_id, lod), ticket);
        if previous.is_some() {
            panic!("image {image_id} lod {lod} already has a load in flight");
        }
    }

    pub fn clear_loading(&mut self, image_id: ImageId, lod: Lod) -> Option<DecodeTicket> {
        self.loading.remove(&(image_id, lod))
    }

    pub fn loading_count(&self) -> usize {
        self.loading.len()
    }

    /// Frame-prologue poll: removes and returns every in-flight pair whose
    /// result has arrived, in deterministic (image, lod) order.
    pub fn take_completed(&mut self) -> Vec<(ImageId, Lod, DecodeResult)> {
        let mut pairs: Vec<(ImageId, Lod)> = self.loading.keys().copied().collect();
        pairs.sort_unstable();

        let mut completed = Vec::new();
        for (image_id, lod) in pairs {
            let ticket = self
                .loading
                .get(&(image_id, lod))
                .expect("loading pair must hold a ticket");
            if let Some(result) = ticket.try_result() {
                self.loading.remove(&(image_id, lod));
                completed.push((image_id, lod, result));
            }
        }
        completed
    }

    pub fn set_requested_lod(&mut self, image_id: ImageId, lod: Lod) {
        self.requested_lod.insert(image_id, lod);
    }

    pub fn get_requested_lod(&self, image_id: ImageId) -> Lod {
        self.requested_lod.get(&image_id).copied().unwrap_or(0)
    }

    /// A decoded result is still worth a rebuild only if the image has not
    /// since asked for a higher LOD.
    pub fn should_prioritize(&self, image_id: ImageId, lod: Lod) -> bool {
        lod >= self.get_requested_lod(image_id)
    }

    /// Closest-to-target cached LOD, preferring coarser fallbacks: scans
    /// down from `target` to 0, then up from `target + 1` to `max_lod`.
    pub fn best_available_lod(&self, image_id: ImageId, target: Lod) -> Option<Lod> {
        let Some(lods) = self.entries.get(&image_id) else {
            return None;
        };
        for lod in (0..=target).rev() {
            if lods.contains_key(&lod) {
                return Some(lod);
            }
        }
        for lod in (target + 1)..=self.max_lod {
            if lods.contains_key(&lod) {
                return Some(lod);
            }
        }
        None
    }

    /// Every cached pair, ascending. Test and diagnostics helper.
    pub fn cached_pairs(&self) -> Vec<(ImageId, Lod)> {
        let mut pairs: Vec<(ImageId, Lod)> = self
            .entries
            .iter()
            .flat_map(|(image_id, lods)| lods.keys().map(|lod| (*image_id, *lod)))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Evicts stale entries, stalest first, until `target_free_slots` atlas
    /// slots are free or no candidates remain.
    ///
    /// Candidate priority (lower evicts first):
    /// 0: off-screen and not the image's requested LOD;
    /// 1: off-screen at the requested LOD (the user may pan back);
    /// 2: on-screen but not rendered (fallback kept for smooth zoom).
    /// Pairs in the rendered set or currently loading are never candidates.
    pub fn evict_stale(
        &mut self,
        rendered: &HashSet<(ImageId, Lod)>,
        atlas: &mut AtlasManager,
        visible_images: &[ImageId],
        target_free_slots: u32,
    ) -> u32 {
        if atlas.free_slots() >= target_free_slots {
            return 0;
        }
        let visible: HashSet<ImageId> = visible_images.iter().copied().collect();

        let mut candidates: Vec<(u8, ImageId, Lod)> = Vec::new();
        for (image_id, lods) in &self.entries {
            for lod in lods.keys() {
                let pair = (*image_id, *lod);
                if rendered.contains(&pair) || self.loading.contains_key(&pair) {
                    continue;
                }
                let on_screen = visible.contains(image_id);
                let at_requested = self.get_requested_lod(*image_id) == *lod;
                let priority = match (on_screen, at_requested) {
                    (false, false) => 0,
                    (false, true) => 1,
                    (true, _) => 2,
                };
                candidates.push((priority, *image_id, *lod));
            }
        }
        // Deterministic order: priority class, then image id, then LOD.
        candidates.sort_unstable();

        let mut evicted = 0;
        for (_, image_id, lod) in candidates {
            if atlas.free_slots() >= target_free_slots {
                break;
            }
            let entry = self
                .remove(image_id, lod)
                .expect("eviction candidate must still be cached");
            for key in &entry.tile_keys {
                let freed = atlas.free_tile(*key);
                if !freed {
                    panic!("cached tile key {key:?} had no live atlas slot");
                }
            }
            evicted += 1;
        }
        evicted
    }
}
