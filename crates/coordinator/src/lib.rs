//! Frame coordinator: the per-frame driver of the tile streaming pipeline.
//!
//! One `tick` is a pure data flow on the render thread: drain decode
//! completions, query visibility, pick per-image target LODs, make room,
//! dispatch loads, and rebuild the draw list from the best cached LOD per
//! visible image. All mutation of the atlas and the tile store happens
//! here; workers only ever hand back owned results over channels.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use atlas::AtlasManager;
use decoder::{DecodeError, DecodedImageTiles, TileDecodePool};
use model::{ImageId, Lod, TileKey};
use smallvec::SmallVec;
use tile_store::TileStore;
use view::Camera;
use visibility::VisibilityIndex;

pub mod tile_mesh;

fn stream_log_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED
        .get_or_init(|| std::env::var_os("TESSERA_STREAM_LOG").is_some_and(|value| value != "0"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCoordinatorConfig {
    pub tile_size: u32,
    pub base_world_size: f64,
    pub max_lod: Lod,
    pub target_free_slots: u32,
}

impl Default for FrameCoordinatorConfig {
    fn default() -> Self {
        Self {
            tile_size: model::TILE_SIZE,
            base_world_size: model::BASE_WORLD_SIZE,
            max_lod: model::MAX_LOD,
            target_free_slots: model::TARGET_FREE_SLOTS,
        }
    }
}

/// What one tick did; feeds the stream log and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    pub visible_count: usize,
    pub completions_applied: u32,
    pub partial_loads: u32,
    pub decode_failures: u32,
    pub loads_dispatched: u32,
    pub entries_evicted: u32,
    pub rebuilt: bool,
}

enum InstallOutcome {
    Stored { trigger_rebuild: bool },
    Partial,
}

pub struct FrameCoordinator {
    config: FrameCoordinatorConfig,
    urls: Vec<String>,
    store: TileStore,
    rendered: HashSet<(ImageId, Lod)>,
    last_visible: Vec<ImageId>,
    target_lods: HashMap<ImageId, Lod>,
    source_sizes: HashMap<ImageId, u32>,
    frame_index: u64,
}

impl FrameCoordinator {
    /// `urls[id]` is the source for image `id`; the layout and visibility
    /// index must cover the same ids.
    pub fn new(config: FrameCoordinatorConfig, urls: Vec<String>) -> Self {
        Self {
            store: TileStore::new(config.max_lod),
            config,
            urls,
            rendered: HashSet::new(),
            last_visible: Vec::new(),
            target_lods: HashMap::new(),
            source_sizes: HashMap::new(),
            frame_index: 0,
        }
    }

    pub fn config(&self) -> FrameCoordinatorConfig {
        self.config
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    /// Last frame's draw list as `(image, lod)` pairs, ascending.
    pub fn rendered_pairs(&self) -> Vec<(ImageId, Lod)> {
        let mut pairs: Vec<(ImageId, Lod)> = self.rendered.iter().copied().collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn target_lod(&self, image_id: ImageId) -> Option<Lod> {
        self.target_lods.get(&image_id).copied()
    }

    /// Manual eviction pass with the current rendered/visible guards, for
    /// memory pressure outside the frame loop.
    pub fn evict_to(&mut self, atlas_manager: &mut AtlasManager, target_free_slots: u32) -> u32 {
        self.store.evict_stale(
            &self.rendered,
            atlas_manager,
            &self.last_visible,
            target_free_slots,
        )
    }

    pub fn tick(
        &mut self,
        camera: &Camera,
        visibility: &mut VisibilityIndex,
        atlas_manager: &mut AtlasManager,
        pool: &TileDecodePool,
    ) -> FrameReport {
        assert_eq!(
            visibility.image_count(),
            self.urls.len(),
            "visibility index and source list must cover the same images"
        );
        let mut report = FrameReport {
            frame_index: self.frame_index,
            ..FrameReport::default()
        };
        self.frame_index += 1;
        let mut rebuild = false;

        // Frame prologue: apply decode completions synchronously, on this
        // thread. Nothing re-enters mid-frame.
        for (image_id, lod, result) in self.store.take_completed() {
            match result {
                Ok(decoded) => {
                    report.completions_applied += 1;
                    match self.install_decoded(decoded, image_id, lod, visibility, atlas_manager) {
                        InstallOutcome::Stored { trigger_rebuild } => {
                            if trigger_rebuild {
                                rebuild = true;
                            }
                        }
                        InstallOutcome::Partial => {
                            report.partial_loads += 1;
                            rebuild = true;
                        }
                    }
                }
                Err(DecodeError::Cancelled) | Err(DecodeError::Disposed) => {}
                Err(error) => {
                    report.decode_failures += 1;
                    eprintln!("[tile_decoder] image {image_id} lod {lod}: {error}");
                }
            }
        }

        // 1. Visibility.
        let visible = visibility.visible_images(camera);
        let visible_changed = visible != self.last_visible;
        if visible_changed {
            self.last_visible = visible.clone();
            rebuild = true;
        }
        report.visible_count = visible.len();

        // 2. Per-image target LODs; cancel queued lower-LOD work on a rise.
        let screen_density = camera.screen_px_per_unit();
        for &image_id in &visible {
            let pose = visibility.pose(image_id);
            let target = lod::select_image_lod(
                screen_density,
                self.config.tile_size,
                self.config.base_world_size,
                self.config.max_lod,
                self.source_sizes.get(&image_id).copied(),
                f64::from(pose.scale),
            );
            let previous = self.target_lods.insert(image_id, target);
            if previous != Some(target) {
                rebuild = true;
            }
            if previous.is_some_and(|lod| target > lod) {
                pool.cancel_pending(image_id, target);
            }
            self.store.set_requested_lod(image_id, target);
        }

        // 3. Free-slot floor whenever the view changed; reclaims entries of
        // images that left the screen.
        if visible_changed {
            report.entries_evicted += self.store.evict_stale(
                &self.rendered,
                atlas_manager,
                &visible,
                self.config.target_free_slots,
            );
        }

        // 4. What needs loading.
        let mut load_by_lod: HashMap<Lod, SmallVec<[ImageId; 8]>> = HashMap::new();
        for &image_id in &visible {
            let target = self.target_lods[&image_id];
            if !self.store.has(image_id, target) && !self.store.is_loading(image_id, target) {
                load_by_lod.entry(target).or_default().push(image_id);
            }
        }

        // 5. Make room before dispatching when the estimate exceeds what is
        // free.
        if !load_by_lod.is_empty() {
            let needed: u32 = load_by_lod
                .iter()
                .map(|(lod, ids)| slot_estimate(*lod) * ids.len() as u32)
                .sum();
            if needed > atlas_manager.free_slots() {
                report.entries_evicted +=
                    self.store
                        .evict_stale(&self.rendered, atlas_manager, &visible, needed);
            }
        }

        // 6. Dispatch, nearest image first within each LOD batch.
        let mut lods: Vec<Lod> = load_by_lod.keys().copied().collect();
        lods.sort_unstable();
        for lod_level in lods {
            for &image_id in &load_by_lod[&lod_level] {
                let bounds = visibility.bounds(image_id);
                let center_x = (bounds.min_x + bounds.max_x) / 2.0;
                let center_y = (bounds.min_y + bounds.max_y) / 2.0;
                let distance =
                    ((center_x - camera.x()).powi(2) + (center_y - camera.y()).powi(2)).sqrt();
                let priority = f64::from(lod_level) + 1.0 / (1.0 + distance);
                let ticket =
                    pool.load_image_tiles(&self.urls[image_id as usize], image_id, lod_level, priority);
                self.store.set_loading(image_id, lod_level, ticket);
                report.loads_dispatched += 1;
            }
        }

        // 7. Rebuild the draw list from the best cached LOD per image.
        if rebuild {
            atlas_manager.clear_instances();
            self.rendered.clear();
            for &image_id in &visible {
                let target = self.target_lods[&image_id];
                let Some(available) = self.store.best_available_lod(image_id, target) else {
                    continue;
                };
                let entry = self
                    .store
                    .get(image_id, available)
                    .expect("best available lod must be cached");
                for instance in &entry.instances {
                    let _ = atlas_manager.add_instance_with_z(
                        Some(instance.slot),
                        instance.world_x,
                        instance.world_y,
                        instance.world_z,
                        instance.tile_world_w,
                        instance.tile_world_h,
                        instance.rotation,
                    );
                }
                self.rendered.insert((image_id, available));
            }
            atlas_manager.update();
            report.rebuilt = true;
        }

        if stream_log_enabled() {
            eprintln!(
                "[frame] index={} visible={} completions={} loads={} evicted={} failures={} rebuilt={}",
                report.frame_index,
                report.visible_count,
                report.completions_applied,
                report.loads_dispatched,
                report.entries_evicted,
                report.decode_failures,
                report.rebuilt
            );
        }

        report
    }

    /// Uploads a decoded batch into the atlas and installs the entry.
    ///
    /// All-or-nothing from the atlas' perspective: if any tile fails to find
    /// a slot, every key this batch allocated is freed again and the load is
    /// retried on a later frame after eviction.
    fn install_decoded(
        &mut self,
        decoded: DecodedImageTiles,
        image_id: ImageId,
        lod: Lod,
        visibility: &mut VisibilityIndex,
        atlas_manager: &mut AtlasManager,
    ) -> InstallOutcome {
        self.source_sizes
            .insert(image_id, decoded.image_w.max(decoded.image_h));
        let pose = visibility.pose(image_id);

        let mut tile_keys = Vec::with_capacity(decoded.tiles.len());
        let mut instances = Vec::with_capacity(decoded.tiles.len());
        for tile in decoded.tiles {
            let key = TileKey::new(image_id, lod, tile.tile_x, tile.tile_y);
            match atlas_manager.upload_tile(key, tile.bitmap) {
                Some(slot) => {
                    instances.push(tile_mesh::tile_instance(
                        &pose,
                        slot,
                        tile.tile_x,
                        tile.tile_y,
                        decoded.tile_world_size,
                        tile.world_w,
                        tile.world_h,
                        decoded.world_w,
                        decoded.world_h,
                    ));
                    tile_keys.push(key);
                }
                None => {
                    for allocated in &tile_keys {
                        atlas_manager.free_tile(*allocated);
                    }
                    return InstallOutcome::Partial;
                }
            }
        }

        // A result that arrived after the requested LOD rose is still
        // cached; it just does not force a rebuild. Eviction reaps it.
        let trigger_rebuild = self.store.should_prioritize(image_id, lod);
        self.store.set(image_id, lod, instances, tile_keys);
        InstallOutcome::Stored { trigger_rebuild }
    }
}

/// Needed-slot estimate for one image at `lod`, capped the way the original
/// frame budget caps it.
fn slot_estimate(lod: Lod) -> u32 {
    4u32.pow(u32::from(lod)).min(64)
}
