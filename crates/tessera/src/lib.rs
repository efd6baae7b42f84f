//! tessera: tile-streamed rendering of a large pan/zoom canvas of images.
//!
//! This crate is the assembly point: it parses `CanvasOptions` (JSON or
//! defaults), builds the layout, visibility index, atlas manager, decoder
//! pool, and frame coordinator, and drives them once per frame. The pieces
//! live in their own crates and are individually testable; nothing here
//! adds pipeline behavior.

use std::fmt;
use std::path::Path;

use atlas::AtlasManager;
use coordinator::{FrameCoordinator, FrameCoordinatorConfig, FrameReport};
use decoder::{PoolCreateError, TileDecodePool, TileDecodePoolConfig};
use layout::{
    GridLayout, GridLayoutConfig, ImageLayout, LayoutError, StackedLayout, StackedLayoutConfig,
};
use model::{AtlasConfig, AtlasConfigError};
use serde::Deserialize;
use visibility::VisibilityIndex;

#[cfg(feature = "atlas-gpu")]
pub use atlas::gpu::AtlasGpu;
pub use coordinator::tile_mesh;
pub use decoder::{DecodeError, DecodeStage, DecodeStatus, FetchStatsSnapshot};
pub use model::{Aabb, ImageId, Lod, Pose, PoseAnchor, SlotAddress, TileInstance, TileKey};
pub use tile_store::{LodEntry, TileStore};
pub use view::{Camera, CameraError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Grid,
    Stacked,
}

fn default_tile_size() -> u32 {
    model::TILE_SIZE
}

fn default_atlas_size() -> u32 {
    model::ATLAS_SIZE
}

fn default_max_layers() -> u32 {
    model::MAX_LAYERS
}

fn default_max_lod() -> u8 {
    model::MAX_LOD
}

fn default_base_world_size() -> f64 {
    model::BASE_WORLD_SIZE
}

fn default_pool_size() -> usize {
    model::POOL_SIZE
}

fn default_target_free_slots() -> u32 {
    model::TARGET_FREE_SLOTS
}

fn default_layout_mode() -> LayoutMode {
    LayoutMode::Grid
}

fn default_columns() -> u32 {
    64
}

fn default_gap() -> f64 {
    1.0
}

fn default_images_per_stack() -> u32 {
    8
}

fn default_jitter_radius() -> f64 {
    0.4
}

fn default_max_tilt() -> f32 {
    0.12
}

/// Everything the pipeline recognizes, with the stock constants as
/// defaults. Missing JSON fields fall back field by field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanvasOptions {
    pub images: Vec<String>,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_atlas_size")]
    pub atlas_size: u32,
    #[serde(default = "default_max_layers")]
    pub max_layers: u32,
    #[serde(default = "default_max_lod")]
    pub max_lod: u8,
    #[serde(default = "default_base_world_size")]
    pub base_world_size: f64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_target_free_slots")]
    pub target_free_slots: u32,
    #[serde(default = "default_layout_mode")]
    pub layout: LayoutMode,
    #[serde(default = "default_columns")]
    pub columns: u32,
    #[serde(default = "default_gap")]
    pub gap: f64,
    #[serde(default = "default_images_per_stack")]
    pub images_per_stack: u32,
    #[serde(default = "default_jitter_radius")]
    pub jitter_radius: f64,
    #[serde(default = "default_max_tilt")]
    pub max_tilt: f32,
}

impl CanvasOptions {
    pub fn with_images(images: Vec<String>) -> Self {
        Self {
            images,
            tile_size: default_tile_size(),
            atlas_size: default_atlas_size(),
            max_layers: default_max_layers(),
            max_lod: default_max_lod(),
            base_world_size: default_base_world_size(),
            pool_size: default_pool_size(),
            target_free_slots: default_target_free_slots(),
            layout: default_layout_mode(),
            columns: default_columns(),
            gap: default_gap(),
            images_per_stack: default_images_per_stack(),
            jitter_radius: default_jitter_radius(),
            max_tilt: default_max_tilt(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CanvasError> {
        serde_json::from_str(json).map_err(|error| CanvasError::Options(error.to_string()))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CanvasError> {
        let json = std::fs::read_to_string(path)
            .map_err(|error| CanvasError::Options(format!("{}: {error}", path.display())))?;
        Self::from_json_str(&json)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasError {
    Options(String),
    NoImages,
    Atlas(AtlasConfigError),
    Layout(LayoutError),
    Pool(PoolCreateError),
}

impl fmt::Display for CanvasError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanvasError::Options(message) => write!(formatter, "invalid canvas options: {message}"),
            CanvasError::NoImages => write!(formatter, "canvas needs at least one image"),
            CanvasError::Atlas(error) => write!(formatter, "invalid atlas config: {error}"),
            CanvasError::Layout(error) => write!(formatter, "invalid layout config: {error}"),
            CanvasError::Pool(error) => write!(formatter, "invalid decoder pool config: {error}"),
        }
    }
}

impl std::error::Error for CanvasError {}

impl From<AtlasConfigError> for CanvasError {
    fn from(value: AtlasConfigError) -> Self {
        Self::Atlas(value)
    }
}

impl From<LayoutError> for CanvasError {
    fn from(value: LayoutError) -> Self {
        Self::Layout(value)
    }
}

impl From<PoolCreateError> for CanvasError {
    fn from(value: PoolCreateError) -> Self {
        Self::Pool(value)
    }
}

/// The assembled pipeline. Drive it with `frame` once per render tick; hand
/// the atlas manager to the GPU backend between frames.
pub struct Canvas {
    visibility: VisibilityIndex,
    atlas_manager: AtlasManager,
    pool: TileDecodePool,
    coordinator: FrameCoordinator,
}

impl Canvas {
    pub fn new(options: CanvasOptions) -> Result<Self, CanvasError> {
        if options.images.is_empty() {
            return Err(CanvasError::NoImages);
        }
        let image_count = options.images.len() as u32;
        let atlas_config =
            AtlasConfig::new(options.tile_size, options.atlas_size, options.max_layers)?;

        let poses = match options.layout {
            LayoutMode::Grid => GridLayout::new(
                image_count,
                GridLayoutConfig {
                    columns: options.columns,
                    gap: options.gap,
                    base_size: options.base_world_size,
                },
            )?
            .poses(),
            LayoutMode::Stacked => StackedLayout::new(
                image_count,
                StackedLayoutConfig {
                    stack_columns: options.columns,
                    images_per_stack: options.images_per_stack,
                    gap: options.gap,
                    base_size: options.base_world_size,
                    jitter_radius: options.jitter_radius,
                    max_tilt: options.max_tilt,
                },
            )?
            .poses(),
        };

        let pool = TileDecodePool::start(TileDecodePoolConfig {
            workers: options.pool_size,
            tile_size: options.tile_size,
            base_world_size: options.base_world_size,
        })?;

        Ok(Self {
            visibility: VisibilityIndex::new(poses, options.base_world_size),
            atlas_manager: AtlasManager::new(atlas_config),
            pool,
            coordinator: FrameCoordinator::new(
                FrameCoordinatorConfig {
                    tile_size: options.tile_size,
                    base_world_size: options.base_world_size,
                    max_lod: options.max_lod,
                    target_free_slots: options.target_free_slots,
                },
                options.images,
            ),
        })
    }

    pub fn frame(&mut self, camera: &Camera) -> FrameReport {
        self.coordinator.tick(
            camera,
            &mut self.visibility,
            &mut self.atlas_manager,
            &self.pool,
        )
    }

    pub fn atlas_manager(&self) -> &AtlasManager {
        &self.atlas_manager
    }

    pub fn atlas_manager_mut(&mut self) -> &mut AtlasManager {
        &mut self.atlas_manager
    }

    pub fn visibility(&mut self) -> &mut VisibilityIndex {
        &mut self.visibility
    }

    pub fn coordinator(&self) -> &FrameCoordinator {
        &self.coordinator
    }

    pub fn pool(&self) -> &TileDecodePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_parse_with_field_defaults() {
        let options = CanvasOptions::from_json_str(
            r#"{ "images": ["https://example.com/a.png", "https://example.com/b.png"] }"#,
        )
        .expect("parse minimal options");
        assert_eq!(options.images.len(), 2);
        assert_eq!(options.tile_size, 256);
        assert_eq!(options.atlas_size, 4096);
        assert_eq!(options.max_layers, 16);
        assert_eq!(options.max_lod, 4);
        assert_eq!(options.pool_size, 4);
        assert_eq!(options.target_free_slots, 512);
        assert_eq!(options.layout, LayoutMode::Grid);
    }

    #[test]
    fn options_accept_overrides_and_stacked_layout() {
        let options = CanvasOptions::from_json_str(
            r#"{
                "images": ["x.png"],
                "tile_size": 128,
                "atlas_size": 1024,
                "layout": "stacked",
                "images_per_stack": 4,
                "columns": 8
            }"#,
        )
        .expect("parse overridden options");
        assert_eq!(options.tile_size, 128);
        assert_eq!(options.atlas_size, 1024);
        assert_eq!(options.layout, LayoutMode::Stacked);
        assert_eq!(options.images_per_stack, 4);
    }

    #[test]
    fn options_reject_unknown_fields_and_bad_modes() {
        assert!(CanvasOptions::from_json_str(r#"{ "images": [], "bogus": 1 }"#).is_err());
        assert!(CanvasOptions::from_json_str(r#"{ "images": [], "layout": "spiral" }"#).is_err());
    }

    #[test]
    fn canvas_rejects_empty_image_lists_and_bad_configs() {
        assert_eq!(
            Canvas::new(CanvasOptions::with_images(Vec::new())).err(),
            Some(CanvasError::NoImages)
        );

        let mut options = CanvasOptions::with_images(vec!["a.png".to_owned()]);
        options.atlas_size = 1000;
        assert!(matches!(
            Canvas::new(options).err(),
            Some(CanvasError::Atlas(AtlasConfigError::AtlasNotTileAligned))
        ));

        let mut options = CanvasOptions::with_images(vec!["a.png".to_owned()]);
        options.pool_size = 0;
        assert!(matches!(
            Canvas::new(options).err(),
            Some(CanvasError::Pool(PoolCreateError::ZeroWorkers))
        ));
    }

    #[test]
    fn assembled_canvas_runs_a_frame() {
        let mut options =
            CanvasOptions::with_images(vec!["/nonexistent/tessera/a.png".to_owned()]);
        options.pool_size = 1;
        let mut canvas = Canvas::new(options).expect("assemble canvas");

        let mut camera = Camera::new(800.0, 600.0).expect("create camera");
        camera.set_position(2.0, -2.0).expect("set position");

        let report = canvas.frame(&camera);
        assert_eq!(report.visible_count, 1);
        assert_eq!(report.loads_dispatched, 1);
        assert_eq!(canvas.coordinator().store().loading_count(), 1);
        assert_eq!(canvas.atlas_manager().used_slot_count(), 0);
    }
}
