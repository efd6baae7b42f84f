//! Image layout providers: where every image sits in the world.
//!
//! Both providers promise the same thing: the AABB they report matches the
//! extent of the tile mesh produced for the same pose.

use std::fmt;

use model::{Aabb, ImageId, Pose, PoseAnchor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Supplies per-image world pose and bounds to visibility and the frame
/// coordinator.
pub trait ImageLayout {
    fn image_count(&self) -> u32;

    fn base_size(&self) -> f64;

    fn pose(&self, image_id: ImageId) -> Pose;

    fn bounds(&self, image_id: ImageId) -> Aabb {
        self.pose(image_id).world_aabb(self.base_size())
    }

    fn poses(&self) -> Vec<Pose> {
        (0..self.image_count()).map(|id| self.pose(id)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    ZeroColumns,
    ZeroImagesPerStack,
    InvalidBaseSize,
    InvalidGap,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::ZeroColumns => write!(formatter, "layout columns must be at least 1"),
            LayoutError::ZeroImagesPerStack => {
                write!(formatter, "images per stack must be at least 1")
            }
            LayoutError::InvalidBaseSize => {
                write!(formatter, "base size must be finite and positive")
            }
            LayoutError::InvalidGap => write!(formatter, "gap must be finite and non-negative"),
        }
    }
}

impl std::error::Error for LayoutError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayoutConfig {
    pub columns: u32,
    pub gap: f64,
    pub base_size: f64,
}

impl Default for GridLayoutConfig {
    fn default() -> Self {
        Self {
            columns: 64,
            gap: 1.0,
            base_size: model::BASE_WORLD_SIZE,
        }
    }
}

/// Uniform grid: row-major cells of `base_size + gap`, pivot at each cell's
/// top-left corner, no rotation.
#[derive(Debug, Clone)]
pub struct GridLayout {
    image_count: u32,
    config: GridLayoutConfig,
}

impl GridLayout {
    pub fn new(image_count: u32, config: GridLayoutConfig) -> Result<Self, LayoutError> {
        validate_base_and_gap(config.base_size, config.gap)?;
        if config.columns == 0 {
            return Err(LayoutError::ZeroColumns);
        }
        Ok(Self {
            image_count,
            config,
        })
    }

    fn cell_stride(&self) -> f64 {
        self.config.base_size + self.config.gap
    }
}

impl ImageLayout for GridLayout {
    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn base_size(&self) -> f64 {
        self.config.base_size
    }

    fn pose(&self, image_id: ImageId) -> Pose {
        assert!(
            image_id < self.image_count,
            "image id {image_id} out of range for {} images",
            self.image_count
        );
        let column = image_id % self.config.columns;
        let row = image_id / self.config.columns;
        Pose {
            x: f64::from(column) * self.cell_stride(),
            y: -f64::from(row) * self.cell_stride(),
            z: 0.0,
            rotation: 0.0,
            scale: 1.0,
            anchor: PoseAnchor::TopLeft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackedLayoutConfig {
    pub stack_columns: u32,
    pub images_per_stack: u32,
    pub gap: f64,
    pub base_size: f64,
    /// Largest polar offset of a card from its stack center, world units.
    pub jitter_radius: f64,
    /// Largest rotation of a card in either direction, radians.
    pub max_tilt: f32,
}

impl Default for StackedLayoutConfig {
    fn default() -> Self {
        Self {
            stack_columns: 16,
            images_per_stack: 8,
            gap: 2.0,
            base_size: model::BASE_WORLD_SIZE,
            jitter_radius: 0.4,
            max_tilt: 0.12,
        }
    }
}

/// Card stacks on a grid: each image belongs to stack `id / images_per_stack`
/// and sits near the stack center with a polar offset and small rotation
/// seeded by its id, z-ordered within the stack.
#[derive(Debug, Clone)]
pub struct StackedLayout {
    image_count: u32,
    config: StackedLayoutConfig,
}

const STACK_Z_STEP: f32 = 0.001;

impl StackedLayout {
    pub fn new(image_count: u32, config: StackedLayoutConfig) -> Result<Self, LayoutError> {
        validate_base_and_gap(config.base_size, config.gap)?;
        if config.stack_columns == 0 {
            return Err(LayoutError::ZeroColumns);
        }
        if config.images_per_stack == 0 {
            return Err(LayoutError::ZeroImagesPerStack);
        }
        Ok(Self {
            image_count,
            config,
        })
    }

    fn stack_stride(&self) -> f64 {
        self.config.base_size + self.config.gap
    }
}

impl ImageLayout for StackedLayout {
    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn base_size(&self) -> f64 {
        self.config.base_size
    }

    fn pose(&self, image_id: ImageId) -> Pose {
        assert!(
            image_id < self.image_count,
            "image id {image_id} out of range for {} images",
            self.image_count
        );
        let stack = image_id / self.config.images_per_stack;
        let index_in_stack = image_id % self.config.images_per_stack;
        let column = stack % self.config.stack_columns;
        let row = stack / self.config.stack_columns;
        let stack_x = f64::from(column) * self.stack_stride();
        let stack_y = -f64::from(row) * self.stack_stride();

        let mut rng = StdRng::seed_from_u64(u64::from(image_id));
        let radius = rng.gen_range(0.0..self.config.jitter_radius.max(f64::MIN_POSITIVE));
        let angle = rng.gen_range(0.0..std::f64::consts::TAU);
        let tilt = rng.gen_range(-self.config.max_tilt..=self.config.max_tilt);

        Pose {
            x: stack_x + radius * angle.cos(),
            y: stack_y + radius * angle.sin(),
            z: (index_in_stack as f32 + 1.0) * STACK_Z_STEP,
            rotation: tilt,
            scale: 1.0,
            anchor: PoseAnchor::Center,
        }
    }
}

fn validate_base_and_gap(base_size: f64, gap: f64) -> Result<(), LayoutError> {
    if !base_size.is_finite() || base_size <= 0.0 {
        return Err(LayoutError::InvalidBaseSize);
    }
    if !gap.is_finite() || gap < 0.0 {
        return Err(LayoutError::InvalidGap);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_places_row_major_cells() {
        let layout = GridLayout::new(
            10,
            GridLayoutConfig {
                columns: 4,
                gap: 1.0,
                base_size: 4.0,
            },
        )
        .expect("create grid layout");

        let pose = layout.pose(5);
        assert_eq!(pose.x, 5.0);
        assert_eq!(pose.y, -5.0);
        assert_eq!(pose.anchor, PoseAnchor::TopLeft);

        let bounds = layout.bounds(5);
        assert!((bounds.min_x - 5.0).abs() < 1e-9);
        assert!((bounds.max_x - 9.0).abs() < 1e-9);
        assert!((bounds.max_y + 5.0).abs() < 1e-9);
        assert!((bounds.min_y + 9.0).abs() < 1e-9);
    }

    #[test]
    fn grid_rejects_bad_configs() {
        let mut config = GridLayoutConfig::default();
        config.columns = 0;
        assert_eq!(
            GridLayout::new(4, config).err(),
            Some(LayoutError::ZeroColumns)
        );

        let mut config = GridLayoutConfig::default();
        config.gap = -1.0;
        assert_eq!(GridLayout::new(4, config).err(), Some(LayoutError::InvalidGap));
    }

    #[test]
    fn stacked_poses_are_deterministic_per_id() {
        let layout =
            StackedLayout::new(64, StackedLayoutConfig::default()).expect("create stacked layout");
        for id in 0..64 {
            assert_eq!(layout.pose(id), layout.pose(id));
        }
    }

    #[test]
    fn stacked_cards_stay_near_their_stack_and_tilt_within_bounds() {
        let config = StackedLayoutConfig::default();
        let layout = StackedLayout::new(64, config).expect("create stacked layout");
        for id in 0..64 {
            let pose = layout.pose(id);
            let stack = id / config.images_per_stack;
            let column = stack % config.stack_columns;
            let row = stack / config.stack_columns;
            let stack_x = f64::from(column) * (config.base_size + config.gap);
            let stack_y = -f64::from(row) * (config.base_size + config.gap);
            let distance = ((pose.x - stack_x).powi(2) + (pose.y - stack_y).powi(2)).sqrt();
            assert!(
                distance <= config.jitter_radius + 1e-9,
                "card {id} strayed {distance} from its stack"
            );
            assert!(pose.rotation.abs() <= config.max_tilt + 1e-6);
            assert_eq!(pose.anchor, PoseAnchor::Center);
        }
    }

    #[test]
    fn stacked_z_increases_within_a_stack() {
        let config = StackedLayoutConfig {
            images_per_stack: 4,
            ..StackedLayoutConfig::default()
        };
        let layout = StackedLayout::new(8, config).expect("create stacked layout");
        for stack_start in [0u32, 4] {
            for offset in 1..4 {
                assert!(
                    layout.pose(stack_start + offset).z > layout.pose(stack_start + offset - 1).z,
                    "z order must increase within a stack"
                );
            }
        }
    }
}
