use std::collections::HashMap;

use model::{Aabb, ImageId, Pose};
use view::Camera;

/// Extra padding on the grid search radius. Pure float-safety heuristic; the
/// exact per-image AABB test below it decides membership either way.
const GRID_SEARCH_PADDING: f64 = 1.42;

#[derive(Debug)]
struct BoundsCache {
    bounds: Vec<Aabb>,
    cells: HashMap<(i64, i64), Vec<ImageId>>,
    cell_size: f64,
    largest_half_extent: f64,
}

/// Answers "which images can this camera see" from per-image poses.
///
/// Bounds are cached and rebuilt lazily after pose mutation. The accelerated
/// query buckets image centers into a uniform grid and only tests images in
/// cells the expanded camera box can reach; `visible_images_naive` is the
/// reference scan it must agree with.
#[derive(Debug)]
pub struct VisibilityIndex {
    poses: Vec<Pose>,
    base_size: f64,
    cache: Option<BoundsCache>,
}

impl VisibilityIndex {
    pub fn new(poses: Vec<Pose>, base_size: f64) -> Self {
        assert!(base_size > 0.0, "base size must be greater than zero");
        Self {
            poses,
            base_size,
            cache: None,
        }
    }

    pub fn image_count(&self) -> usize {
        self.poses.len()
    }

    pub fn pose(&self, image_id: ImageId) -> Pose {
        self.poses[image_id as usize]
    }

    /// Replace every image's rotation. Invalidates cached bounds.
    pub fn update_rotations(&mut self, rotations: &[f32]) {
        assert_eq!(
            rotations.len(),
            self.poses.len(),
            "rotation count must match image count"
        );
        for (pose, rotation) in self.poses.iter_mut().zip(rotations) {
            pose.rotation = *rotation;
        }
        self.cache = None;
    }

    /// Replace every image's scale. Invalidates cached bounds.
    pub fn update_scales(&mut self, scales: &[f32]) {
        assert_eq!(
            scales.len(),
            self.poses.len(),
            "scale count must match image count"
        );
        for (pose, scale) in self.poses.iter_mut().zip(scales) {
            pose.scale = *scale;
        }
        self.cache = None;
    }

    pub fn bounds(&mut self, image_id: ImageId) -> Aabb {
        self.ensure_cache().bounds[image_id as usize]
    }

    /// Images whose world AABB intersects the camera AABB, ascending by id.
    pub fn visible_images(&mut self, camera: &Camera) -> Vec<ImageId> {
        let camera_aabb = camera.world_aabb();
        let cache = self.ensure_cache();
        if cache.bounds.is_empty() {
            return Vec::new();
        }

        let reach = cache.largest_half_extent * GRID_SEARCH_PADDING;
        let min_cell_x = ((camera_aabb.min_x - reach) / cache.cell_size).floor() as i64;
        let max_cell_x = ((camera_aabb.max_x + reach) / cache.cell_size).floor() as i64;
        let min_cell_y = ((camera_aabb.min_y - reach) / cache.cell_size).floor() as i64;
        let max_cell_y = ((camera_aabb.max_y + reach) / cache.cell_size).floor() as i64;

        let mut visible = Vec::new();
        for cell_y in min_cell_y..=max_cell_y {
            for cell_x in min_cell_x..=max_cell_x {
                let Some(candidates) = cache.cells.get(&(cell_x, cell_y)) else {
                    continue;
                };
                for image_id in candidates {
                    if cache.bounds[*image_id as usize].intersects(camera_aabb) {
                        visible.push(*image_id);
                    }
                }
            }
        }
        visible.sort_unstable();
        visible
    }

    /// Reference scan over every image; the pruned query must match this.
    pub fn visible_images_naive(&mut self, camera: &Camera) -> Vec<ImageId> {
        let camera_aabb = camera.world_aabb();
        let cache = self.ensure_cache();
        cache
            .bounds
            .iter()
            .enumerate()
            .filter(|(_, bounds)| bounds.intersects(camera_aabb))
            .map(|(index, _)| index as ImageId)
            .collect()
    }

    pub fn is_image_visible(&mut self, image_id: ImageId, camera: &Camera) -> bool {
        let camera_aabb = camera.world_aabb();
        self.ensure_cache().bounds[image_id as usize].intersects(camera_aabb)
    }

    fn ensure_cache(&mut self) -> &BoundsCache {
        if self.cache.is_none() {
            self.cache = Some(self.build_cache());
        }
        self.cache.as_ref().expect("bounds cache was just built")
    }

    fn build_cache(&self) -> BoundsCache {
        let bounds: Vec<Aabb> = self
            .poses
            .iter()
            .map(|pose| pose.world_aabb(self.base_size))
            .collect();
        let largest_half_extent = bounds
            .iter()
            .map(|aabb| aabb.half_extent_x().max(aabb.half_extent_y()))
            .fold(0.0_f64, f64::max);
        // Cell size tracks the biggest image so the expanded search box only
        // spans a handful of cells at typical zoom.
        let cell_size = (largest_half_extent * 2.0).max(self.base_size);

        let mut cells: HashMap<(i64, i64), Vec<ImageId>> = HashMap::new();
        for (index, aabb) in bounds.iter().enumerate() {
            let center_x = (aabb.min_x + aabb.max_x) / 2.0;
            let center_y = (aabb.min_y + aabb.max_y) / 2.0;
            let cell = (
                (center_x / cell_size).floor() as i64,
                (center_y / cell_size).floor() as i64,
            );
            cells.entry(cell).or_default().push(index as ImageId);
        }

        BoundsCache {
            bounds,
            cells,
            cell_size,
            largest_half_extent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::PoseAnchor;

    fn grid_poses(columns: u32, rows: u32, spacing: f64) -> Vec<Pose> {
        let mut poses = Vec::new();
        for row in 0..rows {
            for column in 0..columns {
                poses.push(Pose {
                    x: f64::from(column) * spacing,
                    y: -f64::from(row) * spacing,
                    z: 0.0,
                    rotation: 0.0,
                    scale: 1.0,
                    anchor: PoseAnchor::TopLeft,
                });
            }
        }
        poses
    }

    fn camera_at(x: f64, y: f64, zoom: f64) -> Camera {
        let mut camera = Camera::new(800.0, 600.0).expect("create camera");
        camera.set_position(x, y).expect("set position");
        camera.set_zoom(zoom).expect("set zoom");
        camera
    }

    #[test]
    fn wide_camera_sees_every_image() {
        let mut index = VisibilityIndex::new(grid_poses(4, 4, 6.0), 4.0);
        let camera = camera_at(9.0, -9.0, 10.0);
        let visible = index.visible_images(&camera);
        assert_eq!(visible.len(), 16);
        assert_eq!(visible, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn tight_camera_sees_one_image() {
        let mut index = VisibilityIndex::new(grid_poses(4, 4, 6.0), 4.0);
        // Zoomed far in on the content center of image 5 (column 1, row 1).
        let camera = camera_at(8.0, -8.0, 400.0);
        assert_eq!(index.visible_images(&camera), vec![5]);
        assert!(index.is_image_visible(5, &camera));
        assert!(!index.is_image_visible(0, &camera));
    }

    #[test]
    fn pruned_query_matches_naive_scan() {
        let mut index = VisibilityIndex::new(grid_poses(12, 9, 5.5), 4.0);
        // Deterministic pseudo-random walk over camera placements.
        let mut seed = 0x2545_f491_4f6c_dd1d_u64;
        for _ in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = ((seed >> 16) % 9000) as f64 / 100.0 - 10.0;
            let y = -(((seed >> 28) % 7000) as f64 / 100.0) + 10.0;
            let zoom = 1.0 + ((seed >> 40) % 500) as f64;
            let camera = camera_at(x, y, zoom);
            assert_eq!(
                index.visible_images(&camera),
                index.visible_images_naive(&camera),
                "pruned and naive scans disagree at ({x}, {y}) zoom {zoom}"
            );
        }
    }

    #[test]
    fn scale_update_invalidates_bounds() {
        let mut poses = grid_poses(1, 1, 0.0);
        poses.push(Pose {
            x: -50.0,
            y: 0.0,
            z: 0.0,
            rotation: 0.0,
            scale: 1.0,
            anchor: PoseAnchor::TopLeft,
        });
        let mut index = VisibilityIndex::new(poses, 4.0);
        let camera = camera_at(0.0, 0.0, 40.0);
        assert_eq!(index.visible_images(&camera), vec![0]);

        // Image 1 grows enough to reach the camera from 50 units away.
        index.update_scales(&[1.0, 30.0]);
        let visible = index.visible_images(&camera);
        assert!(visible.contains(&1), "scaled-up image 1 must become visible");
        assert_eq!(visible, index.visible_images_naive(&camera));
    }

    #[test]
    fn rotation_update_changes_extent() {
        let poses = vec![Pose {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            rotation: 0.0,
            scale: 1.0,
            anchor: PoseAnchor::Center,
        }];
        let mut index = VisibilityIndex::new(poses, 4.0);
        let unrotated = index.bounds(0);
        index.update_rotations(&[std::f32::consts::FRAC_PI_4]);
        let rotated = index.bounds(0);
        assert!(rotated.half_extent_x() > unrotated.half_extent_x());
        assert!((rotated.half_extent_x() - 2.0 * std::f64::consts::SQRT_2).abs() < 1e-6);
    }
}
