//! Pure tile placement math. The layout providers derive image AABBs from
//! the same pose transform, so what is drawn is exactly what visibility
//! tests.

use model::{Aabb, Pose, PoseAnchor, SlotAddress, TileInstance};

/// World center of one tile of an image under `pose`.
///
/// Local tile coordinates grow +x right and -y down from the pivot; a
/// center-anchored pose shifts the grid so the image content is centered on
/// the pivot before rotation.
#[allow(clippy::too_many_arguments)]
pub fn tile_world_center(
    pose: &Pose,
    tile_x: u32,
    tile_y: u32,
    tile_world_size: f64,
    tile_world_w: f64,
    tile_world_h: f64,
    image_world_w: f64,
    image_world_h: f64,
) -> (f64, f64) {
    let scale = f64::from(pose.scale);
    let mut local_x = (f64::from(tile_x) * tile_world_size + tile_world_w / 2.0) * scale;
    let mut local_y = -((f64::from(tile_y) * tile_world_size + tile_world_h / 2.0) * scale);
    if pose.anchor == PoseAnchor::Center {
        local_x -= image_world_w * scale / 2.0;
        local_y += image_world_h * scale / 2.0;
    }
    pose.local_to_world(local_x, local_y)
}

/// Builds the renderable instance for one tile in a slot.
#[allow(clippy::too_many_arguments)]
pub fn tile_instance(
    pose: &Pose,
    slot: SlotAddress,
    tile_x: u32,
    tile_y: u32,
    tile_world_size: f64,
    tile_world_w: f64,
    tile_world_h: f64,
    image_world_w: f64,
    image_world_h: f64,
) -> TileInstance {
    let (world_x, world_y) = tile_world_center(
        pose,
        tile_x,
        tile_y,
        tile_world_size,
        tile_world_w,
        tile_world_h,
        image_world_w,
        image_world_h,
    );
    let scale = f64::from(pose.scale);
    TileInstance {
        slot,
        world_x: world_x as f32,
        world_y: world_y as f32,
        world_z: pose.z,
        tile_world_w: (tile_world_w * scale) as f32,
        tile_world_h: (tile_world_h * scale) as f32,
        rotation: pose.rotation,
    }
}

/// Union AABB of every tile quad of an image's mesh. Test oracle for the
/// bounds/mesh agreement promise.
pub fn mesh_extent(
    pose: &Pose,
    tiles_x: u32,
    tiles_y: u32,
    tile_world_size: f64,
    image_world_w: f64,
    image_world_h: f64,
) -> Aabb {
    assert!(tiles_x > 0 && tiles_y > 0, "mesh needs at least one tile");
    let scale = f64::from(pose.scale);
    let sin = f64::from(pose.rotation).sin();
    let cos = f64::from(pose.rotation).cos();

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for tile_y in 0..tiles_y {
        for tile_x in 0..tiles_x {
            let world_x0 = f64::from(tile_x) * tile_world_size;
            let world_y0 = f64::from(tile_y) * tile_world_size;
            let tile_world_w = tile_world_size.min(image_world_w - world_x0);
            let tile_world_h = tile_world_size.min(image_world_h - world_y0);
            let (center_x, center_y) = tile_world_center(
                pose,
                tile_x,
                tile_y,
                tile_world_size,
                tile_world_w,
                tile_world_h,
                image_world_w,
                image_world_h,
            );
            let half_w = tile_world_w * scale / 2.0;
            let half_h = tile_world_h * scale / 2.0;
            for (corner_x, corner_y) in [
                (-half_w, -half_h),
                (half_w, -half_h),
                (half_w, half_h),
                (-half_w, half_h),
            ] {
                let rotated_x = center_x + corner_x * cos - corner_y * sin;
                let rotated_y = center_y + corner_x * sin + corner_y * cos;
                min_x = min_x.min(rotated_x);
                min_y = min_y.min(rotated_y);
                max_x = max_x.max(rotated_x);
                max_y = max_y.max(rotated_y);
            }
        }
    }

    Aabb {
        min_x,
        min_y,
        max_x,
        max_y,
    }
}
