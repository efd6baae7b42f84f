use image::imageops::{self, FilterType};
use image::RgbaImage;
use model::{ImageId, Lod, TileBitmap};

use crate::{DecodeError, DecodedImageTiles, DecodedTile};

/// Per-LOD tile grid over an image whose longest source edge spans
/// `base_world_size` world units, aspect preserved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    pub world_w: f64,
    pub world_h: f64,
    pub tile_world_size: f64,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

pub fn compute_tile_grid(image_w: u32, image_h: u32, lod: Lod, base_world_size: f64) -> TileGrid {
    assert!(image_w > 0 && image_h > 0, "image dimensions must be positive");
    assert!(
        base_world_size > 0.0,
        "base_world_size must be greater than zero"
    );
    let longest_edge = f64::from(image_w.max(image_h));
    let world_w = base_world_size * f64::from(image_w) / longest_edge;
    let world_h = base_world_size * f64::from(image_h) / longest_edge;
    let tile_world_size = base_world_size / f64::from(1u32 << u32::from(lod));
    TileGrid {
        world_w,
        world_h,
        tile_world_size,
        tiles_x: ((world_w / tile_world_size).ceil() as u32).max(1),
        tiles_y: ((world_h / tile_world_size).ceil() as u32).max(1),
    }
}

/// Decodes the source bytes and cuts them into the per-LOD tile bitmaps.
/// Every bitmap is `tile_size × tile_size` RGBA8, y-flipped for the GPU;
/// edge tiles carry their smaller world size in `DecodedTile`.
pub fn decode_image_tiles(
    bytes: &[u8],
    image_id: ImageId,
    lod: Lod,
    tile_size: u32,
    base_world_size: f64,
) -> Result<DecodedImageTiles, DecodeError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|error| DecodeError::Decode(error.to_string()))?;
    let rgba = decoded.to_rgba8();
    let (image_w, image_h) = rgba.dimensions();
    if image_w == 0 || image_h == 0 {
        return Err(DecodeError::Decode("image has zero extent".to_owned()));
    }

    let grid = compute_tile_grid(image_w, image_h, lod, base_world_size);
    let tiles = cut_tiles(&rgba, grid, tile_size)?;

    Ok(DecodedImageTiles {
        image_id,
        lod,
        image_w,
        image_h,
        world_w: grid.world_w,
        world_h: grid.world_h,
        tile_world_size: grid.tile_world_size,
        tiles_x: grid.tiles_x,
        tiles_y: grid.tiles_y,
        tiles,
    })
}

fn cut_tiles(
    rgba: &RgbaImage,
    grid: TileGrid,
    tile_size: u32,
) -> Result<Vec<DecodedTile>, DecodeError> {
    let (image_w, image_h) = rgba.dimensions();
    // The longest source edge spans the longest world edge.
    let px_per_world = f64::from(image_w.max(image_h)) / grid.world_w.max(grid.world_h);
    let mut tiles = Vec::with_capacity((grid.tiles_x as usize) * (grid.tiles_y as usize));

    for tile_y in 0..grid.tiles_y {
        for tile_x in 0..grid.tiles_x {
            let world_x0 = f64::from(tile_x) * grid.tile_world_size;
            let world_y0 = f64::from(tile_y) * grid.tile_world_size;
            let tile_world_w = grid.tile_world_size.min(grid.world_w - world_x0);
            let tile_world_h = grid.tile_world_size.min(grid.world_h - world_y0);

            let src_x = ((world_x0 * px_per_world).round() as u32).min(image_w - 1);
            let src_y = ((world_y0 * px_per_world).round() as u32).min(image_h - 1);
            let src_w = (((tile_world_w * px_per_world).round() as u32).max(1))
                .min(image_w - src_x);
            let src_h = (((tile_world_h * px_per_world).round() as u32).max(1))
                .min(image_h - src_y);

            let cropped = imageops::crop_imm(rgba, src_x, src_y, src_w, src_h).to_image();
            let resized = if cropped.dimensions() == (tile_size, tile_size) {
                cropped
            } else {
                imageops::resize(&cropped, tile_size, tile_size, FilterType::Triangle)
            };
            let flipped = imageops::flip_vertical(&resized);
            let bitmap = TileBitmap::new(flipped.into_raw(), tile_size)
                .map_err(|error| DecodeError::Decode(error.to_string()))?;

            tiles.push(DecodedTile {
                tile_x,
                tile_y,
                world_w: tile_world_w,
                world_h: tile_world_h,
                bitmap,
            });
        }
    }
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_zero_square_image_is_one_tile() {
        let grid = compute_tile_grid(1024, 1024, 0, 4.0);
        assert_eq!(grid.tiles_x, 1);
        assert_eq!(grid.tiles_y, 1);
        assert!((grid.world_w - 4.0).abs() < 1e-9);
        assert!((grid.tile_world_size - 4.0).abs() < 1e-9);
    }

    #[test]
    fn higher_lod_quadruples_tile_count() {
        let grid = compute_tile_grid(1024, 1024, 2, 4.0);
        assert_eq!(grid.tiles_x, 4);
        assert_eq!(grid.tiles_y, 4);
        assert!((grid.tile_world_size - 1.0).abs() < 1e-9);
    }

    #[test]
    fn aspect_ratio_shrinks_the_short_edge() {
        let grid = compute_tile_grid(1024, 512, 1, 4.0);
        assert!((grid.world_w - 4.0).abs() < 1e-9);
        assert!((grid.world_h - 2.0).abs() < 1e-9);
        assert_eq!(grid.tiles_x, 2);
        assert_eq!(grid.tiles_y, 1);
    }

    #[test]
    fn partial_edge_tiles_keep_their_world_size() {
        // 3:2 image at LOD 1: world 4.0 x 2.666..., grid 2 x 2 with a short
        // bottom row.
        let grid = compute_tile_grid(960, 640, 1, 4.0);
        assert_eq!(grid.tiles_x, 2);
        assert_eq!(grid.tiles_y, 2);
        assert!((grid.world_h - 8.0 / 3.0).abs() < 1e-9);
    }
}
