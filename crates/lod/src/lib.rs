use model::Lod;

/// Screen pixels per world unit that tiles at `lod` can supply.
pub fn tile_pixel_density(lod: Lod, tile_size: u32, base_world_size: f64) -> f64 {
    assert!(tile_size > 0, "tile_size must be at least 1");
    assert!(
        base_world_size > 0.0,
        "base_world_size must be greater than zero"
    );
    f64::from(tile_size) * f64::from(1u32 << u32::from(lod)) / base_world_size
}

/// Lowest LOD whose tile density meets or exceeds the demanded screen
/// density. Equality at a power-of-two boundary stays on the lower LOD.
pub fn select_lod(
    screen_px_per_unit: f64,
    tile_size: u32,
    base_world_size: f64,
    max_lod: Lod,
) -> Lod {
    assert!(tile_size > 0, "tile_size must be at least 1");
    assert!(
        base_world_size > 0.0,
        "base_world_size must be greater than zero"
    );
    if screen_px_per_unit <= 0.0 {
        return 0;
    }
    let base_density = f64::from(tile_size) / base_world_size;
    let ratio = screen_px_per_unit / base_density;
    if ratio <= 1.0 {
        return 0;
    }
    let demanded = ratio.log2().ceil();
    if demanded >= f64::from(max_lod) {
        max_lod
    } else {
        demanded as Lod
    }
}

/// Highest LOD that still maps source pixels at most 1:1 into tile pixels.
pub fn max_useful_lod(image_pixel_size: u32, tile_size: u32) -> Lod {
    assert!(tile_size > 0, "tile_size must be at least 1");
    if image_pixel_size <= tile_size {
        return 0;
    }
    let ratio = f64::from(image_pixel_size) / f64::from(tile_size);
    let floored = ratio.log2().floor();
    if floored >= f64::from(Lod::MAX) {
        Lod::MAX
    } else {
        floored as Lod
    }
}

/// Per-image LOD choice: the image's world scale multiplies screen demand
/// (a 10x image covers 10x more world per tile), and a known source size
/// caps the result so source pixels are never upscaled.
pub fn select_image_lod(
    screen_px_per_unit: f64,
    tile_size: u32,
    base_world_size: f64,
    max_lod: Lod,
    image_pixel_size: Option<u32>,
    image_scale: f64,
) -> Lod {
    let demanded = select_lod(
        screen_px_per_unit * image_scale,
        tile_size,
        base_world_size,
        max_lod,
    );
    match image_pixel_size {
        Some(source_size) => demanded.min(max_useful_lod(source_size, tile_size)),
        None => demanded,
    }
}
