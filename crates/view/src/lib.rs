use model::Aabb;

/// Padding added to the camera AABB so images touching the view edge do not
/// flicker in and out across frames. Correctness does not depend on it.
pub const CAMERA_AABB_EPSILON: f64 = 1e-4;

/// Orthographic top-down camera looking along -Z: a world position, a zoom
/// factor, and symmetric frustum edges in pre-zoom units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    x: f64,
    y: f64,
    zoom: f64,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
    device_pixel_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraError {
    InvalidZoom,
    InvalidViewport,
    InvalidDevicePixelRatio,
    NonFiniteValue,
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraError::InvalidZoom => write!(formatter, "camera zoom must be finite and positive"),
            CameraError::InvalidViewport => {
                write!(formatter, "camera viewport must be finite and positive")
            }
            CameraError::InvalidDevicePixelRatio => {
                write!(formatter, "device pixel ratio must be finite and positive")
            }
            CameraError::NonFiniteValue => write!(formatter, "camera value must be finite"),
        }
    }
}

impl std::error::Error for CameraError {}

impl Camera {
    pub fn new(viewport_width: f64, viewport_height: f64) -> Result<Self, CameraError> {
        let mut camera = Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
            left: 0.0,
            right: 0.0,
            top: 0.0,
            bottom: 0.0,
            device_pixel_ratio: 1.0,
        };
        camera.set_viewport(viewport_width, viewport_height)?;
        Ok(camera)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn left(&self) -> f64 {
        self.left
    }

    pub fn right(&self) -> f64 {
        self.right
    }

    pub fn top(&self) -> f64 {
        self.top
    }

    pub fn bottom(&self) -> f64 {
        self.bottom
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    /// Screen pixels demanded per world unit; feeds LOD selection. High-DPR
    /// displays demand more density at the same zoom.
    pub fn screen_px_per_unit(&self) -> f64 {
        self.zoom * self.device_pixel_ratio
    }

    pub fn set_viewport(
        &mut self,
        viewport_width: f64,
        viewport_height: f64,
    ) -> Result<(), CameraError> {
        if !viewport_width.is_finite()
            || !viewport_height.is_finite()
            || viewport_width <= 0.0
            || viewport_height <= 0.0
        {
            return Err(CameraError::InvalidViewport);
        }
        self.left = -viewport_width / 2.0;
        self.right = viewport_width / 2.0;
        self.top = viewport_height / 2.0;
        self.bottom = -viewport_height / 2.0;
        Ok(())
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<(), CameraError> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(CameraError::InvalidZoom);
        }
        self.zoom = zoom;
        Ok(())
    }

    pub fn set_position(&mut self, x: f64, y: f64) -> Result<(), CameraError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(CameraError::NonFiniteValue);
        }
        self.x = x;
        self.y = y;
        Ok(())
    }

    pub fn pan_by(&mut self, delta_x: f64, delta_y: f64) -> Result<(), CameraError> {
        if !delta_x.is_finite() || !delta_y.is_finite() {
            return Err(CameraError::NonFiniteValue);
        }
        let next_x = self.x + delta_x;
        let next_y = self.y + delta_y;
        if !next_x.is_finite() || !next_y.is_finite() {
            return Err(CameraError::NonFiniteValue);
        }
        self.x = next_x;
        self.y = next_y;
        Ok(())
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f64) -> Result<(), CameraError> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(CameraError::InvalidDevicePixelRatio);
        }
        self.device_pixel_ratio = ratio;
        Ok(())
    }

    /// World-space box the camera can see, epsilon-padded against boundary
    /// flicker. Zooming in shrinks the visible extent.
    pub fn world_aabb(&self) -> Aabb {
        let half_width = (self.right - self.left) / (2.0 * self.zoom) + CAMERA_AABB_EPSILON;
        let half_height = (self.top - self.bottom) / (2.0 * self.zoom) + CAMERA_AABB_EPSILON;
        Aabb::from_center_half_extents(self.x, self.y, half_width, half_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_produces_symmetric_edges() {
        let camera = Camera::new(800.0, 600.0).expect("create camera");
        assert_eq!(camera.left(), -400.0);
        assert_eq!(camera.right(), 400.0);
        assert_eq!(camera.top(), 300.0);
        assert_eq!(camera.bottom(), -300.0);
    }

    #[test]
    fn world_aabb_shrinks_with_zoom() {
        let mut camera = Camera::new(800.0, 600.0).expect("create camera");
        camera.set_position(10.0, -5.0).expect("set position");
        camera.set_zoom(2.0).expect("set zoom");

        let aabb = camera.world_aabb();
        assert!((aabb.half_extent_x() - (200.0 + CAMERA_AABB_EPSILON)).abs() < 1e-9);
        assert!((aabb.half_extent_y() - (150.0 + CAMERA_AABB_EPSILON)).abs() < 1e-9);
        assert!(((aabb.min_x + aabb.max_x) / 2.0 - 10.0).abs() < 1e-9);
        assert!(((aabb.min_y + aabb.max_y) / 2.0 + 5.0).abs() < 1e-9);
    }

    #[test]
    fn screen_density_multiplies_zoom_by_dpr() {
        let mut camera = Camera::new(800.0, 600.0).expect("create camera");
        camera.set_zoom(3.0).expect("set zoom");
        camera.set_device_pixel_ratio(2.0).expect("set dpr");
        assert!((camera.screen_px_per_unit() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let mut camera = Camera::new(800.0, 600.0).expect("create camera");
        assert_eq!(camera.set_zoom(0.0), Err(CameraError::InvalidZoom));
        assert_eq!(camera.set_zoom(f64::NAN), Err(CameraError::InvalidZoom));
        assert_eq!(
            camera.set_position(f64::INFINITY, 0.0),
            Err(CameraError::NonFiniteValue)
        );
        assert_eq!(
            camera.set_device_pixel_ratio(-1.0),
            Err(CameraError::InvalidDevicePixelRatio)
        );
        assert_eq!(Camera::new(0.0, 600.0), Err(CameraError::InvalidViewport));
    }
}
