//! Lens camera and the snapshot used to detect camera motion.

use glam::{Mat4, Vec3};

/// Tolerance on world matrix elements when comparing camera poses.
pub const CAMERA_EPSILON: f32 = 1e-4;

/// Perspective camera with a thin-lens aperture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Camera-to-world transform
    pub world: Mat4,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    /// Lens radius used for depth of field; 0 gives a pinhole camera
    pub aperture: f32,
    /// Distance to the plane in perfect focus
    pub focus: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            fov: 50.0,
            aspect: 1.0,
            near: 0.1,
            far: 2000.0,
            aperture: 0.01,
            focus: 10.0,
        }
    }
}

impl Camera {
    pub fn new(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self { fov, aspect, near, far, ..Default::default() }
    }

    /// Place the camera at `eye` looking at `target`.
    pub fn look_at(mut self, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        self.world = Mat4::look_at_rh(eye, target, up).inverse();
        self
    }

    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    pub fn view(&self) -> Mat4 {
        self.world.inverse()
    }

    /// Projection in wgpu clip space (depth 0..1).
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far)
    }

    /// Projection with a clip-space offset for sub-pixel jitter.
    ///
    /// `jitter` is in normalized screen units (fraction of the viewport).
    pub fn jittered_projection(&self, jitter: [f32; 2]) -> Mat4 {
        let offset = Mat4::from_translation(Vec3::new(jitter[0] * 2.0, jitter[1] * 2.0, 0.0));
        offset * self.projection()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Inverse half-height of the image plane at unit distance.
    pub fn fov_scale(&self) -> f32 {
        0.5 / (0.5 * self.fov.to_radians()).tan()
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        CameraSnapshot {
            world: self.world.to_cols_array(),
            aspect: self.aspect,
            fov: self.fov,
        }
    }
}

/// The camera fields that decide whether accumulated samples stay valid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSnapshot {
    pub world: [f32; 16],
    pub aspect: f32,
    pub fov: f32,
}

impl CameraSnapshot {
    /// Same pose within [`CAMERA_EPSILON`], same aspect and same fov.
    pub fn matches(&self, other: &CameraSnapshot) -> bool {
        crate::util::arrays_approx_equal(&self.world, &other.world, CAMERA_EPSILON)
            && self.aspect == other.aspect
            && self.fov == other.fov
    }

    pub fn world(&self) -> Mat4 {
        Mat4::from_cols_array(&self.world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_matches_itself() {
        let cam = Camera::default().look_at(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        assert!(cam.snapshot().matches(&cam.snapshot()));
    }

    #[test]
    fn test_snapshot_tolerance() {
        let cam = Camera::default();
        let mut a = cam;
        a.world.w_axis.x += 5e-5;
        assert!(cam.snapshot().matches(&a.snapshot()));

        let mut b = cam;
        b.world.w_axis.x += 1e-3;
        assert!(!cam.snapshot().matches(&b.snapshot()));
    }

    #[test]
    fn test_snapshot_fov_and_aspect() {
        let cam = Camera::default();
        let mut wide = cam;
        wide.fov = 60.0;
        assert!(!cam.snapshot().matches(&wide.snapshot()));

        let mut stretched = cam;
        stretched.aspect = 2.0;
        assert!(!cam.snapshot().matches(&stretched.snapshot()));
    }

    #[test]
    fn test_look_at_position() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let cam = Camera::default().look_at(eye, Vec3::ZERO, Vec3::Y);
        assert!((cam.position() - eye).length() < 1e-5);
    }
}
