use nalgebra_glm as glm;
use serde_json as js;

use crate::{
    json::{f32_or, vec3_or},
    SceneError,
};

/// Changes smaller than this in any camera component keep accumulation going.
pub const CAMERA_EPSILON: f32 = 1e-4;

/// Length of the Halton jitter cycle.
pub const JITTER_SAMPLES: u64 = 16;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Camera {
    pub position:     glm::Vec3,
    /// Degrees; 0 looks down -Z.
    pub yaw:          f32,
    /// Degrees, clamped to avoid the poles.
    pub pitch:        f32,
    /// Degrees.
    pub vertical_fov: f32,
    pub near:         f32,
    pub far:          f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position:     glm::vec3(0.0, 1.0, 5.0),
            yaw:          0.0,
            pitch:        0.0,
            vertical_fov: 60.0,
            near:         0.01,
            far:          1000.0,
        }
    }
}

impl Camera {
    pub const MAX_PITCH: f32 = 89.0;

    pub fn from_json(object: &js::Value) -> Result<Self, SceneError> {
        let default = Self::default();
        let camera = Self {
            position:     vec3_or(object, "position", default.position)?,
            yaw:          f32_or(object, "yaw", default.yaw)?,
            pitch:        f32_or(object, "pitch", default.pitch)?.clamp(-Self::MAX_PITCH, Self::MAX_PITCH),
            vertical_fov: f32_or(object, "vertical_fov", default.vertical_fov)?,
            near:         f32_or(object, "near", default.near)?,
            far:          f32_or(object, "far", default.far)?,
        };
        if camera.near <= 0.0 || camera.far <= camera.near {
            return Err(SceneError::malformed("camera needs 0 < near < far"));
        }
        if !(1.0..179.0).contains(&camera.vertical_fov) {
            return Err(SceneError::malformed("camera vertical_fov must lie in [1, 179) degrees"));
        }
        Ok(camera)
    }

    pub fn forward(&self) -> glm::Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        glm::vec3(-yaw.sin() * pitch.cos(), pitch.sin(), -yaw.cos() * pitch.cos())
    }

    pub fn right(&self) -> glm::Vec3 {
        self.forward().cross(&glm::Vec3::y()).normalize()
    }

    pub fn view(&self) -> glm::Mat4 {
        glm::look_at_rh(&self.position, &(self.position + self.forward()), &glm::Vec3::y())
    }

    /// Reverse-Z projection with Vulkan's downward Y.
    pub fn projection(&self, aspect: f32) -> glm::Mat4 {
        let mut projection = glm::reversed_perspective_rh_zo(aspect, self.vertical_fov.to_radians(), self.near, self.far);
        projection[(1, 1)] *= -1.0;
        projection
    }

    pub fn approx_eq(&self, other: &Self) -> bool {
        (self.position - other.position).amax() <= CAMERA_EPSILON
            && (self.yaw - other.yaw).abs() <= CAMERA_EPSILON
            && (self.pitch - other.pitch).abs() <= CAMERA_EPSILON
            && (self.vertical_fov - other.vertical_fov).abs() <= CAMERA_EPSILON
            && (self.near - other.near).abs() <= CAMERA_EPSILON
            && (self.far - other.far).abs() <= CAMERA_EPSILON
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CameraMatrices {
    pub view:                    glm::Mat4,
    pub projection:              glm::Mat4,
    pub view_projection:         glm::Mat4,
    pub inverse_view_projection: glm::Mat4,
}

impl Default for CameraMatrices {
    fn default() -> Self {
        let identity = glm::Mat4::identity();
        Self { view: identity, projection: identity, view_projection: identity, inverse_view_projection: identity }
    }
}

impl CameraMatrices {
    pub fn new(view: glm::Mat4, projection: glm::Mat4) -> Self {
        let view_projection = projection * view;
        let inverse_view_projection = glm::inverse(&view_projection);
        Self { view, projection, view_projection, inverse_view_projection }
    }
}

/// Radical inverse of `index` in `base`.
pub fn halton(mut index: u64, base: u64) -> f32 {
    let mut result = 0.0;
    let mut fraction = 1.0 / base as f32;
    while index > 0 {
        result += (index % base) as f32 * fraction;
        index /= base;
        fraction /= base as f32;
    }
    result
}

/// Sub-pixel offset in pixels, in `[-0.5, 0.5)`.
pub fn halton_jitter(frame_number: u64) -> glm::Vec2 {
    let index = frame_number % JITTER_SAMPLES + 1;
    glm::vec2(halton(index, 2) - 0.5, halton(index, 3) - 0.5)
}

/// Current and previous camera matrices and jitter, as consumed by every temporal pass.
#[derive(Copy, Clone, Debug, Default)]
pub struct CameraState {
    pub current:     CameraMatrices,
    pub previous:    CameraMatrices,
    /// NDC offsets.
    pub jitter:      glm::Vec2,
    pub prev_jitter: glm::Vec2,
    pub position:    glm::Vec3,
    last:            Option<(Camera, [u32; 2])>,
}

impl CameraState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shifts current into previous and computes this frame's matrices.
    /// Returns whether the camera moved or the extent changed since the last update.
    pub fn update(&mut self, camera: &Camera, extent: [u32; 2], jitter_enabled: bool, frame_number: u64) -> bool {
        let changed = match &self.last {
            Some((last, last_extent)) => !last.approx_eq(camera) || *last_extent != extent,
            None => true,
        };

        let [width, height] = extent.map(|e| e.max(1) as f32);
        let current = CameraMatrices::new(camera.view(), camera.projection(width / height));

        self.previous = if self.last.is_some() { self.current } else { current };
        self.current = current;
        self.prev_jitter = self.jitter;
        self.jitter = if jitter_enabled {
            let offset = halton_jitter(frame_number);
            glm::vec2(offset.x * 2.0 / width, offset.y * 2.0 / height)
        } else {
            glm::Vec2::zeros()
        };
        self.position = camera.position;
        self.last = Some((*camera, extent));

        changed
    }

    /// Projection with this frame's jitter applied, for rasterisation only.
    /// Clip w is -z in view space, hence the subtraction.
    pub fn jittered_projection(&self) -> glm::Mat4 {
        let mut projection = self.current.projection;
        projection[(0, 2)] -= self.jitter.x;
        projection[(1, 2)] -= self.jitter.y;
        projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halton_matches_known_values() {
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(2, 2), 0.25);
        assert_eq!(halton(3, 2), 0.75);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-6);
        assert!((halton(2, 3) - 2.0 / 3.0).abs() < 1e-6);
        assert!((halton(4, 3) - 4.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn jitter_repeats_every_sixteen_frames() {
        for frame in 0..32 {
            let jitter = halton_jitter(frame);
            assert_eq!(jitter, halton_jitter(frame + JITTER_SAMPLES));
            assert!(jitter.x >= -0.5 && jitter.x < 0.5);
            assert!(jitter.y >= -0.5 && jitter.y < 0.5);
        }
    }

    #[test]
    fn first_update_counts_as_change() {
        let mut state = CameraState::new();
        assert!(state.update(&Camera::default(), [1280, 720], false, 0));
        assert_eq!(state.previous, state.current);
        assert!(!state.update(&Camera::default(), [1280, 720], false, 1));
    }

    #[test]
    fn small_moves_are_ignored_and_teleports_are_not() {
        let mut state = CameraState::new();
        let mut camera = Camera::default();
        state.update(&camera, [640, 480], false, 0);

        camera.position.x += CAMERA_EPSILON * 0.5;
        assert!(!state.update(&camera, [640, 480], false, 1));

        camera.position.z += 1.5;
        assert!(state.update(&camera, [640, 480], false, 2));
        assert_ne!(state.previous.view, state.current.view);

        assert!(state.update(&camera, [1920, 1080], false, 3));
    }

    #[test]
    fn jitter_is_disabled_for_progressive_rendering() {
        let mut state = CameraState::new();
        state.update(&Camera::default(), [100, 100], true, 0);
        assert_ne!(state.jitter, glm::Vec2::zeros());
        state.update(&Camera::default(), [100, 100], false, 1);
        assert_eq!(state.jitter, glm::Vec2::zeros());
        assert_ne!(state.prev_jitter, glm::Vec2::zeros());
    }

    #[test]
    fn yaw_zero_looks_down_negative_z() {
        let camera = Camera::default();
        assert!((camera.forward() - glm::vec3(0.0, 0.0, -1.0)).norm() < 1e-6);
        assert!((camera.right() - glm::vec3(1.0, 0.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn reverse_z_maps_near_to_one() {
        let camera = Camera::default();
        let projection = camera.projection(1.0);
        let clip = projection * glm::vec4(0.0, 0.0, -camera.near, 1.0);
        assert!((clip.z / clip.w - 1.0).abs() < 1e-4);
        let clip = projection * glm::vec4(0.0, 0.0, -camera.far, 1.0);
        assert!((clip.z / clip.w).abs() < 1e-4);
    }

    #[test]
    fn camera_json_validates_clip_planes() {
        let object: js::Value = js::from_str(r#"{ "position": [278, 273, -800], "yaw": 180, "near": 1, "far": 0.5 }"#).unwrap();
        assert!(Camera::from_json(&object).is_err());
        let object: js::Value = js::from_str(r#"{ "position": [278, 273, -800], "yaw": 180, "pitch": 120 }"#).unwrap();
        let camera = Camera::from_json(&object).unwrap();
        assert_eq!(camera.pitch, Camera::MAX_PITCH);
        assert_eq!(camera.position, glm::vec3(278.0, 273.0, -800.0));
    }
}
