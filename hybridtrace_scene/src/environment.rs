use std::path::Path;

use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{AllocatedImage, VulkanContext};
use nalgebra_glm as glm;

use crate::SceneError;

pub const MIN_FACE_SIZE: u32 = 16;
pub const MAX_FACE_SIZE: u32 = 1024;
/// Radiance of the fallback environment.
pub const FALLBACK_RADIANCE: f32 = 0.5;

/// Linear RGBA texels of six cube faces in Vulkan layer order (+X, -X, +Y, -Y, +Z, -Z).
pub struct CubeFaces {
    pub size:   u32,
    pub texels: Vec<[f32; 4]>,
}

/// World direction through face `face` at `(u, v)` in `[-1, 1]`, `v` pointing down the face.
pub fn face_direction(face: usize, u: f32, v: f32) -> glm::Vec3 {
    let direction = match face {
        0 => glm::vec3(1.0, -v, -u),
        1 => glm::vec3(-1.0, -v, u),
        2 => glm::vec3(u, 1.0, v),
        3 => glm::vec3(u, -1.0, -v),
        4 => glm::vec3(u, -v, 1.0),
        _ => glm::vec3(-u, -v, -1.0),
    };
    direction.normalize()
}

/// Equirectangular texture coordinates of a unit direction.
pub fn equirect_uv(direction: &glm::Vec3) -> glm::Vec2 {
    let u = 0.5 + direction.z.atan2(direction.x) / (2.0 * std::f32::consts::PI);
    let v = direction.y.clamp(-1.0, 1.0).acos() / std::f32::consts::PI;
    glm::vec2(u, v)
}

impl CubeFaces {
    pub fn uniform(value: f32) -> Self {
        let size = MIN_FACE_SIZE;
        Self { size, texels: vec![[value, value, value, 1.0]; (size * size * 6) as usize] }
    }

    pub fn from_equirect(image: &image::Rgba32FImage) -> Self {
        let size = (image.height() / 2).clamp(MIN_FACE_SIZE, MAX_FACE_SIZE);
        let (width, height) = (image.width().max(1), image.height().max(1));

        let mut texels = Vec::with_capacity((size * size * 6) as usize);
        for face in 0..6 {
            for y in 0..size {
                for x in 0..size {
                    let u = 2.0 * (x as f32 + 0.5) / size as f32 - 1.0;
                    let v = 2.0 * (y as f32 + 0.5) / size as f32 - 1.0;
                    let uv = equirect_uv(&face_direction(face, u, v));
                    let px = ((uv.x * width as f32) as u32).min(width - 1);
                    let py = ((uv.y * height as f32) as u32).min(height - 1);
                    texels.push(image.get_pixel(px, py).0);
                }
            }
        }
        Self { size, texels }
    }
}

/// Environment radiance as a sampled cube map.
pub struct Environment {
    pub cube:    AllocatedImage,
    pub sampler: vk::Sampler,
}

impl Environment {
    /// Loads `path` as an equirectangular map; a missing file gives a uniform grey sky.
    pub fn load(vk_ctx: VulkanContext, path: Option<&Path>) -> Result<Self, SceneError> {
        let faces = match path {
            Some(path) if path.exists() => {
                let image = image::open(path)
                    .map_err(|source| SceneError::Image { path: path.to_owned(), source })?
                    .into_rgba32f();
                log::info!("Environment map {} ({}×{})", path.display(), image.width(), image.height());
                CubeFaces::from_equirect(&image)
            }
            Some(path) => {
                log::warn!("Environment map {} not found, using a uniform sky", path.display());
                CubeFaces::uniform(FALLBACK_RADIANCE)
            }
            None => CubeFaces::uniform(FALLBACK_RADIANCE),
        };

        let cube = AllocatedImage::texture_with_data(
            vk_ctx.clone(),
            vk::Format::R32G32B32A32_SFLOAT,
            vk::Extent3D { width: faces.size, height: faces.size, depth: 1 },
            vk::ImageViewType::CUBE,
            6,
            &faces.texels,
        )?;
        let sampler = hybridtrace_vk::descriptor::SamplerCreateInfo::LINEAR_CLAMP.create(&vk_ctx.device)?;

        Ok(Self { cube, sampler })
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        self.cube.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_centres_point_along_axes() {
        let expected = [
            glm::vec3(1.0, 0.0, 0.0),
            glm::vec3(-1.0, 0.0, 0.0),
            glm::vec3(0.0, 1.0, 0.0),
            glm::vec3(0.0, -1.0, 0.0),
            glm::vec3(0.0, 0.0, 1.0),
            glm::vec3(0.0, 0.0, -1.0),
        ];
        for (face, axis) in expected.iter().enumerate() {
            assert!((face_direction(face, 0.0, 0.0) - axis).norm() < 1e-6, "face {}", face);
        }
    }

    #[test]
    fn adjacent_faces_share_edges() {
        // Right edge of +Z meets the left edge of +X.
        let a = face_direction(4, 1.0, 0.3);
        let b = face_direction(0, -1.0, 0.3);
        assert!((a - b).norm() < 1e-6);
        // Top edge of +Z meets the bottom edge of +Y.
        let a = face_direction(4, 0.2, -1.0);
        let b = face_direction(2, 0.2, 1.0);
        assert!((a - b).norm() < 1e-6);
    }

    #[test]
    fn poles_map_to_the_top_and_bottom_rows() {
        assert!(equirect_uv(&glm::vec3(0.0, 1.0, 0.0)).y.abs() < 1e-6);
        assert!((equirect_uv(&glm::vec3(0.0, -1.0, 0.0)).y - 1.0).abs() < 1e-6);
        let horizon = equirect_uv(&glm::vec3(1.0, 0.0, 0.0));
        assert!((horizon - glm::vec2(0.5, 0.5)).norm() < 1e-6);
    }

    #[test]
    fn uniform_sky_has_six_faces() {
        let faces = CubeFaces::uniform(FALLBACK_RADIANCE);
        assert_eq!(faces.texels.len(), (MIN_FACE_SIZE * MIN_FACE_SIZE * 6) as usize);
        assert!(faces.texels.iter().all(|t| t[0] == 0.5 && t[3] == 1.0));
    }

    #[test]
    fn equirect_resampling_preserves_constant_images() {
        let image = image::Rgba32FImage::from_pixel(64, 32, image::Rgba([0.25, 0.5, 0.75, 1.0]));
        let faces = CubeFaces::from_equirect(&image);
        assert_eq!(faces.size, MIN_FACE_SIZE);
        assert!(faces.texels.iter().all(|t| *t == [0.25, 0.5, 0.75, 1.0]));
    }
}
