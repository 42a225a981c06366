use std::path::Path;

use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{
    descriptor::SamplerCreateInfo,
    AllocatedImage,
    DescriptorResource,
    DescriptorSetSchema,
    DescriptorSets,
    VulkanContext,
};
use itertools::Itertools;

use crate::SceneError;

pub const SOBOL_SIZE: u32 = 256;
pub const SCRAMBLING_RANKING_SIZE: u32 = 128;
/// Tiles for 1, 2, 4, ..., 256 samples per pixel.
pub const SCRAMBLING_RANKING_TILES: usize = 9;

pub fn sobol_file_name() -> &'static str {
    "sobol_256spp_256d.png"
}

pub fn scrambling_ranking_file_name(tile: usize) -> String {
    format!("scrambling_ranking_128x128_2d_{}spp.png", 1u32 << tile)
}

/// Deterministic stand-in texels for when the tables are not on disk.
pub fn hashed_pattern(size: u32, seed: u32) -> Vec<[u8; 4]> {
    (0..size * size)
        .map(|i| {
            let h = hash(i ^ seed.wrapping_mul(0x9e37_79b9));
            h.to_le_bytes()
        })
        .collect()
}

fn hash(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

fn load_texels(path: &Path, size: u32, seed: u32) -> Result<Vec<[u8; 4]>, SceneError> {
    if !path.exists() {
        log::warn!("Blue noise table {} not found, using a hashed pattern", path.display());
        return Ok(hashed_pattern(size, seed));
    }
    let image = image::open(path).map_err(|source| SceneError::Image { path: path.to_owned(), source })?.into_rgba8();
    if image.width() != size || image.height() != size {
        return Err(SceneError::malformed(format!(
            "{} is {}×{}, expected {}×{}",
            path.display(),
            image.width(),
            image.height(),
            size,
            size
        )));
    }
    Ok(image.pixels().map(|p| p.0).collect())
}

/// Sobol sequence and scrambling/ranking tiles, bound read-only by every stochastic pass.
pub struct BlueNoise {
    pub sobol:               AllocatedImage,
    pub scrambling_ranking:  Vec<AllocatedImage>,
    pub sampler:             vk::Sampler,
    pub descriptor_sets:     DescriptorSets,
}

impl BlueNoise {
    pub fn schema() -> DescriptorSetSchema {
        DescriptorSetSchema::new()
            .binding(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::COMPUTE)
            .array(
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                SCRAMBLING_RANKING_TILES as u32,
                vk::ShaderStageFlags::COMPUTE,
            )
    }

    pub fn load(vk_ctx: VulkanContext, directory: &Path) -> Result<Self, SceneError> {
        let upload = |texels: &[[u8; 4]], size: u32| {
            AllocatedImage::texture_with_data(
                vk_ctx.clone(),
                vk::Format::R8G8B8A8_UNORM,
                vk::Extent3D { width: size, height: size, depth: 1 },
                vk::ImageViewType::_2D,
                1,
                texels,
            )
        };

        let sobol_texels = load_texels(&directory.join(sobol_file_name()), SOBOL_SIZE, 0)?;
        let sobol = upload(&sobol_texels, SOBOL_SIZE)?;

        let scrambling_ranking = (0..SCRAMBLING_RANKING_TILES)
            .map(|tile| {
                let path = directory.join(scrambling_ranking_file_name(tile));
                let texels = load_texels(&path, SCRAMBLING_RANKING_SIZE, tile as u32 + 1)?;
                Ok(upload(&texels, SCRAMBLING_RANKING_SIZE)?)
            })
            .collect::<Result<Vec<_>, SceneError>>()?;

        let sampler = SamplerCreateInfo::LINEAR_REPEAT.create(&vk_ctx.device)?;
        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, Self::schema(), 1)?;
        descriptor_sets.write(&vk_ctx.device, 0, &[
            DescriptorResource::SampledImage { view: sobol.view, sampler },
            DescriptorResource::SampledImageArray(
                scrambling_ranking.iter().map(|image| (image.view, sampler)).collect_vec(),
            ),
        ]);

        Ok(Self { sobol, scrambling_ranking, sampler, descriptor_sets })
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_sets.set(0)
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.descriptor_sets.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        self.sobol.destroy(device);
        hybridtrace_vk::image::destroy_all(device, &self.scrambling_ranking);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_names_double_the_sample_count() {
        let names = (0..SCRAMBLING_RANKING_TILES).map(scrambling_ranking_file_name).collect_vec();
        assert_eq!(names.first().unwrap(), "scrambling_ranking_128x128_2d_1spp.png");
        assert_eq!(names.last().unwrap(), "scrambling_ranking_128x128_2d_256spp.png");
    }

    #[test]
    fn hashed_pattern_is_deterministic_and_seeded() {
        let a = hashed_pattern(SCRAMBLING_RANKING_SIZE, 3);
        assert_eq!(a.len(), (SCRAMBLING_RANKING_SIZE * SCRAMBLING_RANKING_SIZE) as usize);
        assert_eq!(a, hashed_pattern(SCRAMBLING_RANKING_SIZE, 3));
        assert_ne!(a, hashed_pattern(SCRAMBLING_RANKING_SIZE, 4));
    }

    #[test]
    fn schema_binds_sobol_then_tiles() {
        let schema = BlueNoise::schema();
        assert_eq!(schema.bindings().len(), 2);
        assert_eq!(schema.bindings()[1].count, SCRAMBLING_RANKING_TILES as u32);
    }
}
