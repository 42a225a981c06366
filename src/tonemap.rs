use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{
    command::dispatch_size,
    descriptor::SamplerCreateInfo,
    Access,
    AllocatedImage,
    BarrierRecorder,
    ComputePipeline,
    DescriptorResource,
    DescriptorSetSchema,
    DescriptorSets,
    RenderContext,
    VkError,
    VulkanContext,
};

pub const TONEMAP_SHADER: &str = "tonemap.comp.spv";
pub const DISPLAY_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const TILE_SIZE: u32 = 8;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TonemapSettings {
    pub exposure:   f32,
    pub key:        f32,
    /// Smallest scaled luminance mapped to white.
    pub y_white:    f32,
    pub avg_lum:    f32,
    pub brightness: f32,
    pub contrast:   f32,
    pub saturation: f32,
    /// Vignette strength, 0 disables it.
    pub vignette:   f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            exposure:   1.0,
            key:        0.18,
            y_white:    4.0,
            avg_lum:    0.5,
            brightness: 0.0,
            contrast:   1.0,
            saturation: 1.0,
            vignette:   0.0,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PushConstants {
    pub exposure:   f32,
    pub key:        f32,
    pub y_white:    f32,
    pub avg_lum:    f32,
    pub brightness: f32,
    pub contrast:   f32,
    pub saturation: f32,
    pub vignette:   f32,
}

impl From<&TonemapSettings> for PushConstants {
    fn from(settings: &TonemapSettings) -> Self {
        Self {
            exposure:   settings.exposure,
            key:        settings.key,
            y_white:    settings.y_white,
            avg_lum:    settings.avg_lum,
            brightness: settings.brightness,
            contrast:   settings.contrast,
            saturation: settings.saturation,
            vignette:   settings.vignette,
        }
    }
}

/// Luminance scaled by exposure and the scene key.
fn scaled_luminance(y: f32, settings: &TonemapSettings) -> f32 {
    settings.key / settings.avg_lum * y * settings.exposure
}

/// Extended Reinhard curve applied to luminance, as the shader does.
pub fn reinhard(y: f32, settings: &TonemapSettings) -> f32 {
    let l = scaled_luminance(y, settings);
    let white_sq = settings.y_white * settings.y_white;
    l * (1.0 + l / white_sq) / (1.0 + l)
}

/// Inverse of [`reinhard`] on `[0, 1]`, the positive root of
/// `l² / w² + l (1 - d) - d = 0`.
pub fn inverse_reinhard(d: f32, settings: &TonemapSettings) -> f32 {
    let white_sq = settings.y_white * settings.y_white;
    let b = 1.0 - d;
    let l = (-b + (b * b + 4.0 * d / white_sq).sqrt()) * white_sq * 0.5;
    l * settings.avg_lum / (settings.key * settings.exposure)
}

/// Maps HDR radiance to the display image at the output extent, then blits
/// that into the swap-chain image.
pub struct Tonemap {
    display:         AllocatedImage,
    sampler:         vk::Sampler,
    /// Input view each descriptor set samples, by set index.
    input_views:     Vec<vk::ImageView>,
    descriptor_sets: DescriptorSets,
    pipeline:        ComputePipeline,
}

impl Tonemap {
    fn schema() -> DescriptorSetSchema {
        DescriptorSetSchema::new()
            .sampled_images(1, vk::ShaderStageFlags::COMPUTE)
            .storage_images(1, vk::ShaderStageFlags::COMPUTE)
    }

    /// `inputs` lists every image that may be presented; each gets its own set.
    pub fn new(vk_ctx: VulkanContext, output_extent: vk::Extent2D, inputs: &[&AllocatedImage]) -> Result<Self, VkError> {
        let display = AllocatedImage::storage(vk_ctx.clone(), DISPLAY_FORMAT, output_extent, vk::ImageLayout::GENERAL)?;
        let sampler = SamplerCreateInfo::LINEAR_CLAMP.create(&vk_ctx.device)?;
        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, Self::schema(), inputs.len() as u32)?;
        let pipeline = ComputePipeline::with_push_constants::<PushConstants>(vk_ctx.clone(), TONEMAP_SHADER, &[
            descriptor_sets.layout,
        ])?;

        let mut this = Self { display, sampler, input_views: Vec::new(), descriptor_sets, pipeline };
        this.write_descriptors(&vk_ctx.device, inputs);
        Ok(this)
    }

    fn write_descriptors(&mut self, device: &DeviceLoader, inputs: &[&AllocatedImage]) {
        self.input_views = inputs.iter().map(|image| image.view).collect();
        for (i, input) in inputs.iter().enumerate() {
            self.descriptor_sets.write(device, i, &[
                DescriptorResource::SampledImage { view: input.view, sampler: self.sampler },
                DescriptorResource::StorageImage(self.display.view),
            ]);
        }
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        recorder.track_image(&self.display, Access::STORAGE_WRITE);
    }

    /// Inputs must be the same images, in the same order, as at creation.
    pub fn resize(
        &mut self,
        vk_ctx: VulkanContext,
        output_extent: vk::Extent2D,
        inputs: &[&AllocatedImage],
    ) -> Result<(), VkError> {
        debug_assert_eq!(inputs.len(), self.input_views.len());
        self.display.destroy(&vk_ctx.device);
        self.display = AllocatedImage::storage(vk_ctx.clone(), DISPLAY_FORMAT, output_extent, vk::ImageLayout::GENERAL)?;
        self.write_descriptors(&vk_ctx.device, inputs);
        Ok(())
    }

    pub fn display(&self) -> &AllocatedImage {
        &self.display
    }

    fn set_for(&self, input: &AllocatedImage) -> Option<vk::DescriptorSet> {
        let index = self.input_views.iter().position(|&view| view == input.view)?;
        Some(self.descriptor_sets.set(index))
    }

    pub fn render(
        &self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        input: &AllocatedImage,
        settings: &TonemapSettings,
    ) {
        let _marker = ctx.marker("Tonemap");
        let set = match self.set_for(input) {
            Some(set) => set,
            None => {
                log::error!("Tonemap input was not registered at creation");
                return;
            }
        };

        recorder
            .image(input, Access::SHADER_READ)
            .image(&self.display, Access::STORAGE_WRITE)
            .flush(ctx.device, ctx.command_buffer);

        self.pipeline.bind(ctx, &[set]);
        self.pipeline.push(ctx, &PushConstants::from(settings));
        let (x, y) = dispatch_size(self.display.extent_2d(), TILE_SIZE, TILE_SIZE);
        self.pipeline.dispatch(ctx, x, y, 1);
    }

    /// Copies the display image into `target` and leaves it ready to present.
    pub fn blit_to_swapchain(
        &self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        target: vk::Image,
        target_extent: vk::Extent2D,
    ) {
        let _marker = ctx.marker("Present Blit");
        let range = vk::ImageSubresourceRangeBuilder::new()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
            .build();

        recorder
            .image(&self.display, Access::TRANSFER_SRC)
            .external_image(target, range, Access::ACQUIRED, Access::TRANSFER_DST)
            .flush(ctx.device, ctx.command_buffer);

        let layers = vk::ImageSubresourceLayersBuilder::new()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1)
            .build();
        let corner = |extent: vk::Extent2D| vk::Offset3D { x: extent.width as i32, y: extent.height as i32, z: 1 };
        let region = vk::ImageBlitBuilder::new()
            .src_subresource(layers)
            .src_offsets([vk::Offset3D::default(), corner(self.display.extent_2d())])
            .dst_subresource(layers)
            .dst_offsets([vk::Offset3D::default(), corner(target_extent)]);
        unsafe {
            ctx.device.cmd_blit_image(
                ctx.command_buffer,
                self.display.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }

        recorder
            .external_image(target, range, Access::TRANSFER_DST, Access::PRESENT)
            .flush(ctx.device, ctx.command_buffer);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.pipeline.destroy(device);
        self.descriptor_sets.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        self.display.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_follow_settings_order() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 32);
        let push = PushConstants::from(&TonemapSettings::default());
        let base = &push as *const _ as usize;
        assert_eq!(&push.avg_lum as *const _ as usize - base, 12);
        assert_eq!(&push.vignette as *const _ as usize - base, 28);
        assert_eq!(push.key, 0.18);
    }

    #[test]
    fn curve_is_monotonic_and_reaches_white() {
        let settings = TonemapSettings::default();
        let mut previous = reinhard(0.0, &settings);
        assert_eq!(previous, 0.0);
        for i in 1..200 {
            let value = reinhard(i as f32 * 0.05, &settings);
            assert!(value > previous);
            previous = value;
        }
        // Scaled luminance equal to y_white maps to exactly 1.
        let white = settings.y_white * settings.avg_lum / (settings.key * settings.exposure);
        assert!((reinhard(white, &settings) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn inverse_round_trips() {
        let settings = TonemapSettings { exposure: 1.5, avg_lum: 0.3, ..TonemapSettings::default() };
        for i in 0..=100 {
            let d = i as f32 / 100.0;
            let round_trip = reinhard(inverse_reinhard(d, &settings), &settings);
            assert!((round_trip - d).abs() < 1e-4, "{} -> {}", d, round_trip);
        }
    }
}
