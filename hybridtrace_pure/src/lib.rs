use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{
    command::dispatch_size,
    descriptor::SamplerCreateInfo,
    image::destroy_all,
    Access,
    AllocatedImage,
    BarrierRecorder,
    ComputePipeline,
    DescriptorResource,
    DescriptorSetSchema,
    DescriptorSets,
    PingPong,
    RenderContext,
    VkError,
    VulkanContext,
};

pub const PATH_TRACE_SHADER: &str = "path_trace.comp.spv";
pub const ACCUMULATION_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
pub const TILE_SIZE: u32 = 8;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PushConstants {
    pub max_depth:   u32,
    pub bias:        f32,
    pub frame_count: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PathTracerSettings {
    pub max_depth: u32,
    pub bias:      f32,
}

impl Default for PathTracerSettings {
    fn default() -> Self {
        Self { max_depth: 5, bias: 0.01 }
    }
}

/// Progressive reference renderer: one compute dispatch per frame folding a
/// new estimate into a running mean.
pub struct PathTracer {
    pub settings:    PathTracerSettings,
    frame_count:     u32,
    accumulation:    PingPong<AllocatedImage>,
    sampler:         vk::Sampler,
    descriptor_sets: DescriptorSets,
    pipeline:        ComputePipeline,
}

fn create_accumulation(vk_ctx: VulkanContext, extent: vk::Extent2D) -> Result<PingPong<AllocatedImage>, VkError> {
    PingPong::try_from_fn(|slot| {
        let layout = if slot == 0 { vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL } else { vk::ImageLayout::GENERAL };
        AllocatedImage::storage(vk_ctx.clone(), ACCUMULATION_FORMAT, extent, layout)
    })
}

impl PathTracer {
    fn schema() -> DescriptorSetSchema {
        DescriptorSetSchema::new()
            .sampled_images(1, vk::ShaderStageFlags::COMPUTE)
            .storage_images(1, vk::ShaderStageFlags::COMPUTE)
    }

    pub fn new(
        vk_ctx: VulkanContext,
        extent: vk::Extent2D,
        scene_layout: vk::DescriptorSetLayout,
        blue_noise_layout: vk::DescriptorSetLayout,
        settings: PathTracerSettings,
    ) -> Result<Self, VkError> {
        let accumulation = create_accumulation(vk_ctx.clone(), extent)?;
        let sampler = SamplerCreateInfo::NEAREST_CLAMP.create(&vk_ctx.device)?;
        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, Self::schema(), 2)?;
        let pipeline = ComputePipeline::with_push_constants::<PushConstants>(vk_ctx.clone(), PATH_TRACE_SHADER, &[
            scene_layout,
            blue_noise_layout,
            descriptor_sets.layout,
        ])?;

        let this = Self { settings, frame_count: 0, accumulation, sampler, descriptor_sets, pipeline };
        this.write_descriptors(&vk_ctx.device);
        Ok(this)
    }

    fn write_descriptors(&self, device: &DeviceLoader) {
        for parity in 0..2 {
            self.descriptor_sets.write(device, parity, &[
                DescriptorResource::SampledImage { view: self.accumulation.read(parity).view, sampler: self.sampler },
                DescriptorResource::StorageImage(self.accumulation.write(parity).view),
            ]);
        }
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        recorder.track_ping_pong(&self.accumulation);
    }

    pub fn resize(&mut self, vk_ctx: VulkanContext, extent: vk::Extent2D) -> Result<(), VkError> {
        destroy_all(&vk_ctx.device, self.accumulation.iter());
        self.accumulation = create_accumulation(vk_ctx.clone(), extent)?;
        self.write_descriptors(&vk_ctx.device);
        self.reset_frames();
        Ok(())
    }

    /// Restarts accumulation; the next frame replaces the history outright.
    pub fn reset_frames(&mut self) {
        if self.frame_count > 0 {
            log::debug!("Path tracer reset after {} frames", self.frame_count);
        }
        self.frame_count = 0;
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn push_constants(&self) -> PushConstants {
        PushConstants { max_depth: self.settings.max_depth, bias: self.settings.bias, frame_count: self.frame_count }
    }

    /// Image holding the running mean once this frame's dispatch has run.
    pub fn output(&self, parity: usize) -> &AllocatedImage {
        self.accumulation.write(parity)
    }

    pub fn render(
        &mut self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        scene_set: vk::DescriptorSet,
        blue_noise_set: vk::DescriptorSet,
    ) {
        let _marker = ctx.marker("Path Trace");

        recorder
            .image(self.accumulation.read(ctx.ping_pong), Access::SHADER_READ)
            .image(self.accumulation.write(ctx.ping_pong), Access::STORAGE_WRITE)
            .flush(ctx.device, ctx.command_buffer);

        self.pipeline.bind(ctx, &[scene_set, blue_noise_set, self.descriptor_sets.set(ctx.ping_pong)]);
        self.pipeline.push(ctx, &self.push_constants());
        let (x, y) = dispatch_size(self.accumulation.slot(0).extent_2d(), TILE_SIZE, TILE_SIZE);
        self.pipeline.dispatch(ctx, x, y, 1);

        self.frame_count = self.frame_count.saturating_add(1);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.pipeline.destroy(device);
        self.descriptor_sets.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        destroy_all(device, self.accumulation.iter());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// What the shader does with each new estimate.
    fn accumulate(previous: f32, sample: f32, frame_count: u32) -> f32 {
        previous + (sample - previous) / (frame_count as f32 + 1.0)
    }

    #[test]
    fn push_constants_are_three_packed_words() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 12);
        let constants = PushConstants { max_depth: 8, bias: 0.5, frame_count: 3 };
        let base = &constants as *const _ as usize;
        assert_eq!(&constants.max_depth as *const _ as usize - base, 0);
        assert_eq!(&constants.bias as *const _ as usize - base, 4);
        assert_eq!(&constants.frame_count as *const _ as usize - base, 8);
    }

    #[test]
    fn running_mean_equals_arithmetic_mean() {
        let samples = [0.2, 1.4, 0.7, 3.1, 0.0, 2.2, 0.9, 1.1];
        let mut mean = 123.0; // stale history is discarded on the first frame
        for (frame_count, &sample) in samples.iter().enumerate() {
            mean = accumulate(mean, sample, frame_count as u32);
        }
        let expected = samples.iter().sum::<f32>() / samples.len() as f32;
        assert!((mean - expected).abs() < 1e-5);
    }

    #[test]
    fn default_settings() {
        let settings = PathTracerSettings::default();
        assert_eq!(settings.max_depth, 5);
        assert_eq!(settings.bias, 0.01);
    }
}
