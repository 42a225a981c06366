use erupt::vk;
use hybridtrace_vk::{
    Access,
    AllocatedImage,
    BarrierRecorder,
    DescriptorResource,
    DescriptorSetSchema,
    PingPong,
    RenderContext,
    VkError,
    VulkanContext,
};

/// Descriptor sets every ray-traced stage binds ahead of its own: scene,
/// blue noise and the G-buffer of the current parity.
#[derive(Copy, Clone, Debug)]
pub struct FrameSets {
    pub scene:      vk::DescriptorSet,
    pub blue_noise: vk::DescriptorSet,
    pub gbuffer:    vk::DescriptorSet,
}

impl FrameSets {
    pub fn with(&self, own: vk::DescriptorSet) -> [vk::DescriptorSet; 4] {
        [self.scene, self.blue_noise, self.gbuffer, own]
    }
}

/// Layouts matching [`FrameSets`].
#[derive(Copy, Clone, Debug)]
pub struct SharedLayouts {
    pub scene:      vk::DescriptorSetLayout,
    pub blue_noise: vk::DescriptorSetLayout,
    pub gbuffer:    vk::DescriptorSetLayout,
}

impl SharedLayouts {
    pub fn with(&self, own: vk::DescriptorSetLayout) -> [vk::DescriptorSetLayout; 4] {
        [self.scene, self.blue_noise, self.gbuffer, own]
    }
}

/// History pair in the frame-boundary state: slot 0 readable, slot 1 writable.
pub fn storage_pair(
    vk_ctx: VulkanContext,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<PingPong<AllocatedImage>, VkError> {
    PingPong::try_from_fn(|slot| {
        let layout = if slot == 0 { vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL } else { vk::ImageLayout::GENERAL };
        AllocatedImage::storage(vk_ctx.clone(), format, extent, layout)
    })
}

/// Single-frame scratch image, written before it is read every frame.
pub fn storage_image(vk_ctx: VulkanContext, format: vk::Format, extent: vk::Extent2D) -> Result<AllocatedImage, VkError> {
    AllocatedImage::storage(vk_ctx, format, extent, vk::ImageLayout::GENERAL)
}

pub fn track_scratch<'a>(recorder: &mut BarrierRecorder, images: impl IntoIterator<Item = &'a AllocatedImage>) {
    for image in images {
        recorder.track_image(image, Access::STORAGE_WRITE);
    }
}

/// Layout of the single-input passes: one sampled image in, one storage image out.
pub fn io_schema() -> DescriptorSetSchema {
    DescriptorSetSchema::new()
        .sampled_images(1, vk::ShaderStageFlags::COMPUTE)
        .storage_images(1, vk::ShaderStageFlags::COMPUTE)
}

pub fn io_resources(input: &AllocatedImage, sampler: vk::Sampler, output: &AllocatedImage) -> [DescriptorResource; 2] {
    [DescriptorResource::SampledImage { view: input.view, sampler }, DescriptorResource::StorageImage(output.view)]
}

/// Records `input → output` dependencies and flushes them.
pub fn read_write(ctx: &RenderContext, recorder: &mut BarrierRecorder, input: &AllocatedImage, output: &AllocatedImage) {
    recorder
        .image(input, Access::SHADER_READ)
        .image(output, Access::STORAGE_WRITE)
        .flush(ctx.device, ctx.command_buffer);
}
