use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{
    command::dispatch_size,
    descriptor::SamplerCreateInfo,
    AllocatedImage,
    BarrierRecorder,
    ComputePipeline,
    DescriptorSets,
    RenderContext,
    VkError,
    VulkanContext,
};

use crate::stage::{self, FrameSets, SharedLayouts};

pub const UPSAMPLE_SHADER: &str = "upsample.comp.spv";

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PushConstants {
    /// Mip of the G-buffer matching the low-resolution input.
    pub gbuffer_mip: u32,
    /// Exponent applied to the depth/normal edge-stopping weights.
    pub power:       f32,
}

const EDGE_POWER: f32 = 1.0;

/// Bilateral upsample from a stage's working resolution to the render
/// extent, with bilinear weights rejected across G-buffer edges. Inputs are
/// given per parity, since a denoised input alternates between two images.
pub struct Upsample {
    output:          AllocatedImage,
    sampler:         vk::Sampler,
    descriptor_sets: DescriptorSets,
    pipeline:        ComputePipeline,
}

impl Upsample {
    pub fn new(
        vk_ctx: VulkanContext,
        extent: vk::Extent2D,
        format: vk::Format,
        layouts: SharedLayouts,
        inputs: [&AllocatedImage; 2],
    ) -> Result<Self, VkError> {
        let output = stage::storage_image(vk_ctx.clone(), format, extent)?;
        let sampler = SamplerCreateInfo::LINEAR_CLAMP.create(&vk_ctx.device)?;
        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, stage::io_schema(), 2)?;
        let pipeline = ComputePipeline::with_push_constants::<PushConstants>(
            vk_ctx.clone(),
            UPSAMPLE_SHADER,
            &layouts.with(descriptor_sets.layout),
        )?;

        let this = Self { output, sampler, descriptor_sets, pipeline };
        this.write_descriptors(&vk_ctx.device, inputs);
        Ok(this)
    }

    fn write_descriptors(&self, device: &DeviceLoader, inputs: [&AllocatedImage; 2]) {
        for (parity, input) in inputs.into_iter().enumerate() {
            self.descriptor_sets.write(device, parity, &stage::io_resources(input, self.sampler, &self.output));
        }
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        stage::track_scratch(recorder, [&self.output]);
    }

    pub fn resize(
        &mut self,
        vk_ctx: VulkanContext,
        extent: vk::Extent2D,
        inputs: [&AllocatedImage; 2],
    ) -> Result<(), VkError> {
        let format = self.output.format;
        self.output.destroy(&vk_ctx.device);
        self.output = stage::storage_image(vk_ctx.clone(), format, extent)?;
        self.write_descriptors(&vk_ctx.device, inputs);
        Ok(())
    }

    pub fn output(&self) -> &AllocatedImage {
        &self.output
    }

    pub fn render(
        &self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        sets: &FrameSets,
        input: &AllocatedImage,
        gbuffer_mip: u32,
    ) {
        let _marker = ctx.marker("Upsample");
        stage::read_write(ctx, recorder, input, &self.output);

        self.pipeline.bind(ctx, &sets.with(self.descriptor_sets.set(ctx.ping_pong)));
        self.pipeline.push(ctx, &PushConstants { gbuffer_mip, power: EDGE_POWER });
        let (x, y) = dispatch_size(self.output.extent_2d(), 8, 8);
        self.pipeline.dispatch(ctx, x, y, 1);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.pipeline.destroy(device);
        self.descriptor_sets.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        self.output.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_layout() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 8);
    }
}
