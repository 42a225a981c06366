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

use crate::{
    settings::CompositeSettings,
    stage::{self, FrameSets, SharedLayouts},
};

pub const COMPOSITE_SHADER: &str = "deferred_shading.comp.spv";
pub const OUTPUT_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PushConstants {
    pub enable_ao:          u32,
    pub enable_di:          u32,
    pub enable_gi:          u32,
    pub enable_reflections: u32,
    pub debug_view:         u32,
}

impl From<&CompositeSettings> for PushConstants {
    fn from(settings: &CompositeSettings) -> Self {
        Self {
            enable_ao:          settings.enable_ao as u32,
            enable_di:          settings.enable_di as u32,
            enable_gi:          settings.enable_gi as u32,
            enable_reflections: settings.enable_reflections as u32,
            debug_view:         settings.debug_view as u32,
        }
    }
}

/// Lighting terms at the render extent, all readable by the time the
/// composite runs.
#[derive(Copy, Clone)]
pub struct LightingInputs<'a> {
    pub ao:         &'a AllocatedImage,
    pub di:         &'a AllocatedImage,
    pub gi:         &'a AllocatedImage,
    pub reflection: &'a AllocatedImage,
}

impl<'a> LightingInputs<'a> {
    fn all(&self) -> [&'a AllocatedImage; 4] {
        [self.ao, self.di, self.gi, self.reflection]
    }
}

/// Deferred shading: evaluates the BRDF from the G-buffer and combines it
/// with every ray-traced term into an HDR radiance image.
pub struct Composite {
    output:          AllocatedImage,
    sampler:         vk::Sampler,
    descriptor_sets: DescriptorSets,
    pipeline:        ComputePipeline,
}

impl Composite {
    fn schema() -> DescriptorSetSchema {
        DescriptorSetSchema::new()
            .sampled_images(4, vk::ShaderStageFlags::COMPUTE)
            .storage_images(1, vk::ShaderStageFlags::COMPUTE)
    }

    pub fn new(
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        layouts: SharedLayouts,
        inputs: LightingInputs,
    ) -> Result<Self, VkError> {
        let output = stage::storage_image(vk_ctx.clone(), OUTPUT_FORMAT, render_extent)?;
        let sampler = SamplerCreateInfo::NEAREST_CLAMP.create(&vk_ctx.device)?;
        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, Self::schema(), 1)?;
        let pipeline = ComputePipeline::with_push_constants::<PushConstants>(
            vk_ctx.clone(),
            COMPOSITE_SHADER,
            &layouts.with(descriptor_sets.layout),
        )?;

        let this = Self { output, sampler, descriptor_sets, pipeline };
        this.write_descriptors(&vk_ctx.device, inputs);
        Ok(this)
    }

    fn write_descriptors(&self, device: &DeviceLoader, inputs: LightingInputs) {
        let sampled = |image: &AllocatedImage| DescriptorResource::SampledImage { view: image.view, sampler: self.sampler };
        self.descriptor_sets.write(device, 0, &[
            sampled(inputs.ao),
            sampled(inputs.di),
            sampled(inputs.gi),
            sampled(inputs.reflection),
            DescriptorResource::StorageImage(self.output.view),
        ]);
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        stage::track_scratch(recorder, [&self.output]);
    }

    /// Inputs are re-bound because every stage recreated its output.
    pub fn resize(
        &mut self,
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        inputs: LightingInputs,
    ) -> Result<(), VkError> {
        self.output.destroy(&vk_ctx.device);
        self.output = stage::storage_image(vk_ctx.clone(), OUTPUT_FORMAT, render_extent)?;
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
        inputs: LightingInputs,
        settings: &CompositeSettings,
    ) {
        let _marker = ctx.marker("Deferred Shading");
        for input in inputs.all() {
            recorder.image(input, Access::SHADER_READ);
        }
        recorder.image(&self.output, Access::STORAGE_WRITE).flush(ctx.device, ctx.command_buffer);

        self.pipeline.bind(ctx, &sets.with(self.descriptor_sets.set(0)));
        self.pipeline.push(ctx, &PushConstants::from(settings));
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
    use crate::settings::DebugView;

    /// Diffuse and specular combination the shading shader performs, one channel.
    fn shade(push: &PushConstants, diffuse_albedo: f32, ao: f32, di: f32, gi: f32, reflection: f32) -> f32 {
        let ao = if push.enable_ao != 0 { ao } else { 1.0 };
        let di = if push.enable_di != 0 { di } else { 0.0 };
        let gi = if push.enable_gi != 0 { gi } else { 0.0 };
        let reflection = if push.enable_reflections != 0 { reflection } else { 0.0 };
        di + diffuse_albedo * gi * ao + reflection
    }

    #[test]
    fn push_constants_are_five_words() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 20);
        let push = PushConstants::from(&CompositeSettings::default());
        assert_eq!(push, PushConstants { enable_ao: 1, enable_di: 1, enable_gi: 1, enable_reflections: 1, debug_view: 0 });
    }

    #[test]
    fn debug_view_is_forwarded_by_index() {
        let settings = CompositeSettings { debug_view: DebugView::GlobalIllumination, ..Default::default() };
        assert_eq!(PushConstants::from(&settings).debug_view, 6);
    }

    #[test]
    fn disabled_gi_drops_only_the_gi_term() {
        let settings = CompositeSettings { enable_gi: false, ..Default::default() };
        let push = PushConstants::from(&settings);
        let without_gi = shade(&push, 0.73, 0.8, 0.4, 0.3, 0.05);
        assert_eq!(without_gi, 0.4 + 0.05);
    }
}
