use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{
    command::dispatch_size,
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
    settings::{ReflectionSettings, SvgfSettings},
    stage::{self, FrameSets, SharedLayouts},
    svgf::Svgf,
    upsample::Upsample,
};

pub const RAYTRACE_SHADER: &str = "reflection_raytrace.comp.spv";
pub const OUTPUT_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PushConstants {
    pub bias:                f32,
    pub roughness_threshold: f32,
    pub gbuffer_mip:         u32,
}

/// One GGX-sampled specular ray per pixel, denoised the same way as direct lighting.
pub struct Reflection {
    extent:      vk::Extent2D,
    raytraced:   AllocatedImage,
    output_sets: DescriptorSets,
    raytrace:    ComputePipeline,
    denoiser:    Svgf,
    upsample:    Upsample,
}

impl Reflection {
    pub fn new(
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        layouts: SharedLayouts,
        settings: &ReflectionSettings,
        svgf: &SvgfSettings,
    ) -> Result<Self, VkError> {
        let extent = settings.scale.extent(render_extent);
        let raytraced = stage::storage_image(vk_ctx.clone(), OUTPUT_FORMAT, extent)?;
        let output_sets = DescriptorSets::new(
            &vk_ctx.device,
            DescriptorSetSchema::new().storage_images(1, vk::ShaderStageFlags::COMPUTE),
            1,
        )?;
        let raytrace = ComputePipeline::with_push_constants::<PushConstants>(
            vk_ctx.clone(),
            RAYTRACE_SHADER,
            &layouts.with(output_sets.layout),
        )?;
        let denoiser = Svgf::new(vk_ctx.clone(), "Reflection Denoise", extent, layouts, &raytraced, svgf.iterations)?;
        let upsample = Upsample::new(vk_ctx.clone(), render_extent, OUTPUT_FORMAT, layouts, denoiser.outputs())?;

        output_sets.write(&vk_ctx.device, 0, &[DescriptorResource::StorageImage(raytraced.view)]);
        Ok(Self { extent, raytraced, output_sets, raytrace, denoiser, upsample })
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        stage::track_scratch(recorder, [&self.raytraced]);
        self.denoiser.track(recorder);
        self.upsample.track(recorder);
    }

    pub fn resize(
        &mut self,
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        settings: &ReflectionSettings,
    ) -> Result<(), VkError> {
        self.raytraced.destroy(&vk_ctx.device);
        self.extent = settings.scale.extent(render_extent);
        self.raytraced = stage::storage_image(vk_ctx.clone(), OUTPUT_FORMAT, self.extent)?;
        self.output_sets.write(&vk_ctx.device, 0, &[DescriptorResource::StorageImage(self.raytraced.view)]);
        self.denoiser.resize(vk_ctx.clone(), self.extent, &self.raytraced)?;
        self.upsample.resize(vk_ctx, render_extent, self.denoiser.outputs())
    }

    /// Specular reflections at the render extent.
    pub fn output(&self) -> &AllocatedImage {
        self.upsample.output()
    }

    pub fn render(
        &self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        sets: &FrameSets,
        settings: &ReflectionSettings,
        svgf: &SvgfSettings,
    ) {
        let _marker = ctx.marker("Reflection");
        let gbuffer_mip = settings.scale.gbuffer_mip();

        {
            let _marker = ctx.marker("Ray Trace");
            recorder.image(&self.raytraced, Access::STORAGE_WRITE).flush(ctx.device, ctx.command_buffer);
            self.raytrace.bind(ctx, &sets.with(self.output_sets.set(0)));
            self.raytrace.push(ctx, &PushConstants {
                bias: settings.bias,
                roughness_threshold: settings.roughness_threshold,
                gbuffer_mip,
            });
            let (x, y) = dispatch_size(self.extent, 8, 8);
            self.raytrace.dispatch(ctx, x, y, 1);
        }

        self.denoiser.render(ctx, recorder, sets, &self.raytraced, svgf, gbuffer_mip);
        self.upsample.render(ctx, recorder, sets, self.denoiser.output(ctx.ping_pong), gbuffer_mip);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.upsample.destroy(device);
        self.denoiser.destroy(device);
        self.raytrace.destroy(device);
        self.output_sets.destroy(device);
        self.raytraced.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_match_shader_block() {
        let constants = PushConstants { bias: 0.5, roughness_threshold: 0.75, gbuffer_mip: 1 };
        let base = &constants as *const _ as usize;
        assert_eq!(std::mem::size_of::<PushConstants>(), 12);
        assert_eq!(&constants.roughness_threshold as *const _ as usize - base, 4);
        assert_eq!(&constants.gbuffer_mip as *const _ as usize - base, 8);
    }
}
