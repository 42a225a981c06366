use erupt::{vk, DeviceLoader};
use hybridtrace_vk::{
    command::dispatch_size,
    Access,
    AllocatedBuffer,
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
    settings::{DiSettings, SvgfSettings},
    stage::{self, FrameSets, SharedLayouts},
    svgf::Svgf,
    upsample::Upsample,
};

pub const TEMPORAL_SHADER: &str = "restir_temporal.comp.spv";
pub const SPATIAL_SHADER: &str = "restir_spatial.comp.spv";
pub const COMPOSITE_SHADER: &str = "restir_composite.comp.spv";

pub const OUTPUT_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
const TILE: u32 = 8;

/// Per-pixel resampling state, laid out as the shaders read it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Reservoir {
    pub light_id:    u32,
    /// Target function value of the chosen sample.
    pub p_hat:       f32,
    pub sum_weights: f32,
    /// Contribution weight, `sum_weights / (num_samples * p_hat)`.
    pub w:           f32,
    pub num_samples: u32,
}

/// CPU model of the reservoir arithmetic in the ReSTIR shaders.
#[cfg(test)]
impl Reservoir {
    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// Streams one candidate through the reservoir. `u` is uniform in `[0, 1)`.
    pub fn update(&mut self, light_id: u32, p_hat: f32, weight: f32, u: f32) -> bool {
        self.sum_weights += weight;
        self.num_samples += 1;
        let accepted = self.sum_weights > 0.0 && u * self.sum_weights < weight;
        if accepted {
            self.light_id = light_id;
            self.p_hat = p_hat;
        }
        accepted
    }

    /// Folds `other` in, re-evaluating its sample as `p_hat` at this pixel.
    pub fn merge(&mut self, other: &Reservoir, p_hat: f32, u: f32) {
        let samples = self.num_samples;
        self.update(other.light_id, p_hat, p_hat * other.w * other.num_samples as f32, u);
        self.num_samples = samples + other.num_samples;
    }

    /// Bounds the history so stale samples cannot dominate.
    pub fn clamp(&mut self, max_samples: u32) {
        if self.num_samples > max_samples {
            self.sum_weights *= max_samples as f32 / self.num_samples as f32;
            self.num_samples = max_samples;
        }
    }

    /// Temporal reuse: last frame's reservoir is clamped to `max_history`
    /// samples before it is merged.
    pub fn reuse_history(&mut self, history: &Reservoir, p_hat: f32, max_history: u32, u: f32) {
        let mut history = *history;
        history.clamp(max_history);
        self.merge(&history, p_hat, u);
    }

    pub fn finalize(&mut self) {
        self.w = if self.num_samples == 0 || self.p_hat <= 0.0 {
            0.0
        } else {
            self.sum_weights / (self.num_samples as f32 * self.p_hat)
        };
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TemporalPushConstants {
    pub temporal_reservoir_addr:    u64,
    pub passthrough_reservoir_addr: u64,
    pub bias:                       f32,
    pub lights_per_pixel:           u32,
    pub temporal_reuse:             u32,
    pub max_history:                u32,
    pub gbuffer_mip:                u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SpatialPushConstants {
    pub passthrough_reservoir_addr: u64,
    pub spatial_reservoir_addr:     u64,
    pub bias:                       f32,
    pub samples:                    u32,
    pub radius:                     f32,
    pub gbuffer_mip:                u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CompositePushConstants {
    pub reservoir_addr: u64,
    pub bias:           f32,
    pub gbuffer_mip:    u32,
}

struct Reservoirs {
    temporal:    AllocatedBuffer<Reservoir>,
    passthrough: AllocatedBuffer<Reservoir>,
    spatial:     AllocatedBuffer<Reservoir>,
}

impl Reservoirs {
    fn new(vk_ctx: VulkanContext, extent: vk::Extent2D) -> Result<Self, VkError> {
        let len = (extent.width * extent.height) as usize;
        let make = || AllocatedBuffer::storage(vk_ctx.clone(), len, vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS);
        Ok(Self { temporal: make()?, passthrough: make()?, spatial: make()? })
    }

    fn destroy(&self) {
        self.temporal.destroy();
        self.passthrough.destroy();
        self.spatial.destroy();
    }
}

fn address(buffer: &AllocatedBuffer<Reservoir>) -> u64 {
    buffer.device_address.unwrap_or_default()
}

/// ReSTIR direct lighting: temporal then spatial reservoir reuse, a shadow
/// ray to the surviving emitter, SVGF and an upsample.
pub struct DirectLighting {
    extent:      vk::Extent2D,
    reservoirs:  Reservoirs,
    raytraced:   AllocatedImage,
    cleared:     bool,
    output_sets: DescriptorSets,
    temporal:    ComputePipeline,
    spatial:     ComputePipeline,
    composite:   ComputePipeline,
    denoiser:    Svgf,
    upsample:    Upsample,
}

impl DirectLighting {
    pub fn new(
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        layouts: SharedLayouts,
        settings: &DiSettings,
        svgf: &SvgfSettings,
    ) -> Result<Self, VkError> {
        let extent = settings.scale.extent(render_extent);
        let reservoirs = Reservoirs::new(vk_ctx.clone(), extent)?;
        let raytraced = stage::storage_image(vk_ctx.clone(), OUTPUT_FORMAT, extent)?;

        let output_sets = DescriptorSets::new(
            &vk_ctx.device,
            DescriptorSetSchema::new().storage_images(1, vk::ShaderStageFlags::COMPUTE),
            1,
        )?;
        let own = layouts.with(output_sets.layout);
        let temporal = ComputePipeline::with_push_constants::<TemporalPushConstants>(vk_ctx.clone(), TEMPORAL_SHADER, &own)?;
        let spatial = ComputePipeline::with_push_constants::<SpatialPushConstants>(vk_ctx.clone(), SPATIAL_SHADER, &own)?;
        let composite =
            ComputePipeline::with_push_constants::<CompositePushConstants>(vk_ctx.clone(), COMPOSITE_SHADER, &own)?;

        let denoiser = Svgf::new(vk_ctx.clone(), "DI Denoise", extent, layouts, &raytraced, svgf.iterations)?;
        let upsample = Upsample::new(vk_ctx.clone(), render_extent, OUTPUT_FORMAT, layouts, denoiser.outputs())?;

        let this = Self {
            extent,
            reservoirs,
            raytraced,
            cleared: false,
            output_sets,
            temporal,
            spatial,
            composite,
            denoiser,
            upsample,
        };
        this.write_descriptors(&vk_ctx.device);
        Ok(this)
    }

    fn write_descriptors(&self, device: &DeviceLoader) {
        self.output_sets.write(device, 0, &[DescriptorResource::StorageImage(self.raytraced.view)]);
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        stage::track_scratch(recorder, [&self.raytraced]);
        self.denoiser.track(recorder);
        self.upsample.track(recorder);
    }

    pub fn resize(&mut self, vk_ctx: VulkanContext, render_extent: vk::Extent2D, settings: &DiSettings) -> Result<(), VkError> {
        self.reservoirs.destroy();
        self.raytraced.destroy(&vk_ctx.device);
        self.extent = settings.scale.extent(render_extent);
        self.reservoirs = Reservoirs::new(vk_ctx.clone(), self.extent)?;
        self.raytraced = stage::storage_image(vk_ctx.clone(), OUTPUT_FORMAT, self.extent)?;
        self.cleared = false;
        self.write_descriptors(&vk_ctx.device);
        self.denoiser.resize(vk_ctx.clone(), self.extent, &self.raytraced)?;
        self.upsample.resize(vk_ctx, render_extent, self.denoiser.outputs())
    }

    /// Direct lighting at the render extent.
    pub fn output(&self) -> &AllocatedImage {
        self.upsample.output()
    }

    pub fn render(
        &mut self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        sets: &FrameSets,
        settings: &DiSettings,
        svgf: &SvgfSettings,
    ) {
        let _marker = ctx.marker("Direct Lighting");
        let gbuffer_mip = settings.scale.gbuffer_mip();
        let own = sets.with(self.output_sets.set(0));
        let (x, y) = dispatch_size(self.extent, TILE, TILE);
        let reservoirs = &self.reservoirs;

        if !self.cleared {
            // Fresh buffers hold garbage; the first temporal pass must see empty history.
            recorder.buffer(&reservoirs.temporal, Access::TRANSFER_DST).flush(ctx.device, ctx.command_buffer);
            reservoirs.temporal.cmd_clear(ctx.device, ctx.command_buffer);
            self.cleared = true;
        }

        {
            let _marker = ctx.marker("Temporal Reuse");
            recorder
                .buffer(&reservoirs.temporal, Access::STORAGE_READ)
                .buffer(&reservoirs.passthrough, Access::STORAGE_WRITE)
                .flush(ctx.device, ctx.command_buffer);
            self.temporal.bind(ctx, &own);
            self.temporal.push(ctx, &TemporalPushConstants {
                temporal_reservoir_addr: address(&reservoirs.temporal),
                passthrough_reservoir_addr: address(&reservoirs.passthrough),
                bias: settings.bias,
                lights_per_pixel: settings.lights_per_pixel,
                temporal_reuse: settings.temporal_reuse as u32,
                max_history: settings.clamp_threshold * settings.lights_per_pixel,
                gbuffer_mip,
            });
            self.temporal.dispatch(ctx, x, y, 1);
        }

        let resolved = if settings.spatial_reuse {
            let _marker = ctx.marker("Spatial Reuse");
            recorder
                .buffer(&reservoirs.passthrough, Access::STORAGE_READ)
                .buffer(&reservoirs.spatial, Access::STORAGE_WRITE)
                .flush(ctx.device, ctx.command_buffer);
            self.spatial.bind(ctx, &own);
            self.spatial.push(ctx, &SpatialPushConstants {
                passthrough_reservoir_addr: address(&reservoirs.passthrough),
                spatial_reservoir_addr: address(&reservoirs.spatial),
                bias: settings.bias,
                samples: settings.samples,
                radius: settings.radius,
                gbuffer_mip,
            });
            self.spatial.dispatch(ctx, x, y, 1);
            &reservoirs.spatial
        } else {
            &reservoirs.passthrough
        };

        {
            let _marker = ctx.marker("Composite");
            recorder
                .buffer(resolved, Access::STORAGE_READ)
                .image(&self.raytraced, Access::STORAGE_WRITE)
                .flush(ctx.device, ctx.command_buffer);
            self.composite.bind(ctx, &own);
            self.composite.push(ctx, &CompositePushConstants {
                reservoir_addr: address(resolved),
                bias: settings.bias,
                gbuffer_mip,
            });
            self.composite.dispatch(ctx, x, y, 1);
        }

        {
            let _marker = ctx.marker("History Copy");
            recorder
                .buffer(resolved, Access::TRANSFER_SRC)
                .buffer(&reservoirs.temporal, Access::TRANSFER_DST)
                .flush(ctx.device, ctx.command_buffer);
            let region = vk::BufferCopyBuilder::new().src_offset(0).dst_offset(0).size(reservoirs.temporal.size);
            unsafe {
                ctx.device.cmd_copy_buffer(ctx.command_buffer, resolved.buffer, reservoirs.temporal.buffer, &[region]);
            }
        }

        self.denoiser.render(ctx, recorder, sets, &self.raytraced, svgf, gbuffer_mip);
        self.upsample.render(ctx, recorder, sets, self.denoiser.output(ctx.ping_pong), gbuffer_mip);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.upsample.destroy(device);
        self.denoiser.destroy(device);
        for pipeline in [&self.temporal, &self.spatial, &self.composite] {
            pipeline.destroy(device);
        }
        self.output_sets.destroy(device);
        self.raytraced.destroy(device);
        self.reservoirs.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic stand-in for the shader's blue-noise draws.
    fn uniforms() -> impl Iterator<Item = f32> {
        (0u32..).map(|i| ((i.wrapping_mul(2_654_435_761) >> 8) as f32) / (1u32 << 24) as f32)
    }

    #[test]
    fn reservoir_layout_is_five_words() {
        assert_eq!(std::mem::size_of::<Reservoir>(), 20);
        assert_eq!(std::mem::size_of::<TemporalPushConstants>(), 40);
        assert_eq!(std::mem::size_of::<SpatialPushConstants>(), 32);
        assert_eq!(std::mem::size_of::<CompositePushConstants>(), 16);
    }

    #[test]
    fn empty_reservoir_contributes_nothing() {
        let mut reservoir = Reservoir::default();
        assert!(reservoir.is_empty());
        reservoir.finalize();
        assert_eq!(reservoir.w, 0.0);
    }

    #[test]
    fn first_candidate_is_always_kept() {
        let mut reservoir = Reservoir::default();
        assert!(reservoir.update(7, 0.5, 2.0, 0.999));
        assert_eq!(reservoir.light_id, 7);
        assert_eq!(reservoir.num_samples, 1);
        reservoir.finalize();
        assert!((reservoir.w - 2.0 / 0.5).abs() < 1e-6);
    }

    #[test]
    fn merged_history_is_clamped_to_the_threshold() {
        let settings = DiSettings::default();
        let max_history = settings.clamp_threshold * settings.lights_per_pixel;
        let mut draws = uniforms();

        let mut history = Reservoir::default();
        for frame in 0..100 {
            let mut current = Reservoir::default();
            for light in 0..settings.lights_per_pixel {
                let p_hat = 0.1 + (light % 4) as f32;
                current.update(light, p_hat, p_hat, draws.next().unwrap());
            }
            if !history.is_empty() {
                let p_hat = history.p_hat;
                current.reuse_history(&history, p_hat, max_history, draws.next().unwrap());
            }
            current.finalize();

            let limit = settings.lights_per_pixel + max_history;
            assert!(current.num_samples <= limit, "frame {} kept {} samples", frame, current.num_samples);
            assert!(current.w.is_finite() && current.w >= 0.0);
            history = current;
        }
        assert_eq!(history.num_samples, settings.lights_per_pixel + max_history);
    }

    #[test]
    fn history_is_clamped_before_it_is_merged() {
        let history = Reservoir { light_id: 3, p_hat: 1.0, sum_weights: 500.0, w: 1.0, num_samples: 500 };
        let mut current = Reservoir::default();
        current.update(1, 1.0, 1.0, 0.0);
        current.reuse_history(&history, 1.0, 40, 0.5);
        assert_eq!(current.num_samples, 41);
        // The clamped history weighs 40 samples against the one fresh candidate.
        assert!((current.sum_weights - 41.0).abs() < 1e-4);
    }

    #[test]
    fn clamping_keeps_the_mean_weight() {
        let mut reservoir = Reservoir { light_id: 1, p_hat: 1.0, sum_weights: 1000.0, w: 0.0, num_samples: 1000 };
        reservoir.clamp(100);
        assert_eq!(reservoir.num_samples, 100);
        assert!((reservoir.sum_weights / reservoir.num_samples as f32 - 1.0).abs() < 1e-6);
    }
}
