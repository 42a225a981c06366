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

use crate::{
    settings::AoSettings,
    stage::{self, FrameSets, SharedLayouts},
    tiles::{TileLists, TILE_SIZE},
    upsample::Upsample,
};

pub const RAYTRACE_SHADER: &str = "ao_raytrace.comp.spv";
pub const TEMPORAL_SHADER: &str = "ao_temporal.comp.spv";
pub const BLUR_SHADER: &str = "ao_bilateral_blur.comp.spv";
pub const COPY_TILES_SHADER: &str = "ao_copy_tiles.comp.spv";

/// One bit per pixel of an 8×4 block.
pub const PACKED_FORMAT: vk::Format = vk::Format::R32_UINT;
pub const PACKED_TILE: (u32, u32) = (8, 4);
/// Occlusion and history length.
pub const HISTORY_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;
pub const AO_FORMAT: vk::Format = vk::Format::R16_SFLOAT;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RayTracePushConstants {
    pub ray_length:  f32,
    pub bias:        f32,
    pub gbuffer_mip: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TemporalPushConstants {
    pub denoise_tile_data_addr:          u64,
    pub denoise_tile_dispatch_args_addr: u64,
    pub copy_tile_data_addr:             u64,
    pub copy_tile_dispatch_args_addr:    u64,
    pub gbuffer_mip:                     u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BlurPushConstants {
    pub denoise_tile_data_addr: u64,
    pub z_buffer_params:        [f32; 4],
    pub direction:              [i32; 2],
    pub gbuffer_mip:            u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CopyTilesPushConstants {
    pub copy_tile_data_addr: u64,
}

/// Parameters that turn a reverse-Z depth `d` into view distance as
/// `1 / (z * d + w)`.
pub fn z_buffer_params(near: f32, far: f32) -> [f32; 4] {
    // Reverse-Z swaps the roles of the planes.
    let x = 1.0 - near / far;
    let y = near / far;
    [x, y, x / near, y / near]
}

pub fn packed_extent(extent: vk::Extent2D) -> vk::Extent2D {
    let (width, height) = dispatch_size(extent, PACKED_TILE.0, PACKED_TILE.1);
    vk::Extent2D { width, height }
}

struct Images {
    packed:  AllocatedImage,
    history: PingPong<AllocatedImage>,
    blur_v:  AllocatedImage,
    blur_h:  AllocatedImage,
}

impl Images {
    fn new(vk_ctx: VulkanContext, extent: vk::Extent2D) -> Result<Self, VkError> {
        Ok(Self {
            packed:  stage::storage_image(vk_ctx.clone(), PACKED_FORMAT, packed_extent(extent))?,
            history: stage::storage_pair(vk_ctx.clone(), HISTORY_FORMAT, extent)?,
            blur_v:  stage::storage_image(vk_ctx.clone(), AO_FORMAT, extent)?,
            blur_h:  stage::storage_image(vk_ctx, AO_FORMAT, extent)?,
        })
    }

    fn destroy(&self, device: &DeviceLoader) {
        destroy_all(device, [&self.packed, &self.blur_v, &self.blur_h].into_iter().chain(self.history.iter()));
    }
}

// Indices into the blur sets.
const VERTICAL: usize = 0;
const HORIZONTAL: usize = 2;
const COPY: usize = 3;

/// Ray-traced ambient occlusion: one bit-packed visibility ray per pixel,
/// temporal accumulation, a separable bilateral blur over the unstable tiles
/// and an upsample to the render extent.
pub struct AmbientOcclusion {
    extent: vk::Extent2D,
    images: Images,
    tiles:  TileLists,

    sampler:       vk::Sampler,
    raytrace_sets: DescriptorSets,
    temporal_sets: DescriptorSets,
    blur_sets:     DescriptorSets,
    raytrace:      ComputePipeline,
    temporal:      ComputePipeline,
    blur:          ComputePipeline,
    copy_tiles:    ComputePipeline,
    upsample:      Upsample,
}

impl AmbientOcclusion {
    fn temporal_schema() -> DescriptorSetSchema {
        // Packed visibility and previous history, then current history.
        DescriptorSetSchema::new()
            .sampled_images(2, vk::ShaderStageFlags::COMPUTE)
            .storage_images(1, vk::ShaderStageFlags::COMPUTE)
    }

    pub fn new(
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        layouts: SharedLayouts,
        settings: &AoSettings,
    ) -> Result<Self, VkError> {
        let extent = settings.scale.extent(render_extent);
        let images = Images::new(vk_ctx.clone(), extent)?;
        let sampler = SamplerCreateInfo::NEAREST_CLAMP.create(&vk_ctx.device)?;

        let raytrace_sets = DescriptorSets::new(
            &vk_ctx.device,
            DescriptorSetSchema::new().storage_images(1, vk::ShaderStageFlags::COMPUTE),
            1,
        )?;
        let temporal_sets = DescriptorSets::new(&vk_ctx.device, Self::temporal_schema(), 2)?;
        // Vertical per parity, horizontal, copy per parity.
        let blur_sets = DescriptorSets::new(&vk_ctx.device, stage::io_schema(), 5)?;

        let raytrace = ComputePipeline::with_push_constants::<RayTracePushConstants>(
            vk_ctx.clone(),
            RAYTRACE_SHADER,
            &layouts.with(raytrace_sets.layout),
        )?;
        let temporal = ComputePipeline::with_push_constants::<TemporalPushConstants>(
            vk_ctx.clone(),
            TEMPORAL_SHADER,
            &layouts.with(temporal_sets.layout),
        )?;
        let blur = ComputePipeline::with_push_constants::<BlurPushConstants>(
            vk_ctx.clone(),
            BLUR_SHADER,
            &layouts.with(blur_sets.layout),
        )?;
        let copy_tiles = ComputePipeline::with_push_constants::<CopyTilesPushConstants>(
            vk_ctx.clone(),
            COPY_TILES_SHADER,
            &layouts.with(blur_sets.layout),
        )?;
        let upsample = Upsample::new(vk_ctx.clone(), render_extent, AO_FORMAT, layouts, [&images.blur_h; 2])?;

        let this = Self {
            extent,
            images,
            tiles: TileLists::new(vk_ctx.clone(), extent)?,
            sampler,
            raytrace_sets,
            temporal_sets,
            blur_sets,
            raytrace,
            temporal,
            blur,
            copy_tiles,
            upsample,
        };
        this.write_descriptors(&vk_ctx.device);
        Ok(this)
    }

    fn write_descriptors(&self, device: &DeviceLoader) {
        let images = &self.images;
        let sampled = |image: &AllocatedImage| DescriptorResource::SampledImage { view: image.view, sampler: self.sampler };
        self.raytrace_sets.write(device, 0, &[DescriptorResource::StorageImage(images.packed.view)]);
        for parity in 0..2 {
            self.temporal_sets.write(device, parity, &[
                sampled(&images.packed),
                sampled(images.history.read(parity)),
                DescriptorResource::StorageImage(images.history.write(parity).view),
            ]);
            self.blur_sets.write(
                device,
                VERTICAL + parity,
                &stage::io_resources(images.history.write(parity), self.sampler, &images.blur_v),
            );
            self.blur_sets.write(
                device,
                COPY + parity,
                &stage::io_resources(images.history.write(parity), self.sampler, &images.blur_h),
            );
        }
        self.blur_sets.write(device, HORIZONTAL, &stage::io_resources(&images.blur_v, self.sampler, &images.blur_h));
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        recorder.track_ping_pong(&self.images.history);
        stage::track_scratch(recorder, [&self.images.packed, &self.images.blur_v, &self.images.blur_h]);
        self.upsample.track(recorder);
    }

    pub fn resize(&mut self, vk_ctx: VulkanContext, render_extent: vk::Extent2D, settings: &AoSettings) -> Result<(), VkError> {
        self.images.destroy(&vk_ctx.device);
        self.tiles.destroy();
        self.extent = settings.scale.extent(render_extent);
        self.images = Images::new(vk_ctx.clone(), self.extent)?;
        self.tiles = TileLists::new(vk_ctx.clone(), self.extent)?;
        self.write_descriptors(&vk_ctx.device);
        self.upsample.resize(vk_ctx, render_extent, [&self.images.blur_h; 2])
    }

    /// Occlusion at the render extent.
    pub fn output(&self) -> &AllocatedImage {
        self.upsample.output()
    }

    pub fn render(&self, ctx: &RenderContext, recorder: &mut BarrierRecorder, sets: &FrameSets, settings: &AoSettings) {
        let _marker = ctx.marker("Ambient Occlusion");
        let gbuffer_mip = settings.scale.gbuffer_mip();
        let parity = ctx.ping_pong;
        let images = &self.images;

        {
            let _marker = ctx.marker("Ray Trace");
            recorder.image(&images.packed, Access::STORAGE_WRITE).flush(ctx.device, ctx.command_buffer);
            self.raytrace.bind(ctx, &sets.with(self.raytrace_sets.set(0)));
            self.raytrace.push(ctx, &RayTracePushConstants {
                ray_length: settings.ray_length,
                bias: settings.bias,
                gbuffer_mip,
            });
            // One workgroup per packed texel.
            let packed = images.packed.extent_2d();
            self.raytrace.dispatch(ctx, packed.width, packed.height, 1);
        }

        {
            let _marker = ctx.marker("Temporal Accumulation");
            self.tiles.reset(ctx, recorder);
            self.tiles.begin_classify(recorder);
            recorder
                .image(&images.packed, Access::SHADER_READ)
                .image(images.history.read(parity), Access::SHADER_READ)
                .image(images.history.write(parity), Access::STORAGE_WRITE)
                .flush(ctx.device, ctx.command_buffer);
            self.temporal.bind(ctx, &sets.with(self.temporal_sets.set(parity)));
            self.temporal.push(ctx, &TemporalPushConstants {
                denoise_tile_data_addr: self.tiles.denoise.tiles_address(),
                denoise_tile_dispatch_args_addr: self.tiles.denoise.args_address(),
                copy_tile_data_addr: self.tiles.copy.tiles_address(),
                copy_tile_dispatch_args_addr: self.tiles.copy.args_address(),
                gbuffer_mip,
            });
            let (x, y) = dispatch_size(self.extent, TILE_SIZE, TILE_SIZE);
            self.temporal.dispatch(ctx, x, y, 1);
        }

        {
            let _marker = ctx.marker("Bilateral Blur");
            let z_buffer_params = z_buffer_params(settings.blur_near, settings.blur_far);
            let denoise_tile_data_addr = self.tiles.denoise.tiles_address();
            self.tiles.begin_consume(recorder);

            stage::read_write(ctx, recorder, images.history.write(parity), &images.blur_v);
            self.blur.bind(ctx, &sets.with(self.blur_sets.set(VERTICAL + parity)));
            self.blur.push(ctx, &BlurPushConstants { denoise_tile_data_addr, z_buffer_params, direction: [0, 1], gbuffer_mip });
            self.blur.dispatch_indirect(ctx, self.tiles.denoise.args.buffer);

            stage::read_write(ctx, recorder, &images.blur_v, &images.blur_h);
            self.blur.bind(ctx, &sets.with(self.blur_sets.set(HORIZONTAL)));
            self.blur.push(ctx, &BlurPushConstants { denoise_tile_data_addr, z_buffer_params, direction: [1, 0], gbuffer_mip });
            self.blur.dispatch_indirect(ctx, self.tiles.denoise.args.buffer);

            // Stable tiles skip the blur.
            self.copy_tiles.bind(ctx, &sets.with(self.blur_sets.set(COPY + parity)));
            self.copy_tiles.push(ctx, &CopyTilesPushConstants { copy_tile_data_addr: self.tiles.copy.tiles_address() });
            self.copy_tiles.dispatch_indirect(ctx, self.tiles.copy.args.buffer);
        }

        self.upsample.render(ctx, recorder, sets, &images.blur_h, gbuffer_mip);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.upsample.destroy(device);
        for pipeline in [&self.raytrace, &self.temporal, &self.blur, &self.copy_tiles] {
            pipeline.destroy(device);
        }
        for sets in [&self.raytrace_sets, &self.temporal_sets, &self.blur_sets] {
            sets.destroy(device);
        }
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        self.images.destroy(device);
        self.tiles.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linearise(params: [f32; 4], depth: f32) -> f32 {
        1.0 / (params[2] * depth + params[3])
    }

    #[test]
    fn reverse_z_linearises_to_view_distance() {
        let params = z_buffer_params(0.01, 1000.0);
        assert!((linearise(params, 1.0) - 0.01).abs() < 1e-6);
        assert!((linearise(params, 0.0) - 1000.0).abs() < 1e-1);
    }

    #[test]
    fn packed_image_holds_one_bit_per_pixel() {
        let extent = packed_extent(vk::Extent2D { width: 960, height: 540 });
        assert_eq!((extent.width, extent.height), (120, 135));
        let odd = packed_extent(vk::Extent2D { width: 9, height: 5 });
        assert_eq!((odd.width, odd.height), (2, 2));
    }

    #[test]
    fn push_constant_layouts() {
        assert_eq!(std::mem::size_of::<RayTracePushConstants>(), 12);
        assert_eq!(std::mem::size_of::<TemporalPushConstants>(), 40);
        let blur = BlurPushConstants::default();
        let base = &blur as *const _ as usize;
        assert_eq!(&blur.z_buffer_params as *const _ as usize - base, 8);
        assert_eq!(&blur.direction as *const _ as usize - base, 24);
        assert_eq!(&blur.gbuffer_mip as *const _ as usize - base, 32);
        assert_eq!(std::mem::size_of::<BlurPushConstants>(), 40);
    }
}
