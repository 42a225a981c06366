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
    settings::SvgfSettings,
    stage::{self, FrameSets, SharedLayouts},
    tiles::{TileLists, TILE_SIZE},
};

pub const REPROJECTION_SHADER: &str = "svgf_reprojection.comp.spv";
pub const COPY_TILES_SHADER: &str = "svgf_copy_tiles.comp.spv";
pub const ATROUS_SHADER: &str = "svgf_atrous.comp.spv";

/// Colour in `rgb`, variance in `a`.
pub const OUTPUT_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// First and second moments of luminance, then history length.
pub const MOMENTS_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ReprojectionPushConstants {
    pub denoise_tile_data_addr:          u64,
    pub denoise_tile_dispatch_args_addr: u64,
    pub copy_tile_data_addr:             u64,
    pub copy_tile_dispatch_args_addr:    u64,
    pub gbuffer_mip:                     u32,
    pub alpha:                           f32,
    pub moments_alpha:                   f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CopyTilesPushConstants {
    pub copy_tile_data_addr: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AtrousPushConstants {
    pub denoise_tile_data_addr: u64,
    pub phi_color:              f32,
    pub phi_normal:             f32,
    pub sigma_depth:            f32,
    pub step_size:              i32,
    pub gbuffer_mip:            u32,
}

/// Step size of à-trous iteration `i`: 1, 2, 4, ...
pub fn step_size(iteration: u32) -> i32 {
    1 << iteration
}

/// Filter image written by iteration `i`; iterations alternate between the two.
pub fn atrous_target(iteration: u32) -> usize {
    (iteration % 2) as usize
}

/// Filtered result of the frame recorded under `parity`.
fn filtered<T>(atrous: &[PingPong<T>; 2], iterations: u32, parity: usize) -> &T {
    atrous[atrous_target(iterations - 1)].write(parity)
}

/// Last frame's filtered result, copied into the tiles that skip filtering.
fn copy_source<T>(atrous: &[PingPong<T>; 2], iterations: u32, parity: usize) -> &T {
    atrous[atrous_target(iterations - 1)].read(parity)
}

/// Spatiotemporal variance-guided filter: temporal reprojection with tile
/// classification, then à-trous iterations over the tiles that need them.
pub struct Svgf {
    name:    &'static str,
    extent:  vk::Extent2D,
    output:  PingPong<AllocatedImage>,
    moments: PingPong<AllocatedImage>,
    atrous:  [PingPong<AllocatedImage>; 2],
    tiles:   TileLists,

    /// Fixed when the descriptor sets are allocated.
    iterations:        u32,
    sampler:           vk::Sampler,
    reprojection_sets: DescriptorSets,
    atrous_sets:       DescriptorSets,
    copy_sets:         DescriptorSets,
    reprojection:      ComputePipeline,
    copy_tiles:        ComputePipeline,
    atrous_filter:     ComputePipeline,
}

impl Svgf {
    fn reprojection_schema() -> DescriptorSetSchema {
        // Noisy input, previous output and moments, then current output and moments.
        DescriptorSetSchema::new()
            .sampled_images(3, vk::ShaderStageFlags::COMPUTE)
            .storage_images(2, vk::ShaderStageFlags::COMPUTE)
    }

    pub fn new(
        vk_ctx: VulkanContext,
        name: &'static str,
        extent: vk::Extent2D,
        layouts: SharedLayouts,
        input: &AllocatedImage,
        iterations: u32,
    ) -> Result<Self, VkError> {
        let sampler = SamplerCreateInfo::NEAREST_CLAMP.create(&vk_ctx.device)?;
        let reprojection_sets = DescriptorSets::new(&vk_ctx.device, Self::reprojection_schema(), 2)?;
        // One set per iteration and parity.
        let atrous_sets = DescriptorSets::new(&vk_ctx.device, stage::io_schema(), 2 * iterations.max(1))?;
        let copy_sets = DescriptorSets::new(&vk_ctx.device, stage::io_schema(), 2 * iterations.max(1))?;

        let reprojection = ComputePipeline::with_push_constants::<ReprojectionPushConstants>(
            vk_ctx.clone(),
            REPROJECTION_SHADER,
            &layouts.with(reprojection_sets.layout),
        )?;
        let copy_tiles = ComputePipeline::with_push_constants::<CopyTilesPushConstants>(
            vk_ctx.clone(),
            COPY_TILES_SHADER,
            &layouts.with(copy_sets.layout),
        )?;
        let atrous_filter = ComputePipeline::with_push_constants::<AtrousPushConstants>(
            vk_ctx.clone(),
            ATROUS_SHADER,
            &layouts.with(atrous_sets.layout),
        )?;

        let this = Self {
            name,
            extent,
            output: stage::storage_pair(vk_ctx.clone(), OUTPUT_FORMAT, extent)?,
            moments: stage::storage_pair(vk_ctx.clone(), MOMENTS_FORMAT, extent)?,
            atrous: [
                stage::storage_pair(vk_ctx.clone(), OUTPUT_FORMAT, extent)?,
                stage::storage_pair(vk_ctx.clone(), OUTPUT_FORMAT, extent)?,
            ],
            tiles: TileLists::new(vk_ctx.clone(), extent)?,
            iterations: iterations.max(1),
            sampler,
            reprojection_sets,
            atrous_sets,
            copy_sets,
            reprojection,
            copy_tiles,
            atrous_filter,
        };
        this.write_descriptors(&vk_ctx.device, input);
        Ok(this)
    }

    fn iteration_input(&self, iteration: u32, parity: usize) -> &AllocatedImage {
        if iteration == 0 {
            self.output.write(parity)
        } else {
            self.atrous[atrous_target(iteration - 1)].write(parity)
        }
    }

    fn iteration_output(&self, iteration: u32, parity: usize) -> &AllocatedImage {
        self.atrous[atrous_target(iteration)].write(parity)
    }

    fn write_descriptors(&self, device: &DeviceLoader, input: &AllocatedImage) {
        let sampled = |image: &AllocatedImage| DescriptorResource::SampledImage { view: image.view, sampler: self.sampler };
        for parity in 0..2 {
            self.reprojection_sets.write(device, parity, &[
                sampled(input),
                sampled(self.output.read(parity)),
                sampled(self.moments.read(parity)),
                DescriptorResource::StorageImage(self.output.write(parity).view),
                DescriptorResource::StorageImage(self.moments.write(parity).view),
            ]);
            let history = copy_source(&self.atrous, self.iterations, parity);
            for iteration in 0..self.iterations {
                let target = self.iteration_output(iteration, parity);
                let index = iteration as usize * 2 + parity;
                self.atrous_sets.write(
                    device,
                    index,
                    &stage::io_resources(self.iteration_input(iteration, parity), self.sampler, target),
                );
                self.copy_sets.write(device, index, &stage::io_resources(history, self.sampler, target));
            }
        }
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        recorder.track_ping_pong(&self.output);
        recorder.track_ping_pong(&self.moments);
        for atrous in &self.atrous {
            recorder.track_ping_pong(atrous);
        }
    }

    pub fn resize(&mut self, vk_ctx: VulkanContext, extent: vk::Extent2D, input: &AllocatedImage) -> Result<(), VkError> {
        self.destroy_images(&vk_ctx.device);
        self.output = stage::storage_pair(vk_ctx.clone(), OUTPUT_FORMAT, extent)?;
        self.moments = stage::storage_pair(vk_ctx.clone(), MOMENTS_FORMAT, extent)?;
        self.atrous = [
            stage::storage_pair(vk_ctx.clone(), OUTPUT_FORMAT, extent)?,
            stage::storage_pair(vk_ctx.clone(), OUTPUT_FORMAT, extent)?,
        ];
        self.tiles = TileLists::new(vk_ctx.clone(), extent)?;
        self.extent = extent;
        self.write_descriptors(&vk_ctx.device, input);
        Ok(())
    }

    /// Filtered result of the frame recorded under `parity`.
    pub fn output(&self, parity: usize) -> &AllocatedImage {
        filtered(&self.atrous, self.iterations, parity)
    }

    pub fn outputs(&self) -> [&AllocatedImage; 2] {
        [self.output(0), self.output(1)]
    }

    pub fn render(
        &self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        sets: &FrameSets,
        input: &AllocatedImage,
        settings: &SvgfSettings,
        gbuffer_mip: u32,
    ) {
        let _marker = ctx.marker(self.name);
        self.reproject(ctx, recorder, sets, input, settings, gbuffer_mip);

        for iteration in 0..self.iterations {
            self.filter_iteration(ctx, recorder, sets, iteration, settings, gbuffer_mip);
        }
    }

    fn reproject(
        &self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        sets: &FrameSets,
        input: &AllocatedImage,
        settings: &SvgfSettings,
        gbuffer_mip: u32,
    ) {
        let _marker = ctx.marker("Reprojection");
        self.tiles.reset(ctx, recorder);
        self.tiles.begin_classify(recorder);
        recorder
            .image(input, Access::SHADER_READ)
            .image(self.output.read(ctx.ping_pong), Access::SHADER_READ)
            .image(self.moments.read(ctx.ping_pong), Access::SHADER_READ)
            .image(self.output.write(ctx.ping_pong), Access::STORAGE_WRITE)
            .image(self.moments.write(ctx.ping_pong), Access::STORAGE_WRITE)
            .flush(ctx.device, ctx.command_buffer);

        self.reprojection.bind(ctx, &sets.with(self.reprojection_sets.set(ctx.ping_pong)));
        self.reprojection.push(ctx, &ReprojectionPushConstants {
            denoise_tile_data_addr: self.tiles.denoise.tiles_address(),
            denoise_tile_dispatch_args_addr: self.tiles.denoise.args_address(),
            copy_tile_data_addr: self.tiles.copy.tiles_address(),
            copy_tile_dispatch_args_addr: self.tiles.copy.args_address(),
            gbuffer_mip,
            alpha: settings.alpha,
            moments_alpha: settings.moments_alpha,
        });
        let (x, y) = dispatch_size(self.extent, TILE_SIZE, TILE_SIZE);
        self.reprojection.dispatch(ctx, x, y, 1);
    }

    fn filter_iteration(
        &self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        sets: &FrameSets,
        iteration: u32,
        settings: &SvgfSettings,
        gbuffer_mip: u32,
    ) {
        let _marker = ctx.marker("A-Trous");
        self.tiles.begin_consume(recorder);
        let target = self.iteration_output(iteration, ctx.ping_pong);
        stage::read_write(ctx, recorder, copy_source(&self.atrous, self.iterations, ctx.ping_pong), target);
        let index = iteration as usize * 2 + ctx.ping_pong;

        self.copy_tiles.bind(ctx, &sets.with(self.copy_sets.set(index)));
        self.copy_tiles.push(ctx, &CopyTilesPushConstants { copy_tile_data_addr: self.tiles.copy.tiles_address() });
        self.copy_tiles.dispatch_indirect(ctx, self.tiles.copy.args.buffer);

        // The copy and the filter touch disjoint tiles of the same target.
        stage::read_write(ctx, recorder, self.iteration_input(iteration, ctx.ping_pong), target);
        self.atrous_filter.bind(ctx, &sets.with(self.atrous_sets.set(index)));
        self.atrous_filter.push(ctx, &AtrousPushConstants {
            denoise_tile_data_addr: self.tiles.denoise.tiles_address(),
            phi_color: settings.phi_color,
            phi_normal: settings.phi_normal,
            sigma_depth: settings.sigma_depth,
            step_size: step_size(iteration),
            gbuffer_mip,
        });
        self.atrous_filter.dispatch_indirect(ctx, self.tiles.denoise.args.buffer);
    }

    fn destroy_images(&self, device: &DeviceLoader) {
        destroy_all(
            device,
            self.output.iter().chain(self.moments.iter()).chain(self.atrous.iter().flat_map(|pair| pair.iter())),
        );
        self.tiles.destroy();
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.reprojection.destroy(device);
        self.copy_tiles.destroy(device);
        self.atrous_filter.destroy(device);
        self.reprojection_sets.destroy(device);
        self.atrous_sets.destroy(device);
        self.copy_sets.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        self.destroy_images(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_of<T, F>(base: &T, field: &F) -> usize {
        field as *const F as usize - base as *const T as usize
    }

    #[test]
    fn reprojection_push_constants_keep_declaration_order() {
        let constants = ReprojectionPushConstants::default();
        assert_eq!(offset_of(&constants, &constants.denoise_tile_data_addr), 0);
        assert_eq!(offset_of(&constants, &constants.copy_tile_dispatch_args_addr), 24);
        assert_eq!(offset_of(&constants, &constants.gbuffer_mip), 32);
        assert_eq!(offset_of(&constants, &constants.moments_alpha), 40);
        assert_eq!(std::mem::size_of::<ReprojectionPushConstants>(), 48);
    }

    #[test]
    fn atrous_push_constants_layout() {
        let constants = AtrousPushConstants::default();
        assert_eq!(offset_of(&constants, &constants.phi_color), 8);
        assert_eq!(offset_of(&constants, &constants.step_size), 20);
        assert_eq!(offset_of(&constants, &constants.gbuffer_mip), 24);
        assert_eq!(std::mem::size_of::<AtrousPushConstants>(), 32);
        assert_eq!(std::mem::size_of::<CopyTilesPushConstants>(), 8);
    }

    #[test]
    fn copy_tiles_read_last_frames_filtered_output() {
        let atrous = [PingPong::new("a0", "a1"), PingPong::new("b0", "b1")];
        for iterations in 1..4 {
            for parity in 0..2 {
                let history = copy_source(&atrous, iterations, parity);
                assert_eq!(history, filtered(&atrous, iterations, parity ^ 1));
                for iteration in 0..iterations {
                    assert_ne!(history, atrous[atrous_target(iteration)].write(parity));
                }
            }
        }
    }

    #[test]
    fn steps_grow_geometrically_and_targets_alternate() {
        assert_eq!((0..3).map(step_size).collect::<Vec<_>>(), vec![1, 2, 4]);
        assert_eq!((0..3).map(atrous_target).collect::<Vec<_>>(), vec![0, 1, 0]);
    }
}
