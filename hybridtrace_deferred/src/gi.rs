#![allow(clippy::no_effect)]

use erupt::{vk, DeviceLoader};
use hybridtrace_scene::Aabb;
use hybridtrace_vk::{
    command::dispatch_size,
    descriptor::SamplerCreateInfo,
    image::destroy_all,
    std140::{boolean, ToStd140},
    Access,
    AllocatedBuffer,
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
use nalgebra_glm as glm;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std140::*;
use vk_mem_erupt as vma;

use crate::{
    settings::GiSettings,
    stage::{self, FrameSets, SharedLayouts},
    upsample::Upsample,
};

pub const RAYTRACE_SHADER: &str = "ddgi_raytrace.comp.spv";
pub const IRRADIANCE_UPDATE_SHADER: &str = "ddgi_probe_update_irradiance.comp.spv";
pub const DEPTH_UPDATE_SHADER: &str = "ddgi_probe_update_depth.comp.spv";
pub const IRRADIANCE_BORDER_SHADER: &str = "ddgi_border_update_irradiance.comp.spv";
pub const DEPTH_BORDER_SHADER: &str = "ddgi_border_update_depth.comp.spv";
pub const SAMPLE_SHADER: &str = "ddgi_sample_probe_grid.comp.spv";

/// Interior side of a probe's octahedral tile, without the border.
pub const IRRADIANCE_OCT_SIZE: u32 = 8;
pub const DEPTH_OCT_SIZE: u32 = 16;

pub const RADIANCE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const DIRECTION_DEPTH_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const IRRADIANCE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Mean distance and mean squared distance.
pub const DEPTH_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;
pub const OUTPUT_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

const ROTATION_SEED: u64 = 0x0dd9_1ddd;
const TILE: u32 = 8;

/// Probe lattice covering the scene bounds with one extra probe on every side.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProbeGrid {
    pub origin:  glm::Vec3,
    pub counts:  glm::UVec3,
    pub spacing: f32,
}

/// Keeps the widest atlas (`18 · nx · ny + 2` texels for depth) under 16384.
pub const MAX_PROBES_PER_AXIS: u32 = 30;
const MIN_SPACING: f32 = 1e-3;

impl ProbeGrid {
    /// Spacing grows when the requested one would need more than
    /// [`MAX_PROBES_PER_AXIS`] probes along an axis.
    pub fn from_bounds(bounds: &Aabb, spacing: f32) -> Self {
        let extent = bounds.extent();
        let max_cells = (MAX_PROBES_PER_AXIS - 2) as f32;
        let widest = extent.max();
        let spacing = if spacing.is_finite() { spacing.max(MIN_SPACING) } else { MIN_SPACING };
        let spacing = if widest.is_finite() { spacing.max(widest / max_cells) } else { spacing };
        let counts = glm::UVec3::from_fn(|axis, _| (extent[axis] / spacing).ceil().max(0.0).min(max_cells) as u32 + 2);
        let center = if bounds.is_empty() { glm::Vec3::zeros() } else { (bounds.min + bounds.max) * 0.5 };
        let span = glm::vec3(counts.x as f32 - 1.0, counts.y as f32 - 1.0, counts.z as f32 - 1.0) * spacing;
        Self { origin: center - span * 0.5, counts, spacing }
    }

    pub fn probe_count(&self) -> u32 {
        self.counts.x * self.counts.y * self.counts.z
    }

    /// Probe `(x, y, z)` in world space.
    pub fn probe_position(&self, probe: glm::UVec3) -> glm::Vec3 {
        self.origin + glm::vec3(probe.x as f32, probe.y as f32, probe.z as f32) * self.spacing
    }

    /// Rays longer than this never reach a probe's neighbourhood.
    pub fn max_distance(&self) -> f32 {
        glm::length(&glm::vec3(self.spacing, self.spacing, self.spacing)) * 1.5
    }
}

/// Atlas size for tiles of `side` interior texels: probes laid out `x·y`
/// across and `z` down, each tile with a one-texel border, plus a border
/// around the whole atlas.
pub fn atlas_extent(side: u32, counts: glm::UVec3) -> vk::Extent2D {
    vk::Extent2D { width: (side + 2) * counts.x * counts.y + 2, height: (side + 2) * counts.z + 2 }
}

/// Copies `[dst_x, dst_y, src_x, src_y]` within a `(side + 2)²` tile that
/// wrap the octahedral map around its edges.
pub fn border_texels(side: u32) -> Vec<[u32; 4]> {
    let k = side;
    let mut texels = Vec::with_capacity(4 * k as usize + 4);
    for i in 1..=k {
        let mirrored = k + 1 - i;
        texels.push([i, 0, mirrored, 1]);
        texels.push([i, k + 1, mirrored, k]);
        texels.push([0, i, 1, mirrored]);
        texels.push([k + 1, i, k, mirrored]);
    }
    texels.push([0, 0, k, k]);
    texels.push([k + 1, 0, 1, k]);
    texels.push([0, k + 1, k, 1]);
    texels.push([k + 1, k + 1, 1, 1]);
    texels
}

/// Per-frame rotation applied to the probe ray directions.
pub fn random_orientation(rng: &mut impl Rng) -> glm::Mat4 {
    let axis = glm::vec3(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
    let axis = if glm::length(&axis) < 1e-4 { glm::Vec3::y() } else { glm::normalize(&axis) };
    glm::rotation(rng.gen_range(0.0..std::f32::consts::TAU), &axis)
}

#[repr_std140]
#[derive(Copy, Clone, Debug)]
pub struct DdgiUniforms {
    pub grid_start_position:       vec3,
    pub grid_step:                 vec3,
    pub probe_counts:              ivec3,
    pub max_distance:              float,
    pub depth_sharpness:           float,
    pub hysteresis:                float,
    pub normal_bias:               float,
    pub energy_preservation:       float,
    pub irradiance_probe_side:     int,
    pub irradiance_texture_width:  int,
    pub irradiance_texture_height: int,
    pub depth_probe_side:          int,
    pub depth_texture_width:       int,
    pub depth_texture_height:      int,
    pub rays_per_probe:            int,
    pub visibility_test:           boolean,
}

impl DdgiUniforms {
    pub fn new(grid: &ProbeGrid, settings: &GiSettings) -> Self {
        let irradiance = atlas_extent(IRRADIANCE_OCT_SIZE, grid.counts);
        let depth = atlas_extent(DEPTH_OCT_SIZE, grid.counts);
        let counts = glm::IVec3::new(grid.counts.x as i32, grid.counts.y as i32, grid.counts.z as i32);
        Self {
            grid_start_position:       grid.origin.to_std140(),
            grid_step:                 glm::vec3(grid.spacing, grid.spacing, grid.spacing).to_std140(),
            probe_counts:              counts.to_std140(),
            max_distance:              float(grid.max_distance()),
            depth_sharpness:           float(settings.depth_sharpness),
            hysteresis:                float(settings.hysteresis),
            normal_bias:               float(settings.normal_bias),
            energy_preservation:       float(settings.energy_preservation),
            irradiance_probe_side:     int(IRRADIANCE_OCT_SIZE as i32),
            irradiance_texture_width:  int(irradiance.width as i32),
            irradiance_texture_height: int(irradiance.height as i32),
            depth_probe_side:          int(DEPTH_OCT_SIZE as i32),
            depth_texture_width:       int(depth.width as i32),
            depth_texture_height:      int(depth.height as i32),
            rays_per_probe:            int(settings.rays_per_probe as i32),
            visibility_test:           boolean(settings.visibility_test),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RayTracePushConstants {
    pub random_orientation:        [f32; 16],
    pub num_frames:                u32,
    pub infinite_bounces:          u32,
    pub infinite_bounce_intensity: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ProbeUpdatePushConstants {
    /// Zero on the first frame of a grid, which overwrites the history.
    pub num_frames: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BorderPushConstants {
    pub border_texels_addr: u64,
    pub border_texel_count: u32,
    pub probe_side:         u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SamplePushConstants {
    pub gbuffer_mip: u32,
}

struct ProbeVolume {
    grid:            ProbeGrid,
    radiance:        AllocatedImage,
    direction_depth: AllocatedImage,
    irradiance:      PingPong<AllocatedImage>,
    depth:           PingPong<AllocatedImage>,
    uniforms:        AllocatedBuffer<DdgiUniforms>,
}

impl ProbeVolume {
    fn new(vk_ctx: VulkanContext, grid: ProbeGrid, settings: &GiSettings) -> Result<Self, VkError> {
        // One row of ray results per probe.
        let rays = vk::Extent2D { width: settings.rays_per_probe, height: grid.probe_count() };
        Ok(Self {
            grid,
            radiance: stage::storage_image(vk_ctx.clone(), RADIANCE_FORMAT, rays)?,
            direction_depth: stage::storage_image(vk_ctx.clone(), DIRECTION_DEPTH_FORMAT, rays)?,
            irradiance: stage::storage_pair(
                vk_ctx.clone(),
                IRRADIANCE_FORMAT,
                atlas_extent(IRRADIANCE_OCT_SIZE, grid.counts),
            )?,
            depth: stage::storage_pair(vk_ctx.clone(), DEPTH_FORMAT, atlas_extent(DEPTH_OCT_SIZE, grid.counts))?,
            uniforms: AllocatedBuffer::uniform(vk_ctx, DdgiUniforms::new(&grid, settings))?,
        })
    }

    fn destroy(&self, device: &DeviceLoader) {
        destroy_all(
            device,
            [&self.radiance, &self.direction_depth].into_iter().chain(self.irradiance.iter()).chain(self.depth.iter()),
        );
        self.uniforms.destroy();
    }
}

struct BorderTable {
    texels: AllocatedBuffer<[u32; 4]>,
    side:   u32,
}

impl BorderTable {
    fn new(vk_ctx: VulkanContext, side: u32) -> Result<Self, VkError> {
        let buffer_info = vk::BufferCreateInfoBuilder::new()
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let texels = AllocatedBuffer::with_data(vk_ctx, &buffer_info, vma::MemoryUsage::CpuToGpu, &border_texels(side))?;
        Ok(Self { texels, side })
    }

    fn push_constants(&self) -> BorderPushConstants {
        BorderPushConstants {
            border_texels_addr: self.texels.device_address.unwrap_or_default(),
            border_texel_count: self.texels.len() as u32,
            probe_side:         self.side,
        }
    }
}

/// DDGI: a grid of irradiance probes refreshed a few hundred rays at a time
/// and sampled per pixel with Chebyshev visibility.
pub struct GlobalIllumination {
    extent:               vk::Extent2D,
    volume:               ProbeVolume,
    rays_per_probe:       u32,
    sampled:              AllocatedImage,
    irradiance_border:    BorderTable,
    depth_border:         BorderTable,
    frames_since_rebuild: u32,
    rng:                  StdRng,

    sampler:           vk::Sampler,
    descriptor_sets:   DescriptorSets,
    raytrace:          ComputePipeline,
    irradiance_update: ComputePipeline,
    depth_update:      ComputePipeline,
    irradiance_blit:   ComputePipeline,
    depth_blit:        ComputePipeline,
    sample:            ComputePipeline,
    upsample:          Upsample,
}

impl GlobalIllumination {
    fn schema() -> DescriptorSetSchema {
        let stages = vk::ShaderStageFlags::COMPUTE;
        DescriptorSetSchema::new()
            .binding(vk::DescriptorType::UNIFORM_BUFFER, stages)
            // Radiance, direction and distance per ray.
            .storage_images(2, stages)
            // Previous irradiance and depth atlases.
            .sampled_images(2, stages)
            // Current atlases, written by the update and border passes.
            .storage_images(2, stages)
            // Current atlases, read by the sampling pass.
            .sampled_images(2, stages)
            .storage_images(1, stages)
    }

    pub fn new(
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        layouts: SharedLayouts,
        bounds: &Aabb,
        settings: &GiSettings,
    ) -> Result<Self, VkError> {
        let extent = settings.scale.extent(render_extent);
        let grid = ProbeGrid::from_bounds(bounds, settings.probe_distance);
        let volume = ProbeVolume::new(vk_ctx.clone(), grid, settings)?;
        let sampled = stage::storage_image(vk_ctx.clone(), OUTPUT_FORMAT, extent)?;
        log_grid(&grid, settings);

        let sampler = SamplerCreateInfo::LINEAR_CLAMP.create(&vk_ctx.device)?;
        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, Self::schema(), 2)?;
        let set_layouts = layouts.with(descriptor_sets.layout);

        let raytrace =
            ComputePipeline::with_push_constants::<RayTracePushConstants>(vk_ctx.clone(), RAYTRACE_SHADER, &set_layouts)?;
        let irradiance_update = ComputePipeline::with_push_constants::<ProbeUpdatePushConstants>(
            vk_ctx.clone(),
            IRRADIANCE_UPDATE_SHADER,
            &set_layouts,
        )?;
        let depth_update = ComputePipeline::with_push_constants::<ProbeUpdatePushConstants>(
            vk_ctx.clone(),
            DEPTH_UPDATE_SHADER,
            &set_layouts,
        )?;
        let irradiance_blit = ComputePipeline::with_push_constants::<BorderPushConstants>(
            vk_ctx.clone(),
            IRRADIANCE_BORDER_SHADER,
            &set_layouts,
        )?;
        let depth_blit =
            ComputePipeline::with_push_constants::<BorderPushConstants>(vk_ctx.clone(), DEPTH_BORDER_SHADER, &set_layouts)?;
        let sample =
            ComputePipeline::with_push_constants::<SamplePushConstants>(vk_ctx.clone(), SAMPLE_SHADER, &set_layouts)?;
        let upsample = Upsample::new(vk_ctx.clone(), render_extent, OUTPUT_FORMAT, layouts, [&sampled; 2])?;

        let this = Self {
            extent,
            volume,
            rays_per_probe: settings.rays_per_probe,
            sampled,
            irradiance_border: BorderTable::new(vk_ctx.clone(), IRRADIANCE_OCT_SIZE)?,
            depth_border: BorderTable::new(vk_ctx.clone(), DEPTH_OCT_SIZE)?,
            frames_since_rebuild: 0,
            rng: StdRng::seed_from_u64(ROTATION_SEED),
            sampler,
            descriptor_sets,
            raytrace,
            irradiance_update,
            depth_update,
            irradiance_blit,
            depth_blit,
            sample,
            upsample,
        };
        this.write_descriptors(&vk_ctx.device);
        Ok(this)
    }

    fn write_descriptors(&self, device: &DeviceLoader) {
        let volume = &self.volume;
        let sampled = |image: &AllocatedImage| DescriptorResource::SampledImage { view: image.view, sampler: self.sampler };
        for parity in 0..2 {
            self.descriptor_sets.write(device, parity, &[
                DescriptorResource::UniformBuffer(volume.uniforms.buffer),
                DescriptorResource::StorageImage(volume.radiance.view),
                DescriptorResource::StorageImage(volume.direction_depth.view),
                sampled(volume.irradiance.read(parity)),
                sampled(volume.depth.read(parity)),
                DescriptorResource::StorageImage(volume.irradiance.write(parity).view),
                DescriptorResource::StorageImage(volume.depth.write(parity).view),
                sampled(volume.irradiance.write(parity)),
                sampled(volume.depth.write(parity)),
                DescriptorResource::StorageImage(self.sampled.view),
            ]);
        }
    }

    pub fn grid(&self) -> &ProbeGrid {
        &self.volume.grid
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        recorder.track_ping_pong(&self.volume.irradiance);
        recorder.track_ping_pong(&self.volume.depth);
        stage::track_scratch(recorder, [&self.volume.radiance, &self.volume.direction_depth, &self.sampled]);
        self.upsample.track(recorder);
    }

    /// True when the scene bounds or ray budget no longer match the
    /// allocated probe volume.
    pub fn needs_rebuild(&self, bounds: &Aabb, settings: &GiSettings) -> bool {
        self.volume.grid != ProbeGrid::from_bounds(bounds, settings.probe_distance)
            || self.rays_per_probe != settings.rays_per_probe
    }

    /// Reallocates the probe volume for `bounds`. The device must be idle
    /// and every image re-tracked afterwards; probe history restarts from zero.
    pub fn rebuild(&mut self, vk_ctx: VulkanContext, bounds: &Aabb, settings: &GiSettings) -> Result<(), VkError> {
        self.volume.destroy(&vk_ctx.device);
        let grid = ProbeGrid::from_bounds(bounds, settings.probe_distance);
        self.volume = ProbeVolume::new(vk_ctx.clone(), grid, settings)?;
        self.rays_per_probe = settings.rays_per_probe;
        self.frames_since_rebuild = 0;
        self.write_descriptors(&vk_ctx.device);
        log_grid(&grid, settings);
        Ok(())
    }

    pub fn resize(&mut self, vk_ctx: VulkanContext, render_extent: vk::Extent2D, settings: &GiSettings) -> Result<(), VkError> {
        self.sampled.destroy(&vk_ctx.device);
        self.extent = settings.scale.extent(render_extent);
        self.sampled = stage::storage_image(vk_ctx.clone(), OUTPUT_FORMAT, self.extent)?;
        self.write_descriptors(&vk_ctx.device);
        self.upsample.resize(vk_ctx, render_extent, [&self.sampled; 2])
    }

    /// Indirect diffuse irradiance at the render extent.
    pub fn output(&self) -> &AllocatedImage {
        self.upsample.output()
    }

    pub fn render(&mut self, ctx: &RenderContext, recorder: &mut BarrierRecorder, sets: &FrameSets, settings: &GiSettings) {
        let _marker = ctx.marker("Global Illumination");
        let parity = ctx.ping_pong;
        let own = sets.with(self.descriptor_sets.set(parity));
        let volume = &self.volume;
        let grid = volume.grid;

        {
            let _marker = ctx.marker("Probe Ray Trace");
            recorder
                .image(volume.irradiance.read(parity), Access::SHADER_READ)
                .image(&volume.radiance, Access::STORAGE_WRITE)
                .image(&volume.direction_depth, Access::STORAGE_WRITE)
                .flush(ctx.device, ctx.command_buffer);

            let mut random_orientation = [0.0; 16];
            random_orientation.copy_from_slice(self::random_orientation(&mut self.rng).as_slice());
            self.raytrace.bind(ctx, &own);
            self.raytrace.push(ctx, &RayTracePushConstants {
                random_orientation,
                num_frames: self.frames_since_rebuild,
                infinite_bounces: settings.infinite_bounces as u32,
                infinite_bounce_intensity: settings.infinite_bounce_intensity,
            });
            let rays = volume.radiance.extent_2d();
            let (x, y) = dispatch_size(rays, TILE, TILE);
            self.raytrace.dispatch(ctx, x, y, 1);
        }

        {
            let _marker = ctx.marker("Probe Update");
            recorder
                .image(&volume.radiance, Access::STORAGE_READ)
                .image(&volume.direction_depth, Access::STORAGE_READ)
                .image(volume.depth.read(parity), Access::SHADER_READ)
                .image(volume.irradiance.write(parity), Access::STORAGE_WRITE)
                .image(volume.depth.write(parity), Access::STORAGE_WRITE)
                .flush(ctx.device, ctx.command_buffer);

            // One workgroup per probe tile.
            let push = ProbeUpdatePushConstants { num_frames: self.frames_since_rebuild };
            for pipeline in [&self.irradiance_update, &self.depth_update] {
                pipeline.bind(ctx, &own);
                pipeline.push(ctx, &push);
                pipeline.dispatch(ctx, grid.counts.x * grid.counts.y, grid.counts.z, 1);
            }
        }

        {
            let _marker = ctx.marker("Border Update");
            recorder
                .image(volume.irradiance.write(parity), Access::STORAGE_READ_WRITE)
                .image(volume.depth.write(parity), Access::STORAGE_READ_WRITE)
                .flush(ctx.device, ctx.command_buffer);
            for (pipeline, border) in [(&self.irradiance_blit, &self.irradiance_border), (&self.depth_blit, &self.depth_border)] {
                pipeline.bind(ctx, &own);
                pipeline.push(ctx, &border.push_constants());
                pipeline.dispatch(ctx, grid.counts.x * grid.counts.y, grid.counts.z, 1);
            }
        }

        {
            let _marker = ctx.marker("Probe Sample");
            recorder
                .image(volume.irradiance.write(parity), Access::SHADER_READ)
                .image(volume.depth.write(parity), Access::SHADER_READ)
                .image(&self.sampled, Access::STORAGE_WRITE)
                .flush(ctx.device, ctx.command_buffer);
            self.sample.bind(ctx, &own);
            self.sample.push(ctx, &SamplePushConstants { gbuffer_mip: settings.scale.gbuffer_mip() });
            let (x, y) = dispatch_size(self.extent, TILE, TILE);
            self.sample.dispatch(ctx, x, y, 1);
        }

        self.upsample.render(ctx, recorder, sets, &self.sampled, settings.scale.gbuffer_mip());
        self.frames_since_rebuild = self.frames_since_rebuild.saturating_add(1);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.upsample.destroy(device);
        for pipeline in [
            &self.raytrace,
            &self.irradiance_update,
            &self.depth_update,
            &self.irradiance_blit,
            &self.depth_blit,
            &self.sample,
        ] {
            pipeline.destroy(device);
        }
        self.descriptor_sets.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        self.irradiance_border.texels.destroy();
        self.depth_border.texels.destroy();
        self.sampled.destroy(device);
        self.volume.destroy(device);
    }
}

fn log_grid(grid: &ProbeGrid, settings: &GiSettings) {
    log::info!(
        "Probe grid {}×{}×{} ({} probes, spacing {}, {} rays each)",
        grid.counts.x,
        grid.counts.y,
        grid.counts.z,
        grid.probe_count(),
        grid.spacing,
        settings.rays_per_probe
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(min: [f32; 3], max: [f32; 3]) -> Aabb {
        Aabb { min: glm::vec3(min[0], min[1], min[2]), max: glm::vec3(max[0], max[1], max[2]) }
    }

    #[test]
    fn grid_pads_the_bounds_by_one_probe() {
        let grid = ProbeGrid::from_bounds(&bounds([0.0, 0.0, 0.0], [10.0, 5.0, 2.0]), 1.0);
        assert_eq!(grid.counts, glm::UVec3::new(12, 7, 4));
        assert_eq!(grid.probe_count(), 12 * 7 * 4);
        assert!(glm::distance(&grid.origin, &glm::vec3(-0.5, -0.5, -0.5)) < 1e-5);

        let last = grid.probe_position(grid.counts - glm::UVec3::new(1, 1, 1));
        assert!(glm::distance(&last, &glm::vec3(10.5, 5.5, 2.5)) < 1e-5);
    }

    #[test]
    fn empty_scene_still_gets_a_grid() {
        let grid = ProbeGrid::from_bounds(&Aabb::empty(), 1.0);
        assert_eq!(grid.counts, glm::UVec3::new(2, 2, 2));
        assert!(glm::distance(&grid.origin, &glm::vec3(-0.5, -0.5, -0.5)) < 1e-5);
    }

    #[test]
    fn degenerate_spacing_stays_bounded() {
        let scene = bounds([-500.0, 0.0, 0.0], [500.0, 1.0, 1.0]);
        for spacing in [0.0, -1.0, 1e-9, f32::NAN, f32::INFINITY] {
            let grid = ProbeGrid::from_bounds(&scene, spacing);
            assert!(grid.counts.iter().all(|&count| (2..=MAX_PROBES_PER_AXIS).contains(&count)));
            assert!(grid.spacing.is_finite() && grid.spacing > 0.0);
        }

        let grid = ProbeGrid::from_bounds(&scene, 0.01);
        assert_eq!(grid.counts.x, MAX_PROBES_PER_AXIS);
        let far_corner = grid.probe_position(grid.counts - glm::UVec3::repeat(1));
        assert!(grid.origin.x <= -500.0 && far_corner.x >= 500.0);
        assert!(atlas_extent(DEPTH_OCT_SIZE, glm::UVec3::new(30, 30, 30)).width < 16384);
    }

    #[test]
    fn rebuild_follows_the_bounds() {
        let a = ProbeGrid::from_bounds(&bounds([0.0, 0.0, 0.0], [4.0, 4.0, 4.0]), 1.0);
        let b = ProbeGrid::from_bounds(&bounds([0.0, 0.0, 0.0], [4.0, 4.0, 4.0]), 1.0);
        let c = ProbeGrid::from_bounds(&bounds([0.0, 0.0, 0.0], [8.0, 4.0, 4.0]), 1.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn atlas_holds_every_bordered_tile() {
        let counts = glm::UVec3::new(12, 7, 4);
        let irradiance = atlas_extent(IRRADIANCE_OCT_SIZE, counts);
        assert_eq!((irradiance.width, irradiance.height), (10 * 84 + 2, 10 * 4 + 2));
        let depth = atlas_extent(DEPTH_OCT_SIZE, counts);
        assert_eq!((depth.width, depth.height), (18 * 84 + 2, 18 * 4 + 2));
    }

    #[test]
    fn border_table_wraps_the_octahedron() {
        for side in [IRRADIANCE_OCT_SIZE, DEPTH_OCT_SIZE] {
            let k = side;
            let texels = border_texels(side);
            assert_eq!(texels.len(), 4 * k as usize + 4);

            let source = |x: u32, y: u32| texels.iter().find(|t| t[0] == x && t[1] == y).map(|t| (t[2], t[3]));
            for i in 1..=k {
                assert_eq!(source(i, 0), Some((k + 1 - i, 1)));
                assert_eq!(source(i, k + 1), Some((k + 1 - i, k)));
                assert_eq!(source(0, i), Some((1, k + 1 - i)));
                assert_eq!(source(k + 1, i), Some((k, k + 1 - i)));
            }
            assert_eq!(source(0, 0), Some((k, k)));
            assert_eq!(source(k + 1, 0), Some((1, k)));
            assert_eq!(source(0, k + 1), Some((k, 1)));
            assert_eq!(source(k + 1, k + 1), Some((1, 1)));

            // Every source lies inside the tile interior.
            assert!(texels.iter().all(|t| (1..=k).contains(&t[2]) && (1..=k).contains(&t[3])));
        }
    }

    #[test]
    fn orientations_are_rotations_and_reproducible() {
        let mut a = StdRng::seed_from_u64(ROTATION_SEED);
        let mut b = StdRng::seed_from_u64(ROTATION_SEED);
        for _ in 0..16 {
            let m = random_orientation(&mut a);
            assert_eq!(m, random_orientation(&mut b));
            let r = glm::mat4_to_mat3(&m);
            let identity = r * r.transpose();
            assert!((identity - glm::Mat3::identity()).abs().max() < 1e-5);
            assert!((r.determinant() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn push_constant_layouts() {
        assert_eq!(std::mem::size_of::<RayTracePushConstants>(), 76);
        assert_eq!(std::mem::size_of::<BorderPushConstants>(), 16);
        assert_eq!(std::mem::size_of::<ProbeUpdatePushConstants>(), 4);
    }
}
