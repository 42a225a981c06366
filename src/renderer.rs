use bitflags::bitflags;
use erupt::vk;
use hybridtrace_deferred::{FrameSets, GBuffer, HybridRenderer, SharedLayouts};
use hybridtrace_pure::PathTracer;
use hybridtrace_scene::{gpu::FrameGlobals, BlueNoise, Camera, CameraState, GpuScene, Scene};
use hybridtrace_vk::{
    command::immediate_submit,
    frame_ring::{FrameCounter, FrameRing, FrameSlot},
    AllocatedImage,
    BarrierRecorder,
    RenderContext,
    VkResultExt,
    VulkanContext,
};

use crate::{
    camera::Command,
    error::RenderError,
    options::{ContextConfig, Options, RenderMode, RendererSettings},
    taa::{self, Taa, TaaInputs, TaaSource},
    tonemap::Tonemap,
};

bitflags! {
    /// Why accumulated history can no longer be trusted.
    pub struct ResetReason: u32 {
        const CAMERA = 0b0001;
        const MODE   = 0b0010;
        const RESIZE = 0b0100;
        const TAA    = 0b1000;
    }
}

impl ResetReason {
    pub fn resets_path_tracer(self) -> bool {
        !self.is_empty()
    }

    /// Camera motion alone is handled by reprojection; everything else
    /// restarts the temporal history.
    pub fn invalidates_history(self) -> bool {
        self.intersects(Self::MODE | Self::RESIZE | Self::TAA)
    }
}

/// Passes recorded in one frame, in submission order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FramePass {
    GBuffer,
    Hybrid,
    PathTracer,
    Taa,
    Tonemap,
}

/// Both modes rasterise the G-buffer first: TAA reprojects with its velocity
/// and depth whichever mode produced the radiance.
pub fn frame_passes(mode: RenderMode, taa_enabled: bool) -> Vec<FramePass> {
    let mut passes = vec![FramePass::GBuffer];
    passes.push(match mode {
        RenderMode::Hybrid => FramePass::Hybrid,
        RenderMode::PathTracing => FramePass::PathTracer,
    });
    if taa_enabled {
        passes.push(FramePass::Taa);
    }
    passes.push(FramePass::Tonemap);
    passes
}

fn taa_source(mode: RenderMode) -> TaaSource {
    match mode {
        RenderMode::Hybrid => TaaSource::Composite,
        RenderMode::PathTracing => TaaSource::PathTracer,
    }
}

/// HDR radiance the active mode produced under `parity`.
fn radiance<'a>(
    hybrid: &'a HybridRenderer,
    path_tracer: &'a PathTracer,
    source: TaaSource,
    parity: usize,
) -> &'a AllocatedImage {
    match source {
        TaaSource::Composite => hybrid.output(),
        TaaSource::PathTracer => path_tracer.output(parity),
    }
}

fn same_extent(a: vk::Extent2D, b: vk::Extent2D) -> bool {
    (a.width, a.height) == (b.width, b.height)
}

/// Swap-chain image the frame ends up in.
#[derive(Copy, Clone, Debug)]
pub struct PresentTarget {
    pub image:  vk::Image,
    pub extent: vk::Extent2D,
}

fn tonemap_inputs<'a>(hybrid: &'a HybridRenderer, path_tracer: &'a PathTracer, taa: &'a Taa) -> [&'a AllocatedImage; 5] {
    [hybrid.output(), path_tracer.output(0), path_tracer.output(1), taa.output(0), taa.output(1)]
}

fn taa_inputs<'a>(hybrid: &'a HybridRenderer, path_tracer: &'a PathTracer) -> TaaInputs<'a> {
    TaaInputs { composite: hybrid.output(), path_tracer: [path_tracer.output(0), path_tracer.output(1)] }
}

/// Owns every pass and records one frame of the active mode into the
/// frame-ring slot the swap chain hands out.
pub struct Renderer {
    vk_ctx:        VulkanContext,
    config:        ContextConfig,
    pub settings:  RendererSettings,
    pub camera:    Camera,
    mode:          RenderMode,
    frame_ring:    FrameRing,
    counter:       FrameCounter,
    recorder:      BarrierRecorder,
    camera_state:  CameraState,
    gpu_scene:     GpuScene,
    blue_noise:    BlueNoise,
    gbuffer:       GBuffer,
    hybrid:        HybridRenderer,
    path_tracer:   PathTracer,
    taa:           Taa,
    tonemap:       Tonemap,
    render_extent: vk::Extent2D,
    output_extent: vk::Extent2D,
    pending:       ResetReason,
}

impl Renderer {
    pub fn new(
        vk_ctx: VulkanContext,
        options: &Options,
        settings: RendererSettings,
        output_extent: vk::Extent2D,
    ) -> Result<Self, RenderError> {
        let config = options.context;
        let render_extent = config.render_extent_for(output_extent);

        let scene = Scene::load(&options.scene)?;
        let gpu_scene = GpuScene::new(vk_ctx.clone(), &scene, options.envmap.as_deref(), config.frame_ring)?;
        let blue_noise = BlueNoise::load(vk_ctx.clone(), &options.blue_noise)?;
        let frame_ring = FrameRing::new(&vk_ctx.device, vk_ctx.command_pool, config.frame_ring)?;

        let gbuffer = GBuffer::new(vk_ctx.clone(), render_extent, gpu_scene.descriptor_sets.layout)?;
        let layouts = SharedLayouts {
            scene:      gpu_scene.descriptor_sets.layout,
            blue_noise: blue_noise.descriptor_sets.layout,
            gbuffer:    gbuffer.layout(),
        };
        let hybrid = HybridRenderer::new(vk_ctx.clone(), render_extent, layouts, &gpu_scene.bounds, settings.hybrid)?;
        let path_tracer = PathTracer::new(
            vk_ctx.clone(),
            render_extent,
            layouts.scene,
            layouts.blue_noise,
            settings.path_tracer,
        )?;
        let taa = Taa::new(vk_ctx.clone(), render_extent, layouts, taa_inputs(&hybrid, &path_tracer))?;
        let tonemap = Tonemap::new(vk_ctx.clone(), output_extent, &tonemap_inputs(&hybrid, &path_tracer, &taa))?;

        let grid = hybrid.probe_grid();
        log::info!(
            "Rendering {}×{} into {}×{} in {:?} mode, {}×{}×{} GI probes",
            render_extent.width,
            render_extent.height,
            output_extent.width,
            output_extent.height,
            options.mode,
            grid.counts.x,
            grid.counts.y,
            grid.counts.z
        );

        let mut renderer = Self {
            vk_ctx,
            config,
            settings,
            camera: scene.camera,
            mode: options.mode,
            frame_ring,
            counter: FrameCounter::new(),
            recorder: BarrierRecorder::new(),
            camera_state: CameraState::new(),
            gpu_scene,
            blue_noise,
            gbuffer,
            hybrid,
            path_tracer,
            taa,
            tonemap,
            render_extent,
            output_extent,
            pending: ResetReason::empty(),
        };
        renderer.track_all();
        Ok(renderer)
    }

    /// Brings every history pair back to the parity-0 state so surviving pairs
    /// and recreated ones agree when everything is tracked again. The device
    /// must be idle.
    fn rewind_history(&mut self) -> Result<(), RenderError> {
        let parity = self.counter.ping_pong();
        if parity != 0 {
            log::debug!("Rewinding history pairs from parity {}", parity);
            let recorder = &mut self.recorder;
            immediate_submit(self.vk_ctx.clone(), |device, command_buffer| {
                recorder.rewind(device, command_buffer, parity)
            })?;
            self.counter.rewind_parity();
        }
        Ok(())
    }

    fn track_all(&mut self) {
        self.recorder.clear();
        self.gbuffer.track(&mut self.recorder);
        self.hybrid.track(&mut self.recorder);
        self.path_tracer.track(&mut self.recorder);
        self.taa.track(&mut self.recorder);
        self.tonemap.track(&mut self.recorder);
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn render_extent(&self) -> vk::Extent2D {
        self.render_extent
    }

    /// Whether a swap chain rebuilt during acquire left the output targets at
    /// the wrong size.
    pub fn needs_resize(&self, images_invalidated: bool, swapchain_extent: vk::Extent2D) -> bool {
        images_invalidated && !same_extent(swapchain_extent, self.output_extent)
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::ToggleMode => {
                self.mode = self.mode.toggled();
                self.pending |= ResetReason::MODE;
                log::info!("Switched to {:?} mode", self.mode);
            }
            Command::DebugView(view) => {
                self.settings.hybrid.composite.debug_view = view;
                log::info!("Debug view: {:?}", view);
            }
            Command::ToggleGi => {
                let composite = &mut self.settings.hybrid.composite;
                composite.enable_gi = !composite.enable_gi;
                log::info!("Global illumination {}", if composite.enable_gi { "on" } else { "off" });
            }
            Command::ToggleTaa => {
                self.settings.taa.enabled = !self.settings.taa.enabled;
                self.pending |= ResetReason::TAA;
                log::info!("TAA {}", if self.settings.taa.enabled { "on" } else { "off" });
            }
        }
    }

    /// Recreates everything sized by the window. Waits for the device first.
    pub fn resize(&mut self, output_extent: vk::Extent2D) -> Result<(), RenderError> {
        unsafe { self.vk_ctx.device.device_wait_idle().check("vkDeviceWaitIdle")? };
        self.rewind_history()?;

        let render_extent = self.config.render_extent_for(output_extent);
        log::info!(
            "Resizing to {}×{} (output {}×{})",
            render_extent.width,
            render_extent.height,
            output_extent.width,
            output_extent.height
        );

        let vk_ctx = self.vk_ctx.clone();
        self.gbuffer.resize(vk_ctx.clone(), render_extent)?;
        self.hybrid.resize(vk_ctx.clone(), render_extent)?;
        self.path_tracer.resize(vk_ctx.clone(), render_extent)?;
        self.taa.resize(vk_ctx.clone(), render_extent, taa_inputs(&self.hybrid, &self.path_tracer))?;
        self.tonemap.resize(vk_ctx, output_extent, &tonemap_inputs(&self.hybrid, &self.path_tracer, &self.taa))?;

        self.render_extent = render_extent;
        self.output_extent = output_extent;
        self.pending |= ResetReason::RESIZE;
        self.track_all();
        Ok(())
    }

    fn rebuild_probes_if_needed(&mut self) -> Result<(), RenderError> {
        if !self.hybrid.needs_probe_rebuild(&self.gpu_scene.bounds) {
            return Ok(());
        }
        unsafe { self.vk_ctx.device.device_wait_idle().check("vkDeviceWaitIdle")? };
        self.rewind_history()?;
        self.hybrid.rebuild_probes(self.vk_ctx.clone(), &self.gpu_scene.bounds)?;
        self.track_all();
        Ok(())
    }

    fn apply_resets(&mut self) {
        let pending = std::mem::replace(&mut self.pending, ResetReason::empty());
        if pending.resets_path_tracer() {
            log::debug!("Resetting accumulation: {:?}", pending);
            self.path_tracer.reset_frames();
        }
        if pending.invalidates_history() {
            self.counter.reset();
        }
    }

    /// Records the frame for `current_frame`'s ring slot and returns the slot
    /// to submit. The caller has already waited on the slot's fence.
    pub fn record_frame(&mut self, current_frame: usize, target: PresentTarget) -> Result<FrameSlot, RenderError> {
        self.hybrid.settings = self.settings.hybrid;
        self.path_tracer.settings = self.settings.path_tracer;

        if self.mode == RenderMode::Hybrid {
            self.rebuild_probes_if_needed()?;
        }

        let jitter_enabled = self.mode == RenderMode::Hybrid && self.settings.taa.enabled;
        let extent = [self.render_extent.width, self.render_extent.height];
        if self.camera_state.update(&self.camera, extent, jitter_enabled, self.counter.frame_number()) {
            self.pending |= ResetReason::CAMERA;
        }
        self.apply_resets();

        self.gpu_scene.update_globals(current_frame, &self.camera_state, FrameGlobals {
            frame_number: self.counter.frame_number(),
            num_frames: self.counter.num_frames(),
            render_extent: self.render_extent,
            jitter_enabled,
        })?;

        let device = &self.vk_ctx.device;
        let slot = self.frame_ring.begin(device, current_frame)?;
        let parity = self.counter.ping_pong();
        let ctx = RenderContext {
            device,
            command_buffer: slot.command_buffer,
            ping_pong: parity,
            current_frame,
            render_extent: self.render_extent,
            output_extent: self.output_extent,
            debug_markers: self.vk_ctx.debug_markers,
        };
        let sets = FrameSets {
            scene:      self.gpu_scene.descriptor_set(current_frame),
            blue_noise: self.blue_noise.descriptor_set(),
            gbuffer:    self.gbuffer.descriptor_set(parity),
        };

        let source = taa_source(self.mode);
        let mut resolved_by_taa = false;
        for pass in frame_passes(self.mode, self.settings.taa.enabled) {
            match pass {
                FramePass::GBuffer => self.gbuffer.render(&ctx, &mut self.recorder, &self.gpu_scene, sets.scene),
                FramePass::Hybrid => {
                    self.hybrid.render(&ctx, &mut self.recorder, &sets);
                }
                FramePass::PathTracer => {
                    self.path_tracer.render(&ctx, &mut self.recorder, sets.scene, sets.blue_noise);
                }
                FramePass::Taa => {
                    let frame_count = match source {
                        TaaSource::Composite => self.counter.num_frames().saturating_add(1),
                        TaaSource::PathTracer => self.path_tracer.frame_count(),
                    };
                    let push_constants = taa::PushConstants::new(&self.settings.taa, source, frame_count);
                    let input = radiance(&self.hybrid, &self.path_tracer, source, parity);
                    self.taa.render(&ctx, &mut self.recorder, &sets, input, source, &push_constants);
                    resolved_by_taa = true;
                }
                FramePass::Tonemap => {
                    let input = if resolved_by_taa {
                        self.taa.output(parity)
                    } else {
                        radiance(&self.hybrid, &self.path_tracer, source, parity)
                    };
                    self.tonemap.render(&ctx, &mut self.recorder, input, &self.settings.tonemap);
                    self.tonemap.blit_to_swapchain(&ctx, &mut self.recorder, target.image, target.extent);
                }
            }
        }
        self.recorder.end_frame(device, slot.command_buffer, parity);

        unsafe { device.end_command_buffer(slot.command_buffer).check("vkEndCommandBuffer")? };
        self.counter.advance();
        Ok(slot)
    }

    pub fn destroy(&self) {
        let device = &self.vk_ctx.device;
        self.tonemap.destroy(device);
        self.taa.destroy(device);
        self.path_tracer.destroy(device);
        self.hybrid.destroy(device);
        self.gbuffer.destroy(device);
        self.blue_noise.destroy(device);
        self.gpu_scene.destroy(device);
        self.frame_ring.destroy(device, self.vk_ctx.command_pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_modes_rasterise_the_gbuffer_first() {
        use FramePass::*;
        assert_eq!(frame_passes(RenderMode::Hybrid, true), vec![GBuffer, Hybrid, Taa, Tonemap]);
        assert_eq!(frame_passes(RenderMode::PathTracing, true), vec![GBuffer, PathTracer, Taa, Tonemap]);
        assert_eq!(frame_passes(RenderMode::PathTracing, false), vec![GBuffer, PathTracer, Tonemap]);
        assert_eq!(frame_passes(RenderMode::Hybrid, false), vec![GBuffer, Hybrid, Tonemap]);
    }

    #[test]
    fn extents_compare_by_size() {
        let extent = |width, height| vk::Extent2D { width, height };
        assert!(same_extent(extent(1280, 720), extent(1280, 720)));
        assert!(!same_extent(extent(1280, 720), extent(720, 1280)));
    }

    #[test]
    fn camera_motion_keeps_temporal_history() {
        let reason = ResetReason::CAMERA;
        assert!(reason.resets_path_tracer());
        assert!(!reason.invalidates_history());
    }

    #[test]
    fn structural_changes_reset_everything() {
        for reason in [ResetReason::MODE, ResetReason::RESIZE, ResetReason::TAA, ResetReason::all()] {
            assert!(reason.resets_path_tracer());
            assert!(reason.invalidates_history());
        }
        assert!(!ResetReason::empty().resets_path_tracer());
    }
}
