pub mod ao;
pub mod composite;
pub mod di;
pub mod gbuffer;
pub mod gi;
pub mod reflection;
pub mod scale;
pub mod settings;
pub mod stage;
pub mod svgf;
pub mod tiles;
pub mod upsample;

pub use gbuffer::GBuffer;
pub use scale::RayTraceScale;
pub use settings::{
    AoSettings,
    CompositeSettings,
    DebugView,
    DiSettings,
    GiSettings,
    HybridSettings,
    ReflectionSettings,
    SvgfSettings,
};
pub use stage::{FrameSets, SharedLayouts};

use erupt::{vk, DeviceLoader};
use hybridtrace_scene::Aabb;
use hybridtrace_vk::{AllocatedImage, BarrierRecorder, RenderContext, VkError, VulkanContext};

use crate::{
    ao::AmbientOcclusion,
    composite::{Composite, LightingInputs},
    di::DirectLighting,
    gi::GlobalIllumination,
    reflection::Reflection,
};

/// Every ray-traced stage of the hybrid pipeline plus the deferred shading
/// that combines them. Consumes a G-buffer rendered earlier in the frame.
pub struct HybridRenderer {
    pub settings: HybridSettings,
    ao:           AmbientOcclusion,
    di:           DirectLighting,
    gi:           GlobalIllumination,
    reflection:   Reflection,
    composite:    Composite,
}

impl HybridRenderer {
    pub fn new(
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        layouts: SharedLayouts,
        bounds: &Aabb,
        settings: HybridSettings,
    ) -> Result<Self, VkError> {
        let ao = AmbientOcclusion::new(vk_ctx.clone(), render_extent, layouts, &settings.ao)?;
        let di = DirectLighting::new(vk_ctx.clone(), render_extent, layouts, &settings.di, &settings.svgf)?;
        let gi = GlobalIllumination::new(vk_ctx.clone(), render_extent, layouts, bounds, &settings.gi)?;
        let reflection =
            Reflection::new(vk_ctx.clone(), render_extent, layouts, &settings.reflection, &settings.svgf)?;
        let composite = Composite::new(vk_ctx, render_extent, layouts, LightingInputs {
            ao:         ao.output(),
            di:         di.output(),
            gi:         gi.output(),
            reflection: reflection.output(),
        })?;
        Ok(Self { settings, ao, di, gi, reflection, composite })
    }

    fn lighting_inputs(&self) -> LightingInputs {
        LightingInputs {
            ao:         self.ao.output(),
            di:         self.di.output(),
            gi:         self.gi.output(),
            reflection: self.reflection.output(),
        }
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        self.ao.track(recorder);
        self.di.track(recorder);
        self.gi.track(recorder);
        self.reflection.track(recorder);
        self.composite.track(recorder);
    }

    /// Recreates every render-extent resource. The device must be idle.
    pub fn resize(&mut self, vk_ctx: VulkanContext, render_extent: vk::Extent2D) -> Result<(), VkError> {
        let settings = self.settings;
        self.ao.resize(vk_ctx.clone(), render_extent, &settings.ao)?;
        self.di.resize(vk_ctx.clone(), render_extent, &settings.di)?;
        self.gi.resize(vk_ctx.clone(), render_extent, &settings.gi)?;
        self.reflection.resize(vk_ctx.clone(), render_extent, &settings.reflection)?;
        let inputs = LightingInputs {
            ao:         self.ao.output(),
            di:         self.di.output(),
            gi:         self.gi.output(),
            reflection: self.reflection.output(),
        };
        self.composite.resize(vk_ctx, render_extent, inputs)
    }

    pub fn probe_grid(&self) -> &gi::ProbeGrid {
        self.gi.grid()
    }

    pub fn needs_probe_rebuild(&self, bounds: &Aabb) -> bool {
        self.gi.needs_rebuild(bounds, &self.settings.gi)
    }

    /// Reallocates the probe volume. The device must be idle and the
    /// barrier recorder re-seeded through [`Self::track`] afterwards.
    pub fn rebuild_probes(&mut self, vk_ctx: VulkanContext, bounds: &Aabb) -> Result<(), VkError> {
        self.gi.rebuild(vk_ctx, bounds, &self.settings.gi)
    }

    /// Records AO, DI, GI, reflections and the deferred shading; returns the
    /// HDR radiance image.
    pub fn render(&mut self, ctx: &RenderContext, recorder: &mut BarrierRecorder, sets: &FrameSets) -> &AllocatedImage {
        let settings = self.settings;
        self.ao.render(ctx, recorder, sets, &settings.ao);
        self.di.render(ctx, recorder, sets, &settings.di, &settings.svgf);
        self.gi.render(ctx, recorder, sets, &settings.gi);
        self.reflection.render(ctx, recorder, sets, &settings.reflection, &settings.svgf);
        self.composite.render(ctx, recorder, sets, self.lighting_inputs(), &settings.composite);
        self.composite.output()
    }

    pub fn output(&self) -> &AllocatedImage {
        self.composite.output()
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.composite.destroy(device);
        self.reflection.destroy(device);
        self.gi.destroy(device);
        self.di.destroy(device);
        self.ao.destroy(device);
    }
}
