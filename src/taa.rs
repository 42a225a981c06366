use erupt::{vk, DeviceLoader};
use hybridtrace_deferred::{stage, FrameSets, SharedLayouts};
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

pub const TAA_SHADER: &str = "taa.comp.spv";
pub const HISTORY_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
const TILE_SIZE: u32 = 8;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PushConstants {
    pub feedback_min: f32,
    pub feedback_max: f32,
    pub sharpen:      u32,
    /// Skips the neighbourhood clamp.
    pub path_tracer:  u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TaaSettings {
    pub enabled:      bool,
    pub feedback_min: f32,
    pub feedback_max: f32,
    pub sharpen:      bool,
}

impl Default for TaaSettings {
    fn default() -> Self {
        Self { enabled: true, feedback_min: 0.88, feedback_max: 0.97, sharpen: true }
    }
}

/// Where the frame being resolved came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaaSource {
    Composite,
    PathTracer,
}

/// Feedback that makes the history a plain running average over
/// `frame_count` frames.
pub fn running_average_feedback(frame_count: u32) -> f32 {
    1.0 - 1.0 / frame_count.max(1) as f32
}

impl PushConstants {
    /// `frame_count` counts the frame being recorded, so it is 1 right after a reset.
    pub fn new(settings: &TaaSettings, source: TaaSource, frame_count: u32) -> Self {
        let sharpen = settings.sharpen as u32;
        match source {
            TaaSource::PathTracer => {
                let feedback = running_average_feedback(frame_count);
                Self { feedback_min: feedback, feedback_max: feedback, sharpen: 0, path_tracer: 1 }
            }
            // Nothing to reproject from yet.
            TaaSource::Composite if frame_count <= 1 => {
                Self { feedback_min: 0.0, feedback_max: 0.0, sharpen, path_tracer: 0 }
            }
            TaaSource::Composite => Self {
                feedback_min: settings.feedback_min,
                feedback_max: settings.feedback_max,
                sharpen,
                path_tracer: 0,
            },
        }
    }
}

/// Images TAA may resolve. The path tracer's output alternates with parity.
#[derive(Copy, Clone)]
pub struct TaaInputs<'a> {
    pub composite:   &'a AllocatedImage,
    pub path_tracer: [&'a AllocatedImage; 2],
}

impl<'a> TaaInputs<'a> {
    fn input(&self, source: TaaSource, parity: usize) -> &'a AllocatedImage {
        match source {
            TaaSource::Composite => self.composite,
            TaaSource::PathTracer => self.path_tracer[parity & 1],
        }
    }
}

fn set_index(source: TaaSource, parity: usize) -> usize {
    let source = match source {
        TaaSource::Composite => 0,
        TaaSource::PathTracer => 1,
    };
    source * 2 + (parity & 1)
}

/// Temporal resolve at the render extent with a double-buffered history.
pub struct Taa {
    history:         PingPong<AllocatedImage>,
    sampler:         vk::Sampler,
    descriptor_sets: DescriptorSets,
    pipeline:        ComputePipeline,
}

impl Taa {
    fn schema() -> DescriptorSetSchema {
        DescriptorSetSchema::new()
            .sampled_images(2, vk::ShaderStageFlags::COMPUTE)
            .storage_images(1, vk::ShaderStageFlags::COMPUTE)
    }

    pub fn new(
        vk_ctx: VulkanContext,
        render_extent: vk::Extent2D,
        layouts: SharedLayouts,
        inputs: TaaInputs,
    ) -> Result<Self, VkError> {
        let history = stage::storage_pair(vk_ctx.clone(), HISTORY_FORMAT, render_extent)?;
        let sampler = SamplerCreateInfo::LINEAR_CLAMP.create(&vk_ctx.device)?;
        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, Self::schema(), 4)?;
        let pipeline = ComputePipeline::with_push_constants::<PushConstants>(
            vk_ctx.clone(),
            TAA_SHADER,
            &layouts.with(descriptor_sets.layout),
        )?;

        let this = Self { history, sampler, descriptor_sets, pipeline };
        this.write_descriptors(&vk_ctx.device, inputs);
        Ok(this)
    }

    fn write_descriptors(&self, device: &DeviceLoader, inputs: TaaInputs) {
        for source in [TaaSource::Composite, TaaSource::PathTracer] {
            for parity in 0..2 {
                self.descriptor_sets.write(device, set_index(source, parity), &[
                    DescriptorResource::SampledImage { view: inputs.input(source, parity).view, sampler: self.sampler },
                    DescriptorResource::SampledImage { view: self.history.read(parity).view, sampler: self.sampler },
                    DescriptorResource::StorageImage(self.history.write(parity).view),
                ]);
            }
        }
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        recorder.track_ping_pong(&self.history);
    }

    pub fn resize(&mut self, vk_ctx: VulkanContext, render_extent: vk::Extent2D, inputs: TaaInputs) -> Result<(), VkError> {
        destroy_all(&vk_ctx.device, self.history.iter());
        self.history = stage::storage_pair(vk_ctx.clone(), HISTORY_FORMAT, render_extent)?;
        self.write_descriptors(&vk_ctx.device, inputs);
        Ok(())
    }

    /// Resolved image once this frame's dispatch has run.
    pub fn output(&self, parity: usize) -> &AllocatedImage {
        self.history.write(parity)
    }

    pub fn render(
        &self,
        ctx: &RenderContext,
        recorder: &mut BarrierRecorder,
        sets: &FrameSets,
        input: &AllocatedImage,
        source: TaaSource,
        push_constants: &PushConstants,
    ) {
        let _marker = ctx.marker("TAA");
        let parity = ctx.ping_pong;

        recorder
            .image(input, Access::SHADER_READ)
            .image(self.history.read(parity), Access::SHADER_READ)
            .image(self.history.write(parity), Access::STORAGE_WRITE)
            .flush(ctx.device, ctx.command_buffer);

        self.pipeline.bind(ctx, &sets.with(self.descriptor_sets.set(set_index(source, parity))));
        self.pipeline.push(ctx, push_constants);
        let (x, y) = dispatch_size(self.history.slot(0).extent_2d(), TILE_SIZE, TILE_SIZE);
        self.pipeline.dispatch(ctx, x, y, 1);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.pipeline.destroy(device);
        self.descriptor_sets.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        destroy_all(device, self.history.iter());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lerp(current: f32, history: f32, feedback: f32) -> f32 {
        current + (history - current) * feedback
    }

    #[test]
    fn push_constants_are_four_words() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 16);
        let constants = PushConstants::default();
        let base = &constants as *const _ as usize;
        assert_eq!(&constants.sharpen as *const _ as usize - base, 8);
        assert_eq!(&constants.path_tracer as *const _ as usize - base, 12);
    }

    #[test]
    fn path_tracer_variant_is_a_running_average() {
        let settings = TaaSettings::default();
        let samples = [0.8, 0.1, 0.4, 1.9, 0.6];
        let mut history = 42.0;
        for (i, &sample) in samples.iter().enumerate() {
            let push = PushConstants::new(&settings, TaaSource::PathTracer, i as u32 + 1);
            assert_eq!(push.path_tracer, 1);
            assert_eq!(push.feedback_min, push.feedback_max);
            history = lerp(sample, history, push.feedback_min);
        }
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        assert!((history - mean).abs() < 1e-5);
    }

    #[test]
    fn first_hybrid_frame_ignores_history() {
        let settings = TaaSettings::default();
        let first = PushConstants::new(&settings, TaaSource::Composite, 1);
        assert_eq!((first.feedback_min, first.feedback_max), (0.0, 0.0));

        let steady = PushConstants::new(&settings, TaaSource::Composite, 2);
        assert_eq!((steady.feedback_min, steady.feedback_max), (0.88, 0.97));
        assert_eq!(steady.sharpen, 1);
        assert_eq!(steady.path_tracer, 0);
    }

    #[test]
    fn set_index_covers_both_sources_and_parities() {
        let mut indices = Vec::new();
        for source in [TaaSource::Composite, TaaSource::PathTracer] {
            for parity in 0..2 {
                indices.push(set_index(source, parity));
            }
        }
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
