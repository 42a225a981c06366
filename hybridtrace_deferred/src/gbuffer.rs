use erupt::{vk, DeviceLoader};
use hybridtrace_scene::GpuScene;
use hybridtrace_vk::{
    descriptor::SamplerCreateInfo,
    image::{destroy_all, mip_extent},
    pipeline::{ColorAttachmentInfo, DepthAttachmentInfo, GraphicsPipelineCreateInfo, RasterisationStateInfo},
    Access,
    AllocatedImage,
    BarrierRecorder,
    DescriptorResource,
    DescriptorSetSchema,
    DescriptorSets,
    GraphicsPipeline,
    PingPong,
    RenderContext,
    VkError,
    VulkanContext,
};
use itertools::Itertools;

pub const GBUFFER_VERTEX_SHADER: &str = "gbuffer.vert.spv";
pub const GBUFFER_FRAGMENT_SHADER: &str = "gbuffer.frag.spv";

/// Albedo and metallic.
pub const FORMAT_A: vk::Format = vk::Format::R8G8B8A8_UNORM;
/// Encoded normal and motion vector.
pub const FORMAT_B: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Roughness, curvature, instance id and linear depth.
pub const FORMAT_C: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const FORMAT_DEPTH: vk::Format = vk::Format::D32_SFLOAT;

/// Reverse-Z: the far plane clears to zero.
const CLEAR_DEPTH: f32 = 0.0;

/// The four render targets for one history slot.
pub struct GBufferTargets<'a> {
    pub a:     &'a AllocatedImage,
    pub b:     &'a AllocatedImage,
    pub c:     &'a AllocatedImage,
    pub depth: &'a AllocatedImage,
}

impl<'a> GBufferTargets<'a> {
    pub fn colour(&self) -> [&'a AllocatedImage; 3] {
        [self.a, self.b, self.c]
    }

    pub fn all(&self) -> [&'a AllocatedImage; 4] {
        [self.a, self.b, self.c, self.depth]
    }
}

/// Rasterised surface attributes with full mip chains, double-buffered so
/// temporal passes can compare against the previous frame.
pub struct GBuffer {
    a:     PingPong<AllocatedImage>,
    b:     PingPong<AllocatedImage>,
    c:     PingPong<AllocatedImage>,
    depth: PingPong<AllocatedImage>,

    extent:          vk::Extent2D,
    sampler:         vk::Sampler,
    descriptor_sets: DescriptorSets,
    pipeline:        GraphicsPipeline,
}

fn create_targets(vk_ctx: VulkanContext, format: vk::Format, extent: vk::Extent2D) -> Result<PingPong<AllocatedImage>, VkError> {
    PingPong::try_from_fn(|slot| {
        let layout = if slot == 0 { vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL } else { vk::ImageLayout::GENERAL };
        AllocatedImage::gbuffer(vk_ctx.clone(), format, extent, layout)
    })
}

impl GBuffer {
    /// Current slot at bindings 0..4, previous slot at 4..8, in A, B, C, depth order.
    pub fn schema() -> DescriptorSetSchema {
        DescriptorSetSchema::new().sampled_images(8, vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT)
    }

    pub fn new(vk_ctx: VulkanContext, extent: vk::Extent2D, scene_layout: vk::DescriptorSetLayout) -> Result<Self, VkError> {
        let colour_target = |format| ColorAttachmentInfo { format, color_write_mask: vk::ColorComponentFlags::all() };
        let pipeline = GraphicsPipeline::new(vk_ctx.clone(), GraphicsPipelineCreateInfo {
            vertex_shader:          GBUFFER_VERTEX_SHADER,
            fragment_shader:        GBUFFER_FRAGMENT_SHADER,
            color_attachment_infos: vec![colour_target(FORMAT_A), colour_target(FORMAT_B), colour_target(FORMAT_C)],
            depth_attachment:       Some(DepthAttachmentInfo {
                format:     FORMAT_DEPTH,
                compare_op: vk::CompareOp::GREATER_OR_EQUAL,
            }),
            push_constant_size:     0,
            input_assembly:         vk::PrimitiveTopology::TRIANGLE_LIST,
            rasterisation_state:    RasterisationStateInfo {
                cull_mode:  vk::CullModeFlags::NONE,
                front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            },
            set_layouts:            vec![scene_layout],
        })?;

        let sampler = SamplerCreateInfo::NEAREST_CLAMP.create(&vk_ctx.device)?;
        let descriptor_sets = DescriptorSets::new(&vk_ctx.device, Self::schema(), 2)?;

        let this = Self {
            a: create_targets(vk_ctx.clone(), FORMAT_A, extent)?,
            b: create_targets(vk_ctx.clone(), FORMAT_B, extent)?,
            c: create_targets(vk_ctx.clone(), FORMAT_C, extent)?,
            depth: create_targets(vk_ctx.clone(), FORMAT_DEPTH, extent)?,
            extent,
            sampler,
            descriptor_sets,
            pipeline,
        };
        this.write_descriptors(&vk_ctx.device);
        Ok(this)
    }

    fn pairs(&self) -> [&PingPong<AllocatedImage>; 4] {
        [&self.a, &self.b, &self.c, &self.depth]
    }

    fn write_descriptors(&self, device: &DeviceLoader) {
        for parity in 0..2 {
            let sampled = |image: &AllocatedImage| DescriptorResource::SampledImage { view: image.view, sampler: self.sampler };
            let current = self.pairs().map(|pair| sampled(pair.write(parity)));
            let previous = self.pairs().map(|pair| sampled(pair.read(parity)));
            let resources = current.into_iter().chain(previous).collect_vec();
            self.descriptor_sets.write(device, parity, &resources);
        }
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_sets.layout
    }

    pub fn descriptor_set(&self, parity: usize) -> vk::DescriptorSet {
        self.descriptor_sets.set(parity)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Slot written this frame.
    pub fn current(&self, parity: usize) -> GBufferTargets {
        GBufferTargets { a: self.a.write(parity), b: self.b.write(parity), c: self.c.write(parity), depth: self.depth.write(parity) }
    }

    pub fn previous(&self, parity: usize) -> GBufferTargets {
        GBufferTargets { a: self.a.read(parity), b: self.b.read(parity), c: self.c.read(parity), depth: self.depth.read(parity) }
    }

    pub fn track(&self, recorder: &mut BarrierRecorder) {
        for pair in self.pairs() {
            recorder.track_ping_pong(pair);
        }
    }

    pub fn resize(&mut self, vk_ctx: VulkanContext, extent: vk::Extent2D) -> Result<(), VkError> {
        for pair in self.pairs() {
            destroy_all(&vk_ctx.device, pair.iter());
        }
        self.a = create_targets(vk_ctx.clone(), FORMAT_A, extent)?;
        self.b = create_targets(vk_ctx.clone(), FORMAT_B, extent)?;
        self.c = create_targets(vk_ctx.clone(), FORMAT_C, extent)?;
        self.depth = create_targets(vk_ctx.clone(), FORMAT_DEPTH, extent)?;
        self.extent = extent;
        self.write_descriptors(&vk_ctx.device);
        Ok(())
    }

    /// Rasterises every instance into the current slot and builds the mip
    /// chains. Leaves all four targets in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn render(&self, ctx: &RenderContext, recorder: &mut BarrierRecorder, scene: &GpuScene, scene_set: vk::DescriptorSet) {
        let _marker = ctx.marker("G-Buffer");
        let targets = self.current(ctx.ping_pong);

        for image in targets.colour() {
            recorder.image(image, Access::COLOR_ATTACHMENT);
        }
        recorder.image(targets.depth, Access::DEPTH_ATTACHMENT).flush(ctx.device, ctx.command_buffer);

        let make_attachment_info = |image: &AllocatedImage| {
            vk::RenderingAttachmentInfoBuilder::new()
                .image_view(image.view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .clear_value(vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 0.0] } })
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
        };
        let colour_attachments = targets.colour().map(make_attachment_info);
        let depth_attachment = vk::RenderingAttachmentInfoBuilder::new()
            .image_view(targets.depth.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: CLEAR_DEPTH, stencil: 0 },
            })
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE);
        let rendering_info = vk::RenderingInfoBuilder::new()
            .color_attachments(&colour_attachments)
            .depth_attachment(&depth_attachment)
            .layer_count(1)
            .render_area(vk::Rect2D { offset: Default::default(), extent: self.extent });

        unsafe {
            ctx.device.cmd_set_scissor(ctx.command_buffer, 0, &[vk::Rect2DBuilder::new().extent(self.extent)]);
            ctx.device.cmd_set_viewport(ctx.command_buffer, 0, &[vk::ViewportBuilder::new()
                .width(self.extent.width as _)
                .height(self.extent.height as _)
                .min_depth(0.0)
                .max_depth(1.0)]);
            ctx.device.cmd_begin_rendering(ctx.command_buffer, &rendering_info);
        }
        self.pipeline.bind(ctx, &[scene_set]);
        unsafe {
            ctx.device.cmd_bind_index_buffer(ctx.command_buffer, scene.index_buffer.buffer, 0, vk::IndexType::UINT32);
            ctx.device.cmd_draw_indexed_indirect(
                ctx.command_buffer,
                scene.draw_buffer.buffer,
                0,
                scene.instance_count,
                std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32,
            );
            ctx.device.cmd_end_rendering(ctx.command_buffer);
        }

        self.generate_mips(ctx, recorder, &targets);
    }

    /// Blit cascade down to 1×1: linear for colour, nearest for depth.
    fn generate_mips(&self, ctx: &RenderContext, recorder: &mut BarrierRecorder, targets: &GBufferTargets) {
        let _marker = ctx.marker("G-Buffer Mips");
        let images = targets.all();
        for image in images {
            recorder.image(image, Access::TRANSFER_SRC);
        }
        recorder.flush(ctx.device, ctx.command_buffer);

        let mip_levels = images[0].mip_levels;
        for mip in 1..mip_levels {
            for image in images {
                recorder.subresource(image, image.mip_range(mip), Access::TRANSFER_SRC, Access::TRANSFER_DST);
            }
            recorder.flush(ctx.device, ctx.command_buffer);

            for image in images {
                let filter = if image.format == FORMAT_DEPTH { vk::Filter::NEAREST } else { vk::Filter::LINEAR };
                self.blit_mip(ctx, image, mip, filter);
            }

            for image in images {
                recorder.subresource(image, image.mip_range(mip), Access::TRANSFER_DST, Access::TRANSFER_SRC);
            }
            recorder.flush(ctx.device, ctx.command_buffer);
        }

        // Every level now sits in TRANSFER_SRC, which is what the tracker recorded.
        for image in images {
            recorder.image(image, Access::SHADER_READ);
        }
        recorder.flush(ctx.device, ctx.command_buffer);
    }

    fn blit_mip(&self, ctx: &RenderContext, image: &AllocatedImage, mip: u32, filter: vk::Filter) {
        let corner = |extent: vk::Extent2D| vk::Offset3D { x: extent.width as i32, y: extent.height as i32, z: 1 };
        let layers = |level| {
            vk::ImageSubresourceLayersBuilder::new()
                .aspect_mask(image.subresource_range.aspect_mask)
                .mip_level(level)
                .base_array_layer(0)
                .layer_count(1)
                .build()
        };
        let region = vk::ImageBlitBuilder::new()
            .src_subresource(layers(mip - 1))
            .src_offsets([vk::Offset3D::default(), corner(mip_extent(self.extent, mip - 1))])
            .dst_subresource(layers(mip))
            .dst_offsets([vk::Offset3D::default(), corner(mip_extent(self.extent, mip))]);
        unsafe {
            ctx.device.cmd_blit_image(
                ctx.command_buffer,
                image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                filter,
            );
        }
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        self.pipeline.destroy(device);
        self.descriptor_sets.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
        }
        for pair in self.pairs() {
            destroy_all(device, pair.iter());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybridtrace_vk::image::mip_count;

    #[test]
    fn mip_chain_reaches_one_texel() {
        let extent = vk::Extent2D { width: 1920, height: 1080 };
        let levels = mip_count(extent);
        assert_eq!(levels, 11);
        let last = mip_extent(extent, levels - 1);
        assert_eq!((last.width, last.height), (1, 1));
    }

    #[test]
    fn schema_pairs_current_with_previous() {
        let schema = GBuffer::schema();
        assert_eq!(schema.bindings().len(), 8);
        assert!(schema.bindings().iter().all(|b| b.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
    }
}
