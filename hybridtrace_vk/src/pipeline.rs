use std::ffi::CString;

use erupt::{vk, DeviceLoader, ExtendableFrom};
use itertools::Itertools;

use crate::{error::VkResultExt, push_constants, RenderContext, VkError, VulkanContext};

#[derive(Clone, Debug)]
pub struct GraphicsPipeline {
    pub layout:   vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub stages:   vk::ShaderStageFlags,
}

#[derive(Clone, Debug)]
pub struct GraphicsPipelineCreateInfo<'a> {
    pub vertex_shader:          &'a str,
    pub fragment_shader:        &'a str,
    pub color_attachment_infos: Vec<ColorAttachmentInfo>,
    pub depth_attachment:       Option<DepthAttachmentInfo>,
    /// Size of the push-constant block visible to both stages; 0 for none.
    pub push_constant_size:     u32,
    pub input_assembly:         vk::PrimitiveTopology,
    pub rasterisation_state:    RasterisationStateInfo,
    pub set_layouts:            Vec<vk::DescriptorSetLayout>,
}

#[derive(Copy, Clone, Debug)]
pub struct RasterisationStateInfo {
    pub cull_mode:  vk::CullModeFlags,
    pub front_face: vk::FrontFace,
}

#[derive(Copy, Clone, Debug)]
pub struct ColorAttachmentInfo {
    pub format:           vk::Format,
    pub color_write_mask: vk::ColorComponentFlags,
}

#[derive(Copy, Clone, Debug)]
pub struct DepthAttachmentInfo {
    pub format:     vk::Format,
    pub compare_op: vk::CompareOp,
}

fn create_layout(
    device: &DeviceLoader,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_size: u32,
    stages: vk::ShaderStageFlags,
) -> Result<vk::PipelineLayout, VkError> {
    let push_constant_ranges =
        if push_constant_size > 0 { vec![push_constants::range(stages, push_constant_size)] } else { vec![] };
    let create_info = vk::PipelineLayoutCreateInfoBuilder::new()
        .set_layouts(set_layouts)
        .push_constant_ranges(&push_constant_ranges);
    unsafe { device.create_pipeline_layout(&create_info, None).check("vkCreatePipelineLayout") }
}

impl GraphicsPipeline {
    pub fn new(vk_ctx: VulkanContext, create_info: GraphicsPipelineCreateInfo) -> Result<Self, VkError> {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let layout = create_layout(&vk_ctx.device, &create_info.set_layouts, create_info.push_constant_size, stages)?;

        let vertex_shader = vk_ctx.shaders.module(&vk_ctx.device, create_info.vertex_shader)?;
        let fragment_shader = vk_ctx.shaders.module(&vk_ctx.device, create_info.fragment_shader)?;

        let entry_point = CString::new("main").unwrap_or_default();
        let shader_stages = vec![
            vk::PipelineShaderStageCreateInfoBuilder::new()
                .stage(vk::ShaderStageFlagBits::VERTEX)
                .module(vertex_shader)
                .name(&entry_point),
            vk::PipelineShaderStageCreateInfoBuilder::new()
                .stage(vk::ShaderStageFlagBits::FRAGMENT)
                .module(fragment_shader)
                .name(&entry_point),
        ];

        let dynamic_pipeline_state = vk::PipelineDynamicStateCreateInfoBuilder::new()
            .dynamic_states(&[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]);

        let viewport_state = vk::PipelineViewportStateCreateInfoBuilder::new().viewport_count(1).scissor_count(1);

        let multisample_state = vk::PipelineMultisampleStateCreateInfoBuilder::new()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlagBits::_1);

        let color_attachment_formats = create_info.color_attachment_infos.iter().map(|info| info.format).collect_vec();
        let mut pipeline_rendering_info =
            vk::PipelineRenderingCreateInfoBuilder::new().color_attachment_formats(&color_attachment_formats);
        if let Some(depth) = create_info.depth_attachment {
            pipeline_rendering_info = pipeline_rendering_info.depth_attachment_format(depth.format);
        }

        let colour_blend_attachments = create_info
            .color_attachment_infos
            .iter()
            .map(|info| {
                vk::PipelineColorBlendAttachmentStateBuilder::new()
                    .color_write_mask(info.color_write_mask)
                    .blend_enable(false)
            })
            .collect_vec();
        let colour_blending_info = vk::PipelineColorBlendStateCreateInfoBuilder::new()
            .logic_op_enable(false)
            .attachments(&colour_blend_attachments);

        let depth_stencil_state = match create_info.depth_attachment {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfoBuilder::new()
                .depth_test_enable(true)
                .depth_write_enable(true)
                .depth_compare_op(depth.compare_op)
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false),
            None => vk::PipelineDepthStencilStateCreateInfoBuilder::new()
                .depth_test_enable(false)
                .depth_write_enable(false),
        };

        // Geometry is pulled from storage buffers in the vertex shader.
        let vertex_input = vk::PipelineVertexInputStateCreateInfoBuilder::new();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfoBuilder::new()
            .topology(create_info.input_assembly)
            .primitive_restart_enable(false);

        let rasterisation_state = vk::PipelineRasterizationStateCreateInfoBuilder::new()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(create_info.rasterisation_state.cull_mode)
            .front_face(create_info.rasterisation_state.front_face);

        let pipeline_infos = vec![vk::GraphicsPipelineCreateInfoBuilder::new()
            .vertex_input_state(&vertex_input)
            .color_blend_state(&colour_blending_info)
            .depth_stencil_state(&depth_stencil_state)
            .multisample_state(&multisample_state)
            .stages(&shader_stages)
            .layout(layout)
            .rasterization_state(&rasterisation_state)
            .dynamic_state(&dynamic_pipeline_state)
            .viewport_state(&viewport_state)
            .input_assembly_state(&input_assembly)
            .extend_from(&mut pipeline_rendering_info)];

        let pipeline = unsafe {
            vk_ctx
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &pipeline_infos, None)
                .check("vkCreateGraphicsPipelines")
        };

        unsafe {
            vk_ctx.device.destroy_shader_module(vertex_shader, None);
            vk_ctx.device.destroy_shader_module(fragment_shader, None);
        }

        Ok(Self { layout, pipeline: pipeline?[0], stages })
    }

    pub fn bind(&self, ctx: &RenderContext, sets: &[vk::DescriptorSet]) {
        unsafe {
            ctx.device.cmd_bind_pipeline(ctx.command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            if !sets.is_empty() {
                ctx.device.cmd_bind_descriptor_sets(
                    ctx.command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.layout,
                    0,
                    sets,
                    &[],
                );
            }
        }
    }

    pub fn push<T: Copy>(&self, ctx: &RenderContext, data: &T) {
        push_constants::push(ctx.device, ctx.command_buffer, self.layout, self.stages, data);
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// A compute shader with its layout; every ray-traced pass is one of these.
#[derive(Clone, Debug)]
pub struct ComputePipeline {
    pub name:     &'static str,
    pub layout:   vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl ComputePipeline {
    pub fn new(
        vk_ctx: VulkanContext,
        shader: &'static str,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
    ) -> Result<Self, VkError> {
        let layout = create_layout(&vk_ctx.device, set_layouts, push_constant_size, vk::ShaderStageFlags::COMPUTE)?;
        let module = vk_ctx.shaders.module(&vk_ctx.device, shader)?;

        let entry_point = CString::new("main").unwrap_or_default();
        let stage = vk::PipelineShaderStageCreateInfoBuilder::new()
            .stage(vk::ShaderStageFlagBits::COMPUTE)
            .module(module)
            .name(&entry_point);
        let pipeline_infos = [vk::ComputePipelineCreateInfoBuilder::new().stage(*stage).layout(layout)];

        let pipeline = unsafe {
            vk_ctx
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &pipeline_infos, None)
                .check("vkCreateComputePipelines")
        };
        unsafe {
            vk_ctx.device.destroy_shader_module(module, None);
        }

        Ok(Self { name: shader, layout, pipeline: pipeline?[0] })
    }

    /// Like [`Self::new`] with the push-constant block sized after `T`.
    pub fn with_push_constants<T>(
        vk_ctx: VulkanContext,
        shader: &'static str,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self, VkError> {
        Self::new(vk_ctx, shader, set_layouts, std::mem::size_of::<T>() as u32)
    }

    pub fn bind(&self, ctx: &RenderContext, sets: &[vk::DescriptorSet]) {
        unsafe {
            ctx.device.cmd_bind_pipeline(ctx.command_buffer, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            if !sets.is_empty() {
                ctx.device.cmd_bind_descriptor_sets(
                    ctx.command_buffer,
                    vk::PipelineBindPoint::COMPUTE,
                    self.layout,
                    0,
                    sets,
                    &[],
                );
            }
        }
    }

    pub fn push<T: Copy>(&self, ctx: &RenderContext, data: &T) {
        push_constants::push(ctx.device, ctx.command_buffer, self.layout, vk::ShaderStageFlags::COMPUTE, data);
    }

    pub fn dispatch(&self, ctx: &RenderContext, x: u32, y: u32, z: u32) {
        unsafe {
            ctx.device.cmd_dispatch(ctx.command_buffer, x, y, z);
        }
    }

    pub fn dispatch_indirect(&self, ctx: &RenderContext, args: vk::Buffer) {
        unsafe {
            ctx.device.cmd_dispatch_indirect(ctx.command_buffer, args, 0);
        }
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
