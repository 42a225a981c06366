use std::sync::{Arc, RwLock};

use erupt::{vk, DeviceLoader};
use vk_mem_erupt as vma;

use crate::{command, error::VkResultExt, AllocatedBuffer, VkError, VulkanContext};

#[derive(Clone)]
pub struct AllocatedImage {
    pub image:             vk::Image,
    pub view:              vk::ImageView,
    /// One single-level view per mip, for passes that sample a specific level.
    pub mip_views:         Vec<vk::ImageView>,
    pub subresource_range: vk::ImageSubresourceRange,
    pub format:            vk::Format,
    pub extent:            vk::Extent3D,
    pub array_layers:      u32,
    pub mip_levels:        u32,

    allocator:           Arc<RwLock<vma::Allocator>>,
    allocation:          vma::Allocation,
    pub allocation_info: vma::AllocationInfo,
}

/// Number of levels in a full mip chain down to 1×1.
pub fn mip_count(extent: vk::Extent2D) -> u32 {
    32 - extent.width.max(extent.height).max(1).leading_zeros()
}

/// Extent of `mip` in a chain whose base level is `extent`.
pub fn mip_extent(extent: vk::Extent2D, mip: u32) -> vk::Extent2D {
    vk::Extent2D { width: (extent.width >> mip).max(1), height: (extent.height >> mip).max(1) }
}

fn gbuffer_usage(format: vk::Format) -> vk::ImageUsageFlags {
    let attachment_usage = if aspect_of(format) == vk::ImageAspectFlags::COLOR {
        vk::ImageUsageFlags::COLOR_ATTACHMENT
    } else {
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
    };
    attachment_usage | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
}

/// Images that can be written by transfers get zero-filled when created.
fn starts_cleared(usage: vk::ImageUsageFlags) -> bool {
    usage.contains(vk::ImageUsageFlags::TRANSFER_DST)
}

fn aspect_of(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

impl AllocatedImage {
    pub fn new(
        vk_ctx: VulkanContext,
        image_info: vk::ImageCreateInfoBuilder,
        layout: Option<vk::ImageLayout>,
        view_type: vk::ImageViewType,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<Self, VkError> {
        let allocation_info = vma::AllocationCreateInfo { usage: vma::MemoryUsage::GpuOnly, ..Default::default() };

        let (image, allocation, allocation_info) = vk_ctx
            .allocator
            .read()
            .unwrap()
            .create_image(&image_info.initial_layout(vk::ImageLayout::UNDEFINED), &allocation_info)?;

        let make_view = |view_type, range: vk::ImageSubresourceRange| {
            let view_info = vk::ImageViewCreateInfoBuilder::new()
                .image(image)
                .view_type(view_type)
                .format(image_info.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(range);
            unsafe { vk_ctx.device.create_image_view(&view_info, None).check("vkCreateImageView") }
        };

        let view = make_view(view_type, subresource_range)?;
        let mip_views = if image_info.mip_levels > 1 {
            (0..image_info.mip_levels)
                .map(|mip| {
                    make_view(vk::ImageViewType::_2D, vk::ImageSubresourceRange {
                        base_mip_level: mip,
                        level_count: 1,
                        ..subresource_range
                    })
                })
                .collect::<Result<Vec<_>, VkError>>()?
        } else {
            vec![view]
        };

        if let Some(layout) = layout {
            let clear = starts_cleared(image_info.usage);
            let aspect_mask = subresource_range.aspect_mask;
            command::immediate_submit(vk_ctx.clone(), |device, command_buffer| unsafe {
                let barrier = |old, new, src_stage, src_access| {
                    vk::ImageMemoryBarrier2Builder::new()
                        .src_stage_mask(src_stage)
                        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                        .src_access_mask(src_access)
                        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
                        .old_layout(old)
                        .new_layout(new)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(image)
                        .subresource_range(subresource_range)
                };
                let insert = |barrier: vk::ImageMemoryBarrier2Builder| {
                    device.cmd_pipeline_barrier2(
                        command_buffer,
                        &vk::DependencyInfoBuilder::new().image_memory_barriers(&[barrier]),
                    );
                };
                if !clear {
                    insert(barrier(
                        vk::ImageLayout::UNDEFINED,
                        layout,
                        vk::PipelineStageFlags2::TOP_OF_PIPE,
                        vk::AccessFlags2::NONE,
                    ));
                    return;
                }

                // History and render targets start out zeroed; depth 0 is the far plane.
                let dst = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
                insert(barrier(vk::ImageLayout::UNDEFINED, dst, vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE));
                if aspect_mask == vk::ImageAspectFlags::COLOR {
                    device.cmd_clear_color_image(
                        command_buffer,
                        image,
                        dst,
                        &vk::ClearColorValue { float32: [0.0; 4] },
                        &[subresource_range.into_builder()],
                    );
                } else {
                    device.cmd_clear_depth_stencil_image(
                        command_buffer,
                        image,
                        dst,
                        &vk::ClearDepthStencilValue { depth: 0.0, stencil: 0 },
                        &[subresource_range.into_builder()],
                    );
                }
                insert(barrier(dst, layout, vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE));
            })?;
        }

        Ok(Self {
            image,
            view,
            mip_views,
            subresource_range,
            format: image_info.format,
            extent: image_info.extent,
            array_layers: image_info.array_layers,
            mip_levels: image_info.mip_levels,
            allocator: vk_ctx.allocator,
            allocation,
            allocation_info,
        })
    }

    fn colour_range(mip_levels: u32, array_layers: u32) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRangeBuilder::new()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(mip_levels)
            .base_array_layer(0)
            .layer_count(array_layers)
            .build()
    }

    pub fn texture(
        vk_ctx: VulkanContext,
        format: vk::Format,
        extent: vk::Extent3D,
        view_type: vk::ImageViewType,
        mip_levels: u32,
        array_layers: u32,
    ) -> Result<Self, VkError> {
        let flags = if view_type == vk::ImageViewType::CUBE {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfoBuilder::new()
            .flags(flags)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .format(format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(array_layers)
            .samples(vk::SampleCountFlagBits::_1)
            .image_type(vk::ImageType::_2D);

        let range = Self::colour_range(mip_levels, array_layers);
        Self::new(vk_ctx, image_info, Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL), view_type, range)
    }

    pub fn texture_with_data<T>(
        vk_ctx: VulkanContext,
        format: vk::Format,
        extent: vk::Extent3D,
        view_type: vk::ImageViewType,
        array_layers: u32,
        texture_data: &[T],
    ) -> Result<Self, VkError> {
        let this = Self::texture(vk_ctx.clone(), format, extent, view_type, 1, array_layers)?;
        this.set_data(vk_ctx, texture_data)?;
        Ok(this)
    }

    /// Compute-written image; starts zero-filled in `layout`.
    pub fn storage(
        vk_ctx: VulkanContext,
        format: vk::Format,
        extent: vk::Extent2D,
        layout: vk::ImageLayout,
    ) -> Result<Self, VkError> {
        let image_info = vk::ImageCreateInfoBuilder::new()
            .usage(
                vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .format(format)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .array_layers(1)
            .mip_levels(1)
            .samples(vk::SampleCountFlagBits::_1)
            .image_type(vk::ImageType::_2D);

        Self::new(vk_ctx, image_info, Some(layout), vk::ImageViewType::_2D, Self::colour_range(1, 1))
    }

    /// Zero-filled render target with a full mip chain, sampled by later passes.
    /// History pairs start with one slot in `SHADER_READ_ONLY_OPTIMAL` and one in `GENERAL`.
    pub fn gbuffer(
        vk_ctx: VulkanContext,
        format: vk::Format,
        extent: vk::Extent2D,
        layout: vk::ImageLayout,
    ) -> Result<Self, VkError> {
        let mip_levels = mip_count(extent);
        let image_info = vk::ImageCreateInfoBuilder::new()
            .usage(gbuffer_usage(format))
            .format(format)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .array_layers(1)
            .mip_levels(mip_levels)
            .samples(vk::SampleCountFlagBits::_1)
            .image_type(vk::ImageType::_2D);

        let range = vk::ImageSubresourceRangeBuilder::new()
            .aspect_mask(aspect_of(format))
            .base_mip_level(0)
            .level_count(mip_levels)
            .base_array_layer(0)
            .layer_count(1)
            .build();

        Self::new(vk_ctx, image_info, Some(layout), vk::ImageViewType::_2D, range)
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D { width: self.extent.width, height: self.extent.height }
    }

    pub fn mip_range(&self, mip: u32) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange { base_mip_level: mip, level_count: 1, ..self.subresource_range }
    }

    pub fn mip_view(&self, mip: u32) -> vk::ImageView {
        self.mip_views[(mip as usize).min(self.mip_views.len() - 1)]
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        unsafe {
            for &view in self.mip_views.iter().filter(|&&v| v != self.view) {
                device.destroy_image_view(view, None);
            }
            device.destroy_image_view(self.view, None);
        }
        self.allocator.read().unwrap().destroy_image(self.image, &self.allocation);
    }

    /// Uploads tightly packed texel data into mip 0 of every layer.
    pub fn set_data<T>(&self, vk_ctx: VulkanContext, data: &[T]) -> Result<(), VkError> {
        let image_buffer = {
            let buffer_info = vk::BufferCreateInfoBuilder::new()
                .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            AllocatedBuffer::with_data(vk_ctx.clone(), &buffer_info, vma::MemoryUsage::CpuOnly, data)?
        };

        let layers = vk::ImageSubresourceLayersBuilder::new()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(self.array_layers)
            .build();

        let result = command::immediate_submit(vk_ctx, |device, command_buffer| unsafe {
            device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfoBuilder::new().image_memory_barriers(&[vk::ImageMemoryBarrier2Builder::new()
                    .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                    .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                    .src_access_mask(vk::AccessFlags2::NONE)
                    .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(self.image)
                    .subresource_range(self.subresource_range)]),
            );
            device.cmd_copy_buffer_to_image2(
                command_buffer,
                &vk::CopyBufferToImageInfo2Builder::new()
                    .src_buffer(image_buffer.buffer)
                    .dst_image(self.image)
                    .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .regions(&[vk::BufferImageCopy2Builder::new()
                        .buffer_offset(0)
                        .buffer_row_length(0)
                        .buffer_image_height(0)
                        .image_offset(vk::Offset3D::default())
                        .image_subresource(layers)
                        .image_extent(self.extent)]),
            );
            device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfoBuilder::new().image_memory_barriers(&[vk::ImageMemoryBarrier2Builder::new()
                    .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                    .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER)
                    .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags2::SHADER_SAMPLED_READ)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(self.image)
                    .subresource_range(self.subresource_range)]),
            );
        });

        image_buffer.destroy();
        result
    }
}

/// Destroys every image in `images`; convenience for pass teardown.
pub fn destroy_all<'a>(device: &DeviceLoader, images: impl IntoIterator<Item = &'a AllocatedImage>) {
    images.into_iter().for_each(|image| image.destroy(device));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mip_chain_reaches_one_texel() {
        assert_eq!(mip_count(vk::Extent2D { width: 1, height: 1 }), 1);
        assert_eq!(mip_count(vk::Extent2D { width: 1920, height: 1080 }), 11);
        assert_eq!(mip_count(vk::Extent2D { width: 1024, height: 16 }), 11);
        assert_eq!(mip_count(vk::Extent2D { width: 1280, height: 720 }), 11);
    }

    #[test]
    fn mip_extents_never_collapse_to_zero() {
        let base = vk::Extent2D { width: 1920, height: 1080 };
        let dims = |mip| {
            let extent = mip_extent(base, mip);
            (extent.width, extent.height)
        };
        assert_eq!(dims(1), (960, 540));
        assert_eq!(dims(10), (1, 1));
        assert_eq!(dims(11), (1, 1));
    }

    #[test]
    fn gbuffer_targets_start_cleared() {
        for format in [vk::Format::R16G16B16A16_SFLOAT, vk::Format::D32_SFLOAT] {
            assert!(starts_cleared(gbuffer_usage(format)));
        }
        assert!(gbuffer_usage(vk::Format::D32_SFLOAT).contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!starts_cleared(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE));
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        assert_eq!(aspect_of(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_of(vk::Format::R16G16B16A16_SFLOAT), vk::ImageAspectFlags::COLOR);
    }
}
