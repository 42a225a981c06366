use erupt::{vk, DeviceLoader};

use crate::{error::VkResultExt, VkError, VulkanContext};

/// Records `execute_commands` into a throwaway command buffer and blocks until the GPU has run it.
pub fn immediate_submit<F>(vk_ctx: VulkanContext, execute_commands: F) -> Result<(), VkError>
where
    F: FnOnce(&DeviceLoader, vk::CommandBuffer),
{
    let allocate_info = vk::CommandBufferAllocateInfoBuilder::new()
        .command_pool(vk_ctx.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let begin_info =
        vk::CommandBufferBeginInfoBuilder::new().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    let command_buffers = unsafe {
        let command_buffer =
            vk_ctx.device.allocate_command_buffers(&allocate_info).check("vkAllocateCommandBuffers")?[0];
        vk_ctx.device.begin_command_buffer(command_buffer, &begin_info).check("vkBeginCommandBuffer")?;
        execute_commands(&vk_ctx.device, command_buffer);
        vk_ctx.device.end_command_buffer(command_buffer).check("vkEndCommandBuffer")?;
        [command_buffer]
    };

    let submit_info = vk::SubmitInfoBuilder::new().command_buffers(&command_buffers);
    unsafe {
        vk_ctx
            .device
            .queue_submit(vk_ctx.queue, &[submit_info], vk_ctx.upload_fence)
            .check("vkQueueSubmit")?;
        vk_ctx.device.wait_for_fences(&[vk_ctx.upload_fence], true, u64::MAX).check("vkWaitForFences")?;
        vk_ctx.device.reset_fences(&[vk_ctx.upload_fence]).check("vkResetFences")?;
        vk_ctx.device.free_command_buffers(vk_ctx.command_pool, &command_buffers);
    }
    Ok(())
}

/// Number of workgroups needed to cover `extent` with `tile_width × tile_height` tiles.
pub fn dispatch_size(extent: vk::Extent2D, tile_width: u32, tile_height: u32) -> (u32, u32) {
    (
        num_integer::div_ceil(extent.width, tile_width),
        num_integer::div_ceil(extent.height, tile_height),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_partial_tiles() {
        let extent = vk::Extent2D { width: 1920, height: 1080 };
        assert_eq!(dispatch_size(extent, 8, 8), (240, 135));
        assert_eq!(dispatch_size(extent, 8, 4), (240, 270));
        let odd = vk::Extent2D { width: 641, height: 359 };
        assert_eq!(dispatch_size(odd, 8, 8), (81, 45));
    }
}
