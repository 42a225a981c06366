use std::ffi::c_void;

use erupt::{vk, DeviceLoader};

pub fn range(stages: vk::ShaderStageFlags, size: u32) -> vk::PushConstantRangeBuilder<'static> {
    debug_assert!(size % 4 == 0, "push constant block must be a multiple of 4 bytes");
    vk::PushConstantRangeBuilder::new().stage_flags(stages).offset(0).size(size)
}

/// Uploads `data` as the whole push-constant block of `layout`. `T` must be
/// `#[repr(C)]` and match the shader-side declaration field for field.
pub fn push<T: Copy>(
    device: &DeviceLoader,
    command_buffer: vk::CommandBuffer,
    layout: vk::PipelineLayout,
    stages: vk::ShaderStageFlags,
    data: &T,
) {
    unsafe {
        device.cmd_push_constants(
            command_buffer,
            layout,
            stages,
            0,
            std::mem::size_of::<T>() as u32,
            data as *const T as *const c_void,
        );
    }
}
