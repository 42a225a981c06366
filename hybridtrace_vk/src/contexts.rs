use std::sync::{Arc, RwLock};

use erupt::{vk, DeviceLoader};
use vk_mem_erupt as vma;

use crate::{debug::ScopedMarker, shader::ShaderLibrary};

#[derive(Clone)]
pub struct VulkanContext {
    pub device:          Arc<DeviceLoader>,
    pub allocator:       Arc<RwLock<vma::Allocator>>,
    pub queue:           vk::Queue,
    pub command_pool:    vk::CommandPool,
    pub upload_fence:    vk::Fence,
    pub shaders:         Arc<ShaderLibrary>,
    pub debug_markers:   bool,
}

/// Everything a pass needs to record its commands for the current frame.
#[derive(Copy, Clone)]
pub struct RenderContext<'a> {
    pub device:         &'a DeviceLoader,
    pub command_buffer: vk::CommandBuffer,
    /// Parity of the double-buffered resources: passes read `slot[ping_pong]`
    /// and write `slot[ping_pong ^ 1]`.
    pub ping_pong:      usize,
    /// Index into the command-buffer ring.
    pub current_frame:  usize,
    pub render_extent:  vk::Extent2D,
    pub output_extent:  vk::Extent2D,
    pub debug_markers:  bool,
}

impl<'a> RenderContext<'a> {
    pub fn marker(&self, name: &str) -> ScopedMarker<'a> {
        ScopedMarker::new(self.device, self.command_buffer, name, self.debug_markers)
    }
}
