use erupt::{vk, DeviceLoader};

use crate::{error::VkResultExt, VkError};

pub const DEFAULT_FRAME_RING: usize = 3;

/// Per-slot recording state. The slot's fence lives in the swapchain, which
/// waits on it when the slot's image is acquired.
#[derive(Copy, Clone, Debug)]
pub struct FrameSlot {
    pub command_buffer:  vk::CommandBuffer,
    pub render_finished: vk::Semaphore,
}

pub struct FrameRing {
    slots: Vec<FrameSlot>,
}

impl FrameRing {
    pub fn new(device: &DeviceLoader, command_pool: vk::CommandPool, size: usize) -> Result<Self, VkError> {
        let allocate_info = vk::CommandBufferAllocateInfoBuilder::new()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(size as u32);
        let command_buffers =
            unsafe { device.allocate_command_buffers(&allocate_info).check("vkAllocateCommandBuffers")? };

        let slots = command_buffers
            .iter()
            .map(|&command_buffer| {
                let create_info = vk::SemaphoreCreateInfoBuilder::new();
                let render_finished =
                    unsafe { device.create_semaphore(&create_info, None).check("vkCreateSemaphore")? };
                Ok(FrameSlot { command_buffer, render_finished })
            })
            .collect::<Result<Vec<_>, VkError>>()?;

        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, current_frame: usize) -> FrameSlot {
        self.slots[current_frame % self.slots.len()]
    }

    pub fn begin(&self, device: &DeviceLoader, current_frame: usize) -> Result<FrameSlot, VkError> {
        let slot = self.slot(current_frame);
        let begin_info =
            vk::CommandBufferBeginInfoBuilder::new().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(slot.command_buffer, vk::CommandBufferResetFlags::empty())
                .check("vkResetCommandBuffer")?;
            device.begin_command_buffer(slot.command_buffer, &begin_info).check("vkBeginCommandBuffer")?;
        }
        Ok(slot)
    }

    pub fn destroy(&self, device: &DeviceLoader, command_pool: vk::CommandPool) {
        let command_buffers: Vec<_> = self.slots.iter().map(|slot| slot.command_buffer).collect();
        unsafe {
            for slot in self.slots.iter() {
                device.destroy_semaphore(slot.render_finished, None);
            }
            device.free_command_buffers(command_pool, &command_buffers);
        }
    }
}

/// Frame bookkeeping shared by every pass.
#[derive(Copy, Clone, Debug, Default)]
pub struct FrameCounter {
    /// Frames recorded since startup.
    frame_number: u64,
    /// Frames accumulated since the last reset.
    num_frames:   u32,
    ping_pong:    usize,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    pub fn ping_pong(&self) -> usize {
        self.ping_pong
    }

    pub fn ring_index(&self, ring_size: usize) -> usize {
        (self.frame_number % ring_size as u64) as usize
    }

    /// Called once the frame's command buffer has been ended.
    pub fn advance(&mut self) {
        self.frame_number += 1;
        self.num_frames = self.num_frames.saturating_add(1);
        self.ping_pong ^= 1;
    }

    /// Restarts accumulation. Parity is left alone so history slots stay consistent.
    pub fn reset(&mut self) {
        self.num_frames = 0;
    }

    /// Returns to parity 0 once the history pairs have been rewound to match.
    pub fn rewind_parity(&mut self) {
        self.ping_pong = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_index_cycles_through_slots() {
        let mut counter = FrameCounter::new();
        let indices: Vec<_> = (0..7)
            .map(|_| {
                let index = counter.ring_index(DEFAULT_FRAME_RING);
                counter.advance();
                index
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn parity_flips_every_frame() {
        let mut counter = FrameCounter::new();
        assert_eq!(counter.ping_pong(), 0);
        counter.advance();
        assert_eq!(counter.ping_pong(), 1);
        counter.advance();
        assert_eq!(counter.ping_pong(), 0);
    }

    #[test]
    fn reset_clears_accumulation_only() {
        let mut counter = FrameCounter::new();
        for _ in 0..5 {
            counter.advance();
        }
        counter.reset();
        assert_eq!(counter.num_frames(), 0);
        assert_eq!(counter.frame_number(), 5);
        assert_eq!(counter.ping_pong(), 1);
    }

    #[test]
    fn rewinding_keeps_the_frame_number() {
        let mut counter = FrameCounter::new();
        for _ in 0..3 {
            counter.advance();
        }
        counter.rewind_parity();
        assert_eq!(counter.ping_pong(), 0);
        assert_eq!((counter.frame_number(), counter.num_frames()), (3, 3));
    }
}
