use std::sync::{Arc, RwLock};

use erupt::{vk, DeviceLoader};
use vk_mem_erupt as vma;

use crate::{VkError, VulkanContext};

#[derive(Clone)]
pub struct AllocatedBuffer<T: Sized> {
    pub buffer:         vk::Buffer,
    pub size:           vk::DeviceSize,
    /// Present when the buffer was created with `SHADER_DEVICE_ADDRESS` usage.
    pub device_address: Option<vk::DeviceAddress>,

    allocator:           Arc<RwLock<vma::Allocator>>,
    allocation:          vma::Allocation,
    pub allocation_info: vma::AllocationInfo,
    _phantom:            std::marker::PhantomData<T>,
}

impl<T: Sized> AllocatedBuffer<T> {
    /// Creates a buffer with room for `len` elements without touching its contents.
    pub fn new(
        vk_ctx: VulkanContext,
        buffer_info: &vk::BufferCreateInfoBuilder,
        usage: vma::MemoryUsage,
        len: usize,
    ) -> Result<Self, VkError> {
        let buffer_size = (std::mem::size_of::<T>() * len.max(1)) as vk::DeviceSize;
        let buffer_info = buffer_info.size(buffer_size);
        let allocation_create_info = vma::AllocationCreateInfo { usage, ..Default::default() };
        let (buffer, allocation, allocation_info) =
            vk_ctx.allocator.read().unwrap().create_buffer(&buffer_info, &allocation_create_info)?;

        let device_address = if buffer_info.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            let address_info = vk::BufferDeviceAddressInfoBuilder::new().buffer(buffer);
            Some(unsafe { vk_ctx.device.get_buffer_device_address(&address_info) })
        } else {
            None
        };

        Ok(Self {
            buffer,
            size: buffer_size,
            device_address,
            allocator: vk_ctx.allocator,
            allocation,
            allocation_info,
            _phantom: Default::default(),
        })
    }

    pub fn with_data(
        vk_ctx: VulkanContext,
        buffer_info: &vk::BufferCreateInfoBuilder,
        usage: vma::MemoryUsage,
        data: &[T],
    ) -> Result<Self, VkError> {
        let this = Self::new(vk_ctx, buffer_info, usage, data.len())?;
        this.set_data(data)?;
        Ok(this)
    }

    /// Device-local storage buffer, optionally addressable from shaders.
    pub fn storage(
        vk_ctx: VulkanContext,
        len: usize,
        extra_usage: vk::BufferUsageFlags,
    ) -> Result<Self, VkError> {
        let buffer_info = vk::BufferCreateInfoBuilder::new()
            .usage(
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | extra_usage,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        Self::new(vk_ctx, &buffer_info, vma::MemoryUsage::GpuOnly, len)
    }

    /// Host-visible uniform buffer holding a single `T`.
    pub fn uniform(vk_ctx: VulkanContext, data: T) -> Result<Self, VkError> {
        let buffer_info = vk::BufferCreateInfoBuilder::new()
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        Self::with_data(vk_ctx, &buffer_info, vma::MemoryUsage::CpuToGpu, std::slice::from_ref(&data))
    }

    pub fn len(&self) -> usize {
        self.size as usize / std::mem::size_of::<T>().max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_data(&self, data: &[T]) -> Result<(), VkError> {
        let buffer_size = std::mem::size_of_val(data);
        assert!(buffer_size as vk::DeviceSize <= self.size, "data does not fit into the buffer");
        let allocator = self.allocator.read().unwrap();
        let buffer_addr = allocator.map_memory(&self.allocation)?;
        assert_ne!(buffer_addr, std::ptr::null_mut());
        unsafe {
            let bytes = std::slice::from_raw_parts(data.as_ptr() as *const u8, buffer_size);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer_addr, buffer_size);
        }
        allocator.unmap_memory(&self.allocation);
        allocator.flush_allocation(&self.allocation, 0, buffer_size);
        Ok(())
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfoBuilder<'static> {
        vk::DescriptorBufferInfoBuilder::new().buffer(self.buffer).offset(0).range(vk::WHOLE_SIZE)
    }

    /// Zeroes the whole buffer; recorded into `command_buffer`.
    pub fn cmd_clear(&self, device: &DeviceLoader, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_fill_buffer(command_buffer, self.buffer, 0, vk::WHOLE_SIZE, 0);
        }
    }

    pub fn destroy(&self) {
        self.allocator.read().unwrap().destroy_buffer(self.buffer, &self.allocation);
    }
}
