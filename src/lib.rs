pub mod camera;
pub mod error;
pub mod options;
pub mod renderer;
pub mod taa;
pub mod tonemap;

use std::{
    ffi::CStr,
    sync::{Arc, RwLock},
    time::Instant,
};

use anyhow::Context;
use erupt::{utils::surface, vk, DeviceLoader, EntryLoader, ExtendableFrom, InstanceLoader};
use erupt_bootstrap as vkb;
use hybridtrace_vk::{debug::debug_callback, shader::ShaderLibrary, Access, VkResultExt, VulkanContext};
use vk_mem_erupt as vma;
use winit::window::Window;

use crate::{
    camera::{CameraController, Command},
    error::RenderError,
    options::{Options, RendererSettings},
    renderer::{PresentTarget, Renderer},
};

pub struct App {
    _entry:          EntryLoader,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    instance:        Option<Arc<InstanceLoader>>,
    device:          Option<Arc<DeviceLoader>>,
    _device_meta:    vkb::DeviceMetadata,
    queue:           vk::Queue,
    surface:         vk::SurfaceKHR,
    swapchain:       vkb::Swapchain,
    command_pool:    vk::CommandPool,
    upload_fence:    vk::Fence,
    allocator:       Option<Arc<RwLock<vma::Allocator>>>,
    renderer:        Option<Renderer>,
    pub controller:  CameraController,
    last_update:     Instant,
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let [width, height]: [u32; 2] = window.inner_size().into();
    vk::Extent2D { width, height }
}

impl App {
    pub fn new(window: &Window, options: &Options) -> anyhow::Result<Self> {
        let config = options.context;
        let entry = EntryLoader::new()?;
        let (instance, debug_messenger, instance_meta) = {
            let builder = vkb::InstanceBuilder::new()
                .request_api_version(1, 3)
                .require_surface_extensions(window)
                .context("Cannot get surface extensions")?
                .app_name("HybridTrace")?;
            let builder = if config.validation {
                builder.validation_layers(vkb::ValidationLayers::Request).request_debug_messenger(
                    vkb::DebugMessenger::Custom {
                        callback:          debug_callback as _,
                        user_data_pointer: std::ptr::null_mut(),
                    },
                )
            } else {
                builder
            };
            let (instance, debug_messenger, instance_meta) = unsafe { builder.build(&entry)? };
            (Arc::new(instance), debug_messenger, instance_meta)
        };

        let surface = unsafe { surface::create_surface(&instance, window, None).check("vkCreateSurfaceKHR")? };

        let (device, device_meta, queue, queue_family) = {
            let graphics_present = vkb::QueueFamilyCriteria::graphics_present();
            let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12FeaturesBuilder::new()
                .buffer_device_address(true)
                .descriptor_indexing(true)
                .runtime_descriptor_array(true)
                .descriptor_binding_partially_bound(true)
                .shader_sampled_image_array_non_uniform_indexing(true)
                .scalar_block_layout(true);
            let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13FeaturesBuilder::new()
                .dynamic_rendering(true)
                .synchronization2(true);
            let mut acceleration_structure_features =
                vk::PhysicalDeviceAccelerationStructureFeaturesKHRBuilder::new().acceleration_structure(true);
            let mut ray_query_features = vk::PhysicalDeviceRayQueryFeaturesKHRBuilder::new().ray_query(true);
            let device_features = vk::PhysicalDeviceFeatures2Builder::new()
                .features(vk::PhysicalDeviceFeaturesBuilder::new().shader_int64(true).build())
                .extend_from(&mut vulkan_1_2_features)
                .extend_from(&mut vulkan_1_3_features)
                .extend_from(&mut acceleration_structure_features)
                .extend_from(&mut ray_query_features);
            let device_builder = vkb::DeviceBuilder::new()
                .require_version(1, 3)
                .require_extension(vk::KHR_SWAPCHAIN_EXTENSION_NAME)
                .require_extension(vk::KHR_ACCELERATION_STRUCTURE_EXTENSION_NAME)
                .require_extension(vk::KHR_RAY_QUERY_EXTENSION_NAME)
                .require_extension(vk::KHR_DEFERRED_HOST_OPERATIONS_EXTENSION_NAME)
                .queue_family(graphics_present)
                .for_surface(surface)
                .require_features(&device_features);
            let (device, device_meta) = unsafe { device_builder.build(&instance, &instance_meta)? };
            let (queue, queue_family) = device_meta
                .device_queue(&instance, &device, graphics_present, 0)?
                .context("Cannot get graphics present queue")?;
            (Arc::new(device), device_meta, queue, queue_family)
        };

        let properties = unsafe { instance.get_physical_device_properties(device_meta.physical_device()) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!("Using {}", device_name.to_string_lossy());

        let format = {
            let surface_formats = unsafe {
                instance
                    .get_physical_device_surface_formats_khr(device_meta.physical_device(), surface, None)
                    .check("vkGetPhysicalDeviceSurfaceFormatsKHR")?
            };
            let desirable_formats =
                [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM, vk::Format::A8B8G8R8_UNORM_PACK32];
            match *surface_formats.as_slice() {
                [f] if f.format == vk::Format::UNDEFINED => {
                    vk::SurfaceFormatKHR { format: vk::Format::B8G8R8A8_UNORM, color_space: f.color_space }
                }
                _ => surface_formats
                    .iter()
                    .find(|f| desirable_formats.contains(&f.format))
                    .or_else(|| surface_formats.first())
                    .copied()
                    .context("Surface reports no formats")?,
            }
        };

        let swapchain = {
            let mut swapchain_options = vkb::SwapchainOptions::default();
            swapchain_options.format_preference(&[format]);
            swapchain_options.frames_in_flight(config.frame_ring);
            swapchain_options.usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST);
            if config.vsync {
                swapchain_options.present_mode_preference(&[vk::PresentModeKHR::FIFO_KHR]);
            } else {
                swapchain_options.present_mode_preference(&[
                    vk::PresentModeKHR::MAILBOX_KHR,
                    vk::PresentModeKHR::IMMEDIATE_KHR,
                    vk::PresentModeKHR::FIFO_KHR,
                ]);
            }
            vkb::Swapchain::new(swapchain_options, surface, device_meta.physical_device(), &device, window_extent(window))
        };

        let command_pool = {
            let create_info = vk::CommandPoolCreateInfoBuilder::new()
                .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(queue_family);
            unsafe { device.create_command_pool(&create_info, None).check("vkCreateCommandPool")? }
        };

        let upload_fence = {
            let create_info = vk::FenceCreateInfoBuilder::new();
            unsafe { device.create_fence(&create_info, None).check("vkCreateFence")? }
        };

        let allocator = {
            let create_info = vma::AllocatorCreateInfo {
                physical_device:                 device_meta.physical_device(),
                device:                          device.clone(),
                instance:                        instance.clone(),
                flags:                           vma::AllocatorCreateFlags::empty(),
                preferred_large_heap_block_size: 0,
                frame_in_use_count:              0,
                heap_size_limits:                None,
            };
            let allocator = vma::Allocator::new(&create_info).context("Cannot create memory allocator")?;
            Arc::new(RwLock::new(allocator))
        };

        let vk_ctx = VulkanContext {
            device: device.clone(),
            allocator: allocator.clone(),
            queue,
            command_pool,
            upload_fence,
            shaders: Arc::new(ShaderLibrary::new(&options.shaders)),
            debug_markers: config.validation,
        };
        let renderer = Renderer::new(vk_ctx, options, RendererSettings::default(), swapchain.extent())?;

        Ok(Self {
            _entry: entry,
            debug_messenger,
            instance: Some(instance),
            device: Some(device),
            _device_meta: device_meta,
            queue,
            surface,
            swapchain,
            command_pool,
            upload_fence,
            allocator: Some(allocator),
            renderer: Some(renderer),
            controller: CameraController::new(),
            last_update: Instant::now(),
        })
    }

    fn renderer(&mut self) -> Result<&mut Renderer, RenderError> {
        self.renderer.as_mut().ok_or_else(|| RenderError::Startup("renderer already destroyed".to_owned()))
    }

    pub fn apply(&mut self, command: Command) -> Result<(), RenderError> {
        self.renderer()?.apply(command);
        Ok(())
    }

    pub fn resize(&mut self, extent: vk::Extent2D) -> Result<(), RenderError> {
        if extent.width == 0 || extent.height == 0 {
            return Ok(());
        }
        self.swapchain.update(extent);
        self.renderer()?.resize(extent)
    }

    /// Acquires, records, submits and presents one frame.
    pub fn render(&mut self) -> Result<(), RenderError> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f32();
        self.last_update = now;

        let (instance, device) = match (self.instance.as_ref(), self.device.as_ref()) {
            (Some(instance), Some(device)) => (instance.clone(), device.clone()),
            _ => return Err(RenderError::Startup("Vulkan context already destroyed".to_owned())),
        };

        // Waits on the slot's fence before handing it out.
        let acquired = unsafe { self.swapchain.acquire(&instance, &device, u64::MAX).check("vkAcquireNextImageKHR")? };
        let target = PresentTarget {
            image:  self.swapchain.images()[acquired.image_index],
            extent: self.swapchain.extent(),
        };

        let renderer = self.renderer.as_mut().ok_or_else(|| RenderError::Startup("renderer already destroyed".to_owned()))?;
        if renderer.needs_resize(acquired.invalidate_images, target.extent) {
            log::debug!("Swap chain images were recreated, resizing render targets");
            renderer.resize(target.extent)?;
        }
        self.controller.update(&mut renderer.camera, dt);
        let slot = renderer.record_frame(acquired.frame_index, target)?;

        let wait_semaphore = vk::SemaphoreSubmitInfoBuilder::new()
            .semaphore(acquired.ready)
            .stage_mask(Access::ACQUIRED.stage);
        let signal_semaphore = vk::SemaphoreSubmitInfoBuilder::new()
            .semaphore(slot.render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER);
        let command_buffer_info = vk::CommandBufferSubmitInfoBuilder::new().command_buffer(slot.command_buffer);
        let submit_info = vk::SubmitInfo2Builder::new()
            .wait_semaphore_infos(std::slice::from_ref(&wait_semaphore))
            .signal_semaphore_infos(std::slice::from_ref(&signal_semaphore))
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info));
        unsafe {
            device.queue_submit2(self.queue, &[submit_info], acquired.complete).check("vkQueueSubmit2")?;
            self.swapchain
                .queue_present(&device, self.queue, slot.render_finished, acquired.image_index)
                .check("vkQueuePresentKHR")?;
        }
        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        let (instance, device) = match (self.instance.take(), self.device.take()) {
            (Some(instance), Some(device)) => (instance, device),
            _ => return,
        };

        unsafe {
            if let Err(error) = device.device_wait_idle().check("vkDeviceWaitIdle") {
                log::error!("{}", error);
            }

            if let Some(renderer) = self.renderer.take() {
                renderer.destroy();
            }

            device.destroy_fence(self.upload_fence, None);
            device.destroy_command_pool(self.command_pool, None);
            self.swapchain.destroy(&device);

            if let Some(allocator) = self.allocator.take() {
                let mut alc_lock = allocator.write().unwrap();
                alc_lock.destroy();
            }

            instance.destroy_surface_khr(self.surface, None);
            device.destroy_device(None);

            if let Some(debug_messenger) = self.debug_messenger {
                if !debug_messenger.is_null() {
                    instance.destroy_debug_utils_messenger_ext(debug_messenger, None);
                }
            }

            instance.destroy_instance(None);
        }
    }
}
