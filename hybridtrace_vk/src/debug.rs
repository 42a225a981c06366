use std::ffi::{c_void, CStr, CString};

use erupt::{vk, DeviceLoader};

pub unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagBitsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || severity == vk::DebugUtilsMessageSeverityFlagBitsEXT::VERBOSE_EXT {
        return vk::FALSE;
    }

    let callback_data = &*callback_data;
    let id_name = if callback_data.p_message_id_name.is_null() {
        "unnamed".into()
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };
    let message = if callback_data.p_message.is_null() {
        "".into()
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };
    let message = message.split("| ").last().unwrap_or_default();

    let level = match severity {
        vk::DebugUtilsMessageSeverityFlagBitsEXT::ERROR_EXT => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagBitsEXT::WARNING_EXT => log::Level::Warn,
        _ => log::Level::Debug,
    };
    log::log!(level, "[{}] {}", id_name, message);

    if callback_data.object_count > 0 && !callback_data.p_objects.is_null() {
        let objects = std::slice::from_raw_parts(callback_data.p_objects, callback_data.object_count as _);
        for (i, object) in objects.iter().enumerate() {
            log::log!(level, "  object {}: handle = {:#x}, type = {:?}", i, object.object_handle, object.object_type);
        }
    }

    vk::FALSE
}

/// Debug label range around a group of commands. The range is closed when the
/// marker is dropped, so early returns never leave it open.
pub struct ScopedMarker<'a> {
    device:         &'a DeviceLoader,
    command_buffer: vk::CommandBuffer,
    enabled:        bool,
}

impl<'a> ScopedMarker<'a> {
    pub fn new(device: &'a DeviceLoader, command_buffer: vk::CommandBuffer, name: &str, enabled: bool) -> Self {
        if enabled {
            let label_name = CString::new(name).unwrap_or_default();
            let label = vk::DebugUtilsLabelEXTBuilder::new().label_name(&label_name).color([0.4, 0.7, 0.3, 1.0]);
            unsafe {
                device.cmd_begin_debug_utils_label_ext(command_buffer, &label);
            }
        }
        Self { device, command_buffer, enabled }
    }
}

impl Drop for ScopedMarker<'_> {
    fn drop(&mut self) {
        if self.enabled {
            unsafe {
                self.device.cmd_end_debug_utils_label_ext(self.command_buffer);
            }
        }
    }
}
