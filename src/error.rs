use hybridtrace_scene::SceneError;
use hybridtrace_vk::VkError;
use thiserror::Error;

use crate::options::OptionsError;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Vulkan(#[from] VkError),
    #[error("cannot load assets: {0}")]
    Asset(#[from] SceneError),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("{0}")]
    Startup(String),
}

impl RenderError {
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::Vulkan(error) | Self::Asset(SceneError::Vulkan(error)) => error.is_device_lost(),
            _ => false,
        }
    }

    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::Vulkan(error) if error.is_out_of_date())
    }

    /// 2 for assets that failed to load, 1 for every other fatal error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Asset(SceneError::Vulkan(_)) => 1,
            Self::Asset(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use erupt::vk;

    use super::*;

    #[test]
    fn exit_codes() {
        let lost = RenderError::from(VkError::Call { call: "vkQueueSubmit", result: vk::Result::ERROR_DEVICE_LOST });
        assert!(lost.is_device_lost());
        assert_eq!(lost.exit_code(), 1);

        let missing = RenderError::from(SceneError::malformed("no meshes"));
        assert_eq!(missing.exit_code(), 2);

        let upload = RenderError::from(SceneError::Vulkan(VkError::Allocation("out of memory".into())));
        assert_eq!(upload.exit_code(), 1);

        let shader = RenderError::from(VkError::ShaderNotFound { name: "taa.comp.spv".into(), path: PathBuf::new() });
        assert_eq!(shader.exit_code(), 1);
    }

    #[test]
    fn out_of_date_is_recoverable() {
        let error = RenderError::from(VkError::Call { call: "vkAcquireNextImageKHR", result: vk::Result::ERROR_OUT_OF_DATE_KHR });
        assert!(error.is_out_of_date());
        assert!(!error.is_device_lost());
    }
}
