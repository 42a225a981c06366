use std::path::PathBuf;

use erupt::{utils::VulkanResult, vk};
use thiserror::Error;
use vk_mem_erupt as vma;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("{call} failed with {result:?}")]
    Call { call: &'static str, result: vk::Result },
    #[error("memory allocation failed: {0}")]
    Allocation(String),
    #[error("shader module `{name}` not found at {}", path.display())]
    ShaderNotFound { name: String, path: PathBuf },
    #[error("shader module `{0}` is not valid SPIR-V")]
    ShaderDecode(String),
}

impl VkError {
    pub fn result(&self) -> Option<vk::Result> {
        match self {
            VkError::Call { result, .. } => Some(*result),
            _ => None,
        }
    }

    pub fn is_device_lost(&self) -> bool {
        self.result() == Some(vk::Result::ERROR_DEVICE_LOST)
    }

    /// Swap-chain no longer matches the surface; the frame can be recovered by rebuilding.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self.result(),
            Some(r) if r == vk::Result::ERROR_OUT_OF_DATE_KHR || r == vk::Result::SUBOPTIMAL_KHR
        )
    }
}

impl From<vma::Error> for VkError {
    fn from(error: vma::Error) -> Self {
        VkError::Allocation(format!("{:?}", error))
    }
}

pub trait VkResultExt<T> {
    fn check(self, call: &'static str) -> Result<T, VkError>;
}

impl<T> VkResultExt<T> for VulkanResult<T> {
    fn check(self, call: &'static str) -> Result<T, VkError> {
        self.result().map_err(|result| VkError::Call { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_device_lost() {
        let error = VkError::Call { call: "vkQueueSubmit2", result: vk::Result::ERROR_DEVICE_LOST };
        assert!(error.is_device_lost());
        assert!(!error.is_out_of_date());
    }

    #[test]
    fn classifies_out_of_date_and_suboptimal() {
        let out_of_date = VkError::Call { call: "vkAcquireNextImageKHR", result: vk::Result::ERROR_OUT_OF_DATE_KHR };
        let suboptimal = VkError::Call { call: "vkQueuePresentKHR", result: vk::Result::SUBOPTIMAL_KHR };
        assert!(out_of_date.is_out_of_date());
        assert!(suboptimal.is_out_of_date());
        assert!(!VkError::Allocation("oom".into()).is_out_of_date());
    }
}
