use std::path::PathBuf;

use hybridtrace_vk::VkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("cannot read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("cannot parse {}: {source}", path.display())]
    Json { path: PathBuf, source: serde_json::Error },
    #[error("cannot decode image {}: {source}", path.display())]
    Image { path: PathBuf, source: image::ImageError },
    #[error("malformed scene description: {0}")]
    Malformed(String),
    #[error(transparent)]
    Vulkan(#[from] VkError),
}

impl SceneError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}
