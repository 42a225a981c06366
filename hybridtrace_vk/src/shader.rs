use std::path::{Path, PathBuf};

use erupt::{vk, DeviceLoader};

use crate::{error::VkResultExt, VkError};

/// Directory of precompiled SPIR-V modules, looked up by file name.
#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    root: PathBuf,
}

impl ShaderLibrary {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn load(&self, name: &str) -> Result<Vec<u8>, VkError> {
        let path = self.path_of(name);
        std::fs::read(&path).map_err(|_| VkError::ShaderNotFound { name: name.to_owned(), path })
    }

    pub fn module(&self, device: &DeviceLoader, name: &str) -> Result<vk::ShaderModule, VkError> {
        let bytes = self.load(name)?;
        log::trace!("Creating shader module {}", name);
        make_shader_module(device, name, &bytes)
    }
}

pub fn make_shader_module(device: &DeviceLoader, name: &str, spv_bytes: &[u8]) -> Result<vk::ShaderModule, VkError> {
    let spv = erupt::utils::decode_spv(spv_bytes).map_err(|_| VkError::ShaderDecode(name.to_owned()))?;
    let module_info = vk::ShaderModuleCreateInfoBuilder::new().code(&spv);
    unsafe { device.create_shader_module(&module_info, None).check("vkCreateShaderModule") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_module_reports_its_path() {
        let library = ShaderLibrary::new("/nonexistent/shaders");
        match library.load("gbuffer.vert.spv") {
            Err(VkError::ShaderNotFound { name, path }) => {
                assert_eq!(name, "gbuffer.vert.spv");
                assert_eq!(path, PathBuf::from("/nonexistent/shaders/gbuffer.vert.spv"));
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }
}
