// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The bytes come from disk as an opaque
// blob; ash::util::read_spv takes care of word alignment and endianness.

use super::device::VulkanDevice;
use super::error::{RenderError, Result, VkResultExt};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// Read a compiled shader from disk.
pub fn read_shader_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|source| {
        log::error!("Failed to load {:?}: {}", path, source);
        RenderError::ShaderRead {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Decode SPIR-V bytes into 32-bit words.
pub fn spirv_words(code: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(code)).map_err(RenderError::InvalidSpirv)
}

/// Wrap SPIR-V bytes in a shader module.
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = spirv_words(code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.device.create_shader_module(&create_info, None) }.creating("shader module")
}
