// Shader module loading
//
// Shaders are compiled to SPIR-V by build.rs and read from disk at startup.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into aligned words, checking the header magic
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V")?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&magic) => anyhow::bail!("Bad SPIR-V magic number {:#010x}", magic),
        None => anyhow::bail!("Empty SPIR-V module"),
    }
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// Read a compiled shader from `path` and wrap it in a module
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read shader file {:?}", path))?;
    let code = decode_spirv(&bytes).with_context(|| format!("Invalid shader {:?}", path))?;

    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    create_shader_module(device, &code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_spirv_header() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(decode_spirv(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(decode_spirv(&[0u8; 8]).is_err());
        assert!(decode_spirv(&[]).is_err());
    }
}
