// Shader loading
//
// Vulkan consumes SPIR-V as 32-bit words. Bytes come either from disk
// (compiled by build.rs) or from memory, and are validated before any
// pipeline sees them.

use std::io::Cursor;
use std::path::Path;
use crate::error::{FrameError, Result};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decodes SPIR-V bytes into words, rejecting truncated or foreign input.
pub fn decode_spirv(name: &str, bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| FrameError::Shader(format!("{}: {}", name, e)))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(FrameError::Shader(format!(
            "{}: bad magic number {:#010x}",
            name, other
        ))),
        None => Err(FrameError::Shader(format!("{}: empty module", name))),
    }
}

/// Vertex and fragment stages for the one graphics pipeline.
#[derive(Debug, Clone)]
pub struct ShaderCode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderCode {
    pub fn from_spirv(vertex: &[u8], fragment: &[u8]) -> Result<Self> {
        Ok(Self {
            vertex: decode_spirv("vertex shader", vertex)?,
            fragment: decode_spirv("fragment shader", fragment)?,
        })
    }

    /// Loads `<stem>.vert.spv` and `<stem>.frag.spv` from `dir`.
    pub fn load(dir: impl AsRef<Path>, stem: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |suffix: &str| {
            let path = dir.join(format!("{}.{}.spv", stem, suffix));
            std::fs::read(&path)
                .map_err(|e| FrameError::Shader(format!("failed to read {:?}: {}", path, e)))
        };

        let shaders = Self::from_spirv(&read("vert")?, &read("frag")?)?;
        log::info!("Loaded shaders '{}' from {:?}", stem, dir);
        Ok(shaders)
    }
}

#[cfg(test)]
pub(crate) fn test_module() -> Vec<u8> {
    // Header only: magic, version 1.0, generator, bound, schema.
    [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}
