// Descriptor layout and sets
//
// Binding 0 is the per-image uniform block (vertex stage), binding 1 the
// combined image sampler (fragment stage). Sets are allocated per
// (swapchain image, texture) pair so a frame never touches a uniform
// buffer that another in-flight image is reading.

use ash::vk;
use std::sync::Arc;
use super::buffer::{Sampler, Texture, UniformBuffers};
use super::gpu::{label, DescriptorBinding, DescriptorWrite, Gpu};
use crate::error::{FrameError, Result};

pub const BINDINGS: [DescriptorBinding; 2] = [
    DescriptorBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        stages: vk::ShaderStageFlags::VERTEX,
    },
    DescriptorBinding {
        binding: 1,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        stages: vk::ShaderStageFlags::FRAGMENT,
    },
];

pub struct DescriptorLayout {
    gpu: Arc<dyn Gpu>,
    handle: vk::DescriptorSetLayout,
}

impl DescriptorLayout {
    pub fn new(gpu: Arc<dyn Gpu>) -> Result<Self> {
        let handle = gpu.create_descriptor_set_layout(&BINDINGS)?;
        label(gpu.as_ref(), handle, "uniforms + texture");
        Ok(Self { gpu, handle })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for DescriptorLayout {
    fn drop(&mut self) {
        self.gpu.destroy_descriptor_set_layout(self.handle);
    }
}

pub struct DescriptorSets {
    gpu: Arc<dyn Gpu>,
    pool: vk::DescriptorPool,
    /// Row-major: `sets[image * texture_count + texture]`.
    sets: Vec<vk::DescriptorSet>,
    texture_count: usize,
}

impl DescriptorSets {
    pub fn new(
        gpu: Arc<dyn Gpu>,
        layout: &DescriptorLayout,
        uniforms: &UniformBuffers,
        textures: &[Texture],
        sampler: &Sampler,
    ) -> Result<Self> {
        if textures.is_empty() {
            return Err(FrameError::invalid_state("at least one texture is required"));
        }
        // A pool needs at least one set.
        if uniforms.is_empty() {
            return Err(FrameError::invalid_state("no uniform buffers to bind"));
        }

        let count = (uniforms.len() * textures.len()) as u32;
        let pool = gpu.create_descriptor_pool(count, count, count)?;
        let mut sets = Self {
            gpu,
            pool,
            sets: Vec::new(),
            texture_count: textures.len(),
        };

        sets.sets = sets.gpu.allocate_descriptor_sets(pool, layout.handle(), count)?;

        for image in 0..uniforms.len() {
            let uniform = uniforms.buffer(image as u32)?;
            for (t, texture) in textures.iter().enumerate() {
                sets.gpu.write_descriptor_set(&DescriptorWrite {
                    set: sets.sets[image * textures.len() + t],
                    uniform_buffer: uniform.handle(),
                    uniform_range: uniform.size(),
                    image_view: texture.view(),
                    sampler: sampler.handle(),
                });
            }
        }

        log::debug!(
            "Allocated {} descriptor sets ({} images x {} textures)",
            count,
            uniforms.len(),
            textures.len()
        );
        Ok(sets)
    }

    /// The set binding `image_index`'s uniforms and texture `texture`.
    pub fn get(&self, image_index: u32, texture: usize) -> Result<vk::DescriptorSet> {
        if texture >= self.texture_count {
            return Err(FrameError::invalid_state(format!("no texture {}", texture)));
        }
        self.sets
            .get(image_index as usize * self.texture_count + texture)
            .copied()
            .ok_or_else(|| FrameError::invalid_state(format!("no descriptor set for image {}", image_index)))
    }
}

impl Drop for DescriptorSets {
    fn drop(&mut self) {
        // Frees the sets too.
        self.gpu.destroy_descriptor_pool(self.pool);
    }
}
