// Buffers, textures and samplers
//
// Everything backed by allocator memory. Device-local data goes through a
// host-visible staging buffer and a one-time transfer submission; the
// staging buffer is released once the queue has drained.

use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use super::command::CommandPool;
use super::gpu::{label, Gpu, ImageDesc, ImageTransition};
use crate::error::{FrameError, Result};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// A buffer and the memory bound to it.
pub struct DeviceBuffer {
    gpu: Arc<dyn Gpu>,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    location: MemoryLocation,
}

impl DeviceBuffer {
    pub fn new(
        gpu: Arc<dyn Gpu>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        if size == 0 {
            return Err(FrameError::invalid_state(format!("buffer '{}' would be empty", name)));
        }
        let buffer = gpu.create_buffer(size, usage, location)?;
        label(gpu.as_ref(), buffer, name);
        Ok(Self {
            gpu,
            buffer,
            size,
            location,
        })
    }

    /// Host-visible buffer filled with `data`.
    pub fn with_data(gpu: Arc<dyn Gpu>, usage: vk::BufferUsageFlags, data: &[u8], name: &str) -> Result<Self> {
        let buffer = Self::new(gpu, data.len() as vk::DeviceSize, usage, MemoryLocation::CpuToGpu, name)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Device-local buffer filled through a staging copy. Blocks until the
    /// copy has completed.
    pub fn device_local(
        gpu: Arc<dyn Gpu>,
        commands: &CommandPool,
        usage: vk::BufferUsageFlags,
        data: &[u8],
        name: &str,
    ) -> Result<Self> {
        let staging = Self::with_data(
            gpu.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
            &format!("{} staging", name),
        )?;
        let buffer = Self::new(
            gpu,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let (src, dst, size) = (staging.buffer, buffer.buffer, staging.size);
        commands.run_one_time(|gpu, cmd| gpu.cmd_copy_buffer(cmd, src, dst, size))?;

        log::debug!("Uploaded {} bytes to '{}'", size, name);
        Ok(buffer)
    }

    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        if self.location != MemoryLocation::CpuToGpu {
            return Err(FrameError::invalid_state("buffer is not host visible"));
        }
        if offset + data.len() as vk::DeviceSize > self.size {
            return Err(FrameError::invalid_state(format!(
                "write of {} bytes at {} overflows a {} byte buffer",
                data.len(),
                offset,
                self.size
            )));
        }
        self.gpu.write_buffer(self.buffer, offset, data)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.gpu.destroy_buffer(self.buffer);
    }
}

/// One host-visible uniform buffer per swapchain image.
pub struct UniformBuffers {
    buffers: Vec<DeviceBuffer>,
}

impl UniformBuffers {
    pub fn new(gpu: Arc<dyn Gpu>, image_count: usize, block_size: vk::DeviceSize) -> Result<Self> {
        let buffers = (0..image_count)
            .map(|i| {
                DeviceBuffer::new(
                    gpu.clone(),
                    block_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    &format!("uniforms [image {}]", i),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { buffers })
    }

    pub fn buffer(&self, image_index: u32) -> Result<&DeviceBuffer> {
        self.buffers.get(image_index as usize).ok_or_else(|| {
            FrameError::invalid_state(format!("no uniform buffer for image {}", image_index))
        })
    }

    /// Overwrites the block of `image_index`. Call only after waiting on the
    /// frame slot's fence: that wait, plus the presentation engine releasing
    /// the image, orders this write after earlier frames' reads. The acquire
    /// on its own does not.
    pub fn write<T: bytemuck::Pod>(&self, image_index: u32, block: &T) -> Result<()> {
        self.buffer(image_index)?.write(0, bytemuck::bytes_of(block))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Access and stage masks for the layout changes textures go through.
fn transition(image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> ImageTransition {
    use vk::ImageLayout as L;

    let (src_access, src_stage) = match old_layout {
        L::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        L::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        _ => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
    };
    let (dst_access, dst_stage) = match new_layout {
        L::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        _ => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
    };

    ImageTransition {
        image,
        aspect: vk::ImageAspectFlags::COLOR,
        old_layout,
        new_layout,
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    }
}

/// A sampled RGBA texture, kept in `SHADER_READ_ONLY_OPTIMAL` between uploads.
pub struct Texture {
    gpu: Arc<dyn Gpu>,
    image: vk::Image,
    view: vk::ImageView,
}

impl Texture {
    pub fn upload(
        gpu: Arc<dyn Gpu>,
        commands: &CommandPool,
        width: u32,
        height: u32,
        rgba: &[u8],
        name: &str,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(FrameError::invalid_state(format!(
                "texture '{}' is {}x{} but has {} bytes (expected {})",
                name,
                width,
                height,
                rgba.len(),
                expected
            )));
        }

        let extent = vk::Extent2D { width, height };
        let staging = DeviceBuffer::with_data(
            gpu.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            rgba,
            &format!("{} staging", name),
        )?;

        let image = gpu.create_image(&ImageDesc {
            extent,
            format: TEXTURE_FORMAT,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            samples: vk::SampleCountFlags::TYPE_1,
        })?;
        // From here on Drop releases the image, view or not.
        let mut texture = Self {
            gpu,
            image,
            view: vk::ImageView::null(),
        };

        let src = staging.handle();
        commands.run_one_time(|gpu, cmd| {
            gpu.cmd_image_barrier(
                cmd,
                &transition(image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            );
            gpu.cmd_copy_buffer_to_image(cmd, src, image, extent);
            gpu.cmd_image_barrier(
                cmd,
                &transition(
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ),
            );
        })?;

        texture.view = texture
            .gpu
            .create_image_view(image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?;
        label(texture.gpu.as_ref(), image, name);

        log::debug!("Uploaded texture '{}' ({}x{})", name, width, height);
        Ok(texture)
    }

    /// Fills the whole texture with `color` and blocks until done.
    pub fn clear(&self, commands: &CommandPool, color: [f32; 4]) -> Result<()> {
        let image = self.image;
        commands.run_one_time(|gpu, cmd| {
            gpu.cmd_image_barrier(
                cmd,
                &transition(
                    image,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ),
            );
            gpu.cmd_clear_color_image(cmd, image, color);
            gpu.cmd_image_barrier(
                cmd,
                &transition(
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ),
            );
        })
    }

    #[cfg(test)]
    pub(crate) fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.view != vk::ImageView::null() {
            self.gpu.destroy_image_view(self.view);
        }
        self.gpu.destroy_image(self.image);
    }
}

/// Linear, repeating sampler at the device's maximum anisotropy.
pub struct Sampler {
    gpu: Arc<dyn Gpu>,
    handle: vk::Sampler,
}

impl Sampler {
    pub fn new(gpu: Arc<dyn Gpu>) -> Result<Self> {
        let anisotropy = gpu.limits().max_sampler_anisotropy;
        let handle = gpu.create_sampler(anisotropy)?;
        label(gpu.as_ref(), handle, "texture sampler");
        Ok(Self { gpu, handle })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.gpu.destroy_sampler(self.handle);
    }
}
