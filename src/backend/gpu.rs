// Device context seam
//
// Every component receives one immutable device context and talks to the
// GPU only through it. `VulkanDevice` implements it on top of ash; the test
// suite implements it on the host.
//
// Handles are plain ash handles so components store exactly what Vulkan
// gives back. Every `create_*` has a matching `destroy_*`, and a destroy is
// only legal once the device no longer references the handle.

use ash::vk;
use gpu_allocator::MemoryLocation;
use crate::error::Result;

/// The capability triplet reported by the surface.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Device limits the engine cares about, cached at context creation.
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    pub max_sampler_anisotropy: f32,
    /// Sample counts usable for both colour and depth framebuffer attachments.
    pub framebuffer_sample_counts: vk::SampleCountFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
}

/// Single-subpass render pass: colour (+ resolve when multisampled) and depth.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

impl RenderPassDesc {
    /// Orders this pass after earlier passes' attachment writes. The depth
    /// and multisampled colour images are shared by every frame in flight,
    /// so both write hazards are covered, not just the swapchain image's.
    pub fn external_dependency(&self) -> vk::SubpassDependency {
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(writes)
            .dst_stage_mask(stages)
            .dst_access_mask(writes)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// Everything needed to bake a pipeline against one surface configuration.
/// Viewport and scissor are baked from `extent`, so a new extent means a
/// new pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub samples: vk::SampleCountFlags,
    pub vertex_shader: &'a [u32],
    pub fragment_shader: &'a [u32],
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// Points one descriptor set at a uniform buffer (binding 0) and a
/// sampled texture (binding 1).
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub uniform_buffer: vk::Buffer,
    pub uniform_range: vk::DeviceSize,
    pub image_view: vk::ImageView,
    pub sampler: vk::Sampler,
}

/// One queue submission of one command buffer.
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    /// `vk::Fence::null()` when the host does not need to observe completion.
    pub fence: vk::Fence,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Optional debug labelling of Vulkan objects.
pub trait ObjectNaming {
    fn set_object_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str) -> Result<()>;
}

pub trait Gpu {
    // ---- queries -------------------------------------------------------

    fn surface_support(&self) -> Result<SurfaceSupport>;
    fn limits(&self) -> DeviceLimits;
    /// True if `format` can back an optimally tiled depth attachment.
    fn supports_depth_format(&self, format: vk::Format) -> bool;

    /// Resolved once when the context is created; `None` when the
    /// capability is unavailable. Callers must check before use.
    fn object_names(&self) -> Option<&dyn ObjectNaming> {
        None
    }

    // ---- host/device synchronization -------------------------------------

    /// Blocks until every queue is idle.
    fn wait_idle(&self) -> Result<()>;

    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    // ---- commands ------------------------------------------------------

    /// Pool on the graphics family whose buffers can be reset individually.
    fn create_command_pool(&self) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    /// Begins a one-time-submit recording.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    /// Submits to the graphics queue.
    fn queue_submit(&self, submission: &Submission) -> Result<()>;
    fn queue_wait_idle(&self) -> Result<()>;

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, transition: &ImageTransition);
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);
    fn cmd_copy_buffer_to_image(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Image, extent: vk::Extent2D);
    fn cmd_clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, color: [f32; 4]);
    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    /// Binds a buffer of 16-bit indices.
    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_descriptor_set(&self, cmd: vk::CommandBuffer, layout: vk::PipelineLayout, set: vk::DescriptorSet);
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32);

    // ---- presentation ----------------------------------------------------

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    /// Returns `(index, suboptimal)`. Staleness surfaces as
    /// `FrameError::Vulkan(ERROR_OUT_OF_DATE_KHR)`.
    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> Result<(u32, bool)>;
    /// Returns `suboptimal`. Runs on the present queue.
    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> Result<bool>;

    // ---- memory-backed resources ----------------------------------------

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, location: MemoryLocation) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Copies `data` into a host-visible buffer.
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()>;
    /// Device-local image with bound memory.
    fn create_image(&self, desc: &ImageDesc) -> Result<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(&self, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, max_anisotropy: f32) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // ---- render pass, framebuffers, pipelines ---------------------------

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // ---- descriptors -------------------------------------------------------

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(&self, uniform_buffers: u32, image_samplers: u32, max_sets: u32) -> Result<vk::DescriptorPool>;
    /// Also frees every set allocated from the pool.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout, count: u32) -> Result<Vec<vk::DescriptorSet>>;
    fn write_descriptor_set(&self, write: &DescriptorWrite);
}

/// Labels `handle` when the naming capability is present. Failures only log.
pub fn label<H: vk::Handle>(gpu: &dyn Gpu, handle: H, name: &str) {
    if let Some(names) = gpu.object_names() {
        if let Err(e) = names.set_object_name(H::TYPE, handle.as_raw(), name) {
            log::debug!("Failed to name {:?} '{}': {}", H::TYPE, name, e);
        }
    }
}
