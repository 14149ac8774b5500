// Render pass, framebuffers and graphics pipeline
//
// Everything here depends on the surface format, extent or sample count,
// so all three are rebuilt whenever the swapchain is.

use ash::vk;
use std::sync::Arc;
use super::attachments::AttachmentSet;
use super::gpu::{label, Gpu, PipelineDesc, RenderPassDesc};
use super::shader::ShaderCode;
use crate::error::{FrameError, Result};

/// Single subpass: colour + depth, plus a resolve into the swapchain image
/// when multisampled.
pub struct RenderPass {
    gpu: Arc<dyn Gpu>,
    handle: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    pub fn new(gpu: Arc<dyn Gpu>, desc: RenderPassDesc) -> Result<Self> {
        let handle = gpu.create_render_pass(&desc)?;
        label(gpu.as_ref(), handle, "main render pass");
        Ok(Self { gpu, handle, desc })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    pub fn is_multisampled(&self) -> bool {
        self.desc.samples != vk::SampleCountFlags::TYPE_1
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.gpu.destroy_render_pass(self.handle);
    }
}

/// Attachment order must match the render pass: with MSAA the
/// multisampled target comes first and the swapchain image is the resolve.
pub fn framebuffer_attachments(
    swapchain_view: vk::ImageView,
    depth_view: vk::ImageView,
    msaa_view: Option<vk::ImageView>,
) -> Vec<vk::ImageView> {
    match msaa_view {
        Some(color) => vec![color, depth_view, swapchain_view],
        None => vec![swapchain_view, depth_view],
    }
}

/// One framebuffer per swapchain image, tagged with the generation the
/// image ring had when they were built.
pub struct Framebuffers {
    gpu: Arc<dyn Gpu>,
    handles: Vec<vk::Framebuffer>,
    generation: u64,
}

impl Framebuffers {
    pub fn new(
        gpu: Arc<dyn Gpu>,
        render_pass: &RenderPass,
        swapchain_views: &[vk::ImageView],
        attachments: &AttachmentSet,
        generation: u64,
    ) -> Result<Self> {
        if render_pass.is_multisampled() != attachments.color_view().is_some() {
            return Err(FrameError::invalid_state(
                "attachment set does not match the render pass sample count",
            ));
        }

        let mut framebuffers = Self {
            gpu,
            handles: Vec::with_capacity(swapchain_views.len()),
            generation,
        };

        for (i, &view) in swapchain_views.iter().enumerate() {
            let views = framebuffer_attachments(view, attachments.depth_view(), attachments.color_view());
            let handle = framebuffers
                .gpu
                .create_framebuffer(render_pass.handle(), &views, attachments.extent())?;
            label(
                framebuffers.gpu.as_ref(),
                handle,
                &format!("framebuffer {} [gen {}]", i, generation),
            );
            framebuffers.handles.push(handle);
        }

        log::debug!(
            "Created {} framebuffers for generation {}",
            framebuffers.handles.len(),
            generation
        );
        Ok(framebuffers)
    }

    pub fn get(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.handles.get(image_index as usize).copied().ok_or_else(|| {
            FrameError::invalid_state(format!("no framebuffer for image {}", image_index))
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.gpu.destroy_framebuffer(handle);
        }
    }
}

/// The graphics pipeline and the layout it was created with.
pub struct GraphicsPipeline {
    gpu: Arc<dyn Gpu>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    pub fn new(
        gpu: Arc<dyn Gpu>,
        render_pass: &RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
        shaders: &ShaderCode,
        vertex_bindings: &[vk::VertexInputBindingDescription],
        vertex_attributes: &[vk::VertexInputAttributeDescription],
    ) -> Result<Self> {
        let layout = gpu.create_pipeline_layout(&[set_layout])?;

        let desc = PipelineDesc {
            render_pass: render_pass.handle(),
            layout,
            extent,
            samples: render_pass.desc().samples,
            vertex_shader: &shaders.vertex,
            fragment_shader: &shaders.fragment,
            vertex_bindings,
            vertex_attributes,
        };
        let pipeline = match gpu.create_graphics_pipeline(&desc) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                gpu.destroy_pipeline_layout(layout);
                return Err(e);
            }
        };

        label(gpu.as_ref(), pipeline, &format!("mesh pipeline {}x{}", extent.width, extent.height));
        log::debug!("Created graphics pipeline for {}x{}", extent.width, extent.height);
        Ok(Self {
            gpu,
            pipeline,
            layout,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.gpu.destroy_pipeline(self.pipeline);
        self.gpu.destroy_pipeline_layout(self.layout);
    }
}
