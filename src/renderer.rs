// =============================================================================
// FRAME RENDERER - Frame pacing and surface rebuilds
// =============================================================================
//
// FRAME FLOW (one call to `draw_frame`):
// 1. Rebuild first if the surface is not valid or the targets are stale
// 2. Wait for the slot's fence
// 3. Acquire a swapchain image (out of date: rebuild, no submission)
// 4. Reset the fence
// 5. Write the uniform block of the ACQUIRED IMAGE
// 6. Record and submit the slot's command buffer
// 7. Present, advance the slot, rebuild if the surface went stale
//
// Everything tied to the swapchain lives in `SurfaceTargets` and is torn
// down and rebuilt as one unit after a full device idle.

use ash::vk;
use std::mem::size_of;
use std::sync::Arc;

use crate::backend::attachments::{choose_depth_format, choose_sample_count, AttachmentSet, DEPTH_FORMAT_CANDIDATES};
use crate::backend::buffer::{DeviceBuffer, Sampler, Texture, UniformBuffers};
use crate::backend::command::CommandPool;
use crate::backend::descriptor::{DescriptorLayout, DescriptorSets};
use crate::backend::gpu::{Gpu, RenderPassBegin, RenderPassDesc};
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use crate::backend::shader::ShaderCode;
use crate::backend::swapchain::{
    choose_extent, is_zero_extent, AcquireOutcome, PresentOutcome, PresentationSurface, SurfaceState,
};
use crate::backend::sync::SyncSet;
use crate::error::{FrameError, Result};
use crate::scene::{DrawItem, FrameAssets, UniformBlock, Vertex};

/// Anything with a drawable area the swapchain should match.
pub trait Drawable {
    /// Current size in physical pixels; zero while minimised.
    fn drawable_extent(&self) -> vk::Extent2D;
}

impl Drawable for winit::window::Window {
    fn drawable_extent(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

impl<T: Drawable + ?Sized> Drawable for Arc<T> {
    fn drawable_extent(&self) -> vk::Extent2D {
        (**self).drawable_extent()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    /// Frame slots the host may record ahead of the device.
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    /// Requested MSAA sample count; lowered to what the device supports.
    pub msaa_samples: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            msaa_samples: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// `slot` is the frame slot the frame was recorded in.
    Presented { slot: usize, image_index: u32 },
    /// The acquire found the swapchain out of date; nothing was submitted
    /// and the surface has been rebuilt.
    Rebuilt,
    /// The drawable area is zero; the rebuild is deferred.
    Skipped,
}

/// Everything built against one swapchain generation.
///
/// Field order is teardown order.
struct SurfaceTargets {
    descriptor_sets: DescriptorSets,
    uniforms: UniformBuffers,
    pipeline: GraphicsPipeline,
    framebuffers: Framebuffers,
    render_pass: RenderPass,
    attachments: AttachmentSet,
}

impl SurfaceTargets {
    fn new(
        gpu: &Arc<dyn Gpu>,
        surface: &PresentationSurface,
        resources: &SharedResources<'_>,
        config: &RendererConfig,
    ) -> Result<Self> {
        let (surface_format, extent) = match (surface.surface_format(), surface.extent()) {
            (Some(format), Some(extent)) => (format, extent),
            _ => return Err(FrameError::invalid_state("swapchain has no image ring")),
        };
        let generation = surface.generation();

        let depth_format = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |f| gpu.supports_depth_format(f))
            .ok_or_else(|| FrameError::Unsupported("no supported depth format".into()))?;
        let samples = choose_sample_count(config.msaa_samples, gpu.limits().framebuffer_sample_counts);

        let attachments = AttachmentSet::new(
            gpu.clone(),
            extent,
            surface_format.format,
            depth_format,
            samples,
            generation,
        )?;
        let render_pass = RenderPass::new(
            gpu.clone(),
            RenderPassDesc {
                color_format: surface_format.format,
                depth_format,
                samples,
            },
        )?;
        let pipeline = GraphicsPipeline::new(
            gpu.clone(),
            &render_pass,
            resources.layout.handle(),
            extent,
            resources.shaders,
            &Vertex::binding_descriptions(),
            &Vertex::attribute_descriptions(),
        )?;
        let framebuffers = Framebuffers::new(
            gpu.clone(),
            &render_pass,
            surface.image_views(),
            &attachments,
            generation,
        )?;
        let uniforms = UniformBuffers::new(
            gpu.clone(),
            surface.image_count(),
            size_of::<UniformBlock>() as vk::DeviceSize,
        )?;
        let descriptor_sets = DescriptorSets::new(
            gpu.clone(),
            resources.layout,
            &uniforms,
            resources.textures,
            resources.sampler,
        )?;

        log::info!(
            "Built targets for generation {}: {}x{}, {:?}, {:?}",
            generation,
            extent.width,
            extent.height,
            depth_format,
            samples
        );
        Ok(Self {
            descriptor_sets,
            uniforms,
            pipeline,
            framebuffers,
            render_pass,
            attachments,
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.attachments.generation() == generation && self.framebuffers.generation() == generation
    }

    /// Destroys everything, releasing the image ring between the render
    /// pass and the attachments. The device must be idle.
    fn teardown(self, surface: &mut PresentationSurface) {
        let Self {
            descriptor_sets,
            uniforms,
            pipeline,
            framebuffers,
            render_pass,
            attachments,
        } = self;

        drop(descriptor_sets);
        drop(uniforms);
        drop(pipeline);
        drop(framebuffers);
        drop(render_pass);
        surface.destroy_ring();
        drop(attachments);
    }
}

/// Borrowed long-lived resources the targets are built from.
struct SharedResources<'a> {
    layout: &'a DescriptorLayout,
    textures: &'a [Texture],
    sampler: &'a Sampler,
    shaders: &'a ShaderCode,
}

/// Field order is drop order: reverse of creation.
struct RendererState {
    targets: Option<SurfaceTargets>,
    surface: PresentationSurface,
    indices: DeviceBuffer,
    vertices: DeviceBuffer,
    textures: Vec<Texture>,
    sampler: Sampler,
    layout: DescriptorLayout,
    commands: CommandPool,
    sync: SyncSet,

    gpu: Arc<dyn Gpu>,
    config: RendererConfig,
    shaders: ShaderCode,
    draws: Vec<DrawItem>,
    /// Host copy of the index buffer, for checking draws against it.
    index_data: Vec<u16>,
    vertex_count: u32,
    slot: usize,
    rotation: f32,
}

impl RendererState {
    fn needs_rebuild(&self) -> bool {
        self.surface.state() != SurfaceState::Valid
            || self
                .targets
                .as_ref()
                .map_or(true, |t| !t.is_current(self.surface.generation()))
    }

    /// The rebuild cascade. Returns `false` without touching anything when
    /// the drawable area is zero.
    fn rebuild(&mut self, drawable: &dyn Drawable) -> Result<bool> {
        let drawable_extent = drawable.drawable_extent();
        let support = self.gpu.surface_support()?;
        let extent = choose_extent(&support.capabilities, drawable_extent);
        if is_zero_extent(drawable_extent) || is_zero_extent(extent) {
            log::warn!("Surface is zero-sized, deferring rebuild");
            self.surface.invalidate();
            return Ok(false);
        }

        // Every slot, not just the current one.
        self.gpu.wait_idle()?;

        match self.targets.take() {
            Some(targets) => targets.teardown(&mut self.surface),
            None => self.surface.destroy_ring(),
        }

        self.surface.create(&support, drawable_extent)?;
        let resources = SharedResources {
            layout: &self.layout,
            textures: &self.textures,
            sampler: &self.sampler,
            shaders: &self.shaders,
        };
        self.targets = Some(SurfaceTargets::new(&self.gpu, &self.surface, &resources, &self.config)?);

        log::info!("Surface rebuilt (generation {})", self.surface.generation());
        Ok(true)
    }

    fn draw_frame(&mut self, drawable: &dyn Drawable) -> Result<FrameOutcome> {
        if self.needs_rebuild() && !self.rebuild(drawable)? {
            return Ok(FrameOutcome::Skipped);
        }

        let slot = self.slot;
        let frame = self.sync.frame(slot)?;
        self.sync.wait(slot)?;

        let (image_index, suboptimal) = match self.surface.acquire(frame.image_available)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                // The fence stays signaled; nothing was submitted.
                self.surface.invalidate();
                return Ok(if self.rebuild(drawable)? {
                    FrameOutcome::Rebuilt
                } else {
                    FrameOutcome::Skipped
                });
            }
        };

        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| FrameError::invalid_state("no render targets"))?;
        let framebuffer = targets.framebuffers.get(image_index)?;
        let sets = self
            .draws
            .iter()
            .map(|draw| targets.descriptor_sets.get(image_index, draw.texture))
            .collect::<Result<Vec<_>>>()?;

        self.sync.reset(slot)?;

        let extent = targets.attachments.extent();
        targets
            .uniforms
            .write(image_index, &UniformBlock::new(self.rotation, extent))?;

        let cmd = self.commands.begin_recording(slot)?;
        let gpu = self.gpu.as_ref();
        gpu.cmd_begin_render_pass(
            cmd,
            &RenderPassBegin {
                render_pass: targets.render_pass.handle(),
                framebuffer,
                extent,
                clear_color: self.config.clear_color,
            },
        );
        gpu.cmd_bind_pipeline(cmd, targets.pipeline.handle());
        gpu.cmd_bind_vertex_buffer(cmd, self.vertices.handle());
        gpu.cmd_bind_index_buffer(cmd, self.indices.handle());
        for (draw, &set) in self.draws.iter().zip(&sets) {
            gpu.cmd_bind_descriptor_set(cmd, targets.pipeline.layout(), set);
            gpu.cmd_draw_indexed(cmd, draw.index_count, draw.first_index, draw.vertex_offset);
        }
        gpu.cmd_end_render_pass(cmd);
        self.commands.end_recording(slot)?;

        self.commands
            .submit(slot, frame.image_available, frame.render_finished, frame.in_flight_fence)?;
        let presented = self.surface.present(image_index, frame.render_finished)?;

        self.slot = (slot + 1) % self.sync.frames_in_flight();

        if suboptimal || presented == PresentOutcome::Stale {
            log::debug!("Swapchain stale after present, rebuilding");
            self.surface.invalidate();
            self.rebuild(drawable)?;
        }

        Ok(FrameOutcome::Presented { slot, image_index })
    }

    fn validate_draws(&self, draws: &[DrawItem], vertex_count: u32) -> Result<()> {
        validate_draws(draws, &self.index_data, vertex_count, self.textures.len())
    }

    /// Destroys the targets and the ring, then everything else in reverse
    /// creation order. The device must be idle.
    fn release(mut self) {
        if let Some(targets) = self.targets.take() {
            targets.teardown(&mut self.surface);
        }
        self.surface.destroy();
    }
}

/// Indices a draw reads, shifted by its `vertex_offset`, must land in
/// `0..vertex_count`.
fn validate_draws(draws: &[DrawItem], indices: &[u16], vertex_count: u32, texture_count: usize) -> Result<()> {
    for (i, draw) in draws.iter().enumerate() {
        if draw.texture >= texture_count {
            return Err(FrameError::invalid_state(format!(
                "draw {} samples texture {} of {}",
                i, draw.texture, texture_count
            )));
        }

        let start = draw.first_index as usize;
        let range = start
            .checked_add(draw.index_count as usize)
            .and_then(|end| indices.get(start..end))
            .ok_or_else(|| {
                FrameError::invalid_state(format!(
                    "draw {} reads indices {}+{} of {}",
                    i,
                    draw.first_index,
                    draw.index_count,
                    indices.len()
                ))
            })?;

        let (Some(&lowest), Some(&highest)) = (range.iter().min(), range.iter().max()) else {
            continue;
        };
        let offset = i64::from(draw.vertex_offset);
        let first = i64::from(lowest) + offset;
        let last = i64::from(highest) + offset;
        if first < 0 || last >= i64::from(vertex_count) {
            return Err(FrameError::invalid_state(format!(
                "draw {} reaches vertices {}..={} of {}",
                i, first, last, vertex_count
            )));
        }
    }
    Ok(())
}

/// Drives frames for one window: paces the frame slots, keeps the
/// swapchain matched to the drawable, and owns every GPU resource it draws
/// with.
pub struct FrameRenderer {
    drawable: Box<dyn Drawable>,
    gpu: Arc<dyn Gpu>,
    inner: Option<RendererState>,
}

impl FrameRenderer {
    /// Creates sync objects, commands, uploads, then the swapchain and its
    /// targets. On failure everything already created is released.
    ///
    /// A zero-sized drawable is not an error; the swapchain is then built
    /// by the first `draw_frame` that sees a real size.
    pub fn new(
        gpu: Arc<dyn Gpu>,
        drawable: Box<dyn Drawable>,
        config: RendererConfig,
        assets: FrameAssets,
    ) -> Result<Self> {
        let FrameAssets {
            vertices,
            indices,
            textures,
            draws,
            shaders,
        } = assets;
        if vertices.is_empty() || indices.is_empty() {
            return Err(FrameError::invalid_state("vertex and index data are required"));
        }
        let vertex_count = vertices.len() as u32;
        validate_draws(&draws, &indices, vertex_count, textures.len())?;

        log::info!(
            "Creating renderer: {} frames in flight, {} vertices, {} indices, {} textures",
            config.frames_in_flight,
            vertices.len(),
            indices.len(),
            textures.len()
        );

        let sync = SyncSet::new(gpu.clone(), config.frames_in_flight)?;
        let commands = CommandPool::new(gpu.clone(), config.frames_in_flight)?;
        let layout = DescriptorLayout::new(gpu.clone())?;
        let sampler = Sampler::new(gpu.clone())?;
        let textures = textures
            .iter()
            .enumerate()
            .map(|(i, data)| {
                Texture::upload(
                    gpu.clone(),
                    &commands,
                    data.width,
                    data.height,
                    &data.rgba,
                    &format!("texture {}", i),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let vertex_buffer = DeviceBuffer::device_local(
            gpu.clone(),
            &commands,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&vertices),
            "vertices",
        )?;
        let index_buffer = DeviceBuffer::device_local(
            gpu.clone(),
            &commands,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&indices),
            "indices",
        )?;

        let mut state = RendererState {
            targets: None,
            surface: PresentationSurface::new(gpu.clone()),
            indices: index_buffer,
            vertices: vertex_buffer,
            textures,
            sampler,
            layout,
            commands,
            sync,
            gpu: gpu.clone(),
            config,
            shaders,
            draws,
            index_data: indices,
            vertex_count,
            slot: 0,
            rotation: 0.0,
        };

        if !state.rebuild(drawable.as_ref())? {
            log::warn!("Drawable is zero-sized, swapchain creation deferred");
        }

        Ok(Self {
            drawable,
            gpu,
            inner: Some(state),
        })
    }

    fn state(&self) -> Result<&RendererState> {
        self.inner
            .as_ref()
            .ok_or_else(|| FrameError::invalid_state("renderer has been shut down"))
    }

    fn state_mut(&mut self) -> Result<&mut RendererState> {
        self.inner
            .as_mut()
            .ok_or_else(|| FrameError::invalid_state("renderer has been shut down"))
    }

    /// Runs one full frame cycle. Surface staleness is handled here;
    /// every other error is fatal to the renderer.
    pub fn draw_frame(&mut self) -> Result<FrameOutcome> {
        let state = self
            .inner
            .as_mut()
            .ok_or_else(|| FrameError::invalid_state("renderer has been shut down"))?;
        state.draw_frame(self.drawable.as_ref())
    }

    /// The next `draw_frame` rebuilds before drawing.
    pub fn notify_resize(&mut self) {
        if let Some(state) = self.inner.as_mut() {
            log::debug!("Resize requested");
            state.surface.invalidate();
        }
    }

    /// Runs the rebuild cascade now. Returns whether it ran.
    pub fn rebuild(&mut self) -> Result<bool> {
        let state = self
            .inner
            .as_mut()
            .ok_or_else(|| FrameError::invalid_state("renderer has been shut down"))?;
        state.rebuild(self.drawable.as_ref())
    }

    pub fn set_draw_list(&mut self, draws: Vec<DrawItem>) -> Result<()> {
        let state = self.state_mut()?;
        state.validate_draws(&draws, state.vertex_count)?;
        state.draws = draws;
        Ok(())
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        if let Some(state) = self.inner.as_mut() {
            state.rotation = rotation;
        }
    }

    pub fn rotate_by(&mut self, delta: f32) {
        if let Some(state) = self.inner.as_mut() {
            state.rotation += delta;
        }
    }

    pub fn rotation(&self) -> f32 {
        self.inner.as_ref().map_or(0.0, |s| s.rotation)
    }

    /// Waits for the device, then swaps in a new vertex buffer. The current
    /// draw list must still fit the new vertex count; otherwise nothing
    /// changes.
    pub fn replace_vertices(&mut self, vertices: &[Vertex]) -> Result<()> {
        if vertices.is_empty() {
            return Err(FrameError::invalid_state("vertex data is required"));
        }
        let state = self.state_mut()?;
        let vertex_count = vertices.len() as u32;
        state.validate_draws(&state.draws, vertex_count)?;

        state.gpu.wait_idle()?;
        state.vertices = DeviceBuffer::device_local(
            state.gpu.clone(),
            &state.commands,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
            "vertices",
        )?;
        state.vertex_count = vertex_count;
        log::info!("Replaced vertex buffer ({} vertices)", vertices.len());
        Ok(())
    }

    /// Fills texture `index` with `color`.
    pub fn clear_texture(&mut self, index: usize, color: [f32; 4]) -> Result<()> {
        let state = self.state()?;
        let texture = state
            .textures
            .get(index)
            .ok_or_else(|| FrameError::invalid_state(format!("no texture {}", index)))?;
        texture.clear(&state.commands, color)
    }

    pub fn current_slot(&self) -> usize {
        self.inner.as_ref().map_or(0, |s| s.slot)
    }

    pub fn generation(&self) -> u64 {
        self.inner.as_ref().map_or(0, |s| s.surface.generation())
    }

    pub fn surface_state(&self) -> SurfaceState {
        self.inner
            .as_ref()
            .map_or(SurfaceState::Destroyed, |s| s.surface.state())
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.inner.as_ref().and_then(|s| s.surface.extent())
    }

    pub fn image_count(&self) -> usize {
        self.inner.as_ref().map_or(0, |s| s.surface.image_count())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.inner.as_ref().map_or(0, |s| s.sync.frames_in_flight())
    }

    /// Waits for the device, then releases everything in reverse creation
    /// order. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let Some(state) = self.inner.take() else {
            return;
        };

        log::info!("Shutting down renderer...");
        if let Err(e) = self.gpu.wait_idle() {
            log::error!("wait_idle failed during shutdown: {}", e);
        }
        state.release();
        log::info!("Renderer shut down");
    }
}

impl Drop for FrameRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
