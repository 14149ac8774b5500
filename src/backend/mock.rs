// Host-side device for tests
//
// Implements the device seam without a GPU. Handles are opaque counters,
// queue work completes only when the host waits for it, and every misuse
// the validation layers would flag (waiting on a fence nobody will signal,
// resetting a pending command buffer, destroying something still in use)
// is recorded as a violation instead of crashing.

use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use super::gpu::*;
use crate::error::{FrameError, Result};
use crate::renderer::Drawable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Semaphore,
    Fence,
    CommandPool,
    CommandBuffer,
    Swapchain,
    SwapchainImage,
    Buffer,
    Image,
    ImageView,
    Sampler,
    RenderPass,
    Framebuffer,
    PipelineLayout,
    Pipeline,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Created(Kind),
    Destroyed(Kind),
}

/// Commands recorded into command buffers, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Barrier { image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout },
    CopyBuffer { src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize },
    CopyBufferToImage { src: vk::Buffer, dst: vk::Image },
    ClearColorImage { image: vk::Image },
    BeginRenderPass { render_pass: vk::RenderPass, framebuffer: vk::Framebuffer },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    BindDescriptorSet(vk::DescriptorSet),
    DrawIndexed { index_count: u32, first_index: u32, vertex_offset: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdState {
    Initial,
    Recording,
    Executable,
    Pending,
}

struct Pending {
    cmd: u64,
    fence: u64,
}

struct SwapchainEntry {
    images: Vec<u64>,
    next: u32,
}

struct State {
    next_handle: u64,
    live: HashMap<u64, Kind>,
    /// Handle -> handles it references.
    uses: HashMap<u64, Vec<u64>>,
    /// Pool -> handles allocated from it.
    children: HashMap<u64, Vec<u64>>,
    failures: HashMap<Kind, usize>,

    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    command_buffers: HashMap<u64, CmdState>,
    swapchains: HashMap<u64, SwapchainEntry>,
    buffers: HashMap<u64, (vk::DeviceSize, MemoryLocation)>,
    pool_capacity: HashMap<u64, u32>,

    pending: VecDeque<Pending>,
    submits: usize,
    fail_next_submit: Option<vk::Result>,

    acquire_calls: u32,
    present_calls: u32,
    acquire_script: HashMap<u32, vk::Result>,
    present_script: HashMap<u32, vk::Result>,
    presented: Vec<u32>,

    support: SurfaceSupport,
    depth_formats: Vec<vk::Format>,

    violations: Vec<String>,
    events: Vec<Event>,
    recorded: Vec<Recorded>,
    buffer_writes: Vec<(vk::Buffer, vk::DeviceSize, Vec<u8>)>,
    descriptor_writes: Vec<DescriptorWrite>,
    /// External dependency of each render pass created.
    render_pass_dependencies: Vec<vk::SubpassDependency>,
    names: Vec<(vk::ObjectType, String)>,
}

fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

impl State {
    fn new() -> Self {
        Self {
            next_handle: 0x1000,
            live: HashMap::new(),
            uses: HashMap::new(),
            children: HashMap::new(),
            failures: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            command_buffers: HashMap::new(),
            swapchains: HashMap::new(),
            buffers: HashMap::new(),
            pool_capacity: HashMap::new(),
            pending: VecDeque::new(),
            submits: 0,
            fail_next_submit: None,
            acquire_calls: 0,
            present_calls: 0,
            acquire_script: HashMap::new(),
            present_script: HashMap::new(),
            presented: Vec::new(),
            support: default_support(),
            depth_formats: vec![vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
            violations: Vec::new(),
            events: Vec::new(),
            recorded: Vec::new(),
            buffer_writes: Vec::new(),
            descriptor_writes: Vec::new(),
            render_pass_dependencies: Vec::new(),
            names: Vec::new(),
        }
    }

    fn violation(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        log::error!("[mock] {}", msg);
        self.violations.push(msg);
    }

    fn insert(&mut self, kind: Kind) -> u64 {
        self.next_handle += 1;
        let raw = self.next_handle;
        self.live.insert(raw, kind);
        self.events.push(Event::Created(kind));
        raw
    }

    /// Creates a handle unless a scripted failure is due for `kind`.
    fn create(&mut self, kind: Kind) -> Result<u64> {
        let due = match self.failures.get_mut(&kind) {
            Some(remaining) => {
                *remaining -= 1;
                *remaining == 0
            }
            None => false,
        };
        if due {
            self.failures.remove(&kind);
            return Err(FrameError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        Ok(self.insert(kind))
    }

    fn is_live(&self, raw: u64, kind: Kind) -> bool {
        self.live.get(&raw) == Some(&kind)
    }

    fn require(&mut self, raw: u64, kinds: &[Kind], what: &str) {
        match self.live.get(&raw).copied() {
            Some(k) if kinds.contains(&k) => {}
            Some(k) => self.violation(format!("{} got a {:?}", what, k)),
            None => self.violation(format!("{} got unknown handle {:#x}", what, raw)),
        }
    }

    fn referenced_by(&self, raw: u64) -> Option<u64> {
        self.uses
            .iter()
            .find(|(user, used)| self.live.contains_key(user) && used.contains(&raw))
            .map(|(user, _)| *user)
    }

    /// Removes `raw` without an event, e.g. when its parent goes away.
    fn forget(&mut self, raw: u64) {
        self.live.remove(&raw);
        self.uses.remove(&raw);
        self.command_buffers.remove(&raw);
    }

    fn destroy(&mut self, raw: u64, kind: Kind) -> bool {
        if raw == 0 {
            return false;
        }
        if !self.pending.is_empty() {
            self.violation(format!("{:?} destroyed while work is pending", kind));
        }
        match self.live.get(&raw).copied() {
            Some(k) if k == kind => {
                if let Some(user) = self.referenced_by(raw) {
                    let user_kind = self.live[&user];
                    self.violation(format!(
                        "{:?} destroyed while referenced by a live {:?}",
                        kind, user_kind
                    ));
                }
                self.forget(raw);
                self.events.push(Event::Destroyed(kind));
                true
            }
            Some(k) => {
                self.violation(format!("destroy {:?} called on a {:?}", kind, k));
                false
            }
            None => {
                self.violation(format!("destroy {:?} called on unknown handle {:#x}", kind, raw));
                false
            }
        }
    }

    fn destroy_pool(&mut self, raw: u64, kind: Kind) {
        if self.destroy(raw, kind) {
            for child in self.children.remove(&raw).unwrap_or_default() {
                self.forget(child);
            }
            self.pool_capacity.remove(&raw);
        }
    }

    fn complete_front(&mut self) {
        if let Some(done) = self.pending.pop_front() {
            if let Some(state) = self.command_buffers.get_mut(&done.cmd) {
                *state = CmdState::Executable;
            }
            if done.fence != 0 {
                self.fences.insert(done.fence, true);
            }
        }
    }

    fn complete_all(&mut self) {
        while !self.pending.is_empty() {
            self.complete_front();
        }
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Recorded) {
        if self.command_buffers.get(&cmd.as_raw()) != Some(&CmdState::Recording) {
            self.violation(format!("{:?} recorded outside a recording", command));
        }
        self.recorded.push(command);
    }

    fn signal(&mut self, semaphore: u64) {
        match self.semaphores.get(&semaphore) {
            Some(true) => self.violation("semaphore signaled twice without a wait"),
            Some(false) => {}
            None => self.violation("signal on unknown semaphore"),
        }
        self.semaphores.insert(semaphore, true);
    }

    fn consume(&mut self, semaphore: u64, what: &str) {
        match self.semaphores.get(&semaphore) {
            Some(true) => {
                self.semaphores.insert(semaphore, false);
            }
            Some(false) => self.violation(format!("{} waits on an unsignaled semaphore", what)),
            None => self.violation(format!("{} waits on an unknown semaphore", what)),
        }
    }
}

pub struct MockGpu {
    state: Mutex<State>,
    naming: bool,
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            naming: false,
        }
    }

    /// A device that also exposes debug object naming.
    pub fn with_object_names() -> Self {
        Self {
            naming: true,
            ..Self::new()
        }
    }

    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state.lock().support.capabilities.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_surface_support(&self, support: SurfaceSupport) {
        self.state.lock().support = support;
    }

    pub fn set_depth_formats(&self, formats: &[vk::Format]) {
        self.state.lock().depth_formats = formats.to_vec();
    }

    /// The `nth` creation of `kind` from now on fails.
    pub fn fail_creation(&self, kind: Kind, nth: usize) {
        self.state.lock().failures.insert(kind, nth.max(1));
    }

    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.lock().fail_next_submit = Some(result);
    }

    /// Overrides the result of the `nth` acquire call (counted from the start).
    pub fn script_acquire(&self, nth: u32, result: vk::Result) {
        self.state.lock().acquire_script.insert(nth, result);
    }

    pub fn script_present(&self, nth: u32, result: vk::Result) {
        self.state.lock().present_script.insert(nth, result);
    }

    pub fn acquire_calls(&self) -> u32 {
        self.state.lock().acquire_calls
    }

    pub fn present_calls(&self) -> u32 {
        self.state.lock().present_calls
    }

    pub fn live_count(&self, kind: Kind) -> usize {
        self.state.lock().live.values().filter(|&&k| k == kind).count()
    }

    /// Live objects the engine owns; swapchain images belong to the
    /// presentation engine and are not counted.
    pub fn total_live(&self) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|&&k| k != Kind::SwapchainImage)
            .count()
    }

    pub fn live_counts(&self) -> BTreeMap<Kind, usize> {
        let mut counts = BTreeMap::new();
        for &kind in self.state.lock().live.values() {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().fences.get(&fence.as_raw()).copied().unwrap_or(false)
    }

    /// Stands in for the presentation engine signaling an acquire semaphore.
    pub fn signal_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.insert(semaphore.as_raw(), true);
    }

    /// Stands in for a present consuming a render-finished semaphore.
    pub fn consume_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.insert(semaphore.as_raw(), false);
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().submits
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn presented(&self) -> Vec<u32> {
        self.state.lock().presented.clone()
    }

    pub fn clear_events(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.recorded.clear();
        state.buffer_writes.clear();
        state.descriptor_writes.clear();
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn destroyed_kinds(&self) -> Vec<Kind> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Destroyed(kind) => Some(*kind),
                Event::Created(_) => None,
            })
            .collect()
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.state.lock().recorded.clone()
    }

    pub fn buffer_writes(&self) -> Vec<(vk::Buffer, vk::DeviceSize, Vec<u8>)> {
        self.state.lock().buffer_writes.clone()
    }

    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.state.lock().descriptor_writes.clone()
    }

    pub fn render_pass_dependencies(&self) -> Vec<vk::SubpassDependency> {
        self.state.lock().render_pass_dependencies.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.state.lock().names.iter().map(|(_, n)| n.clone()).collect()
    }
}

impl ObjectNaming for MockGpu {
    fn set_object_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.live.contains_key(&raw_handle) {
            state.violation(format!("naming unknown {:?} '{}'", object_type, name));
        }
        state.names.push((object_type, name.to_string()));
        Ok(())
    }
}

impl Gpu for MockGpu {
    fn surface_support(&self) -> Result<SurfaceSupport> {
        Ok(self.state.lock().support.clone())
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            max_sampler_anisotropy: 16.0,
            framebuffer_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
        }
    }

    fn supports_depth_format(&self, format: vk::Format) -> bool {
        self.state.lock().depth_formats.contains(&format)
    }

    fn object_names(&self) -> Option<&dyn ObjectNaming> {
        if self.naming {
            Some(self)
        } else {
            None
        }
    }

    fn wait_idle(&self) -> Result<()> {
        self.state.lock().complete_all();
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.lock();
        let raw = state.create(Kind::Semaphore)?;
        state.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        if state.destroy(semaphore.as_raw(), Kind::Semaphore) {
            state.semaphores.remove(&semaphore.as_raw());
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.create(Kind::Fence)?;
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if state.destroy(fence.as_raw(), Kind::Fence) {
            state.fences.remove(&fence.as_raw());
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        let raw = fence.as_raw();
        if !state.is_live(raw, Kind::Fence) {
            state.violation("wait on unknown fence");
            return Err(FrameError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        if state.fences.get(&raw) == Some(&true) {
            return Ok(());
        }
        match state.pending.iter().position(|p| p.fence == raw) {
            Some(index) => {
                for _ in 0..=index {
                    state.complete_front();
                }
                Ok(())
            }
            None => {
                state.violation("wait on a fence no submission will signal");
                Err(FrameError::Vulkan(vk::Result::TIMEOUT))
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        let raw = fence.as_raw();
        state.require(raw, &[Kind::Fence], "reset_fence");
        if state.pending.iter().any(|p| p.fence == raw) {
            state.violation("reset of a fence owned by a pending submission");
        }
        state.fences.insert(raw, false);
        Ok(())
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let mut state = self.state.lock();
        let raw = state.create(Kind::CommandPool)?;
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state.lock().destroy_pool(pool.as_raw(), Kind::CommandPool);
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        state.require(pool.as_raw(), &[Kind::CommandPool], "allocate_command_buffers");
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match state.create(Kind::CommandBuffer) {
                Ok(raw) => {
                    state.command_buffers.insert(raw, CmdState::Initial);
                    state.children.entry(pool.as_raw()).or_default().push(raw);
                    buffers.push(vk::CommandBuffer::from_raw(raw));
                }
                Err(e) => {
                    for cmd in buffers {
                        let raw = cmd.as_raw();
                        state.forget(raw);
                    }
                    return Err(e);
                }
            }
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for cmd in buffers {
            let raw = cmd.as_raw();
            if state.command_buffers.get(&raw) == Some(&CmdState::Pending) {
                state.violation("freeing a pending command buffer");
            }
            if state.destroy(raw, Kind::CommandBuffer) {
                if let Some(children) = state.children.get_mut(&pool.as_raw()) {
                    children.retain(|&c| c != raw);
                }
            }
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let raw = cmd.as_raw();
        match state.command_buffers.get(&raw).copied() {
            Some(CmdState::Pending) => {
                state.violation("reset of a pending command buffer");
                Err(FrameError::invalid_state("command buffer is still pending"))
            }
            Some(_) => {
                state.command_buffers.insert(raw, CmdState::Initial);
                Ok(())
            }
            None => {
                state.violation("reset of unknown command buffer");
                Err(FrameError::invalid_state("unknown command buffer"))
            }
        }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let raw = cmd.as_raw();
        match state.command_buffers.get(&raw).copied() {
            Some(CmdState::Initial) | Some(CmdState::Executable) => {
                state.command_buffers.insert(raw, CmdState::Recording);
                Ok(())
            }
            other => {
                state.violation(format!("begin on a command buffer in state {:?}", other));
                Err(FrameError::invalid_state("command buffer cannot begin recording"))
            }
        }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let raw = cmd.as_raw();
        if state.command_buffers.get(&raw) != Some(&CmdState::Recording) {
            state.violation("end on a command buffer that is not recording");
            return Err(FrameError::invalid_state("command buffer is not recording"));
        }
        state.command_buffers.insert(raw, CmdState::Executable);
        Ok(())
    }

    fn queue_submit(&self, submission: &Submission) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(result) = state.fail_next_submit.take() {
            return Err(FrameError::Vulkan(result));
        }

        let cmd = submission.command_buffer.as_raw();
        if state.command_buffers.get(&cmd) != Some(&CmdState::Executable) {
            state.violation("submit of a command buffer that is not executable");
        }
        if let Some((wait, _)) = submission.wait {
            state.consume(wait.as_raw(), "submit");
        }
        if let Some(signal) = submission.signal {
            state.signal(signal.as_raw());
        }

        let fence = submission.fence.as_raw();
        if fence != 0 {
            state.require(fence, &[Kind::Fence], "queue_submit");
            if state.fences.get(&fence) == Some(&true) {
                state.violation("submit with a fence that is still signaled");
            }
        }

        state.command_buffers.insert(cmd, CmdState::Pending);
        state.pending.push_back(Pending { cmd, fence });
        state.submits += 1;
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<()> {
        self.state.lock().complete_all();
        Ok(())
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, transition: &ImageTransition) {
        let mut state = self.state.lock();
        state.require(transition.image.as_raw(), &[Kind::Image, Kind::SwapchainImage], "barrier");
        state.record(
            cmd,
            Recorded::Barrier {
                image: transition.image,
                old: transition.old_layout,
                new: transition.new_layout,
            },
        );
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let mut state = self.state.lock();
        state.require(src.as_raw(), &[Kind::Buffer], "copy source");
        state.require(dst.as_raw(), &[Kind::Buffer], "copy destination");
        state.record(cmd, Recorded::CopyBuffer { src, dst, size });
    }

    fn cmd_copy_buffer_to_image(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Image, _extent: vk::Extent2D) {
        let mut state = self.state.lock();
        state.require(src.as_raw(), &[Kind::Buffer], "copy source");
        state.require(dst.as_raw(), &[Kind::Image], "copy destination");
        state.record(cmd, Recorded::CopyBufferToImage { src, dst });
    }

    fn cmd_clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, _color: [f32; 4]) {
        self.state.lock().record(cmd, Recorded::ClearColorImage { image });
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        let mut state = self.state.lock();
        state.require(begin.framebuffer.as_raw(), &[Kind::Framebuffer], "begin_render_pass");
        state.record(
            cmd,
            Recorded::BeginRenderPass {
                render_pass: begin.render_pass,
                framebuffer: begin.framebuffer,
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state.lock().record(cmd, Recorded::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        let mut state = self.state.lock();
        state.require(pipeline.as_raw(), &[Kind::Pipeline], "bind_pipeline");
        state.record(cmd, Recorded::BindPipeline(pipeline));
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        state.require(buffer.as_raw(), &[Kind::Buffer], "bind_vertex_buffer");
        state.record(cmd, Recorded::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        state.require(buffer.as_raw(), &[Kind::Buffer], "bind_index_buffer");
        state.record(cmd, Recorded::BindIndexBuffer(buffer));
    }

    fn cmd_bind_descriptor_set(&self, cmd: vk::CommandBuffer, _layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        let mut state = self.state.lock();
        state.require(set.as_raw(), &[Kind::DescriptorSet], "bind_descriptor_set");
        state.record(cmd, Recorded::BindDescriptorSet(set));
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32) {
        self.state.lock().record(
            cmd,
            Recorded::DrawIndexed {
                index_count,
                first_index,
                vertex_offset,
            },
        );
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation("swapchain created with a zero extent");
            return Err(FrameError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let raw = state.create(Kind::Swapchain)?;
        let images = (0..desc.image_count)
            .map(|_| state.insert(Kind::SwapchainImage))
            .collect();
        state.swapchains.insert(raw, SwapchainEntry { images, next: 0 });
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        let raw = swapchain.as_raw();
        let images = state
            .swapchains
            .get(&raw)
            .map(|s| s.images.clone())
            .unwrap_or_default();
        for &image in &images {
            if state.referenced_by(image).is_some() {
                state.violation("swapchain destroyed while its images still have views");
            }
        }
        if state.destroy(raw, Kind::Swapchain) {
            for image in images {
                state.forget(image);
            }
            state.swapchains.remove(&raw);
        }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let state = self.state.lock();
        state
            .swapchains
            .get(&swapchain.as_raw())
            .map(|s| s.images.iter().map(|&raw| vk::Image::from_raw(raw)).collect())
            .ok_or(FrameError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> Result<(u32, bool)> {
        let mut state = self.state.lock();
        state.acquire_calls += 1;
        let call = state.acquire_calls;

        let mut suboptimal = false;
        if let Some(result) = state.acquire_script.remove(&call) {
            if result == vk::Result::SUBOPTIMAL_KHR {
                suboptimal = true;
            } else {
                return Err(FrameError::Vulkan(result));
            }
        }

        let next = state.swapchains.get_mut(&swapchain.as_raw()).map(|entry| {
            let index = entry.next % entry.images.len() as u32;
            entry.next += 1;
            index
        });
        let index = match next {
            Some(index) => index,
            None => {
                state.violation("acquire on unknown swapchain");
                return Err(FrameError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR));
            }
        };
        state.signal(signal.as_raw());
        Ok((index, suboptimal))
    }

    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
        let mut state = self.state.lock();
        state.present_calls += 1;
        let call = state.present_calls;

        state.consume(wait.as_raw(), "present");
        let image_count = state
            .swapchains
            .get(&swapchain.as_raw())
            .map_or(0, |s| s.images.len() as u32);
        if image_index >= image_count {
            state.violation(format!("present of image {} out of {}", image_index, image_count));
        }

        match state.present_script.remove(&call) {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(result) => Err(FrameError::Vulkan(result)),
            None => {
                state.presented.push(image_index);
                Ok(false)
            }
        }
    }

    fn create_buffer(&self, size: vk::DeviceSize, _usage: vk::BufferUsageFlags, location: MemoryLocation) -> Result<vk::Buffer> {
        let mut state = self.state.lock();
        if size == 0 {
            state.violation("zero-sized buffer");
        }
        let raw = state.create(Kind::Buffer)?;
        state.buffers.insert(raw, (size, location));
        Ok(vk::Buffer::from_raw(raw))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        if state.destroy(buffer.as_raw(), Kind::Buffer) {
            state.buffers.remove(&buffer.as_raw());
        }
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let (size, location) = match state.buffers.get(&buffer.as_raw()).copied() {
            Some(info) => info,
            None => {
                state.violation("write to unknown buffer");
                return Err(FrameError::invalid_state("unknown buffer"));
            }
        };
        if location != MemoryLocation::CpuToGpu {
            return Err(FrameError::invalid_state("buffer is not host visible"));
        }
        if offset + data.len() as vk::DeviceSize > size {
            return Err(FrameError::invalid_state("write past the end of the buffer"));
        }
        state.buffer_writes.push((buffer, offset, data.to_vec()));
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<vk::Image> {
        let mut state = self.state.lock();
        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation("zero-sized image");
        }
        let raw = state.create(Kind::Image)?;
        Ok(vk::Image::from_raw(raw))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.state.lock().destroy(image.as_raw(), Kind::Image);
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format, _aspect: vk::ImageAspectFlags) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        state.require(image.as_raw(), &[Kind::Image, Kind::SwapchainImage], "create_image_view");
        let raw = state.create(Kind::ImageView)?;
        state.uses.insert(raw, vec![image.as_raw()]);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.lock().destroy(view.as_raw(), Kind::ImageView);
    }

    fn create_sampler(&self, max_anisotropy: f32) -> Result<vk::Sampler> {
        let mut state = self.state.lock();
        if max_anisotropy > 16.0 {
            state.violation("sampler anisotropy above the device limit");
        }
        let raw = state.create(Kind::Sampler)?;
        Ok(vk::Sampler::from_raw(raw))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.lock().destroy(sampler.as_raw(), Kind::Sampler);
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        let mut state = self.state.lock();
        let raw = state.create(Kind::RenderPass)?;
        state.render_pass_dependencies.push(desc.external_dependency());
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.lock().destroy(render_pass.as_raw(), Kind::RenderPass);
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], _extent: vk::Extent2D) -> Result<vk::Framebuffer> {
        let mut state = self.state.lock();
        state.require(render_pass.as_raw(), &[Kind::RenderPass], "create_framebuffer");
        for view in attachments {
            state.require(view.as_raw(), &[Kind::ImageView], "framebuffer attachment");
        }
        let raw = state.create(Kind::Framebuffer)?;
        state.uses.insert(raw, attachments.iter().map(|v| v.as_raw()).collect());
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.lock().destroy(framebuffer.as_raw(), Kind::Framebuffer);
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> Result<vk::PipelineLayout> {
        let mut state = self.state.lock();
        for layout in set_layouts {
            state.require(layout.as_raw(), &[Kind::DescriptorSetLayout], "create_pipeline_layout");
        }
        let raw = state.create(Kind::PipelineLayout)?;
        Ok(vk::PipelineLayout::from_raw(raw))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.lock().destroy(layout.as_raw(), Kind::PipelineLayout);
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline> {
        let mut state = self.state.lock();
        state.require(desc.render_pass.as_raw(), &[Kind::RenderPass], "create_graphics_pipeline");
        state.require(desc.layout.as_raw(), &[Kind::PipelineLayout], "create_graphics_pipeline");
        if desc.vertex_shader.is_empty() || desc.fragment_shader.is_empty() {
            return Err(FrameError::Shader("empty shader module".into()));
        }
        let raw = state.create(Kind::Pipeline)?;
        Ok(vk::Pipeline::from_raw(raw))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.lock().destroy(pipeline.as_raw(), Kind::Pipeline);
    }

    fn create_descriptor_set_layout(&self, _bindings: &[DescriptorBinding]) -> Result<vk::DescriptorSetLayout> {
        let raw = self.state.lock().create(Kind::DescriptorSetLayout)?;
        Ok(vk::DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().destroy(layout.as_raw(), Kind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(&self, _uniform_buffers: u32, _image_samplers: u32, max_sets: u32) -> Result<vk::DescriptorPool> {
        let mut state = self.state.lock();
        let raw = state.create(Kind::DescriptorPool)?;
        state.pool_capacity.insert(raw, max_sets);
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().destroy_pool(pool.as_raw(), Kind::DescriptorPool);
    }

    fn allocate_descriptor_sets(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout, count: u32) -> Result<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        let pool_raw = pool.as_raw();
        state.require(pool_raw, &[Kind::DescriptorPool], "allocate_descriptor_sets");
        state.require(layout.as_raw(), &[Kind::DescriptorSetLayout], "allocate_descriptor_sets");

        let remaining = state.pool_capacity.get(&pool_raw).copied().unwrap_or(0);
        if count > remaining {
            return Err(FrameError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        state.pool_capacity.insert(pool_raw, remaining - count);

        let mut sets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw = state.create(Kind::DescriptorSet)?;
            state.children.entry(pool_raw).or_default().push(raw);
            sets.push(vk::DescriptorSet::from_raw(raw));
        }
        Ok(sets)
    }

    fn write_descriptor_set(&self, write: &DescriptorWrite) {
        let mut state = self.state.lock();
        let set = write.set.as_raw();
        state.require(set, &[Kind::DescriptorSet], "write_descriptor_set");
        state.require(write.uniform_buffer.as_raw(), &[Kind::Buffer], "descriptor uniform buffer");
        state.require(write.image_view.as_raw(), &[Kind::ImageView], "descriptor image view");
        state.require(write.sampler.as_raw(), &[Kind::Sampler], "descriptor sampler");
        state.uses.insert(
            set,
            vec![
                write.uniform_buffer.as_raw(),
                write.image_view.as_raw(),
                write.sampler.as_raw(),
            ],
        );
        state.descriptor_writes.push(*write);
    }
}

/// A window whose drawable size the test controls.
#[derive(Clone)]
pub struct MockWindow {
    extent: Arc<Mutex<vk::Extent2D>>,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: Arc::new(Mutex::new(vk::Extent2D { width, height })),
        }
    }

    pub fn set_extent(&self, width: u32, height: u32) {
        *self.extent.lock() = vk::Extent2D { width, height };
    }
}

impl Drawable for MockWindow {
    fn drawable_extent(&self) -> vk::Extent2D {
        *self.extent.lock()
    }
}
