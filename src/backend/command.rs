// Command submission
//
// One pool, one primary command buffer per frame slot. Buffers are reset
// and re-recorded every frame for one-time submission. The same pool also
// serves short-lived transfer buffers used by the upload helpers.

use ash::vk;
use std::sync::Arc;
use super::gpu::{label, Gpu, Submission};
use crate::error::{FrameError, Result};

pub struct CommandPool {
    gpu: Arc<dyn Gpu>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    recording: Vec<bool>,
}

impl CommandPool {
    pub fn new(gpu: Arc<dyn Gpu>, frames_in_flight: usize) -> Result<Self> {
        let pool = gpu.create_command_pool()?;

        // From here on Drop owns the pool, including on allocation failure.
        let mut commands = Self {
            gpu,
            pool,
            buffers: Vec::new(),
            recording: vec![false; frames_in_flight],
        };

        commands.buffers = commands
            .gpu
            .allocate_command_buffers(pool, frames_in_flight as u32)?;

        for (slot, &cmd) in commands.buffers.iter().enumerate() {
            label(commands.gpu.as_ref(), cmd, &format!("frame commands [slot {}]", slot));
        }

        log::debug!("Allocated {} frame command buffers", frames_in_flight);
        Ok(commands)
    }

    pub fn command_buffer(&self, slot: usize) -> Result<vk::CommandBuffer> {
        self.buffers
            .get(slot)
            .copied()
            .ok_or_else(|| FrameError::invalid_state(format!("frame slot {} out of range", slot)))
    }

    /// Resets and begins the slot's buffer.
    ///
    /// A rejected reset means the slot's previous submission is still
    /// pending, i.e. the fence protocol was skipped upstream. That is fatal.
    pub fn begin_recording(&mut self, slot: usize) -> Result<vk::CommandBuffer> {
        let cmd = self.command_buffer(slot)?;
        if self.recording[slot] {
            return Err(FrameError::invalid_state(format!(
                "slot {} is already recording",
                slot
            )));
        }

        self.gpu.reset_command_buffer(cmd)?;
        self.gpu.begin_command_buffer(cmd)?;
        self.recording[slot] = true;
        Ok(cmd)
    }

    pub fn end_recording(&mut self, slot: usize) -> Result<()> {
        let cmd = self.command_buffer(slot)?;
        if !self.recording[slot] {
            return Err(FrameError::invalid_state(format!("slot {} is not recording", slot)));
        }

        self.recording[slot] = false;
        self.gpu.end_command_buffer(cmd)
    }

    /// Enqueues the slot's buffer: waits on `wait` at colour output, then
    /// signals `signal` and `fence` on completion.
    pub fn submit(
        &self,
        slot: usize,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let cmd = self.command_buffer(slot)?;
        if self.recording[slot] {
            return Err(FrameError::invalid_state(format!(
                "slot {} submitted while still recording",
                slot
            )));
        }

        self.gpu.queue_submit(&Submission {
            command_buffer: cmd,
            wait: Some((wait, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
            signal: Some(signal),
            fence,
        })
    }

    /// Records `record` into a throwaway buffer, submits it, and waits for
    /// the queue to drain. The buffer is freed on every path.
    pub fn run_one_time<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&dyn Gpu, vk::CommandBuffer),
    {
        let gpu = self.gpu.as_ref();
        let cmd = gpu
            .allocate_command_buffers(self.pool, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| FrameError::invalid_state("no command buffer allocated"))?;

        let result = (|| {
            gpu.begin_command_buffer(cmd)?;
            record(gpu, cmd);
            gpu.end_command_buffer(cmd)?;
            gpu.queue_submit(&Submission {
                command_buffer: cmd,
                wait: None,
                signal: None,
                fence: vk::Fence::null(),
            })?;
            gpu.queue_wait_idle()
        })();

        gpu.free_command_buffers(self.pool, &[cmd]);
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Also frees the frame buffers.
        self.gpu.destroy_command_pool(self.pool);
    }
}
