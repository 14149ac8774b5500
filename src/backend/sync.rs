// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync, one set per frame slot.
// Created once at startup and reused every cycle; they survive surface
// rebuilds.

use ash::vk;
use std::sync::Arc;
use super::gpu::{label, Gpu};
use crate::error::{FrameError, Result};

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Signaled by acquire, waited on by the slot's submission.
    pub image_available: vk::Semaphore,
    /// Signaled by the submission, waited on by present.
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission completes.
    pub in_flight_fence: vk::Fence,
}

pub struct SyncSet {
    gpu: Arc<dyn Gpu>,
    frames: Vec<FrameSync>,
}

impl SyncSet {
    /// Allocates `frames_in_flight` semaphore pairs and pre-signaled fences,
    /// so the first wait on every slot returns immediately.
    ///
    /// Any creation failure is fatal; whatever was created is released.
    pub fn new(gpu: Arc<dyn Gpu>, frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(FrameError::invalid_state("at least one frame in flight is required"));
        }

        let mut set = Self {
            gpu,
            frames: Vec::with_capacity(frames_in_flight),
        };

        for slot in 0..frames_in_flight {
            let frame = set.create_frame(slot)?;
            set.frames.push(frame);
        }

        log::debug!("Created sync objects for {} frames in flight", frames_in_flight);
        Ok(set)
    }

    fn create_frame(&self, slot: usize) -> Result<FrameSync> {
        let gpu = self.gpu.as_ref();

        let image_available = gpu.create_semaphore()?;
        let render_finished = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        // Start signaled
        let in_flight_fence = match gpu.create_fence(true) {
            Ok(fence) => fence,
            Err(e) => {
                gpu.destroy_semaphore(render_finished);
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };

        label(gpu, image_available, &format!("image available [slot {}]", slot));
        label(gpu, render_finished, &format!("render finished [slot {}]", slot));
        label(gpu, in_flight_fence, &format!("in flight [slot {}]", slot));

        Ok(FrameSync {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, slot: usize) -> Result<FrameSync> {
        self.frames
            .get(slot)
            .copied()
            .ok_or_else(|| FrameError::invalid_state(format!("frame slot {} out of range", slot)))
    }

    /// Blocks until the slot's previous submission has completed.
    /// There is no timeout at this layer.
    pub fn wait(&self, slot: usize) -> Result<()> {
        let frame = self.frame(slot)?;
        self.gpu.wait_for_fence(frame.in_flight_fence, u64::MAX)
    }

    /// Clears the slot's fence. Only call this when a submission that
    /// signals it is guaranteed to follow.
    pub fn reset(&self, slot: usize) -> Result<()> {
        let frame = self.frame(slot)?;
        self.gpu.reset_fence(frame.in_flight_fence)
    }

    pub fn wait_and_reset(&self, slot: usize) -> Result<()> {
        self.wait(slot)?;
        self.reset(slot)
    }
}

impl Drop for SyncSet {
    fn drop(&mut self) {
        let gpu = self.gpu.as_ref();
        for frame in self.frames.drain(..).rev() {
            gpu.destroy_fence(frame.in_flight_fence);
            gpu.destroy_semaphore(frame.render_finished);
            gpu.destroy_semaphore(frame.image_available);
        }
    }
}
