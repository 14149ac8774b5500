// Error taxonomy for the frame engine
//
// Everything a device can report ends up here. Only the two surface
// staleness codes are recoverable, and they never leave `draw_frame`.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    /// Any device error code. Fatal unless `is_surface_stale` says otherwise.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// The device lacks something the engine needs (memory type, format, queue).
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The frame-slot protocol or object lifecycle was violated upstream.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Shader error: {0}")]
    Shader(String),
}

impl FrameError {
    /// True for the codes the presentation engine uses to say the
    /// image ring no longer matches the surface.
    pub fn is_surface_stale(&self) -> bool {
        matches!(
            self,
            FrameError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | FrameError::Vulkan(vk::Result::SUBOPTIMAL_KHR)
        )
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        FrameError::InvalidState(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
