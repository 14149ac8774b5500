// Backend module - Vulkan abstraction layer
//
// Every component owns its handles and destroys them on drop. Components
// reach the device only through the `Gpu` trait, so the whole layer runs
// against `mock::MockGpu` in tests.

pub mod attachments;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod gpu;
#[cfg(test)]
pub mod mock;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::{DeviceOptions, VulkanDevice};
pub use gpu::{Gpu, ObjectNaming};
pub use shader::ShaderCode;
pub use swapchain::{PresentationSurface, SurfaceState};
