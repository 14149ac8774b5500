// Frame orchestration and GPU resource lifecycle on top of Vulkan.
//
// `FrameRenderer` paces frames across a fixed number of frame slots, keeps
// the swapchain matched to the window, and owns every resource it draws
// with. The device is reached through `backend::Gpu`.

pub mod backend;
pub mod config;
pub mod error;
pub mod renderer;
pub mod scene;

pub use backend::{DeviceOptions, Gpu, ShaderCode, SurfaceState, VulkanDevice};
pub use config::Config;
pub use error::{FrameError, Result};
pub use renderer::{Drawable, FrameOutcome, FrameRenderer, RendererConfig};
pub use scene::{DrawItem, FrameAssets, TextureData, UniformBlock, Vertex};
