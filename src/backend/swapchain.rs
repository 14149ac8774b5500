// Swapchain - Window presentation
//
// Owns the ring of presentable images, their views, and the generation
// counter that tags everything built against the ring. Selection of
// format, present mode, extent and image count is pure so it can be
// checked without a device.

use ash::vk;
use std::sync::Arc;
use super::gpu::{label, Gpu, SurfaceSupport, SwapchainDesc};
use crate::error::{FrameError, Result};

/// Preferred 8-bit-per-channel non-linear format.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Choose surface format (prefer SRGB), otherwise the first one offered.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first())
        .copied()
}

/// Choose present mode
/// MAILBOX: No vsync, no tearing, triple buffered
/// FIFO: Vsync enabled, guaranteed available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// A `u32::MAX` current extent means the surface lets us pick, so the
/// drawable size is clamped into the supported range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: drawable.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: drawable.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, clamped when the surface declares a maximum
/// (zero means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        image_count = caps.max_image_count;
    }
    image_count
}

pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Uninitialized,
    Valid,
    Invalidated,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; the ring must be rebuilt.
    Stale,
}

/// The images of one swapchain generation. Dropping destroys the views
/// first, then the swapchain handle; the images belong to the
/// presentation engine.
struct ImageRing {
    gpu: Arc<dyn Gpu>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Drop for ImageRing {
    fn drop(&mut self) {
        for view in self.image_views.drain(..) {
            self.gpu.destroy_image_view(view);
        }
        self.gpu.destroy_swapchain(self.swapchain);
    }
}

pub struct PresentationSurface {
    gpu: Arc<dyn Gpu>,
    ring: Option<ImageRing>,
    generation: u64,
    state: SurfaceState,
}

impl PresentationSurface {
    pub fn new(gpu: Arc<dyn Gpu>) -> Self {
        Self {
            gpu,
            ring: None,
            generation: 0,
            state: SurfaceState::Uninitialized,
        }
    }

    /// Builds a new ring against `support`. The previous ring must already
    /// have been destroyed with `destroy_ring`.
    pub fn create(&mut self, support: &SurfaceSupport, drawable: vk::Extent2D) -> Result<()> {
        if self.state == SurfaceState::Destroyed {
            return Err(FrameError::invalid_state("presentation surface was destroyed"));
        }
        if self.ring.is_some() {
            return Err(FrameError::invalid_state(
                "old image ring must be destroyed before recreation",
            ));
        }

        let caps = &support.capabilities;
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| FrameError::Unsupported("surface offers no formats".into()))?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(caps, drawable);
        if is_zero_extent(extent) {
            return Err(FrameError::invalid_state("cannot create a zero-sized swapchain"));
        }
        let image_count = choose_image_count(caps);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let gpu = self.gpu.as_ref();
        let swapchain = gpu.create_swapchain(&SwapchainDesc {
            surface_format,
            present_mode,
            extent,
            image_count,
            pre_transform: caps.current_transform,
        })?;

        let mut ring = ImageRing {
            gpu: self.gpu.clone(),
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            surface_format,
            present_mode,
            extent,
        };
        ring.images = gpu.swapchain_images(swapchain)?;
        for &image in &ring.images {
            let view = gpu.create_image_view(image, surface_format.format, vk::ImageAspectFlags::COLOR)?;
            ring.image_views.push(view);
        }

        self.generation += 1;
        for (i, &view) in ring.image_views.iter().enumerate() {
            label(gpu, view, &format!("swapchain view {} [gen {}]", i, self.generation));
        }

        log::info!(
            "Created swapchain generation {} with {} images",
            self.generation,
            ring.images.len()
        );

        self.ring = Some(ring);
        self.state = SurfaceState::Valid;
        Ok(())
    }

    /// Destroys views and the swapchain handle. The device must be idle.
    pub fn destroy_ring(&mut self) {
        if self.ring.take().is_some() && self.state == SurfaceState::Valid {
            self.state = SurfaceState::Invalidated;
        }
    }

    /// Marks the ring stale; a no-op unless it is currently valid.
    pub fn invalidate(&mut self) {
        if self.state == SurfaceState::Valid {
            log::debug!("Swapchain generation {} invalidated", self.generation);
            self.state = SurfaceState::Invalidated;
        }
    }

    pub fn destroy(&mut self) {
        self.ring = None;
        self.state = SurfaceState::Destroyed;
    }

    fn ring(&self) -> Result<&ImageRing> {
        self.ring
            .as_ref()
            .ok_or_else(|| FrameError::invalid_state("no swapchain image ring"))
    }

    pub fn acquire(&self, signal: vk::Semaphore) -> Result<AcquireOutcome> {
        let ring = self.ring()?;
        match self.gpu.acquire_next_image(ring.swapchain, signal) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(FrameError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                log::warn!("Swapchain out of date during acquire");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(e) => Err(e),
        }
    }

    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome> {
        let ring = self.ring()?;
        match self.gpu.queue_present(ring.swapchain, image_index, wait) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Stale),
            Err(e) if e.is_surface_stale() => {
                log::warn!("Swapchain out of date during present");
                Ok(PresentOutcome::Stale)
            }
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.ring.as_ref().map(|r| r.extent)
    }

    pub fn surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.ring.as_ref().map(|r| r.surface_format)
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.ring.as_ref().map(|r| r.present_mode)
    }

    pub fn image_count(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.images.len())
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        self.ring.as_ref().map_or(&[], |r| &r.image_views)
    }
}
