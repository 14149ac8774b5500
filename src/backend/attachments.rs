// Attachment set
//
// Depth buffer and multisampled colour target sized to the current
// swapchain. Unlike swapchain images these are ours to destroy, and they
// are only valid for the generation they were built against.

use ash::vk;
use std::sync::Arc;
use super::gpu::{label, Gpu, ImageDesc};
use crate::error::{FrameError, Result};

pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate the device accepts as a depth attachment.
pub fn choose_depth_format(
    candidates: &[vk::Format],
    supported: impl Fn(vk::Format) -> bool,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&f| supported(f))
}

/// Highest supported sample count not above `requested`.
pub fn choose_sample_count(requested: u32, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    const COUNTS: [(u32, vk::SampleCountFlags); 7] = [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
        (1, vk::SampleCountFlags::TYPE_1),
    ];

    COUNTS
        .iter()
        .find(|(n, flag)| *n <= requested && supported.contains(*flag))
        .map_or(vk::SampleCountFlags::TYPE_1, |(_, flag)| *flag)
}

struct Attachment {
    image: vk::Image,
    view: vk::ImageView,
}

pub struct AttachmentSet {
    gpu: Arc<dyn Gpu>,
    depth: Option<Attachment>,
    /// Only present when rendering multisampled.
    color: Option<Attachment>,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
    extent: vk::Extent2D,
    generation: u64,
}

impl AttachmentSet {
    pub fn new(
        gpu: Arc<dyn Gpu>,
        extent: vk::Extent2D,
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
        generation: u64,
    ) -> Result<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(FrameError::invalid_state("attachments need a non-zero extent"));
        }

        let mut set = Self {
            gpu,
            depth: None,
            color: None,
            depth_format,
            samples,
            extent,
            generation,
        };

        set.depth = Some(set.create_attachment(
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            "depth",
        )?);

        if samples != vk::SampleCountFlags::TYPE_1 {
            set.color = Some(set.create_attachment(
                color_format,
                vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
                "msaa color",
            )?);
        }

        log::debug!(
            "Created attachments {}x{} ({:?}, {:?}) for generation {}",
            extent.width,
            extent.height,
            depth_format,
            samples,
            generation
        );
        Ok(set)
    }

    fn create_attachment(
        &self,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> Result<Attachment> {
        let gpu = self.gpu.as_ref();
        let image = gpu.create_image(&ImageDesc {
            extent: self.extent,
            format,
            usage,
            samples: self.samples,
        })?;
        let view = match gpu.create_image_view(image, format, aspect) {
            Ok(view) => view,
            Err(e) => {
                gpu.destroy_image(image);
                return Err(e);
            }
        };

        label(gpu, image, &format!("{} [gen {}]", name, self.generation));
        Ok(Attachment { image, view })
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.as_ref().map_or(vk::ImageView::null(), |a| a.view)
    }

    pub fn color_view(&self) -> Option<vk::ImageView> {
        self.color.as_ref().map(|a| a.view)
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for AttachmentSet {
    fn drop(&mut self) {
        for attachment in [self.color.take(), self.depth.take()].into_iter().flatten() {
            self.gpu.destroy_image_view(attachment.view);
            self.gpu.destroy_image(attachment.image);
        }
    }
}
