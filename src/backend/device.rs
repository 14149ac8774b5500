// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface creation
// - Physical device selection (prefer discrete GPU)
// - Logical device, graphics + present queues
// - Memory allocator setup
// - Translating every device-context call into ash

use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::Arc;
use super::gpu::*;
use crate::error::{FrameError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// How the device context should be created.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub app_name: String,
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    /// Label Vulkan objects through debug utils when available.
    pub object_names: bool,
}

/// Instance-level objects. Dropped after the logical device.
struct InstanceContext {
    _entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Object labelling through VK_EXT_debug_utils.
struct DebugNames {
    loader: ash::ext::debug_utils::Device,
}

impl ObjectNaming for DebugNames {
    fn set_object_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str) -> Result<()> {
        let name = CString::new(name).map_err(|e| FrameError::invalid_state(e.to_string()))?;
        let mut info = vk::DebugUtilsObjectNameInfoEXT::default().object_name(&name);
        info.object_type = object_type;
        info.object_handle = raw_handle;
        unsafe { self.loader.set_debug_utils_object_name(&info) }?;
        Ok(())
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    swapchain_loader: ash::khr::swapchain::Device,

    // Queue handles
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    present_queue: vk::Queue,
    present_queue_family: u32,

    // Taken in Drop so it goes away before the device.
    allocator: Mutex<Option<Allocator>>,
    buffer_allocations: Mutex<HashMap<vk::Buffer, Allocation>>,
    image_allocations: Mutex<HashMap<vk::Image, Allocation>>,

    names: Option<DebugNames>,
    limits: DeviceLimits,

    // Last, so it is dropped after the device.
    ctx: InstanceContext,
}

impl VulkanDevice {
    /// Create Vulkan device and a presentation surface for `window`.
    pub fn new<W>(window: &W, options: &DeviceOptions) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", options.app_name);

        let display_handle = window
            .display_handle()
            .map_err(|e| FrameError::Unsupported(format!("display handle: {}", e)))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| FrameError::Unsupported(format!("window handle: {}", e)))?
            .as_raw();

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }?;

        // Step 2: Create instance (+ debug messenger)
        let wants_debug_utils = options.validation || options.object_names;
        let instance = Self::create_instance(&entry, options, display_handle, wants_debug_utils)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let mut ctx = InstanceContext {
            debug_utils: None,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
            instance,
            _entry: entry,
        };
        if options.validation {
            ctx.debug_utils = Some(Self::setup_debug_messenger(&ctx._entry, &ctx.instance)?);
        }

        // Step 3: Window surface
        ctx.surface = unsafe {
            ash_window::create_surface(&ctx._entry, &ctx.instance, display_handle, window_handle, None)
        }?;

        // Step 4: Pick physical device (GPU)
        let (physical_device, graphics_queue_family, present_queue_family) = Self::pick_physical_device(&ctx)?;

        // Step 5: Create logical device
        let device = Self::create_logical_device(
            &ctx.instance,
            physical_device,
            graphics_queue_family,
            present_queue_family,
        )?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        // Step 6: Cache device properties
        let properties = unsafe { ctx.instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            properties.device_name_as_c_str().unwrap_or(c"<unknown>").to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        let limits = DeviceLimits {
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            framebuffer_sample_counts: properties.limits.framebuffer_color_sample_counts
                & properties.limits.framebuffer_depth_sample_counts,
        };

        // Step 7: Create memory allocator
        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        // Step 8: Optional object naming, resolved once
        let names = if options.object_names && ctx.debug_utils.is_some() {
            Some(DebugNames {
                loader: ash::ext::debug_utils::Device::new(&ctx.instance, &device),
            })
        } else {
            if options.object_names {
                log::info!("Object naming requested but debug utils is unavailable");
            }
            None
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(&ctx.instance, &device);

        Ok(Arc::new(Self {
            device,
            physical_device,
            swapchain_loader,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            allocator: Mutex::new(Some(allocator)),
            buffer_allocations: Mutex::new(HashMap::new()),
            image_allocations: Mutex::new(HashMap::new()),
            names,
            limits,
            ctx,
        }))
    }

    fn create_instance(
        entry: &Entry,
        options: &DeviceOptions,
        display_handle: raw_window_handle::RawDisplayHandle,
        debug_utils: bool,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(options.app_name.as_str())
            .map_err(|e| FrameError::invalid_state(e.to_string()))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"frameloop")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        // Platform-specific surface extensions
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        if debug_utils {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        // Validation layers
        let mut layer_names = Vec::new();
        if options.validation {
            let available = unsafe { entry.enumerate_instance_layer_properties() }?;
            if available
                .iter()
                .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
            {
                layer_names.push(VALIDATION_LAYER.as_ptr());
            } else {
                log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
            }
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        Ok(unsafe { entry.create_instance(&create_info, None) }?)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;
        Ok((debug_utils, messenger))
    }

    /// Returns the device and its (graphics, present) queue families.
    fn pick_physical_device(ctx: &InstanceContext) -> Result<(vk::PhysicalDevice, u32, u32)> {
        let devices = unsafe { ctx.instance.enumerate_physical_devices() }?;
        if devices.is_empty() {
            return Err(FrameError::Unsupported("no Vulkan-capable GPU found".into()));
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { ctx.instance.get_physical_device_properties(device) };
            let features = unsafe { ctx.instance.get_physical_device_features(device) };
            if features.sampler_anisotropy != vk::TRUE || !Self::supports_swapchain(&ctx.instance, device)? {
                continue;
            }

            let queue_families = unsafe { ctx.instance.get_physical_device_queue_family_properties(device) };
            let graphics_family = queue_families
                .iter()
                .position(|props| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|i| i as u32);

            // Prefer a family that can both draw and present.
            let mut present_family = None;
            for index in 0..queue_families.len() as u32 {
                let supported = unsafe {
                    ctx.surface_loader
                        .get_physical_device_surface_support(device, index, ctx.surface)
                }?;
                if supported && (present_family.is_none() || Some(index) == graphics_family) {
                    present_family = Some(index);
                }
            }

            let formats = unsafe {
                ctx.surface_loader
                    .get_physical_device_surface_formats(device, ctx.surface)
            }?;
            if formats.is_empty() {
                continue;
            }

            if let (Some(graphics), Some(present)) = (graphics_family, present_family) {
                // Score device (prefer discrete GPU)
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };

                if score > best_score {
                    best_score = score;
                    best_device = Some((device, graphics, present));
                }
            }
        }

        best_device.ok_or_else(|| FrameError::Unsupported("no GPU can draw and present to this window".into()))
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> Result<bool> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }?;
        Ok(extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(ash::khr::swapchain::NAME)))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        present_queue_family: u32,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let mut families = vec![graphics_queue_family];
        if present_queue_family != graphics_queue_family {
            families.push(present_queue_family);
        }
        let queue_create_infos: Vec<_> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        Ok(unsafe { instance.create_device(physical_device, &create_info, None) }?)
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let mut guard = self.allocator.lock();
        let allocator = guard
            .as_mut()
            .ok_or_else(|| FrameError::invalid_state("allocator already released"))?;
        Ok(allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(e) = allocator.free(allocation) {
                log::error!("Failed to free allocation: {}", e);
            }
        }
    }
}

impl Gpu for VulkanDevice {
    fn surface_support(&self) -> Result<SurfaceSupport> {
        let (loader, surface, pd) = (&self.ctx.surface_loader, self.ctx.surface, self.physical_device);
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader.get_physical_device_surface_capabilities(pd, surface)?,
                formats: loader.get_physical_device_surface_formats(pd, surface)?,
                present_modes: loader.get_physical_device_surface_present_modes(pd, surface)?,
            })
        }
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn supports_depth_format(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.ctx
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    fn object_names(&self) -> Option<&dyn ObjectNaming> {
        self.names.as_ref().map(|n| n as &dyn ObjectNaming)
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        Ok(unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }?)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        Ok(unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }?)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }?;
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }?;
        Ok(())
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_queue_family);
        Ok(unsafe { self.device.create_command_pool(&info, None) }?)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.allocate_command_buffers(&info) }?)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) }?;
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &info) }?;
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(cmd) }?;
        Ok(())
    }

    fn queue_submit(&self, submission: &Submission) -> Result<()> {
        let command_buffers = [submission.command_buffer];
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
        let signal_semaphores: Vec<_> = submission.signal.into_iter().collect();

        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe { self.device.queue_submit(self.graphics_queue, &[info], submission.fence) }?;
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue) }?;
        Ok(())
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, t: &ImageTransition) {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(t.old_layout)
            .new_layout(t.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(t.image)
            .subresource_range(color_range(t.aspect))
            .src_access_mask(t.src_access)
            .dst_access_mask(t.dst_access);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                t.src_stage,
                t.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            )
        }
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) }
    }

    fn cmd_copy_buffer_to_image(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Image, extent: vk::Extent2D) {
        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region])
        }
    }

    fn cmd_clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, color: [f32; 4]) {
        let value = vk::ClearColorValue { float32: color };
        unsafe {
            self.device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &value,
                &[color_range(vk::ImageAspectFlags::COLOR)],
            )
        }
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        // Colour, then depth. A resolve attachment is never cleared.
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: begin.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        let info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: begin.extent,
            })
            .clear_values(&clear_values);

        unsafe { self.device.cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE) }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline) }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) }
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT16) }
    }

    fn cmd_bind_descriptor_set(&self, cmd: vk::CommandBuffer, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, layout, 0, &[set], &[])
        }
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe {
            self.device
                .cmd_draw_indexed(cmd, index_count, 1, first_index, vertex_offset, 0)
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let queue_families = [self.graphics_queue_family, self.present_queue_family];
        let mut info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.ctx.surface)
            .min_image_count(desc.image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true);

        info = if self.graphics_queue_family != self.present_queue_family {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        } else {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        Ok(unsafe { self.swapchain_loader.create_swapchain(&info, None) }?)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }?)
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> Result<(u32, bool)> {
        Ok(unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }?)
    }

    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        Ok(unsafe { self.swapchain_loader.queue_present(self.present_queue, &info) }?)
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, location: MemoryLocation) -> Result<vk::Buffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate("buffer", requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            self.free(allocation);
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        self.buffer_allocations.lock().insert(buffer, allocation);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let Some(allocation) = self.buffer_allocations.lock().remove(&buffer) {
            self.free(allocation);
        }
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let mut allocations = self.buffer_allocations.lock();
        let mapped = allocations
            .get_mut(&buffer)
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| FrameError::invalid_state("buffer is not host visible"))?;

        let start = offset as usize;
        let target = mapped
            .get_mut(start..start + data.len())
            .ok_or_else(|| FrameError::invalid_state("write past the end of the buffer"))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<vk::Image> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(desc.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { self.device.create_image(&info, None) }?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate("image", requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            self.free(allocation);
            unsafe { self.device.destroy_image(image, None) };
            return Err(e.into());
        }

        self.image_allocations.lock().insert(image, allocation);
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
        if let Some(allocation) = self.image_allocations.lock().remove(&image) {
            self.free(allocation);
        }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_range(aspect));
        Ok(unsafe { self.device.create_image_view(&info, None) }?)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_sampler(&self, max_anisotropy: f32) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
        Ok(unsafe { self.device.create_sampler(&info, None) }?)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        let multisampled = desc.samples != vk::SampleCountFlags::TYPE_1;

        // Color attachment: the swapchain image, or the MSAA target that
        // resolves into it.
        let color_attachment = vk::AttachmentDescription::default()
            .format(desc.color_format)
            .samples(desc.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(if multisampled {
                vk::AttachmentStoreOp::DONT_CARE
            } else {
                vk::AttachmentStoreOp::STORE
            })
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if multisampled {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            });

        // Depth attachment
        let depth_attachment = vk::AttachmentDescription::default()
            .format(desc.depth_format)
            .samples(desc.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE) // Don't need to store depth
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let resolve_attachment = vk::AttachmentDescription::default()
            .format(desc.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_refs = [vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref);
        if multisampled {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        let dependency = desc.external_dependency();

        let attachments = if multisampled {
            vec![color_attachment, depth_attachment, resolve_attachment]
        } else {
            vec![color_attachment, depth_attachment]
        };
        let subpasses = [subpass];
        let dependencies = [dependency];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        Ok(unsafe { self.device.create_render_pass(&info, None) }?)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> Result<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        Ok(unsafe { self.device.create_framebuffer(&info, None) }?)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> Result<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        Ok(unsafe { self.device.create_pipeline_layout(&info, None) }?)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline> {
        let vert_shader = self.create_shader_module(desc.vertex_shader)?;
        let frag_shader = match self.create_shader_module(desc.fragment_shader) {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.destroy_shader_module(vert_shader, None) };
                return Err(e);
            }
        };

        let result = self.build_pipeline(desc, vert_shader, frag_shader);

        // Modules are only needed while the pipeline is created.
        unsafe {
            self.device.destroy_shader_module(frag_shader, None);
            self.device.destroy_shader_module(vert_shader, None);
        }
        result
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> Result<vk::DescriptorSetLayout> {
        let bindings: Vec<_> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(b.stages)
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        Ok(unsafe { self.device.create_descriptor_set_layout(&info, None) }?)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(&self, uniform_buffers: u32, image_samplers: u32, max_sets: u32) -> Result<vk::DescriptorPool> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: uniform_buffers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: image_samplers,
            },
        ];
        let info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);
        Ok(unsafe { self.device.create_descriptor_pool(&info, None) }?)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_sets(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout, count: u32) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        Ok(unsafe { self.device.allocate_descriptor_sets(&info) }?)
    }

    fn write_descriptor_set(&self, write: &DescriptorWrite) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: write.uniform_buffer,
            offset: 0,
            range: write.uniform_range,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler: write.sampler,
            image_view: write.image_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(write.set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info),
            vk::WriteDescriptorSet::default()
                .dst_set(write.set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info),
        ];
        unsafe { self.device.update_descriptor_sets(&writes, &[]) }
    }
}

impl VulkanDevice {
    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&info, None) }
            .map_err(|e| FrameError::Shader(format!("failed to create shader module: {}", e)))
    }

    fn build_pipeline(
        &self,
        desc: &PipelineDesc<'_>,
        vert_shader: vk::ShaderModule,
        frag_shader: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_shader)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader)
                .name(c"main"),
        ];

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are baked for this extent.
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: desc.extent.width as f32,
            height: desc.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: desc.extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(desc.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS) // Closer objects win
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Opaque
        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| e)?;

        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| FrameError::invalid_state("driver returned no pipeline"))
    }
}

fn color_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        if let Err(e) = self.wait_idle() {
            log::error!("wait_idle failed during device teardown: {}", e);
        }

        let leaked = self.buffer_allocations.lock().len() + self.image_allocations.lock().len();
        if leaked > 0 {
            log::warn!("{} allocations still live at device teardown", leaked);
        }
        for (_, allocation) in self.buffer_allocations.lock().drain() {
            self.free(allocation);
        }
        for (_, allocation) in self.image_allocations.lock().drain() {
            self.free(allocation);
        }
        drop(self.allocator.lock().take());

        // The instance context drops after this.
        unsafe { self.device.destroy_device(None) };
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message);
        }
        _ => {
            log::debug!("[Vulkan] {}", message);
        }
    }

    vk::FALSE
}
