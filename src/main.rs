// =============================================================================
// FRAMELOOP - Demo application
// =============================================================================
//
// Opens a window and drives `FrameRenderer` from the winit event loop.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (input, resize, redraw)                       │
// │    └── FrameRenderer (frame slots, rebuild cascade)             │
// │          └── Swapchain + attachments + pipeline (per generation)│
// │                └── Command buffers, fences, semaphores          │
// │                      └── VulkanDevice (ash + gpu-allocator)     │
// └─────────────────────────────────────────────────────────────────┘
//
// CONTROLS:
//   Escape  quit
//   W / S   rotate the scene
//   C       clear the first texture to white
//   R       force a swapchain rebuild
//
// =============================================================================

use anyhow::{Context, Result};
use frameloop::scene::{demo_geometry, demo_textures};
use frameloop::{Config, FrameAssets, FrameOutcome, FrameRenderer, ShaderCode, VulkanDevice};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

const ROTATION_STEP: f32 = 0.01;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frameloop");
    log::info!(
        "Window: {}x{}, {} frames in flight, {}x MSAA requested",
        config.window.width,
        config.window.height,
        config.frames_in_flight(),
        config.graphics.msaa_samples
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `RUST_LOG` overrides the configured level.
fn init_logging(config: &Config) {
    env_logger::Builder::from_default_env()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and with it the device and
/// surface) goes before the window.
struct App {
    renderer: Option<FrameRenderer>,
    window: Option<Arc<Window>>,
    config: Config,

    /// Set while the window has a zero-sized client area.
    minimized: bool,
    /// First fatal error, returned from `main` after the loop exits.
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            renderer: None,
            window: None,
            config,
            minimized: false,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Device, shaders, demo assets, then the renderer itself.
    fn init_renderer(&self, window: &Arc<Window>) -> Result<FrameRenderer> {
        let device = VulkanDevice::new(window.as_ref(), &self.config.device_options())
            .context("Failed to create Vulkan device")?;

        let shaders = ShaderCode::load(&self.config.graphics.shader_dir, "mesh")
            .context("Failed to load shaders (is glslc installed?)")?;

        let (vertices, indices, draws) = demo_geometry();
        let assets = FrameAssets {
            vertices,
            indices,
            textures: demo_textures(),
            draws,
            shaders,
        };

        let renderer = FrameRenderer::new(
            device,
            Box::new(window.clone()),
            self.config.renderer_config(),
            assets,
        )
        .context("Failed to create renderer")?;

        log::info!(
            "Renderer ready: {} swapchain images, {} frames in flight",
            renderer.image_count(),
            renderer.frames_in_flight()
        );
        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.shutdown();
        }
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.minimized {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.draw_frame() {
            Ok(FrameOutcome::Presented { .. }) => self.update_fps(),
            Ok(FrameOutcome::Rebuilt) => log::debug!("Frame dropped for a swapchain rebuild"),
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Render error")),
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match key {
            KeyCode::Escape => {
                log::info!("ESC pressed, exiting...");
                renderer.shutdown();
                event_loop.exit();
            }
            KeyCode::KeyW => renderer.rotate_by(ROTATION_STEP),
            KeyCode::KeyS => renderer.rotate_by(-ROTATION_STEP),
            KeyCode::KeyC => {
                if let Err(e) = renderer.clear_texture(0, [1.0, 1.0, 1.0, 1.0]) {
                    self.fail(event_loop, anyhow::Error::new(e).context("Failed to clear texture"));
                }
            }
            KeyCode::KeyR => {
                log::info!("Forcing swapchain rebuild");
                renderer.notify_resize();
            }
            _ => {}
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.shutdown();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.minimized = size.width == 0 || size.height == 0;
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resize();
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        self.handle_key(event_loop, key);
                    }
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously, but block on events while minimized.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.minimized {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
