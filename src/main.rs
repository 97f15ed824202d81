// =============================================================================
// LUMEN-VK DEMO - winit event loop driving the renderer
// =============================================================================
//
// FRAME FLOW (one RedrawRequested):
// 1. Update the uniform block (spinning quad)
// 2. prepare_frame: wait slot fence, acquire image, record commands
// 3. frame: submit, present, advance slot
//
// Resize events only flag the swapchain for recreation; the renderer
// rebuilds it at the start of the next frame. Any Err from the renderer is
// fatal: it is logged and the loop exits.
//
// =============================================================================

use anyhow::Result;
use ash::vk;
use glam::{Mat4, Vec3};
use lumen_vk::backend::buffer::Buffer;
use lumen_vk::platform::{Platform, WinitPlatform};
use lumen_vk::{logging, Config, FrameStatus, RendererContext, UniformBufferObject, Vertex};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{WindowAttributes, WindowId},
};

const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0]),
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// 2x2 checkerboard, uploaded to exercise the texture path.
const CHECKER: [u8; 16] = [
    255, 255, 255, 255, 0, 0, 0, 255, //
    0, 0, 0, 255, 255, 255, 255, 255,
];

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();
    logging::init_logging(&config.debug);

    log::info!("Starting lumen-vk");
    log::info!(
        "Window: {}x{}, present mode preference: {}",
        config.window.width,
        config.window.height,
        config.renderer.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if app.failed {
        anyhow::bail!("Renderer stopped after a fatal error");
    }
    Ok(())
}

/// Write a byte pattern into host-visible memory and map it back.
fn check_host_round_trip(renderer: &RendererContext) -> Result<()> {
    let pattern: Vec<u8> = (0..=255u8).collect();
    let buffer = Buffer::new(
        renderer.device(),
        pattern.len() as vk::DeviceSize,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    buffer.upload(0, &pattern)?;
    if buffer.read_back()? != pattern {
        anyhow::bail!("Host-visible buffer did not read back what was written");
    }
    log::debug!("Host-visible round trip OK ({} bytes)", pattern.len());
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer goes before the window.
struct App {
    renderer: Option<RendererContext>,
    platform: Option<Arc<WinitPlatform>>,
    config: Config,
    started: Instant,
    last_frame: Instant,
    failed: bool,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            renderer: None,
            platform: None,
            config,
            started: now,
            last_frame: now,
            failed: false,
        }
    }

    fn init_renderer(&mut self, platform: Arc<WinitPlatform>) -> Result<()> {
        let mut renderer = RendererContext::initialize(platform.clone(), &self.config)?;

        let quad = renderer.upload_mesh(&QUAD_VERTICES, &QUAD_INDICES)?;
        if let Some(layout) = renderer.mesh_layout(quad) {
            log::info!(
                "Quad uploaded: {} bytes, indices at offset {}",
                layout.size,
                layout.index_offset
            );
        }
        renderer.upload_texture(2, 2, &CHECKER)?;
        check_host_round_trip(&renderer)?;

        self.platform = Some(platform);
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Spin the quad around Z, keeping it square on non-square windows.
    fn uniforms(&self, renderer: &RendererContext) -> UniformBufferObject {
        let elapsed = self.started.elapsed().as_secs_f32();
        let aspect = renderer
            .swapchain_extent()
            .filter(|e| e.height > 0)
            .map_or(1.0, |e| e.width as f32 / e.height as f32);

        UniformBufferObject {
            model: Mat4::from_rotation_z(elapsed * std::f32::consts::FRAC_PI_2),
            view: Mat4::IDENTITY,
            projection: Mat4::from_scale(Vec3::new(1.0 / aspect, 1.0, 1.0)),
        }
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let delta_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let Some(mut renderer) = self.renderer.take() else {
            return;
        };
        renderer.set_uniforms(self.uniforms(&renderer));

        let result = match renderer.prepare_frame(delta_time) {
            Ok(FrameStatus::Recorded) => renderer.frame(delta_time),
            other => other,
        };
        self.renderer = Some(renderer);

        if let Err(e) = result {
            log::error!("Fatal render error: {:?}", e);
            self.failed = true;
            self.shutdown(event_loop);
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(platform) = &self.platform {
            platform.request_close();
        }
        if let Some(renderer) = self.renderer.take() {
            renderer.shutdown();
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.platform.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.failed = true;
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(Arc::new(WinitPlatform::new(window))) {
            log::error!("Failed to initialize renderer: {:?}", e);
            self.failed = true;
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized();
                }
            }

            WindowEvent::RedrawRequested => self.render_frame(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws while the window is open.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(platform) = &self.platform {
            if platform.is_close_requested() {
                event_loop.exit();
                return;
            }
            platform.window().request_redraw();
        }
    }
}
