// =============================================================================
// KESTREL DEMO - one triangle, drawn with frames in flight
// =============================================================================
//
// FRAME FLOW (see renderer::frame_loop):
// 1. Wait for the frame slot's fence
// 2. Acquire swapchain image
// 3. Record + submit the slot's command buffer
// 4. Present
// 5. Recreate the swapchain whenever the window says so
//
// CONTROLS: ESC quits, F11 toggles fullscreen.
//
// =============================================================================

use anyhow::{Context, Result};
use kestrel::config::Config;
use kestrel::renderer::{FrameStatus, Renderer, VulkanRenderer};
use log::LevelFilter;
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml; a bad file is reported once logging is up
    let (config, config_error) = Config::load_or_default("config.toml");

    init_logging(&config)?;
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::info!("Starting kestrel");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Quiet unless debugging: errors only, or everything down to debug.
/// RUST_LOG still wins.
fn init_logging(config: &Config) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if config.debug.enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Error
    });
    builder.parse_default_env();

    if let Some(path) = &config.debug.log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer's surface must go
/// before the window it was created from.
struct App {
    config: Config,
    renderer: Option<VulkanRenderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    /// First unrecoverable error; ends the event loop
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(ref mut renderer) = self.renderer {
                renderer.request_resize();
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

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

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match VulkanRenderer::init(self.config.renderer_settings(), window.as_ref()) {
            Ok(renderer) => {
                log::info!(
                    "Rendering on {} with {} frames in flight",
                    renderer.device().name,
                    renderer.frames_in_flight()
                );
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                let kind = e.kind();
                self.fail(
                    event_loop,
                    anyhow::Error::new(e).context(format!("Failed to initialize Vulkan ({:?})", kind)),
                );
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref renderer) = self.renderer {
                    if let Err(e) = renderer.wait_idle() {
                        log::error!("{}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut renderer) = self.renderer {
                    renderer.request_resize();
                }
            }

            WindowEvent::RedrawRequested => {
                let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref())
                else {
                    return;
                };

                match renderer.render(window.as_ref()) {
                    Ok(FrameStatus::Presented) => self.update_fps(),
                    Ok(FrameStatus::Recreated | FrameStatus::Suspended) => {}
                    Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Render error")),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws; the frame loop paces itself on its fences.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
