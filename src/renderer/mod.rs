// Renderer interface
//
// One concrete implementation (Vulkan). The application owns the renderer,
// the renderer owns everything on the GPU side.

pub mod frame_loop;
pub mod vulkan;

pub use frame_loop::{FrameBackend, FrameCursor, FrameLoop, FrameStatus};
pub use vulkan::VulkanRenderer;

use crate::backend::device::DeviceKind;
use crate::backend::error::Result;
use crate::window::{NativeWindow, WindowHost};
use std::path::PathBuf;

/// Everything the core needs to know from the outside world.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererSettings {
    pub app_name: String,
    /// Validation layer, debug messenger and verbose logs
    pub debug: bool,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub clear_color: [f32; 4],
    pub vertex_count: u32,
    /// Device kinds in order of preference. Kinds not listed are never picked.
    pub device_priority: Vec<DeviceKind>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            app_name: "kestrel".to_string(),
            debug: cfg!(debug_assertions),
            vertex_shader: PathBuf::from("shaders/triangle.vert.spv"),
            fragment_shader: PathBuf::from("shaders/triangle.frag.spv"),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_count: 3,
            device_priority: DeviceKind::PRIORITY.to_vec(),
        }
    }
}

pub trait Renderer: Sized {
    fn init<W: NativeWindow + ?Sized>(settings: RendererSettings, window: &W) -> Result<Self>;

    /// Draw one frame. Transient swapchain problems are handled internally.
    fn render<W: WindowHost + ?Sized>(&mut self, window: &W) -> Result<FrameStatus>;

    /// The window changed size; rebuild the swapchain on the next frame.
    fn request_resize(&mut self);

    fn wait_idle(&self) -> Result<()>;
}
