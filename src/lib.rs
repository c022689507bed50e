//! kestrel - a minimal Vulkan rendering engine.
//!
//! Sets up an instance, picks a GPU, builds a swapchain and a single
//! graphics pipeline, and runs a frames-in-flight render loop drawing one
//! procedurally generated triangle.
//!
//! ```no_run
//! use kestrel::renderer::{Renderer, RendererSettings, VulkanRenderer};
//! # fn run(window: &winit::window::Window) -> kestrel::backend::Result<()> {
//! let mut renderer = VulkanRenderer::init(RendererSettings::default(), window)?;
//! renderer.render(window)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod renderer;
pub mod window;

pub use backend::{ErrorKind, RenderError};
pub use renderer::{FrameStatus, Renderer, RendererSettings, VulkanRenderer};
