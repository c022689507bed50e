// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Every object below the device holds an
// Arc<VulkanDevice> so it can never outlive it.

pub mod commands;
pub mod device;
pub mod error;
pub mod frames;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::{DeviceKind, VulkanDevice};
pub use error::{ErrorKind, RenderError, Result};
pub use frames::FrameResources;
pub use instance::InstanceContext;
pub use pipeline::PipelineBundle;
pub use surface::Surface;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
