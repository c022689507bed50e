// Per-frame resources
//
// One Frame per swapchain image. The whole set is built against a swapchain
// and torn down together when that swapchain goes away.

use super::commands;
use super::device::VulkanDevice;
use super::error::{Result, VkResultExt};
use super::swapchain::Swapchain;
use super::sync::FrameSync;
use ash::vk;
use std::sync::Arc;

pub struct Frame {
    pub framebuffer: vk::Framebuffer,
    pub command_buffer: vk::CommandBuffer,
    pub sync: FrameSync,
}

/// Command pool plus every frame built from it.
///
/// Dropping destroys the sync objects, then framebuffers, then the pool.
/// The device must be idle.
pub struct FrameResources {
    pub frames: Vec<Frame>,
    command_pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl FrameResources {
    pub fn new(
        device: Arc<VulkanDevice>,
        swapchain: &Swapchain,
        render_pass: vk::RenderPass,
    ) -> Result<Self> {
        let command_pool = commands::create_command_pool(&device)?;

        // From here on, Drop cleans up whatever was pushed so far
        let mut resources = Self {
            frames: Vec::with_capacity(swapchain.image_count()),
            command_pool,
            device,
        };

        let command_buffers = commands::allocate_command_buffers(
            &resources.device,
            command_pool,
            swapchain.image_count() as u32,
        )?;

        for (&view, command_buffer) in swapchain.image_views.iter().zip(command_buffers) {
            let framebuffer =
                create_framebuffer(&resources.device, render_pass, view, swapchain.extent)?;

            let sync = match FrameSync::new(&resources.device) {
                Ok(sync) => sync,
                Err(e) => {
                    unsafe { resources.device.device.destroy_framebuffer(framebuffer, None) };
                    return Err(e);
                }
            };

            resources.frames.push(Frame {
                framebuffer,
                command_buffer,
                sync,
            });
        }

        log::debug!("Created {} frames in flight", resources.frames.len());

        Ok(resources)
    }

    /// One per swapchain image
    pub fn count(&self) -> usize {
        self.frames.len()
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        let device = &self.device.device;
        for frame in &self.frames {
            frame.sync.destroy(device);
        }
        for frame in &self.frames {
            unsafe { device.destroy_framebuffer(frame.framebuffer, None) };
        }
        // Frees the command buffers too
        unsafe { device.destroy_command_pool(self.command_pool, None) };
    }
}

fn create_framebuffer(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let attachments = [view];
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.device.create_framebuffer(&framebuffer_info, None) }.creating("framebuffer")
}
