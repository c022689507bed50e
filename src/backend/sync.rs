// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync.
// One set per frame in flight.

use super::device::VulkanDevice;
use super::error::{RenderError, Result, VkResultExt};
use ash::vk;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signaled by acquire, waited on by submit
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signaled when the frame's submission completes on the GPU
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on a fresh frame returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let device = &device.device;
        let image_available = unsafe { device.create_semaphore(&semaphore_info, None) }
            .creating("image-available semaphore")?;

        let render_finished = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(result) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(RenderError::ResourceCreation {
                    what: "render-finished semaphore",
                    result,
                });
            }
        };

        let in_flight_fence = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(result) => {
                unsafe {
                    device.destroy_semaphore(render_finished, None);
                    device.destroy_semaphore(image_available, None);
                }
                return Err(RenderError::ResourceCreation {
                    what: "in-flight fence",
                    result,
                });
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Block until the frame's previous submission has completed.
    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .during("vkWaitForFences")
    }

    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }.during("vkResetFences")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
