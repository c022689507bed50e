// Window surface - connection between Vulkan and the OS window
//
// Destroyed after the device, before the instance.

use super::error::{Result, VkResultExt};
use super::instance::InstanceContext;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

pub struct Surface {
    pub loader: ash::extensions::khr::Surface,
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new<W>(instance: &InstanceContext, window: &W) -> Result<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle + ?Sized,
    {
        let handle = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .creating("window surface")
        .inspect_err(|e| log::error!("{}", e))?;

        log::info!("Created window surface");

        Ok(Self {
            loader: ash::extensions::khr::Surface::new(&instance.entry, &instance.instance),
            handle,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}
