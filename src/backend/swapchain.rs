// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The selection helpers below are pure so they can be tested without a GPU.

use super::device::VulkanDevice;
use super::error::{RenderError, Result, VkResultExt};
use super::surface::Surface;
use ash::vk;
use std::sync::Arc;

/// Upper bound on images requested from the presentation engine.
pub const MAX_IMAGE_COUNT: u32 = 3;

/// Result of asking the swapchain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image is ready once the acquire semaphore signals.
    Ready { image_index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; recreate before drawing.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Suboptimal or out of date; the image may or may not have been shown.
    NeedsRecreate,
}

/// Everything the surface tells us about what it can present.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(surface: &Surface, physical_device: vk::PhysicalDevice) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, surface.handle)
                    .during("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: surface
                    .loader
                    .get_physical_device_surface_formats(physical_device, surface.handle)
                    .during("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: surface
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, surface.handle)
                    .during("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    /// Multi-line human readable dump, logged in debug mode.
    pub fn describe(&self) -> String {
        let caps = &self.capabilities;
        let mut out = String::new();
        out.push_str(&format!("\n\tMinimum image count: {}", caps.min_image_count));
        out.push_str(&format!("\n\tMaximum image count: {}", caps.max_image_count));
        out.push_str(&format!(
            "\n\tCurrent extent: {}x{}",
            caps.current_extent.width, caps.current_extent.height
        ));
        out.push_str(&format!(
            "\n\tMinimum supported extent: {}x{}",
            caps.min_image_extent.width, caps.min_image_extent.height
        ));
        out.push_str(&format!(
            "\n\tMaximum supported extent: {}x{}",
            caps.max_image_extent.width, caps.max_image_extent.height
        ));
        out.push_str(&format!("\n\tMaximum image array layers: {}", caps.max_image_array_layers));
        out.push_str(&format!("\n\tSupported transforms: {:?}", caps.supported_transforms));
        out.push_str(&format!("\n\tCurrent transform: {:?}", caps.current_transform));
        out.push_str(&format!("\n\tSupported alpha operations: {:?}", caps.supported_composite_alpha));
        out.push_str(&format!("\n\tSupported image usage: {:?}", caps.supported_usage_flags));
        for format in &self.formats {
            out.push_str(&format!(
                "\n\tSupported format: {:?} / {:?}",
                format.format, format.color_space
            ));
        }
        for &mode in &self.present_modes {
            out.push_str(&format!("\n\tPresent mode: {}", describe_present_mode(mode)));
        }
        out
    }
}

/// Prefer 8-bit BGRA with sRGB non-linear color space, else the first format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX when offered, otherwise FIFO (always supported).
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed extent, or the request clamped into its limits.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped at [`MAX_IMAGE_COUNT`] and at a
/// non-zero `max_image_count` (zero means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = (caps.min_image_count + 1).min(MAX_IMAGE_COUNT);
    if caps.max_image_count > 0 {
        count = count.min(caps.max_image_count);
    }
    // Vulkan rejects anything below the surface minimum
    count.max(caps.min_image_count)
}

pub fn describe_present_mode(mode: vk::PresentModeKHR) -> &'static str {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => "immediate: no vblank wait, may tear",
        vk::PresentModeKHR::MAILBOX => {
            "mailbox: vblank wait, single-entry queue, new requests replace the pending one"
        }
        vk::PresentModeKHR::FIFO => "fifo: vblank wait, ordered queue, always supported",
        vk::PresentModeKHR::FIFO_RELAXED => "relaxed fifo: vblank wait unless late, may tear",
        vk::PresentModeKHR::SHARED_DEMAND_REFRESH => "shared demand refresh",
        vk::PresentModeKHR::SHARED_CONTINUOUS_REFRESH => "shared continuous refresh",
        _ => "none/undefined",
    }
}

/// Swapchain handle plus one view per image.
///
/// The images belong to the swapchain; the views are ours.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Create a swapchain for `surface`.
    ///
    /// `old_swapchain` is handed to the driver for resource reuse. It stays
    /// valid and owned by the caller, who destroys it after this returns.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        width: u32,
        height: u32,
        old_swapchain: Option<vk::SwapchainKHR>,
        debug: bool,
    ) -> Result<Self> {
        let support = SurfaceSupport::query(surface, device.physical_device)?;
        if debug {
            log::info!("Surface support:{}", support.describe());
        }

        let surface_format = choose_surface_format(&support.formats).ok_or(
            RenderError::ResourceCreation {
                what: "swapchain (surface reports no formats)",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            },
        )?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format,
            present_mode
        );

        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or_default());

        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain_loader = device.swapchain_loader.clone();

        // No way forward without a swapchain: the surface itself is bad
        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|result| {
                log::error!("Failed to create swapchain: {}", result);
                RenderError::SwapchainCreation(result)
            })?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(RenderError::Vulkan { call: "vkGetSwapchainImagesKHR", result });
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_image_view(&device, image, surface_format.format) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for &view in &image_views {
                            device.device.destroy_image_view(view, None);
                        }
                        swapchain_loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(e);
                }
            }
        }

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            present_mode,
            device,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering; `semaphore` signals when it is ready.
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_INCOMPATIBLE_DISPLAY_KHR) => {
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(result) => Err(RenderError::Vulkan { call: "vkAcquireNextImageKHR", result }),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::NeedsRecreate),
            Err(result) => Err(RenderError::Vulkan { call: "vkQueuePresentKHR", result }),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_image_view(device: &VulkanDevice, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.device.create_image_view(&create_info, None) }.creating("swapchain image view")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 640, height: 480 },
            max_image_extent: vk::Extent2D { width: 3840, height: 2160 },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn undefined_extent_keeps_in_bounds_request() {
        let extent = choose_extent(&caps(2, 0), 1920, 1080);
        assert_eq!(extent, vk::Extent2D { width: 1920, height: 1080 });
    }

    #[test]
    fn undefined_extent_clamps_each_component() {
        let c = caps(2, 0);
        assert_eq!(choose_extent(&c, 100, 5000), vk::Extent2D { width: 640, height: 2160 });
        assert_eq!(choose_extent(&c, 9000, 10), vk::Extent2D { width: 3840, height: 480 });
        assert_eq!(choose_extent(&c, 0, 0), vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn defined_extent_wins_over_request() {
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(choose_extent(&c, 1920, 1080), vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn clamped_extent_always_within_limits() {
        let c = caps(2, 0);
        for &(w, h) in &[(1, 1), (640, 480), (1280, 720), (3840, 2160), (u32::MAX - 1, 7)] {
            let e = choose_extent(&c, w, h);
            assert!((640..=3840).contains(&e.width));
            assert!((480..=2160).contains(&e.height));
        }
    }

    #[test]
    fn preferred_format_is_found_anywhere_in_the_list() {
        let preferred = format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            preferred,
        ];
        assert_eq!(choose_surface_format(&formats), Some(preferred));
        assert_eq!(choose_surface_format(&formats), choose_surface_format(&formats));
    }

    #[test]
    fn first_format_when_preferred_is_absent() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn mailbox_preferred_then_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_unbounded_max() {
        assert_eq!(choose_image_count(&caps(1, 0)), 2);
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(3, 0)), 3);
    }

    #[test]
    fn image_count_respects_nonzero_max() {
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        assert_eq!(choose_image_count(&caps(1, 8)), 2);
        for min in 1..=3 {
            for max in min..=6 {
                assert!(choose_image_count(&caps(min, max)) <= max);
            }
        }
    }

    #[test]
    fn image_count_never_below_surface_minimum() {
        assert_eq!(choose_image_count(&caps(4, 0)), 4);
    }
}
