// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (priority scan over device types)
// - Queue family resolution (graphics + present, possibly distinct)
// - Logical device + queue creation

use super::error::{RenderError, Result, VkResultExt};
use super::instance::{self, InstanceContext, VALIDATION_LAYER};
use super::surface::Surface;
use ash::vk;
use serde::Deserialize;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

#[cfg(target_os = "macos")]
const PORTABILITY_SUBSET: &CStr = c"VK_KHR_portability_subset";

/// Device extensions a GPU must offer to be considered at all.
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Coarse GPU category, used as the selection bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl DeviceKind {
    /// Default selection order.
    pub const PRIORITY: [DeviceKind; 5] = [
        DeviceKind::Discrete,
        DeviceKind::Integrated,
        DeviceKind::Virtual,
        DeviceKind::Cpu,
        DeviceKind::Other,
    ];

    pub fn from_vk(device_type: vk::PhysicalDeviceType) -> Self {
        match device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceKind::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceKind::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceKind::Virtual,
            vk::PhysicalDeviceType::CPU => DeviceKind::Cpu,
            _ => DeviceKind::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceKind::Discrete => "Discrete GPU",
            DeviceKind::Integrated => "Integrated GPU",
            DeviceKind::Virtual => "Virtual GPU",
            DeviceKind::Cpu => "CPU",
            DeviceKind::Other => "Other",
        }
    }
}

/// What one queue family can do for us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

/// Snapshot of a candidate GPU, taken once during selection.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub kind: DeviceKind,
    pub extensions: Vec<String>,
    pub queue_families: Vec<QueueFamilySupport>,
}

impl PhysicalDeviceInfo {
    fn query(
        instance: &ash::Instance,
        surface: &Surface,
        handle: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };

        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .during("vkEnumerateDeviceExtensionProperties")?
            .iter()
            .map(|p| instance::name_from_raw(&p.extension_name))
            .collect();

        let families = unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let queue_families = families
            .iter()
            .enumerate()
            .map(|(index, family)| {
                let present = unsafe {
                    surface.loader.get_physical_device_surface_support(
                        handle,
                        index as u32,
                        surface.handle,
                    )
                }
                .during("vkGetPhysicalDeviceSurfaceSupportKHR")?;
                Ok(QueueFamilySupport {
                    graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                    present,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            handle,
            name: instance::name_from_raw(&properties.device_name),
            kind: DeviceKind::from_vk(properties.device_type),
            extensions,
            queue_families,
        })
    }

    /// True when every required device extension is advertised.
    pub fn is_suitable(&self, required: &[&CStr]) -> bool {
        required.iter().all(|name| self.supports(name))
    }

    fn supports(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|e| e.as_bytes() == name.to_bytes())
    }
}

/// Pick a device: first suitable one in the first non-empty priority bucket.
///
/// Deterministic for a given enumeration order; there is no tie-break on
/// memory size or queue count inside a bucket.
pub fn pick_device(
    candidates: &[PhysicalDeviceInfo],
    priority: &[DeviceKind],
    required: &[&CStr],
) -> Option<usize> {
    priority.iter().find_map(|&kind| {
        candidates
            .iter()
            .position(|c| c.kind == kind && c.is_suitable(required))
    })
}

/// Graphics and present queue family indices (may be the same family).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Scan families in index order, keeping the first match for each role.
    pub fn find(families: &[QueueFamilySupport]) -> Result<Self> {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            if graphics.is_none() && family.graphics {
                graphics = Some(index as u32);
            }
            if present.is_none() && family.present {
                present = Some(index as u32);
            }
            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        Ok(Self {
            graphics: graphics.ok_or(RenderError::NoGraphicsQueue)?,
            present: present.ok_or(RenderError::NoPresentQueue)?,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Logical device + queues.
///
/// Everything created from `device` must be gone before this drops;
/// swapchain, pipeline and frame resources hold an `Arc` to it.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub name: String,
    pub kind: DeviceKind,
}

impl VulkanDevice {
    /// Choose a GPU able to present to `surface` and open it.
    ///
    /// # Arguments
    /// * `debug` - Enable the validation layer on the device and log the scan
    /// * `priority` - Device type order to try
    pub fn select(
        instance: &InstanceContext,
        surface: &Surface,
        debug: bool,
        priority: &[DeviceKind],
    ) -> Result<Arc<Self>> {
        let handles = unsafe { instance.instance.enumerate_physical_devices() }
            .during("vkEnumeratePhysicalDevices")?;

        if debug {
            log::info!("There are {} physical devices available on the system", handles.len());
        }

        let candidates = handles
            .into_iter()
            .map(|handle| PhysicalDeviceInfo::query(&instance.instance, surface, handle))
            .collect::<Result<Vec<_>>>()?;

        let required = required_device_extensions();
        let chosen = pick_device(&candidates, priority, &required).ok_or_else(|| {
            log::error!("No physical device offers {:?}", required);
            RenderError::NoSuitableDevice
        })?;
        let info = &candidates[chosen];

        if debug {
            log::info!("\n\tDevice name: {}\n\tDevice type: {}", info.name, info.kind.label());
        }

        let queue_families = QueueFamilyIndices::find(&info.queue_families)
            .inspect_err(|e| log::error!("{}: {}", info.name, e))?;

        if debug {
            log::info!(
                "System can support {} queue families; graphics = {}, present = {}",
                info.queue_families.len(),
                queue_families.graphics,
                queue_families.present
            );
        }

        let device = Self::create_logical_device(&instance.instance, info, &queue_families, debug)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let swapchain_loader = ash::extensions::khr::Swapchain::new(&instance.instance, &device);

        log::info!("Selected GPU: {} ({})", info.name, info.kind.label());

        Ok(Arc::new(Self {
            device,
            physical_device: info.handle,
            graphics_queue,
            present_queue,
            queue_families,
            swapchain_loader,
            name: info.name.clone(),
            kind: info.kind,
        }))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        info: &PhysicalDeviceInfo,
        queue_families: &QueueFamilyIndices,
        debug: bool,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        #[allow(unused_mut)]
        let mut extensions: Vec<*const c_char> = required_device_extensions()
            .iter()
            .map(|e| e.as_ptr())
            .collect();

        #[cfg(target_os = "macos")]
        {
            if info.supports(PORTABILITY_SUBSET) {
                extensions.push(PORTABILITY_SUBSET.as_ptr());
            }
        }

        // Device layers are ignored by modern loaders, still set for old ones
        let layers: Vec<*const c_char> = if debug {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let features = vk::PhysicalDeviceFeatures::default();

        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(info.handle, &create_info, None) }
            .creating("logical device")?;

        if debug {
            log::info!("GPU has been successfully abstracted");
        }

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.during("vkDeviceWaitIdle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");
        let _ = self.wait_idle();
        unsafe { self.device.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn candidate(raw: u64, kind: DeviceKind, with_swapchain: bool) -> PhysicalDeviceInfo {
        let mut extensions = vec!["VK_KHR_maintenance1".to_string()];
        if with_swapchain {
            extensions.push("VK_KHR_swapchain".to_string());
        }
        PhysicalDeviceInfo {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{raw}"),
            kind,
            extensions,
            queue_families: vec![QueueFamilySupport { graphics: true, present: true }],
        }
    }

    fn family(graphics: bool, present: bool) -> QueueFamilySupport {
        QueueFamilySupport { graphics, present }
    }

    #[test]
    fn discrete_wins_over_earlier_integrated() {
        let devices = [
            candidate(1, DeviceKind::Integrated, true),
            candidate(2, DeviceKind::Discrete, true),
        ];
        let required = required_device_extensions();
        assert_eq!(pick_device(&devices, &DeviceKind::PRIORITY, &required), Some(1));
    }

    #[test]
    fn first_suitable_in_bucket_is_taken() {
        let devices = [
            candidate(1, DeviceKind::Discrete, false),
            candidate(2, DeviceKind::Discrete, true),
            candidate(3, DeviceKind::Discrete, true),
        ];
        let required = required_device_extensions();
        assert_eq!(pick_device(&devices, &DeviceKind::PRIORITY, &required), Some(1));
    }

    #[test]
    fn unsuitable_discrete_falls_back_to_cpu() {
        let devices = [
            candidate(1, DeviceKind::Discrete, false),
            candidate(2, DeviceKind::Cpu, true),
        ];
        let required = required_device_extensions();
        assert_eq!(pick_device(&devices, &DeviceKind::PRIORITY, &required), Some(1));
    }

    #[test]
    fn no_suitable_device_yields_none() {
        let devices = [candidate(1, DeviceKind::Discrete, false)];
        let required = required_device_extensions();
        assert_eq!(pick_device(&devices, &DeviceKind::PRIORITY, &required), None);
        assert_eq!(pick_device(&[], &DeviceKind::PRIORITY, &required), None);
    }

    #[test]
    fn custom_priority_is_honoured() {
        let devices = [
            candidate(1, DeviceKind::Discrete, true),
            candidate(2, DeviceKind::Integrated, true),
        ];
        let required = required_device_extensions();
        let integrated_first = [DeviceKind::Integrated, DeviceKind::Discrete];
        assert_eq!(pick_device(&devices, &integrated_first, &required), Some(1));

        // Kinds left out of the order are never picked
        assert_eq!(pick_device(&devices, &[DeviceKind::Virtual], &required), None);
    }

    #[test]
    fn shared_family_when_one_does_both() {
        let indices = QueueFamilyIndices::find(&[family(false, false), family(true, true)]).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 1 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![1]);
    }

    #[test]
    fn first_index_for_each_role() {
        let families = [family(true, false), family(true, true), family(false, true)];
        let indices = QueueFamilyIndices::find(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 1 });
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn missing_roles_are_typed_errors() {
        assert!(matches!(
            QueueFamilyIndices::find(&[family(false, true)]),
            Err(RenderError::NoGraphicsQueue)
        ));
        assert!(matches!(
            QueueFamilyIndices::find(&[family(true, false)]),
            Err(RenderError::NoPresentQueue)
        ));
        assert!(matches!(QueueFamilyIndices::find(&[]), Err(RenderError::NoGraphicsQueue)));
    }

    #[test]
    fn device_kind_mapping() {
        assert_eq!(DeviceKind::from_vk(vk::PhysicalDeviceType::DISCRETE_GPU), DeviceKind::Discrete);
        assert_eq!(DeviceKind::from_vk(vk::PhysicalDeviceType::CPU), DeviceKind::Cpu);
        assert_eq!(DeviceKind::from_vk(vk::PhysicalDeviceType::OTHER), DeviceKind::Other);
    }
}
