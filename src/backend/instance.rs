// Vulkan Instance - API entry point
//
// Responsibilities:
// - Load the Vulkan library
// - Check required extensions/layers BEFORE creating the instance
// - Instance creation (validation layer in debug mode)
// - Debug messenger routing validation output into `log`

use super::error::{RenderError, Result, VkResultExt};
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[cfg(target_os = "macos")]
const PORTABILITY_ENUMERATION: &CStr = c"VK_KHR_portability_enumeration";

/// Instance + optional debug messenger.
///
/// Destroyed last of all Vulkan objects. The messenger goes first.
pub struct InstanceContext {
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl InstanceContext {
    /// Create the instance for a window living on `display_handle`.
    ///
    /// # Arguments
    /// * `app_name` - Reported to the driver and validation layers
    /// * `debug` - Enable validation layer + debug messenger
    pub fn new(app_name: &str, debug: bool, display_handle: RawDisplayHandle) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let version = match entry.try_enumerate_instance_version() {
            Ok(Some(version)) => version,
            _ => vk::API_VERSION_1_0,
        };
        if debug {
            log::info!(
                "System can support Vulkan {}.{}.{}.{}",
                vk::api_version_variant(version),
                vk::api_version_major(version),
                vk::api_version_minor(version),
                vk::api_version_patch(version)
            );
        }
        // Request the loader's version without the patch number
        let version = version & !0xFFF;

        let extensions = required_extensions(display_handle, debug)?;
        let layers: Vec<&CStr> = if debug { vec![VALIDATION_LAYER] } else { vec![] };

        if debug {
            let names: Vec<_> = extensions.iter().map(|e| e.to_string_lossy()).collect();
            log::info!("Extensions to be requested: {}", names.join(", "));
        }

        // Never attempt creation with something the loader doesn't have;
        // the native error for that case says nothing useful.
        if let Err(err) = supported(&entry, &extensions, &layers, debug) {
            log::error!("{}", err);
            return Err(err);
        }

        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"kestrel";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(version)
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(version);

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        #[allow(unused_mut)]
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        #[cfg(target_os = "macos")]
        {
            create_info = create_info.flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .creating("Vulkan instance")
            .inspect_err(|e| log::error!("{}", e))?;

        let debug_utils = if debug {
            match setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            debug_utils,
            instance,
            entry,
        })
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Windowing-surface extensions, plus debug utils / portability when needed.
fn required_extensions(display_handle: RawDisplayHandle, debug: bool) -> Result<Vec<&'static CStr>> {
    let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
        .creating("surface extension list")?;

    let mut extensions: Vec<&'static CStr> = surface_extensions
        .iter()
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
        .collect();

    if debug {
        extensions.push(ash::extensions::ext::DebugUtils::name());
    }

    #[cfg(target_os = "macos")]
    extensions.push(PORTABILITY_ENUMERATION);

    Ok(extensions)
}

/// Check that every requested instance extension and layer is available.
pub fn supported(entry: &Entry, extensions: &[&CStr], layers: &[&CStr], debug: bool) -> Result<()> {
    let available_extensions: Vec<String> = entry
        .enumerate_instance_extension_properties(None)
        .during("vkEnumerateInstanceExtensionProperties")?
        .iter()
        .map(|p| name_from_raw(&p.extension_name))
        .collect();

    if debug {
        log::info!("Instance can support extensions:\n\t{}", available_extensions.join("\n\t"));
    }

    let missing_extensions = missing(extensions, &available_extensions);
    if !missing_extensions.is_empty() {
        return Err(RenderError::MissingInstanceExtensions(missing_extensions));
    }

    let available_layers: Vec<String> = entry
        .enumerate_instance_layer_properties()
        .during("vkEnumerateInstanceLayerProperties")?
        .iter()
        .map(|p| name_from_raw(&p.layer_name))
        .collect();

    if debug {
        log::info!("Instance can support layers:\n\t{}", available_layers.join("\n\t"));
    }

    let missing_layers = missing(layers, &available_layers);
    if !missing_layers.is_empty() {
        return Err(RenderError::MissingLayers(missing_layers));
    }

    Ok(())
}

/// Names in `required` that do not appear in `available`, in request order.
pub fn missing(required: &[&CStr], available: &[String]) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !available.contains(name))
        .collect()
}

/// Decode a fixed-size, NUL-terminated Vulkan name array.
pub(crate) fn name_from_raw(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .creating("debug messenger")?;

    Ok((debug_utils, messenger))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("Validation layer: {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("Validation layer: {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("Validation layer: {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
