// Error taxonomy for the Vulkan backend
//
// Setup failures are split into "this machine can't run us" and "a
// resource failed to create". Transient presentation conditions are not
// errors at all; see AcquireOutcome / PresentOutcome in swapchain.rs.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Broad class of a [`RenderError`], used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing extensions/layers, no usable GPU or queue family.
    UnsupportedPlatform,
    /// A Vulkan object could not be created during setup or recreation.
    ResourceCreation,
    /// A per-frame call or an I/O collaborator failed.
    Runtime,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Required instance extensions are not supported: {}", .0.join(", "))]
    MissingInstanceExtensions(Vec<String>),

    #[error("Required layers are not supported: {}", .0.join(", "))]
    MissingLayers(Vec<String>),

    #[error("No suitable physical device found")]
    NoSuitableDevice,

    #[error("No queue family supports graphics")]
    NoGraphicsQueue,

    #[error("No queue family supports presenting to the surface")]
    NoPresentQueue,

    #[error("Invalid application name: {0}")]
    InvalidName(#[from] std::ffi::NulError),

    #[error("Failed to create {what}: {result}")]
    ResourceCreation { what: &'static str, result: vk::Result },

    #[error("Failed to create swapchain: {0}")]
    SwapchainCreation(vk::Result),

    #[error("Failed to read shader {path:?}: {source}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shader bytecode is not valid SPIR-V: {0}")]
    InvalidSpirv(#[source] std::io::Error),

    #[error("{0} not available")]
    MissingResource(&'static str),

    #[error("{call} failed: {result}")]
    Vulkan { call: &'static str, result: vk::Result },
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Loading(_)
            | Self::MissingInstanceExtensions(_)
            | Self::MissingLayers(_)
            | Self::NoSuitableDevice
            | Self::NoGraphicsQueue
            | Self::NoPresentQueue => ErrorKind::UnsupportedPlatform,
            Self::InvalidName(_)
            | Self::ResourceCreation { .. }
            | Self::SwapchainCreation(_)
            | Self::InvalidSpirv(_) => ErrorKind::ResourceCreation,
            Self::ShaderRead { .. } | Self::MissingResource(_) | Self::Vulkan { .. } => {
                ErrorKind::Runtime
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Attach what was being done to a raw `VkResult`.
pub(crate) trait VkResultExt<T> {
    /// The call created `what`; failure is a resource-creation error.
    fn creating(self, what: &'static str) -> Result<T>;
    /// The call is a runtime operation named `call`.
    fn during(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn creating(self, what: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::ResourceCreation { what, result })
    }

    fn during(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(RenderError::NoSuitableDevice.kind(), ErrorKind::UnsupportedPlatform);
        assert_eq!(
            RenderError::MissingLayers(vec!["VK_LAYER_KHRONOS_validation".into()]).kind(),
            ErrorKind::UnsupportedPlatform
        );
        assert_eq!(
            RenderError::SwapchainCreation(vk::Result::ERROR_SURFACE_LOST_KHR).kind(),
            ErrorKind::ResourceCreation
        );
        assert_eq!(
            RenderError::Vulkan { call: "vkQueueSubmit", result: vk::Result::ERROR_DEVICE_LOST }.kind(),
            ErrorKind::Runtime
        );
    }

    #[test]
    fn creating_maps_into_resource_errors() {
        let raw: std::result::Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        match raw.creating("render pass") {
            Err(RenderError::ResourceCreation { what, result }) => {
                assert_eq!(what, "render pass");
                assert_eq!(result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_names_are_listed_in_the_message() {
        let err = RenderError::MissingInstanceExtensions(vec!["VK_A".into(), "VK_B".into()]);
        assert_eq!(
            err.to_string(),
            "Required instance extensions are not supported: VK_A, VK_B"
        );
    }
}
