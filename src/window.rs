// Windowing collaborator
//
// The renderer only needs two things from a window: raw handles to build a
// surface from, and its live framebuffer size to detect resizes and
// minimization.

use glam::UVec2;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

pub trait WindowHost {
    /// Current framebuffer size in physical pixels. Zero while minimized.
    fn framebuffer_size(&self) -> UVec2;

    fn is_minimized(&self) -> bool {
        let size = self.framebuffer_size();
        size.x == 0 || size.y == 0
    }
}

/// A window that can also back a Vulkan surface.
pub trait NativeWindow: WindowHost + HasRawWindowHandle + HasRawDisplayHandle {}

impl<T: WindowHost + HasRawWindowHandle + HasRawDisplayHandle + ?Sized> NativeWindow for T {}

impl WindowHost for winit::window::Window {
    fn framebuffer_size(&self) -> UVec2 {
        let size = self.inner_size();
        UVec2::new(size.width, size.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(UVec2);

    impl WindowHost for Fixed {
        fn framebuffer_size(&self) -> UVec2 {
            self.0
        }
    }

    #[test]
    fn zero_in_either_dimension_is_minimized() {
        assert!(Fixed(UVec2::new(0, 0)).is_minimized());
        assert!(Fixed(UVec2::new(800, 0)).is_minimized());
        assert!(Fixed(UVec2::new(0, 600)).is_minimized());
        assert!(!Fixed(UVec2::new(800, 600)).is_minimized());
    }
}
