// Window system integration
//
// The window itself is created and pumped by the application. All we
// need from it is a VkSurfaceKHR, the instance extensions that surface
// needs and, optionally, the size it wants to be drawn at.
//
// Austin Shafer - 2024

use ash::vk;
use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};

use std::os::raw::c_char;

/// Something we can present to
pub trait WindowSurface {
    /// Instance extensions required to create this surface
    fn extension_names(&self) -> Result<Vec<*const c_char>, vk::Result>;

    /// Get a surface for this window.
    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR, vk::Result>;

    /// Helper for getting the drawable size according to the window
    /// system.
    /// Returns None if not supported and the size should come from
    /// the surface capabilities instead
    fn drawable_extent(&self) -> Option<vk::Extent2D>;
}

/// A window described by raw-window-handle
pub struct RawWindow {
    rw_display: RawDisplayHandle,
    rw_window: RawWindowHandle,
    rw_size: Option<Box<dyn Fn() -> (u32, u32)>>,
}

impl RawWindow {
    /// Wrap the handles of `window`
    ///
    /// # Safety
    ///
    /// The window must outlive everything created from this, which in
    /// practice means it must outlive the Monsoon instance.
    pub unsafe fn new<W>(window: &W) -> Self
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        Self {
            rw_display: window.raw_display_handle(),
            rw_window: window.raw_window_handle(),
            rw_size: None,
        }
    }

    /// Ask `size` for the drawable size in pixels whenever we resize
    pub fn with_size_callback<F>(mut self, size: F) -> Self
    where
        F: Fn() -> (u32, u32) + 'static,
    {
        self.rw_size = Some(Box::new(size));
        self
    }
}

impl WindowSurface for RawWindow {
    fn extension_names(&self) -> Result<Vec<*const c_char>, vk::Result> {
        Ok(ash_window::enumerate_required_extensions(self.rw_display)?.to_vec())
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR, vk::Result> {
        unsafe { ash_window::create_surface(entry, instance, self.rw_display, self.rw_window, None) }
    }

    fn drawable_extent(&self) -> Option<vk::Extent2D> {
        self.rw_size.as_ref().map(|size| {
            let (width, height) = size();
            vk::Extent2D {
                width: width,
                height: height,
            }
        })
    }
}
