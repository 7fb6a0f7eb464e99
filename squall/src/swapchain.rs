// The ring of presentable images
//
// Austin Shafer - 2024

use ash::vk;

use crate::backend::{SurfaceInfo, SwapchainInfo};
use crate::device::Device;
use crate::{PresentMode, Result, SquallError};
use monsoon_utils::{log, partial_max, partial_min};

use std::sync::Arc;

/// A swapchain and the views of its images
///
/// `create` is used both for the first creation and for every
/// recreation after that.
pub struct Swapchain {
    s_dev: Arc<Device>,
    s_swapchain: vk::SwapchainKHR,
    s_images: Vec<vk::Image>,
    s_views: Vec<vk::ImageView>,
    s_format: vk::SurfaceFormatKHR,
    s_extent: vk::Extent2D,
    s_present_mode: vk::PresentModeKHR,
    /// What the user asked for. We fall back to FIFO if it isn't there.
    s_preferred_mode: PresentMode,
}

impl Swapchain {
    /// Make an empty swapchain. Nothing is created until `create`.
    pub fn new(dev: Arc<Device>, preferred_mode: PresentMode) -> Self {
        Self {
            s_dev: dev,
            s_swapchain: vk::SwapchainKHR::null(),
            s_images: Vec::new(),
            s_views: Vec::new(),
            s_format: vk::SurfaceFormatKHR::default(),
            s_extent: vk::Extent2D::default(),
            s_present_mode: vk::PresentModeKHR::FIFO,
            s_preferred_mode: preferred_mode,
        }
    }

    /// choose a vkSurfaceFormatKHR for the vkSurfaceKHR
    ///
    /// This selects the color space and layout for a surface.
    fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
        let preferred = formats.iter().find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        });
        if let Some(fmt) = preferred {
            return Ok(*fmt);
        }

        formats
            .iter()
            .map(|fmt| match fmt.format {
                // if the surface does not specify a desired format
                // then we can choose our own
                vk::Format::UNDEFINED => vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: fmt.color_space,
                },
                // if the surface has a desired format we will just
                // use that
                _ => *fmt,
            })
            .nth(0)
            .ok_or(SquallError::INVALID_FORMAT)
    }

    /// Use the preferred mode if we can, FIFO is always supported
    fn select_present_mode(
        modes: &[vk::PresentModeKHR],
        preferred: PresentMode,
    ) -> vk::PresentModeKHR {
        let want = preferred.as_vk();
        match modes.iter().any(|m| *m == want) {
            true => want,
            false => vk::PresentModeKHR::FIFO,
        }
    }

    /// The surface dictates the extent unless it reports the special
    /// u32::MAX value, in which case we clamp what we were asked for.
    fn select_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
        if caps.current_extent.width != u32::MAX {
            return caps.current_extent;
        }

        vk::Extent2D {
            width: partial_min(
                partial_max(requested.width, caps.min_image_extent.width),
                caps.max_image_extent.width,
            ),
            height: partial_min(
                partial_max(requested.height, caps.min_image_extent.height),
                caps.max_image_extent.height,
            ),
        }
    }

    /// One more than the minimum so we always have an image to draw into.
    /// A max of zero means there is no limit.
    fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
        let desired = caps.min_image_count + 1;
        match caps.max_image_count {
            0 => desired,
            max => partial_min(desired, max),
        }
    }

    fn negotiate(&self, surface: &SurfaceInfo, requested: vk::Extent2D) -> Result<SwapchainInfo> {
        let caps = &surface.caps;
        let transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        Ok(SwapchainInfo {
            image_count: Self::select_image_count(caps),
            surface_format: Self::select_surface_format(&surface.formats)?,
            extent: Self::select_extent(caps, requested),
            transform: transform,
            present_mode: Self::select_present_mode(&surface.present_modes, self.s_preferred_mode),
        })
    }

    /// Tear down the image views. The images themselves belong to the
    /// swapchain.
    fn destroy_views(&mut self) {
        for view in self.s_views.drain(..) {
            self.s_dev.backend().destroy_image_view(view);
        }
        self.s_images.clear();
    }

    /// Get the vkImage's for the swapchain, and create vkImageViews for them
    fn select_images_and_views(&mut self) -> Result<()> {
        let back = self.s_dev.backend();
        let images = back
            .swapchain_images(self.s_swapchain)
            .or(Err(SquallError::COULD_NOT_CREATE_IMAGE))?;

        for image in images.iter() {
            let view = back
                .create_image_view(
                    *image,
                    self.s_format.format,
                    vk::ImageAspectFlags::COLOR,
                    1,
                )
                .or(Err(SquallError::COULD_NOT_CREATE_IMAGE))?;
            self.s_views.push(view);
        }
        self.s_images = images;

        Ok(())
    }

    /// Create or recreate the swapchain
    ///
    /// The surface is queried again every time since a resize can change
    /// everything about it. The old swapchain is handed to the platform as a
    /// hint and only destroyed once the new one exists. Anything built on top
    /// of the old images (framebuffers, recorded commands) has to be rebuilt
    /// by the caller.
    pub fn create(&mut self, requested: vk::Extent2D) -> Result<()> {
        let surface = self.s_dev.backend().surface_info()?;
        let info = self.negotiate(&surface, requested)?;

        if info.extent.width == 0 || info.extent.height == 0 {
            log::error!("Refusing to create a swapchain with extent {:?}", info.extent);
            return Err(SquallError::INVALID_CREATE_INFO("zero sized swapchain"));
        }

        let new_swapchain = self
            .s_dev
            .backend()
            .create_swapchain(&info, self.s_swapchain)
            .map_err(|e| {
                log::error!("Could not create swapchain: {}", e);
                SquallError::COULD_NOT_CREATE_SWAPCHAIN
            })?;

        // Now that we recreated the swapchain destroy the old one
        self.destroy_views();
        if self.s_swapchain != vk::SwapchainKHR::null() {
            self.s_dev.backend().destroy_swapchain(self.s_swapchain);
        }

        self.s_swapchain = new_swapchain;
        self.s_format = info.surface_format;
        self.s_extent = info.extent;
        self.s_present_mode = info.present_mode;

        self.select_images_and_views()?;

        log::debug!(
            "Created swapchain: {} images, {:?}, {:?}, {:?}",
            self.s_images.len(),
            self.s_extent,
            self.s_format.format,
            self.s_present_mode
        );
        Ok(())
    }

    /// Tear down all the swapchain objects we have created.
    pub fn destroy(&mut self) {
        self.destroy_views();
        if self.s_swapchain != vk::SwapchainKHR::null() {
            self.s_dev.backend().destroy_swapchain(self.s_swapchain);
            self.s_swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Get the index of the next image we can draw into
    ///
    /// `signal` is signaled once the image is actually free. A result of
    /// `OUT_OF_DATE` means the swapchain must be recreated before anything
    /// else is drawn.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<u32> {
        match self
            .s_dev
            .backend()
            .acquire_next_image(self.s_swapchain, signal)
        {
            Ok(index) => Ok(index),
            Err(SquallError::OUT_OF_DATE) => Err(SquallError::OUT_OF_DATE),
            Err(e) => {
                log::error!("vkAcquireNextImageKHR failed: {}", e);
                Err(SquallError::COULD_NOT_ACQUIRE_NEXT_IMAGE)
            }
        }
    }

    /// Present image `index` once every semaphore in `wait` has signaled
    pub fn present(&self, index: u32, wait: &[vk::Semaphore]) -> Result<()> {
        match self
            .s_dev
            .backend()
            .queue_present(self.s_swapchain, index, wait)
        {
            Ok(()) => Ok(()),
            Err(SquallError::OUT_OF_DATE) => Err(SquallError::OUT_OF_DATE),
            Err(e) => {
                log::error!("vkQueuePresentKHR failed: {}", e);
                Err(SquallError::PRESENT_FAILED)
            }
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.s_swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.s_extent
    }

    pub fn format(&self) -> vk::Format {
        self.s_format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.s_present_mode
    }

    pub fn image_count(&self) -> usize {
        self.s_images.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        self.s_images.as_slice()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        self.s_views.as_slice()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}
