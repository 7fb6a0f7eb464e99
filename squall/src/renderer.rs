// The Renderer
//
// This owns the swapchain and the 3D and 2D passes, records the draw list
// into them and submits one frame at a time:
//
// ```text
// acquire -> imageAvailable -> [3D] -> rendered3D -> [2D] -> rendered2D -> present
// ```
//
// Passes that are not created drop out of the chain, and the next stage
// waits on whatever the last one signaled. With no pass at all the frame
// is still presented, after a submission that only moves the image into
// the present layout.
//
// Austin Shafer - 2020

use ash::vk;
use bitflags::bitflags;

use crate::backend::{Command, QueueRole, RenderPassInfo};
use crate::device::Device;
use crate::execbuf::ExecBuffer;
use crate::pass::{PassCaps, PassKind, RenderPass};
use crate::swapchain::Swapchain;
use crate::{PresentMode, Result, SquallError};
use monsoon_utils::log;
use monsoon_utils::region::Rect;

use std::sync::Arc;

bitflags! {
    /// Which part of the screen an item is drawn to in splitscreen mode
    ///
    /// LEFT/RIGHT pick half the width and TOP/BOTTOM half the height. They
    /// can be combined to get a quarter. No flags means the full screen.
    #[derive(Default)]
    pub struct Quadrant: u32 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const TOP = 1 << 2;
        const BOTTOM = 1 << 3;
    }
}

/// One indexed draw, as recorded into a pass
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DrawItem {
    pub pass: PassKind,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// Not bound if null
    pub set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub quadrant: Quadrant,
}

/// The viewport an item tagged with `quadrant` is drawn in
pub fn viewport_for(extent: vk::Extent2D, quadrant: Quadrant, splitscreen: bool) -> Rect<f32> {
    let mut vp = Rect::new(0.0, 0.0, extent.width as f32, extent.height as f32);
    if !splitscreen {
        return vp;
    }

    if quadrant.contains(Quadrant::LEFT) {
        vp = vp.horizontal_half(false);
    } else if quadrant.contains(Quadrant::RIGHT) {
        vp = vp.horizontal_half(true);
    }

    if quadrant.contains(Quadrant::TOP) {
        vp = vp.vertical_half(false);
    } else if quadrant.contains(Quadrant::BOTTOM) {
        vp = vp.vertical_half(true);
    }

    vp
}

/// The depth image used by the 3D pass
struct DepthTarget {
    dt_dev: Arc<Device>,
    dt_format: vk::Format,
    dt_image: vk::Image,
    dt_view: vk::ImageView,
    dt_mem: vk::DeviceMemory,
}

impl DepthTarget {
    fn new(dev: Arc<Device>, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        let (image, view, mem) = dev.create_image(
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            1,
        )?;

        Ok(Self {
            dt_dev: dev,
            dt_format: format,
            dt_image: image,
            dt_view: view,
            dt_mem: mem,
        })
    }
}

impl Drop for DepthTarget {
    fn drop(&mut self) {
        self.dt_dev
            .destroy_image(self.dt_image, self.dt_view, self.dt_mem);
    }
}

pub struct Renderer {
    r_dev: Arc<Device>,
    r_swapchain: Swapchain,
    /// Pool the per-image pass ExecBuffers come from
    r_pool: vk::CommandPool,
    // The depth target has to outlive the 3D pass framebuffers, so it is
    // declared after them and drops later.
    r_pass_3d: Option<RenderPass>,
    r_pass_2d: Option<RenderPass>,
    r_depth: Option<DepthTarget>,
    r_depth_format: vk::Format,
    /// Per image buffers for frames drawn with no pass enabled
    r_blank: Vec<ExecBuffer>,
    /// The passes the user enabled. A failed resize leaves these set so the
    /// next one can rebuild the passes.
    r_want_3d: bool,
    r_want_2d: bool,
    /// The swapchain dependent state is torn down and needs a resize
    r_stale: bool,
    r_image_available: vk::Semaphore,
    r_rendered_3d: vk::Semaphore,
    r_rendered_2d: vk::Semaphore,
    /// The image of the last submitted frame, if it hasn't been waited on
    r_in_flight: Option<usize>,
    r_splitscreen: bool,
    r_clear_color: [f32; 4],
    /// The last draw list, replayed when the passes change
    r_items: Vec<DrawItem>,
}

impl Renderer {
    /// Create the renderer and its swapchain
    ///
    /// No passes exist until `create_3d`/`create_2d` are called.
    pub fn new(
        dev: Arc<Device>,
        extent: vk::Extent2D,
        present_mode: PresentMode,
        clear_color: [f32; 4],
        splitscreen: bool,
    ) -> Result<Self> {
        let mut swapchain = Swapchain::new(dev.clone(), present_mode);
        let requested = dev.backend().drawable_extent().unwrap_or(extent);
        swapchain.create(requested)?;

        let depth_format = dev.select_depth_format()?;
        let pool = dev.backend().create_command_pool(QueueRole::Graphics)?;
        let semas = match Self::create_semaphores(&dev) {
            Ok(s) => s,
            Err(e) => {
                dev.backend().destroy_command_pool(pool);
                return Err(e);
            }
        };

        Ok(Self {
            r_dev: dev,
            r_swapchain: swapchain,
            r_pool: pool,
            r_pass_3d: None,
            r_pass_2d: None,
            r_depth: None,
            r_depth_format: depth_format,
            r_blank: Vec::new(),
            r_want_3d: false,
            r_want_2d: false,
            r_stale: false,
            r_image_available: semas[0],
            r_rendered_3d: semas[1],
            r_rendered_2d: semas[2],
            r_in_flight: None,
            r_splitscreen: splitscreen,
            r_clear_color: clear_color,
            r_items: Vec::new(),
        })
    }

    /// imageAvailable, rendered3D and rendered2D, in that order
    fn create_semaphores(dev: &Device) -> Result<[vk::Semaphore; 3]> {
        let back = dev.backend();

        // Bundle up the semaphores so that a failure can clean up the
        // ones already made
        let mut semas = Vec::new();
        for _ in 0..3 {
            match back.create_semaphore() {
                Ok(s) => semas.push(s),
                Err(e) => {
                    for s in semas.drain(..) {
                        back.destroy_semaphore(s);
                    }
                    return Err(e);
                }
            }
        }

        Ok([semas[0], semas[1], semas[2]])
    }

    /// Swap in fresh frame semaphores
    ///
    /// Used when a frame is abandoned between acquire and present, which
    /// can leave any of them signaled with nothing left to wait on it.
    fn reset_semaphores(&mut self) -> Result<()> {
        self.r_dev.wait_idle()?;
        self.r_in_flight = None;

        let [available, rendered_3d, rendered_2d] = Self::create_semaphores(&self.r_dev)?;
        let back = self.r_dev.backend();
        back.destroy_semaphore(self.r_image_available);
        back.destroy_semaphore(self.r_rendered_3d);
        back.destroy_semaphore(self.r_rendered_2d);
        self.r_image_available = available;
        self.r_rendered_3d = rendered_3d;
        self.r_rendered_2d = rendered_2d;
        Ok(())
    }

    fn build_pass(&mut self, kind: PassKind) -> Result<RenderPass> {
        let caps = PassCaps::for_kind(kind, self.r_pass_3d.is_some());

        let depth = match caps.has_depth {
            true => {
                if self.r_depth.is_none() {
                    self.r_depth = Some(DepthTarget::new(
                        self.r_dev.clone(),
                        self.r_depth_format,
                        self.r_swapchain.extent(),
                    )?);
                }
                self.r_depth.as_ref().map(|d| (d.dt_format, d.dt_view))
            }
            false => None,
        };

        RenderPass::new(
            self.r_dev.clone(),
            kind,
            caps,
            &self.r_swapchain,
            depth,
            self.r_pool,
        )
    }

    /// Create the 3D pass and its depth target
    ///
    /// This has to happen before the 2D pass is created, since the 2D pass
    /// is built to draw over the 3D output.
    pub fn create_3d(&mut self) -> Result<()> {
        if self.r_want_3d {
            return Ok(());
        }
        if self.r_want_2d {
            log::error!("The 3D pass must be created before the 2D pass");
            return Err(SquallError::INVALID_OPERATION(
                "3D pass created after the 2D pass",
            ));
        }

        self.r_want_3d = true;
        if self.r_stale {
            // built by the next resize
            return Ok(());
        }

        let pass = match self.build_pass(PassKind::Opaque3D) {
            Ok(p) => p,
            Err(e) => {
                self.r_depth = None;
                self.r_want_3d = false;
                return Err(e);
            }
        };
        self.r_pass_3d = Some(pass);
        self.rerecord()
    }

    pub fn create_2d(&mut self) -> Result<()> {
        if self.r_want_2d {
            return Ok(());
        }

        self.r_want_2d = true;
        if self.r_stale {
            return Ok(());
        }

        let pass = match self.build_pass(PassKind::Overlay2D) {
            Ok(p) => p,
            Err(e) => {
                self.r_want_2d = false;
                return Err(e);
            }
        };
        self.r_pass_2d = Some(pass);
        self.rerecord()
    }

    /// Destroy the 3D pass and release the depth target
    ///
    /// A 2D pass that was loading the 3D output is rebuilt to clear instead.
    pub fn destroy_3d(&mut self) -> Result<()> {
        if !self.r_want_3d {
            return Ok(());
        }

        self.wait_till_idle()?;
        self.r_want_3d = false;
        self.r_pass_3d = None;
        self.r_depth = None;

        if self.r_pass_2d.take().is_some() {
            match self.build_pass(PassKind::Overlay2D) {
                Ok(p) => self.r_pass_2d = Some(p),
                Err(e) => {
                    // The 2D pass is still wanted, let a resize bring it back
                    self.r_stale = true;
                    return Err(e);
                }
            }
        }
        self.rerecord()
    }

    pub fn destroy_2d(&mut self) -> Result<()> {
        if !self.r_want_2d {
            return Ok(());
        }

        self.wait_till_idle()?;
        self.r_want_2d = false;
        self.r_pass_2d = None;
        Ok(())
    }

    /// Whether the 3D pass is enabled
    ///
    /// After a failed resize the pass may not exist yet, it is rebuilt by
    /// the next successful one.
    pub fn is_created_3d(&self) -> bool {
        self.r_want_3d
    }

    pub fn is_created_2d(&self) -> bool {
        self.r_want_2d
    }

    pub fn pass(&self, kind: PassKind) -> Option<&RenderPass> {
        match kind {
            PassKind::Opaque3D => self.r_pass_3d.as_ref(),
            PassKind::Overlay2D => self.r_pass_2d.as_ref(),
        }
    }

    /// Attachment description of a pass of `kind`
    ///
    /// Pipelines built against this are compatible with the pass the
    /// renderer creates for `kind`, whether or not it exists yet.
    pub fn pass_info(&self, kind: PassKind) -> RenderPassInfo {
        let caps = PassCaps::for_kind(kind, self.r_want_3d);
        RenderPassInfo {
            color_format: self.r_swapchain.format(),
            depth_format: match caps.has_depth {
                true => Some(self.r_depth_format),
                false => None,
            },
            load: caps.load,
        }
    }

    /// Record `items` into every enabled pass for every swapchain image
    ///
    /// This is always a full re-record.
    pub fn record_draw_commands(&mut self, items: &[DrawItem]) -> Result<()> {
        self.r_items = items.to_vec();
        self.rerecord()
    }

    fn rerecord(&mut self) -> Result<()> {
        // We are about to rewrite command buffers that may be in flight
        self.wait_till_idle()?;

        let skipped = self
            .r_items
            .iter()
            .filter(|i| self.pass(i.pass).is_none())
            .count();
        if skipped > 0 {
            log::warn!(
                "Skipping {} draw items whose pass has not been created",
                skipped
            );
        }

        let extent = self.r_swapchain.extent();
        let clear_color = self.r_clear_color;
        let splitscreen = self.r_splitscreen;
        let image_count = self.r_swapchain.image_count();
        let items = &self.r_items;

        for pass in self
            .r_pass_3d
            .iter_mut()
            .chain(self.r_pass_2d.iter_mut())
        {
            let kind = pass.kind();
            let ours: Vec<&DrawItem> = items.iter().filter(|i| i.pass == kind).collect();

            for image in 0..image_count {
                pass.record(image, extent, clear_color, splitscreen, ours.as_slice())?;
            }
        }

        Ok(())
    }

    /// Build the buffers used when no pass is enabled
    ///
    /// Each one only moves its swapchain image into the present layout.
    fn record_blank(&mut self) -> Result<()> {
        if !self.r_blank.is_empty() {
            return Ok(());
        }

        for &image in self.r_swapchain.images() {
            let mut exec = ExecBuffer::new(self.r_dev.clone(), self.r_pool, QueueRole::Graphics);
            exec.create()?;
            exec.begin_recording()?;

            let mut barrier = Device::color_barrier(
                image,
                0,
                1,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
            // Chain onto the wait on imageAvailable
            barrier.src_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
            barrier.dst_stage = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
            exec.record(Command::ImageBarrier(barrier))?;

            exec.end_recording()?;
            self.r_blank.push(exec);
        }
        Ok(())
    }

    /// Submit the work for swapchain image `index`
    ///
    /// Returns the semaphore present has to wait on.
    fn submit_frame(&mut self, index: usize) -> Result<vk::Semaphore> {
        if self.r_pass_3d.is_none() && self.r_pass_2d.is_none() {
            self.record_blank()?;
            let blank = self
                .r_blank
                .get_mut(index)
                .ok_or(SquallError::INVALID_OPERATION("swapchain image index out of range"))?;
            blank.execute(&[self.r_image_available], &[self.r_rendered_2d], false)?;
            return Ok(self.r_rendered_2d);
        }

        let mut wait = self.r_image_available;
        if let Some(pass) = self.r_pass_3d.as_mut() {
            pass.execbuf_mut(index)?
                .execute(&[wait], &[self.r_rendered_3d], false)?;
            wait = self.r_rendered_3d;
        }
        if let Some(pass) = self.r_pass_2d.as_mut() {
            pass.execbuf_mut(index)?
                .execute(&[wait], &[self.r_rendered_2d], false)?;
            wait = self.r_rendered_2d;
        }
        Ok(wait)
    }

    /// Draw and present one frame
    ///
    /// Only one frame is in flight at a time: the fences of the previous
    /// frame are waited on before any of the shared semaphores are reused.
    /// Returns `OUT_OF_DATE` if the swapchain needs to be resized, which
    /// includes the case where an earlier resize failed part way.
    pub fn draw(&mut self) -> Result<()> {
        if self.r_stale {
            return Err(SquallError::OUT_OF_DATE);
        }

        let timeout = self.r_dev.fence_timeout();
        if let Some(prev) = self.r_in_flight.take() {
            for pass in self
                .r_pass_3d
                .iter_mut()
                .chain(self.r_pass_2d.iter_mut())
            {
                pass.execbuf_mut(prev)?.wait(timeout)?;
            }
            if let Some(blank) = self.r_blank.get_mut(prev) {
                blank.wait(timeout)?;
            }
        }

        let index = self
            .r_swapchain
            .acquire_next_image(self.r_image_available)?;

        let wait = match self.submit_frame(index as usize) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Could not submit frame for image {}: {}", index, e);
                self.reset_semaphores()?;
                return Err(e);
            }
        };
        self.r_in_flight = Some(index as usize);

        self.r_swapchain.present(index, &[wait])
    }

    /// Rebuild everything that depends on the swapchain size
    ///
    /// The enabled passes are recreated, then `items` are recorded into
    /// them. A zero sized drawable leaves everything as it is. If this
    /// fails part way the passes stay enabled, `draw` reports `OUT_OF_DATE`
    /// and the next resize tries again.
    pub fn resize(&mut self, extent: vk::Extent2D, items: &[DrawItem]) -> Result<()> {
        let requested = self
            .r_dev
            .backend()
            .drawable_extent()
            .unwrap_or(extent);
        if requested.width == 0 || requested.height == 0 {
            log::debug!(
                "Not resizing to {}x{}, keeping the current swapchain",
                requested.width,
                requested.height
            );
            return Ok(());
        }

        self.r_dev.wait_idle()?;
        self.r_in_flight = None;
        self.r_items = items.to_vec();

        self.r_stale = true;
        self.r_pass_2d = None;
        self.r_pass_3d = None;
        self.r_depth = None;
        self.r_blank.clear();

        self.r_swapchain.create(requested)?;

        if self.r_want_3d {
            self.r_pass_3d = Some(self.build_pass(PassKind::Opaque3D)?);
        }
        if self.r_want_2d {
            self.r_pass_2d = Some(self.build_pass(PassKind::Overlay2D)?);
        }
        self.r_stale = false;

        log::debug!("Resized to {:?}", self.r_swapchain.extent());
        self.rerecord()
    }

    /// Wait for every ExecBuffer of every pass
    pub fn wait_till_idle(&mut self) -> Result<()> {
        let timeout = self.r_dev.fence_timeout();
        for pass in self
            .r_pass_3d
            .iter_mut()
            .chain(self.r_pass_2d.iter_mut())
        {
            pass.wait_all(timeout)?;
        }
        for blank in self.r_blank.iter_mut() {
            blank.wait(timeout)?;
        }
        self.r_in_flight = None;
        Ok(())
    }

    /// Takes effect on the next record
    pub fn set_splitscreen(&mut self, enable: bool) {
        self.r_splitscreen = enable;
    }

    pub fn splitscreen(&self) -> bool {
        self.r_splitscreen
    }

    /// Takes effect on the next record
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.r_clear_color = color;
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.r_swapchain.extent()
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.r_swapchain
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.r_dev.wait_idle() {
            log::error!("Could not idle device while destroying renderer: {}", e);
        }

        self.r_pass_2d = None;
        self.r_pass_3d = None;
        self.r_depth = None;
        self.r_blank.clear();

        let back = self.r_dev.backend();
        back.destroy_semaphore(self.r_image_available);
        back.destroy_semaphore(self.r_rendered_3d);
        back.destroy_semaphore(self.r_rendered_2d);
        back.destroy_command_pool(self.r_pool);
    }
}
