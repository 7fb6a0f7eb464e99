// Render passes
//
// The 3D and 2D passes share one implementation. What differs between
// them is described by a `PassCaps`: whether there is a depth attachment
// and whether the color target is cleared or loaded.
//
// Austin Shafer - 2024

use ash::vk;

use crate::backend::{Command, QueueRole, RenderPassInfo};
use crate::device::Device;
use crate::execbuf::ExecBuffer;
use crate::renderer::{viewport_for, DrawItem, Quadrant};
use crate::swapchain::Swapchain;
use crate::{Result, SquallError};
use monsoon_utils::log;

use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Depth tested geometry, drawn first
    Opaque3D,
    /// Overlay drawn on top of whatever the 3D pass produced
    Overlay2D,
}

/// What happens to the color target when the pass begins
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadOp {
    Clear,
    /// Keep what an earlier pass wrote this frame
    Load,
}

/// Describes the differences between passes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PassCaps {
    pub has_depth: bool,
    pub load: LoadOp,
}

impl PassCaps {
    /// The capabilities of a pass of `kind`
    ///
    /// The 2D pass draws on top of the 3D pass's output when there is one,
    /// otherwise it is the first pass of the frame and clears.
    pub fn for_kind(kind: PassKind, has_3d: bool) -> Self {
        match kind {
            PassKind::Opaque3D => PassCaps {
                has_depth: true,
                load: LoadOp::Clear,
            },
            PassKind::Overlay2D => PassCaps {
                has_depth: false,
                load: match has_3d {
                    true => LoadOp::Load,
                    false => LoadOp::Clear,
                },
            },
        }
    }
}

/// One render pass with a framebuffer and ExecBuffer per swapchain image
pub struct RenderPass {
    p_dev: Arc<Device>,
    p_kind: PassKind,
    p_caps: PassCaps,
    p_pass: vk::RenderPass,
    p_framebuffers: Vec<vk::Framebuffer>,
    p_execbufs: Vec<ExecBuffer>,
}

impl RenderPass {
    /// Create the pass and everything that hangs off of each swapchain image
    ///
    /// `depth` must be provided if `caps.has_depth` is set.
    pub fn new(
        dev: Arc<Device>,
        kind: PassKind,
        caps: PassCaps,
        swapchain: &Swapchain,
        depth: Option<(vk::Format, vk::ImageView)>,
        pool: vk::CommandPool,
    ) -> Result<Self> {
        if caps.has_depth && depth.is_none() {
            return Err(SquallError::INVALID_CREATE_INFO(
                "depth pass created without a depth target",
            ));
        }

        let info = RenderPassInfo {
            color_format: swapchain.format(),
            depth_format: match caps.has_depth {
                true => depth.map(|(fmt, _)| fmt),
                false => None,
            },
            load: caps.load,
        };

        // Anything created before a failure is cleaned up by Drop
        let mut ret = Self {
            p_pass: dev.backend().create_render_pass(&info)?,
            p_dev: dev,
            p_kind: kind,
            p_caps: caps,
            p_framebuffers: Vec::new(),
            p_execbufs: Vec::new(),
        };

        for view in swapchain.views().iter() {
            let mut attachments = vec![*view];
            if caps.has_depth {
                if let Some((_, depth_view)) = depth {
                    attachments.push(depth_view);
                }
            }

            let fb = ret.p_dev.backend().create_framebuffer(
                ret.p_pass,
                attachments.as_slice(),
                swapchain.extent(),
            )?;
            ret.p_framebuffers.push(fb);

            let mut exec = ExecBuffer::new(ret.p_dev.clone(), pool, QueueRole::Graphics);
            exec.create()?;
            ret.p_execbufs.push(exec);
        }

        log::debug!(
            "Created {:?} pass with {:?} and {} framebuffers",
            kind,
            caps,
            ret.p_framebuffers.len()
        );
        Ok(ret)
    }

    pub fn kind(&self) -> PassKind {
        self.p_kind
    }

    pub fn caps(&self) -> PassCaps {
        self.p_caps
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.p_pass
    }

    pub fn framebuffer_count(&self) -> usize {
        self.p_framebuffers.len()
    }

    pub fn execbuf(&self, image: usize) -> Option<&ExecBuffer> {
        self.p_execbufs.get(image)
    }

    pub(crate) fn execbuf_mut(&mut self, image: usize) -> Result<&mut ExecBuffer> {
        self.p_execbufs
            .get_mut(image)
            .ok_or(SquallError::INVALID_OPERATION("swapchain image index out of range"))
    }

    /// Record the draw commands for one swapchain image
    ///
    /// `items` must already be filtered down to this pass. In splitscreen
    /// mode every item gets the viewport of its quadrant, otherwise they all
    /// share one full sized viewport.
    pub(crate) fn record(
        &mut self,
        image: usize,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        splitscreen: bool,
        items: &[&DrawItem],
    ) -> Result<()> {
        let pass = self.p_pass;
        let caps = self.p_caps;
        let framebuffer = *self
            .p_framebuffers
            .get(image)
            .ok_or(SquallError::INVALID_OPERATION("swapchain image index out of range"))?;
        let exec = self.execbuf_mut(image)?;

        exec.begin_recording()?;
        exec.record(Command::BeginRenderPass {
            pass: pass,
            framebuffer: framebuffer,
            extent: extent,
            clear_color: match caps.load {
                LoadOp::Clear => Some(clear_color),
                LoadOp::Load => None,
            },
            clear_depth: match caps.has_depth {
                true => Some(1.0),
                false => None,
            },
        })?;
        exec.record(Command::SetScissor(extent))?;

        let mut current_viewport = None;
        let mut current_pipeline = vk::Pipeline::null();
        if !splitscreen {
            let full = viewport_for(extent, Quadrant::empty(), false);
            exec.record(Command::SetViewport(full))?;
            current_viewport = Some(full);
        }

        for item in items.iter() {
            let viewport = viewport_for(extent, item.quadrant, splitscreen);
            if current_viewport != Some(viewport) {
                exec.record(Command::SetViewport(viewport))?;
                current_viewport = Some(viewport);
            }

            if item.pipeline != current_pipeline {
                exec.record(Command::BindPipeline(item.pipeline))?;
                current_pipeline = item.pipeline;
            }
            if item.set != vk::DescriptorSet::null() {
                exec.record(Command::BindDescriptorSet {
                    layout: item.layout,
                    set: item.set,
                })?;
            }
            exec.record(Command::BindVertexBuffer(item.vertex_buffer))?;
            exec.record(Command::BindIndexBuffer(item.index_buffer))?;
            exec.record(Command::DrawIndexed {
                index_count: item.index_count,
            })?;
        }

        exec.record(Command::EndRenderPass)?;
        exec.end_recording()
    }

    /// Wait for every per-image ExecBuffer of this pass
    pub(crate) fn wait_all(&mut self, timeout_ns: u64) -> Result<()> {
        for exec in self.p_execbufs.iter_mut() {
            exec.wait(timeout_ns)?;
        }
        Ok(())
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        // The ExecBuffers wait on their fences as they are released, which
        // has to happen before the framebuffers they reference go away.
        self.p_execbufs.clear();

        let back = self.p_dev.backend();
        for fb in self.p_framebuffers.drain(..) {
            back.destroy_framebuffer(fb);
        }
        back.destroy_render_pass(self.p_pass);
    }
}
