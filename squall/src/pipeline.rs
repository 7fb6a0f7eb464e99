// Shaders and the pipelines built from them
//
// A Shader owns everything needed to draw with one set of shader stages:
// the modules, the descriptor set layout for its per-object resources, the
// pipeline layout and the graphics pipeline itself. It also owns a bounded
// pool that per-object descriptor sets are allocated from.
//
// Austin Shafer - 2020

use ash::vk;
use granizo::Registry;

use crate::backend::{DescriptorWrite, PipelineInfo, PipelineStage, RenderPassInfo};
use crate::descpool::{DescPool, Descriptor};
use crate::device::Device;
use crate::pass::PassKind;
use crate::resources::{Binding, BoundResource, Buffer, Texture};
use crate::{Result, SquallError};
use monsoon_utils::log;

use std::ffi::CString;
use std::sync::{Arc, Mutex};

/// The types of per-object resources a shader can read
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DescriptorKind {
    UniformBuffer,
    /// An image paired with its sampler
    SampledImage,
}

impl DescriptorKind {
    pub fn as_vk(&self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One slot of a shader's descriptor set layout
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// Fixed function state of a pipeline
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RasterState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    /// Standard alpha blending on the color attachment
    pub blend: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend: false,
            depth_test: true,
            depth_write: true,
        }
    }
}

impl RasterState {
    /// Blended, unculled and without depth. What most 2D content wants.
    pub fn overlay() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            blend: true,
            depth_test: false,
            depth_write: false,
            ..Default::default()
        }
    }
}

/// SPIR-V for one pipeline stage
#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub code: Vec<u32>,
    pub entry: String,
}

impl ShaderStage {
    pub fn vertex(code: Vec<u32>) -> Self {
        Self {
            stage: vk::ShaderStageFlags::VERTEX,
            code: code,
            entry: "main".to_string(),
        }
    }

    pub fn fragment(code: Vec<u32>) -> Self {
        Self {
            stage: vk::ShaderStageFlags::FRAGMENT,
            code: code,
            entry: "main".to_string(),
        }
    }
}

/// Everything needed to create a Shader
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub stages: Vec<ShaderStage>,
    /// The pass this shader draws in
    pub pass: PassKind,
    pub vertex_stride: u32,
    pub attributes: Vec<VertexAttribute>,
    pub bindings: Vec<DescriptorBinding>,
    /// Upper bound on live objects drawn with this shader
    pub max_objects: u32,
    pub raster: RasterState,
}

impl ShaderDesc {
    fn validate(&self) -> Result<()> {
        if self.stages.len() == 0 {
            return Err(SquallError::INVALID_CREATE_INFO("shader has no stages"));
        }
        if !self
            .stages
            .iter()
            .any(|s| s.stage == vk::ShaderStageFlags::VERTEX)
        {
            return Err(SquallError::INVALID_CREATE_INFO("shader has no vertex stage"));
        }
        if self.max_objects == 0 {
            return Err(SquallError::INVALID_CREATE_INFO("max_objects must be non-zero"));
        }
        for (i, b) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|o| o.binding == b.binding) {
                return Err(SquallError::INVALID_CREATE_INFO("duplicate descriptor binding"));
            }
        }
        if self.stages.iter().any(|s| s.entry.contains('\0')) {
            return Err(SquallError::INVALID_CREATE_INFO("invalid shader entry point"));
        }
        Ok(())
    }

    /// One set's worth of descriptors of each type
    fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for b in self.bindings.iter() {
            let ty = b.kind.as_vk();
            match sizes.iter_mut().find(|s| s.ty == ty) {
                Some(s) => s.descriptor_count += 1,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: ty,
                    descriptor_count: 1,
                }),
            }
        }
        sizes
    }
}

/// A graphics pipeline and the per-object descriptor sets drawn with it
pub struct Shader {
    s_dev: Arc<Device>,
    s_pass: PassKind,
    s_bindings: Vec<DescriptorBinding>,
    s_modules: Vec<vk::ShaderModule>,
    /// Null if the shader has no bindings
    s_set_layout: vk::DescriptorSetLayout,
    s_layout: vk::PipelineLayout,
    /// A render pass compatible with the one we will draw in. Kept so the
    /// pipeline does not depend on the renderer's pass objects, which are
    /// rebuilt on every resize.
    s_compat_pass: vk::RenderPass,
    s_pipeline: vk::Pipeline,
    s_pool: Option<Arc<Mutex<DescPool>>>,
}

impl Shader {
    /// Build a pipeline for a pass described by `pass_info`
    ///
    /// Anything created before a failure is torn down again by Drop.
    pub fn new(dev: Arc<Device>, desc: &ShaderDesc, pass_info: &RenderPassInfo) -> Result<Self> {
        desc.validate()?;

        let mut ret = Self {
            s_dev: dev,
            s_pass: desc.pass,
            s_bindings: desc.bindings.clone(),
            s_modules: Vec::new(),
            s_set_layout: vk::DescriptorSetLayout::null(),
            s_layout: vk::PipelineLayout::null(),
            s_compat_pass: vk::RenderPass::null(),
            s_pipeline: vk::Pipeline::null(),
            s_pool: None,
        };
        let dev = ret.s_dev.clone();
        let back = dev.backend();

        let mut stages = Vec::new();
        for stage in desc.stages.iter() {
            let module = back.create_shader_module(stage.code.as_slice())?;
            ret.s_modules.push(module);
            stages.push(PipelineStage {
                stage: stage.stage,
                module: module,
                entry: CString::new(stage.entry.as_str())
                    .or(Err(SquallError::INVALID_CREATE_INFO("invalid shader entry point")))?,
            });
        }

        if desc.bindings.len() > 0 {
            ret.s_set_layout = back.create_descriptor_set_layout(desc.bindings.as_slice())?;
        }

        let set_layouts = match desc.bindings.len() {
            0 => Vec::new(),
            _ => vec![ret.s_set_layout],
        };
        ret.s_layout = back.create_pipeline_layout(set_layouts.as_slice())?;
        ret.s_compat_pass = back.create_render_pass(pass_info)?;

        ret.s_pipeline = back
            .create_graphics_pipeline(&PipelineInfo {
                stages: stages.as_slice(),
                vertex_stride: desc.vertex_stride,
                attributes: desc.attributes.as_slice(),
                raster: &desc.raster,
                layout: ret.s_layout,
                render_pass: ret.s_compat_pass,
                has_depth: pass_info.depth_format.is_some(),
            })
            .map_err(|e| {
                log::error!("Could not create graphics pipeline: {}", e);
                SquallError::COULD_NOT_CREATE_PIPELINE
            })?;

        ret.s_pool = Some(Arc::new(Mutex::new(DescPool::new(
            dev.clone(),
            ret.s_set_layout,
            desc.pool_sizes().as_slice(),
            desc.max_objects,
        )?)));

        log::debug!(
            "Created {:?} shader with {} stages and {} bindings",
            desc.pass,
            desc.stages.len(),
            desc.bindings.len()
        );
        Ok(ret)
    }

    fn pool(&self) -> Result<&Arc<Mutex<DescPool>>> {
        self.s_pool
            .as_ref()
            .ok_or(SquallError::INVALID_OPERATION("shader was not fully created"))
    }

    /// Allocate the descriptor set for one more object
    ///
    /// Fails with CAPACITY_EXCEEDED when max_objects sets are already live.
    /// The set goes back to the pool when the returned Descriptor drops.
    pub fn create_descriptor_set(&self) -> Result<Descriptor> {
        DescPool::alloc_descriptor(self.pool()?)
    }

    /// Point an object's descriptor set at its resources
    ///
    /// Every entry in `bindings` has to name a binding of this shader and a
    /// resource of the matching kind. Uniform buffers that have never been
    /// written are given storage here. All writes go out in one batch.
    pub fn update_descriptor_set(
        &self,
        desc: &Descriptor,
        bindings: &[Binding],
        textures: &Registry<Texture>,
        buffers: &mut Registry<Buffer>,
    ) -> Result<()> {
        let mut writes = Vec::with_capacity(bindings.len());

        for b in bindings.iter() {
            let layout = self
                .s_bindings
                .iter()
                .find(|l| l.binding == b.binding)
                .ok_or_else(|| {
                    log::error!("Shader has no descriptor binding {}", b.binding);
                    SquallError::INVALID_BINDING(b.binding)
                })?;

            match (layout.kind, b.resource) {
                (DescriptorKind::UniformBuffer, BoundResource::Buffer(handle)) => {
                    let buf = buffers.get_mut(handle)?;
                    buf.ensure_backed()?;
                    writes.push(DescriptorWrite::Buffer {
                        binding: b.binding,
                        buffer: buf.handle(),
                        range: buf.size(),
                    });
                }
                (DescriptorKind::SampledImage, BoundResource::Texture(handle)) => {
                    let tex = textures.get(handle)?;
                    writes.push(DescriptorWrite::Image {
                        binding: b.binding,
                        view: tex.view(),
                        sampler: tex.sampler(),
                    });
                }
                (kind, _) => {
                    log::error!(
                        "Binding {} expects a {:?} but was given something else",
                        b.binding,
                        kind
                    );
                    return Err(SquallError::INVALID_BINDING(b.binding));
                }
            }
        }

        if desc.set() != vk::DescriptorSet::null() && writes.len() > 0 {
            self.s_dev
                .backend()
                .update_descriptor_set(desc.set(), writes.as_slice());
        }
        Ok(())
    }

    pub fn pass(&self) -> PassKind {
        self.s_pass
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.s_pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.s_layout
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        self.s_bindings.as_slice()
    }

    /// Number of descriptor sets currently handed out
    pub fn live_objects(&self) -> u32 {
        match self.s_pool.as_ref() {
            Some(pool) => pool.lock().unwrap().live_count(),
            None => 0,
        }
    }

    pub fn max_objects(&self) -> u32 {
        match self.s_pool.as_ref() {
            Some(pool) => pool.lock().unwrap().max_sets(),
            None => 0,
        }
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        if self.live_objects() > 0 {
            log::warn!(
                "Destroying a shader with {} live descriptor sets",
                self.live_objects()
            );
        }
        // Drops the Vulkan pool once the last Descriptor is gone
        self.s_pool = None;

        let back = self.s_dev.backend();
        if self.s_pipeline != vk::Pipeline::null() {
            back.destroy_pipeline(self.s_pipeline);
        }
        if self.s_compat_pass != vk::RenderPass::null() {
            back.destroy_render_pass(self.s_compat_pass);
        }
        if self.s_layout != vk::PipelineLayout::null() {
            back.destroy_pipeline_layout(self.s_layout);
        }
        if self.s_set_layout != vk::DescriptorSetLayout::null() {
            back.destroy_descriptor_set_layout(self.s_set_layout);
        }
        for module in self.s_modules.drain(..) {
            back.destroy_shader_module(module);
        }
    }
}
