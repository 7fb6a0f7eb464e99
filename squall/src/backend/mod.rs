// The GPU backend seam
//
// Everything above this module talks to the GPU through the `Backend`
// trait. `VkBackend` drives a real Vulkan device through ash, while
// `HeadlessBackend` mints fake handles and records what it was asked to
// do so that the renderer can be exercised without a GPU.
//
// Austin Shafer - 2024
use ash::vk;
use std::ffi::CString;

use crate::pass::LoadOp;
use crate::pipeline::{DescriptorBinding, RasterState, VertexAttribute};
use crate::{RenderSettings, Result, SurfaceType};
use utils::region::Rect;

use std::sync::Arc;

pub mod headless;
pub mod vulkan;

pub use headless::{HeadlessBackend, PresentRecord, ResourceKind, SubmitRecord};
pub use vulkan::VkBackend;

/// The jobs a queue can be picked for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Transfer,
    Compute,
    Present,
}

/// Parameters for a 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerInfo {
    pub filter: vk::Filter,
    pub mip_levels: u32,
    /// Address texels with [0, width) instead of [0, 1)
    pub unnormalized: bool,
}

/// Attachments of a single subpass render pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassInfo {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub load: LoadOp,
}

/// One programmable stage of a pipeline
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry: CString,
}

pub struct PipelineInfo<'a> {
    pub stages: &'a [PipelineStage],
    /// Size of one vertex. Zero means the pipeline has no vertex input.
    pub vertex_stride: u32,
    pub attributes: &'a [VertexAttribute],
    pub raster: &'a RasterState,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub has_depth: bool,
}

/// What the surface can do, as reported by the platform
#[derive(Debug, Clone)]
pub struct SurfaceInfo {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// The negotiated swapchain parameters
#[derive(Debug, Clone, Copy)]
pub struct SwapchainInfo {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub transform: vk::SurfaceTransformFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
}

/// A single queue submission
pub struct Submission<'a> {
    pub cbuf: vk::CommandBuffer,
    pub wait: &'a [vk::Semaphore],
    /// One stage per entry in `wait`
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

/// One entry of a batched descriptor update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescriptorWrite {
    Buffer {
        binding: u32,
        buffer: vk::Buffer,
        range: u64,
    },
    Image {
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

/// A layout transition of a range of mip levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The commands we record into command buffers
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginRenderPass {
        pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: Option<[f32; 4]>,
        clear_depth: Option<f32>,
    },
    EndRenderPass,
    SetViewport(Rect<f32>),
    SetScissor(vk::Extent2D),
    BindPipeline(vk::Pipeline),
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    DrawIndexed {
        index_count: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: u64,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent2D,
    },
    ImageBarrier(ImageBarrier),
    /// Downsample mip level `src_mip` (of size `src_extent`) into the next level
    BlitMip {
        image: vk::Image,
        src_mip: u32,
        src_extent: vk::Extent2D,
    },
}

/// Everything the renderer needs from a GPU
///
/// The methods map closely onto the Vulkan entry points they wrap. Objects
/// are identified by raw Vulkan handles so that the rest of the crate does
/// not care which backend it is running on.
pub trait Backend {
    // ---------------- device ----------------
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;
    fn queue_family(&self, role: QueueRole) -> u32;
    /// Optimal tiling features for `format`
    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags;
    fn device_wait_idle(&self) -> Result<()>;
    fn queue_wait_idle(&self, role: QueueRole) -> Result<()>;

    // ---------------- memory ----------------
    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> Result<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn allocate_memory(&self, size: u64, type_index: u32) -> Result<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()>;
    /// Map, copy and unmap. The memory must be host visible and coherent.
    fn write_memory(&self, memory: vk::DeviceMemory, offset: u64, data: &[u8]) -> Result<()>;

    // ---------------- images ----------------
    fn create_image(&self, info: &ImageInfo) -> Result<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> Result<()>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, info: &SamplerInfo) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // ---------------- shaders, descriptors and pipelines ----------------
    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>;
    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet)
        -> Result<()>;
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, info: &PipelineInfo) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // ---------------- passes ----------------
    fn create_render_pass(&self, info: &RenderPassInfo) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // ---------------- commands ----------------
    fn create_command_pool(&self, role: QueueRole) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, cbuf: vk::CommandBuffer);
    fn reset_command_buffer(&self, cbuf: vk::CommandBuffer) -> Result<()>;
    fn begin_command_buffer(&self, cbuf: vk::CommandBuffer, one_time: bool) -> Result<()>;
    fn end_command_buffer(&self, cbuf: vk::CommandBuffer) -> Result<()>;
    fn cmd(&self, cbuf: vk::CommandBuffer, cmd: &Command);

    // ---------------- synchronization ----------------
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Returns `TIMEOUT` if the fence did not signal in time
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, sema: vk::Semaphore);
    fn queue_submit(&self, role: QueueRole, submit: &Submission) -> Result<()>;

    // ---------------- presentation ----------------
    fn surface_info(&self) -> Result<SurfaceInfo>;
    /// The size the window system wants us to draw at, if it knows
    fn drawable_extent(&self) -> Option<vk::Extent2D>;
    fn create_swapchain(
        &self,
        info: &SwapchainInfo,
        old: vk::SwapchainKHR,
    ) -> Result<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    /// `OUT_OF_DATE` if the swapchain has to be recreated first
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<u32>;
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        index: u32,
        wait: &[vk::Semaphore],
    ) -> Result<()>;
}

/// Create the backend requested by `surface_type`
pub fn create(surface_type: SurfaceType, settings: &RenderSettings) -> Result<Arc<dyn Backend>> {
    Ok(match surface_type {
        SurfaceType::Headless { width, height } => {
            Arc::new(HeadlessBackend::new(vk::Extent2D { width, height }))
        }
        SurfaceType::Window(window) => Arc::new(VkBackend::new(window, settings)?),
    })
}
