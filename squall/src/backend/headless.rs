// A backend without a GPU
//
// Handles are minted from a counter and every object is tracked so that
// leaks and double frees can be counted. Submissions complete as soon as
// they are made: buffer copies are performed on the spot and fences are
// signaled immediately. Misuse that a real driver would either crash on
// or a validation layer would flag is collected in an error list instead.
//
// Austin Shafer - 2024

use ash::vk;
use ash::vk::Handle;

use super::{
    Backend, Command, DescriptorWrite, ImageInfo, PipelineInfo, QueueRole, RenderPassInfo,
    SamplerInfo, Submission, SurfaceInfo, SwapchainInfo,
};
use crate::pipeline::DescriptorBinding;
use crate::{Result, SquallError};
use monsoon_utils::log;

use std::collections::HashMap;
use std::sync::Mutex;

/// Memory type indices we report
const DEVICE_LOCAL_TYPE: u32 = 0;
const HOST_VISIBLE_TYPE: u32 = 1;

/// The kinds of objects the headless backend tracks
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Buffer,
    Memory,
    Image,
    ImageView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
    Swapchain,
}

/// One queue submission as seen by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRecord {
    pub role: QueueRole,
    pub cbuf: vk::CommandBuffer,
    pub wait: Vec<vk::Semaphore>,
    pub signal: Vec<vk::Semaphore>,
    /// What was recorded into `cbuf` at submission time
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresentRecord {
    pub image_index: u32,
    pub wait: Vec<vk::Semaphore>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CbufState {
    Initial,
    Recording,
    Executable,
}

struct CbufInfo {
    pool: u64,
    state: CbufState,
    commands: Vec<Command>,
}

struct MemoryInfo {
    type_index: u32,
    data: Vec<u8>,
}

struct HeadlessState {
    hs_next_handle: u64,
    hs_live: HashMap<u64, ResourceKind>,
    hs_memory: HashMap<u64, MemoryInfo>,
    hs_buffer_sizes: HashMap<u64, u64>,
    /// buffer -> memory bound to it
    hs_buffer_memory: HashMap<u64, u64>,
    hs_cbufs: HashMap<u64, CbufInfo>,
    /// fence -> signaled
    hs_fences: HashMap<u64, bool>,
    /// semaphore -> signaled
    hs_semaphores: HashMap<u64, bool>,
    /// pool -> (max sets, allocated sets)
    hs_desc_pools: HashMap<u64, (u32, u32)>,
    /// set -> owning pool
    hs_desc_sets: HashMap<u64, u64>,
    hs_desc_updates: usize,
    hs_swapchain_images: HashMap<u64, Vec<vk::Image>>,
    hs_swapchain_history: Vec<(vk::SwapchainKHR, vk::SwapchainKHR)>,
    hs_next_image: u32,
    hs_extent: vk::Extent2D,
    hs_out_of_date: bool,
    hs_fail_next_pipeline: bool,
    hs_fail_next_submit: bool,
    hs_fail_next_swapchain: bool,
    hs_submits: Vec<SubmitRecord>,
    hs_presents: Vec<PresentRecord>,
    hs_errors: Vec<String>,
}

impl HeadlessState {
    fn error(&mut self, msg: String) {
        log::error!("headless: {}", msg);
        self.hs_errors.push(msg);
    }

    fn mint(&mut self, kind: ResourceKind) -> u64 {
        let raw = self.hs_next_handle;
        self.hs_next_handle += 1;
        self.hs_live.insert(raw, kind);
        raw
    }

    fn is_live(&self, raw: u64, kind: ResourceKind) -> bool {
        self.hs_live.get(&raw) == Some(&kind)
    }

    fn check_live(&mut self, raw: u64, kind: ResourceKind, what: &str) -> bool {
        if !self.is_live(raw, kind) {
            self.error(format!("{} uses {:?} {:#x} which is not alive", what, kind, raw));
            return false;
        }
        true
    }

    /// Destroying null is allowed, like in Vulkan
    fn release(&mut self, raw: u64, kind: ResourceKind) -> bool {
        if raw == 0 {
            return false;
        }
        if !self.is_live(raw, kind) {
            self.error(format!("double destroy of {:?} {:#x}", kind, raw));
            return false;
        }
        self.hs_live.remove(&raw);
        true
    }

    fn count(&self, kind: ResourceKind) -> usize {
        self.hs_live.values().filter(|k| **k == kind).count()
    }

    /// Perform the parts of a command buffer that have visible effects
    fn execute(&mut self, commands: &[Command]) {
        for cmd in commands.iter() {
            if let Command::CopyBuffer { src, dst, size } = cmd {
                let src_mem = self.hs_buffer_memory.get(&src.as_raw()).copied();
                let dst_mem = self.hs_buffer_memory.get(&dst.as_raw()).copied();
                let (src_mem, dst_mem) = match (src_mem, dst_mem) {
                    (Some(s), Some(d)) => (s, d),
                    _ => {
                        self.error(format!("copy between unbound buffers {:?} -> {:?}", src, dst));
                        continue;
                    }
                };

                let size = *size as usize;
                let bytes = match self.hs_memory.get(&src_mem) {
                    Some(m) if m.data.len() >= size => m.data[..size].to_vec(),
                    _ => {
                        self.error(format!("copy of {} bytes overruns the source", size));
                        continue;
                    }
                };
                match self.hs_memory.get_mut(&dst_mem) {
                    Some(m) if m.data.len() >= size => m.data[..size].copy_from_slice(&bytes),
                    _ => self.error(format!("copy of {} bytes overruns the destination", size)),
                }
            }
        }
    }
}

/// A Backend that records instead of rendering
pub struct HeadlessBackend {
    h_state: Mutex<HeadlessState>,
}

impl HeadlessBackend {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            h_state: Mutex::new(HeadlessState {
                // Zero is reserved for null handles
                hs_next_handle: 1,
                hs_live: HashMap::new(),
                hs_memory: HashMap::new(),
                hs_buffer_sizes: HashMap::new(),
                hs_buffer_memory: HashMap::new(),
                hs_cbufs: HashMap::new(),
                hs_fences: HashMap::new(),
                hs_semaphores: HashMap::new(),
                hs_desc_pools: HashMap::new(),
                hs_desc_sets: HashMap::new(),
                hs_desc_updates: 0,
                hs_swapchain_images: HashMap::new(),
                hs_swapchain_history: Vec::new(),
                hs_next_image: 0,
                hs_extent: extent,
                hs_out_of_date: false,
                hs_fail_next_pipeline: false,
                hs_fail_next_submit: false,
                hs_fail_next_swapchain: false,
                hs_submits: Vec::new(),
                hs_presents: Vec::new(),
                hs_errors: Vec::new(),
            }),
        }
    }

    // ---------------- test knobs ----------------

    /// Report the swapchain as out of date until it is recreated
    pub fn force_out_of_date(&self) {
        self.h_state.lock().unwrap().hs_out_of_date = true;
    }

    /// Change the size of the pretend window
    pub fn set_extent(&self, width: u32, height: u32) {
        self.h_state.lock().unwrap().hs_extent = vk::Extent2D {
            width: width,
            height: height,
        };
    }

    /// Make the next pipeline creation fail
    pub fn fail_next_pipeline(&self) {
        self.h_state.lock().unwrap().hs_fail_next_pipeline = true;
    }

    /// Make the next queue submission fail before it touches any semaphore
    pub fn fail_next_submit(&self) {
        self.h_state.lock().unwrap().hs_fail_next_submit = true;
    }

    /// Make the next swapchain creation fail
    pub fn fail_next_swapchain(&self) {
        self.h_state.lock().unwrap().hs_fail_next_swapchain = true;
    }

    // ---------------- inspection ----------------

    /// Everything that went wrong so far. Empty if the backend was used
    /// correctly.
    pub fn errors(&self) -> Vec<String> {
        self.h_state.lock().unwrap().hs_errors.clone()
    }

    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.h_state.lock().unwrap().count(kind)
    }

    /// Number of live objects of any kind
    pub fn live_total(&self) -> usize {
        self.h_state.lock().unwrap().hs_live.len()
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.h_state.lock().unwrap().hs_submits.clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.h_state.lock().unwrap().hs_presents.clone()
    }

    /// Every swapchain created, paired with the old swapchain it was given
    pub fn swapchain_history(&self) -> Vec<(vk::SwapchainKHR, vk::SwapchainKHR)> {
        self.h_state.lock().unwrap().hs_swapchain_history.clone()
    }

    pub fn descriptor_updates(&self) -> usize {
        self.h_state.lock().unwrap().hs_desc_updates
    }

    /// Forget the submissions and presents seen so far
    pub fn clear_records(&self) {
        let mut st = self.h_state.lock().unwrap();
        st.hs_submits.clear();
        st.hs_presents.clear();
    }

    /// The contents of the memory bound to `buffer`
    pub fn read_buffer(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        let st = self.h_state.lock().unwrap();
        let mem = st.hs_buffer_memory.get(&buffer.as_raw())?;
        let size = *st.hs_buffer_sizes.get(&buffer.as_raw())? as usize;
        st.hs_memory.get(mem).map(|m| m.data[..size].to_vec())
    }
}

fn requirements(size: u64) -> vk::MemoryRequirements {
    vk::MemoryRequirements {
        size: size,
        alignment: 16,
        memory_type_bits: (1 << DEVICE_LOCAL_TYPE) | (1 << HOST_VISIBLE_TYPE),
    }
}

impl Backend for HeadlessBackend {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 2;
        props.memory_types[DEVICE_LOCAL_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props.memory_types[HOST_VISIBLE_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        props.memory_heap_count = 2;
        props
    }

    fn queue_family(&self, role: QueueRole) -> u32 {
        // Pretend we have a dedicated transfer queue so the graphics and
        // transfer paths are kept apart
        match role {
            QueueRole::Transfer => 1,
            _ => 0,
        }
    }

    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        match format {
            vk::Format::D32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            }
            // Sampleable but can't be blitted, so no mipmaps
            vk::Format::R8_UNORM => vk::FormatFeatureFlags::SAMPLED_IMAGE,
            vk::Format::UNDEFINED | vk::Format::D24_UNORM_S8_UINT => {
                vk::FormatFeatureFlags::empty()
            }
            _ => {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
                    | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                    | vk::FormatFeatureFlags::BLIT_SRC
                    | vk::FormatFeatureFlags::BLIT_DST
                    | vk::FormatFeatureFlags::COLOR_ATTACHMENT
                    | vk::FormatFeatureFlags::TRANSFER_SRC
                    | vk::FormatFeatureFlags::TRANSFER_DST
            }
        }
    }

    fn device_wait_idle(&self) -> Result<()> {
        Ok(())
    }

    fn queue_wait_idle(&self, _role: QueueRole) -> Result<()> {
        Ok(())
    }

    fn create_buffer(&self, size: u64, _usage: vk::BufferUsageFlags) -> Result<vk::Buffer> {
        let mut st = self.h_state.lock().unwrap();
        let raw = st.mint(ResourceKind::Buffer);
        st.hs_buffer_sizes.insert(raw, size);
        Ok(vk::Buffer::from_raw(raw))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let st = self.h_state.lock().unwrap();
        requirements(*st.hs_buffer_sizes.get(&buffer.as_raw()).unwrap_or(&0))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut st = self.h_state.lock().unwrap();
        if st.release(buffer.as_raw(), ResourceKind::Buffer) {
            st.hs_buffer_sizes.remove(&buffer.as_raw());
            st.hs_buffer_memory.remove(&buffer.as_raw());
        }
    }

    fn allocate_memory(&self, size: u64, type_index: u32) -> Result<vk::DeviceMemory> {
        let mut st = self.h_state.lock().unwrap();
        let raw = st.mint(ResourceKind::Memory);
        st.hs_memory.insert(
            raw,
            MemoryInfo {
                type_index: type_index,
                data: vec![0; size as usize],
            },
        );
        Ok(vk::DeviceMemory::from_raw(raw))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut st = self.h_state.lock().unwrap();
        if st.release(memory.as_raw(), ResourceKind::Memory) {
            st.hs_memory.remove(&memory.as_raw());
        }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        if !st.check_live(buffer.as_raw(), ResourceKind::Buffer, "bind_buffer_memory")
            || !st.check_live(memory.as_raw(), ResourceKind::Memory, "bind_buffer_memory")
        {
            return Err(SquallError::INVALID);
        }
        st.hs_buffer_memory.insert(buffer.as_raw(), memory.as_raw());
        Ok(())
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: u64, data: &[u8]) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        let err = match st.hs_memory.get_mut(&memory.as_raw()) {
            Some(m) if m.type_index != HOST_VISIBLE_TYPE => {
                Some(format!("mapping memory {:?} which is not host visible", memory))
            }
            Some(m) if m.data.len() < offset as usize + data.len() => {
                Some(format!("write of {} bytes overruns memory {:?}", data.len(), memory))
            }
            Some(m) => {
                let start = offset as usize;
                m.data[start..start + data.len()].copy_from_slice(data);
                None
            }
            None => Some(format!("write to memory {:?} which is not alive", memory)),
        };

        match err {
            Some(msg) => {
                st.error(msg);
                Err(SquallError::INVALID)
            }
            None => Ok(()),
        }
    }

    fn create_image(&self, _info: &ImageInfo) -> Result<vk::Image> {
        let raw = self.h_state.lock().unwrap().mint(ResourceKind::Image);
        Ok(vk::Image::from_raw(raw))
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        requirements(4096)
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        if !st.check_live(image.as_raw(), ResourceKind::Image, "bind_image_memory")
            || !st.check_live(memory.as_raw(), ResourceKind::Memory, "bind_image_memory")
        {
            return Err(SquallError::INVALID);
        }
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        self.h_state
            .lock()
            .unwrap()
            .release(image.as_raw(), ResourceKind::Image);
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
        _mip_levels: u32,
    ) -> Result<vk::ImageView> {
        let raw = self.h_state.lock().unwrap().mint(ResourceKind::ImageView);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.h_state
            .lock()
            .unwrap()
            .release(view.as_raw(), ResourceKind::ImageView);
    }

    fn create_sampler(&self, _info: &SamplerInfo) -> Result<vk::Sampler> {
        let raw = self.h_state.lock().unwrap().mint(ResourceKind::Sampler);
        Ok(vk::Sampler::from_raw(raw))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.h_state
            .lock()
            .unwrap()
            .release(sampler.as_raw(), ResourceKind::Sampler);
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        if code.len() == 0 {
            return Err(SquallError::INVALID_CREATE_INFO("empty shader module"));
        }
        let raw = self.h_state.lock().unwrap().mint(ResourceKind::ShaderModule);
        Ok(vk::ShaderModule::from_raw(raw))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.h_state
            .lock()
            .unwrap()
            .release(module.as_raw(), ResourceKind::ShaderModule);
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let raw = self
            .h_state
            .lock()
            .unwrap()
            .mint(ResourceKind::DescriptorSetLayout);
        Ok(vk::DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.h_state
            .lock()
            .unwrap()
            .release(layout.as_raw(), ResourceKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &self,
        _sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<vk::DescriptorPool> {
        let mut st = self.h_state.lock().unwrap();
        let raw = st.mint(ResourceKind::DescriptorPool);
        st.hs_desc_pools.insert(raw, (max_sets, 0));
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut st = self.h_state.lock().unwrap();
        if st.release(pool.as_raw(), ResourceKind::DescriptorPool) {
            st.hs_desc_pools.remove(&pool.as_raw());

            // Sets are freed along with their pool
            let sets: Vec<u64> = st
                .hs_desc_sets
                .iter()
                .filter(|(_, p)| **p == pool.as_raw())
                .map(|(s, _)| *s)
                .collect();
            for set in sets {
                st.hs_desc_sets.remove(&set);
                st.hs_live.remove(&set);
            }
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let mut st = self.h_state.lock().unwrap();
        if !st.check_live(layout.as_raw(), ResourceKind::DescriptorSetLayout, "allocate_descriptor_set") {
            return Err(SquallError::INVALID);
        }

        let full = match st.hs_desc_pools.get_mut(&pool.as_raw()) {
            Some((max, allocated)) if *allocated < *max => {
                *allocated += 1;
                false
            }
            Some(_) => true,
            None => {
                st.error(format!("allocating from dead descriptor pool {:?}", pool));
                return Err(SquallError::INVALID);
            }
        };
        if full {
            return Err(SquallError::VK_ERROR(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }

        let raw = st.mint(ResourceKind::DescriptorSet);
        st.hs_desc_sets.insert(raw, pool.as_raw());
        Ok(vk::DescriptorSet::from_raw(raw))
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        if st.hs_desc_sets.get(&set.as_raw()) != Some(&pool.as_raw()) {
            st.error(format!("freeing set {:?} which does not belong to {:?}", set, pool));
            return Err(SquallError::INVALID);
        }
        st.release(set.as_raw(), ResourceKind::DescriptorSet);
        st.hs_desc_sets.remove(&set.as_raw());
        if let Some((_, allocated)) = st.hs_desc_pools.get_mut(&pool.as_raw()) {
            *allocated -= 1;
        }
        Ok(())
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let mut st = self.h_state.lock().unwrap();
        if !st.check_live(set.as_raw(), ResourceKind::DescriptorSet, "update_descriptor_set") {
            return;
        }
        for w in writes.iter() {
            match w {
                DescriptorWrite::Buffer { buffer, .. } => {
                    st.check_live(buffer.as_raw(), ResourceKind::Buffer, "descriptor write");
                }
                DescriptorWrite::Image { view, sampler, .. } => {
                    st.check_live(view.as_raw(), ResourceKind::ImageView, "descriptor write");
                    st.check_live(sampler.as_raw(), ResourceKind::Sampler, "descriptor write");
                }
            }
        }
        st.hs_desc_updates += 1;
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout> {
        let raw = self.h_state.lock().unwrap().mint(ResourceKind::PipelineLayout);
        Ok(vk::PipelineLayout::from_raw(raw))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.h_state
            .lock()
            .unwrap()
            .release(layout.as_raw(), ResourceKind::PipelineLayout);
    }

    fn create_graphics_pipeline(&self, info: &PipelineInfo) -> Result<vk::Pipeline> {
        let mut st = self.h_state.lock().unwrap();
        if st.hs_fail_next_pipeline {
            st.hs_fail_next_pipeline = false;
            return Err(SquallError::COULD_NOT_CREATE_PIPELINE);
        }

        let mut ok = st.check_live(info.layout.as_raw(), ResourceKind::PipelineLayout, "pipeline")
            && st.check_live(info.render_pass.as_raw(), ResourceKind::RenderPass, "pipeline");
        for stage in info.stages.iter() {
            ok &= st.check_live(stage.module.as_raw(), ResourceKind::ShaderModule, "pipeline");
        }
        if !ok {
            return Err(SquallError::COULD_NOT_CREATE_PIPELINE);
        }

        let raw = st.mint(ResourceKind::Pipeline);
        Ok(vk::Pipeline::from_raw(raw))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.h_state
            .lock()
            .unwrap()
            .release(pipeline.as_raw(), ResourceKind::Pipeline);
    }

    fn create_render_pass(&self, _info: &RenderPassInfo) -> Result<vk::RenderPass> {
        let raw = self.h_state.lock().unwrap().mint(ResourceKind::RenderPass);
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, pass: vk::RenderPass) {
        self.h_state
            .lock()
            .unwrap()
            .release(pass.as_raw(), ResourceKind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut st = self.h_state.lock().unwrap();
        let mut ok = st.check_live(pass.as_raw(), ResourceKind::RenderPass, "framebuffer");
        for view in attachments.iter() {
            ok &= st.check_live(view.as_raw(), ResourceKind::ImageView, "framebuffer");
        }
        if !ok {
            return Err(SquallError::INVALID);
        }

        let raw = st.mint(ResourceKind::Framebuffer);
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.h_state
            .lock()
            .unwrap()
            .release(framebuffer.as_raw(), ResourceKind::Framebuffer);
    }

    fn create_command_pool(&self, _role: QueueRole) -> Result<vk::CommandPool> {
        let raw = self.h_state.lock().unwrap().mint(ResourceKind::CommandPool);
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut st = self.h_state.lock().unwrap();
        if st.release(pool.as_raw(), ResourceKind::CommandPool) {
            // Command buffers are freed along with their pool
            let cbufs: Vec<u64> = st
                .hs_cbufs
                .iter()
                .filter(|(_, info)| info.pool == pool.as_raw())
                .map(|(c, _)| *c)
                .collect();
            for cbuf in cbufs {
                st.hs_cbufs.remove(&cbuf);
                st.hs_live.remove(&cbuf);
            }
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let mut st = self.h_state.lock().unwrap();
        if !st.check_live(pool.as_raw(), ResourceKind::CommandPool, "allocate_command_buffer") {
            return Err(SquallError::INVALID);
        }

        let raw = st.mint(ResourceKind::CommandBuffer);
        st.hs_cbufs.insert(
            raw,
            CbufInfo {
                pool: pool.as_raw(),
                state: CbufState::Initial,
                commands: Vec::new(),
            },
        );
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, cbuf: vk::CommandBuffer) {
        let mut st = self.h_state.lock().unwrap();
        match st.hs_cbufs.get(&cbuf.as_raw()) {
            Some(info) if info.pool != pool.as_raw() => {
                st.error(format!("freeing {:?} into the wrong pool", cbuf));
                return;
            }
            _ => {}
        }
        if st.release(cbuf.as_raw(), ResourceKind::CommandBuffer) {
            st.hs_cbufs.remove(&cbuf.as_raw());
        }
    }

    fn reset_command_buffer(&self, cbuf: vk::CommandBuffer) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        match st.hs_cbufs.get_mut(&cbuf.as_raw()) {
            Some(info) => {
                info.state = CbufState::Initial;
                info.commands.clear();
                Ok(())
            }
            None => {
                st.error(format!("resetting dead command buffer {:?}", cbuf));
                Err(SquallError::INVALID)
            }
        }
    }

    fn begin_command_buffer(&self, cbuf: vk::CommandBuffer, _one_time: bool) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        let err = match st.hs_cbufs.get_mut(&cbuf.as_raw()) {
            Some(info) if info.state == CbufState::Initial => {
                info.state = CbufState::Recording;
                None
            }
            Some(info) => Some(format!("begin on {:?} in state {:?}", cbuf, info.state)),
            None => Some(format!("begin on dead command buffer {:?}", cbuf)),
        };

        match err {
            Some(msg) => {
                st.error(msg);
                Err(SquallError::INVALID)
            }
            None => Ok(()),
        }
    }

    fn end_command_buffer(&self, cbuf: vk::CommandBuffer) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        let err = match st.hs_cbufs.get_mut(&cbuf.as_raw()) {
            Some(info) if info.state == CbufState::Recording => {
                info.state = CbufState::Executable;
                None
            }
            Some(info) => Some(format!("end on {:?} in state {:?}", cbuf, info.state)),
            None => Some(format!("end on dead command buffer {:?}", cbuf)),
        };

        match err {
            Some(msg) => {
                st.error(msg);
                Err(SquallError::INVALID)
            }
            None => Ok(()),
        }
    }

    fn cmd(&self, cbuf: vk::CommandBuffer, cmd: &Command) {
        let mut st = self.h_state.lock().unwrap();
        let err = match st.hs_cbufs.get_mut(&cbuf.as_raw()) {
            Some(info) if info.state == CbufState::Recording => {
                info.commands.push(cmd.clone());
                None
            }
            Some(info) => Some(format!("recording into {:?} in state {:?}", cbuf, info.state)),
            None => Some(format!("recording into dead command buffer {:?}", cbuf)),
        };

        if let Some(msg) = err {
            st.error(msg);
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut st = self.h_state.lock().unwrap();
        let raw = st.mint(ResourceKind::Fence);
        st.hs_fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut st = self.h_state.lock().unwrap();
        if st.release(fence.as_raw(), ResourceKind::Fence) {
            st.hs_fences.remove(&fence.as_raw());
        }
    }

    fn wait_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        match st.hs_fences.get(&fence.as_raw()) {
            Some(true) => Ok(()),
            // Nothing will ever signal it, so a real wait would time out
            Some(false) => Err(SquallError::TIMEOUT),
            None => {
                st.error(format!("waiting on dead fence {:?}", fence));
                Err(SquallError::INVALID)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        match st.hs_fences.get_mut(&fence.as_raw()) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => {
                st.error(format!("resetting dead fence {:?}", fence));
                Err(SquallError::INVALID)
            }
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        self.h_state
            .lock()
            .unwrap()
            .hs_fences
            .get(&fence.as_raw())
            .copied()
            .ok_or(SquallError::INVALID)
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut st = self.h_state.lock().unwrap();
        let raw = st.mint(ResourceKind::Semaphore);
        st.hs_semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, sema: vk::Semaphore) {
        let mut st = self.h_state.lock().unwrap();
        if st.release(sema.as_raw(), ResourceKind::Semaphore) {
            st.hs_semaphores.remove(&sema.as_raw());
        }
    }

    fn queue_submit(&self, role: QueueRole, submit: &Submission) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        if st.hs_fail_next_submit {
            st.hs_fail_next_submit = false;
            return Err(SquallError::DEVICE_LOST);
        }

        if submit.wait.len() != submit.wait_stages.len() {
            st.error(format!(
                "{} wait semaphores but {} wait stages",
                submit.wait.len(),
                submit.wait_stages.len()
            ));
        }

        let commands = match st.hs_cbufs.get(&submit.cbuf.as_raw()) {
            Some(info) if info.state == CbufState::Executable => info.commands.clone(),
            Some(info) => {
                let msg = format!("submitting {:?} in state {:?}", submit.cbuf, info.state);
                st.error(msg);
                return Err(SquallError::INVALID);
            }
            None => {
                st.error(format!("submitting dead command buffer {:?}", submit.cbuf));
                return Err(SquallError::INVALID);
            }
        };

        for sema in submit.wait.iter() {
            match st.hs_semaphores.get_mut(&sema.as_raw()) {
                Some(signaled) if *signaled => *signaled = false,
                Some(_) => st.error(format!("waiting on unsignaled semaphore {:?}", sema)),
                None => st.error(format!("waiting on dead semaphore {:?}", sema)),
            }
        }
        for sema in submit.signal.iter() {
            match st.hs_semaphores.get_mut(&sema.as_raw()) {
                Some(signaled) if !*signaled => *signaled = true,
                Some(_) => st.error(format!("signaling already signaled semaphore {:?}", sema)),
                None => st.error(format!("signaling dead semaphore {:?}", sema)),
            }
        }

        if submit.fence != vk::Fence::null() {
            match st.hs_fences.get_mut(&submit.fence.as_raw()) {
                // Work completes as soon as it is submitted
                Some(signaled) if !*signaled => *signaled = true,
                Some(_) => st.error(format!("submitting with signaled fence {:?}", submit.fence)),
                None => st.error(format!("submitting with dead fence {:?}", submit.fence)),
            }
        }

        st.execute(commands.as_slice());
        st.hs_submits.push(SubmitRecord {
            role: role,
            cbuf: submit.cbuf,
            wait: submit.wait.to_vec(),
            signal: submit.signal.to_vec(),
            commands: commands,
        });
        Ok(())
    }

    fn surface_info(&self) -> Result<SurfaceInfo> {
        let st = self.h_state.lock().unwrap();
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.min_image_count = 2;
        caps.max_image_count = 3;
        caps.current_extent = st.hs_extent;
        caps.min_image_extent = vk::Extent2D {
            width: 1,
            height: 1,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 16384,
            height: 16384,
        };
        caps.max_image_array_layers = 1;
        caps.supported_transforms = vk::SurfaceTransformFlagsKHR::IDENTITY;
        caps.current_transform = vk::SurfaceTransformFlagsKHR::IDENTITY;
        caps.supported_usage_flags = vk::ImageUsageFlags::COLOR_ATTACHMENT;

        Ok(SurfaceInfo {
            caps: caps,
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        })
    }

    fn drawable_extent(&self) -> Option<vk::Extent2D> {
        Some(self.h_state.lock().unwrap().hs_extent)
    }

    fn create_swapchain(
        &self,
        info: &SwapchainInfo,
        old: vk::SwapchainKHR,
    ) -> Result<vk::SwapchainKHR> {
        let mut st = self.h_state.lock().unwrap();
        if old != vk::SwapchainKHR::null() {
            st.check_live(old.as_raw(), ResourceKind::Swapchain, "create_swapchain");
        }
        if st.hs_fail_next_swapchain {
            st.hs_fail_next_swapchain = false;
            return Err(SquallError::OUT_OF_MEMORY);
        }

        let raw = st.mint(ResourceKind::Swapchain);
        // Swapchain images belong to the swapchain, so they get handles
        // but are not tracked on their own
        let mut images = Vec::new();
        for _ in 0..info.image_count {
            images.push(vk::Image::from_raw(st.hs_next_handle));
            st.hs_next_handle += 1;
        }

        let swapchain = vk::SwapchainKHR::from_raw(raw);
        st.hs_swapchain_images.insert(raw, images);
        st.hs_swapchain_history.push((swapchain, old));
        st.hs_next_image = 0;
        st.hs_out_of_date = false;
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut st = self.h_state.lock().unwrap();
        if st.release(swapchain.as_raw(), ResourceKind::Swapchain) {
            st.hs_swapchain_images.remove(&swapchain.as_raw());
        }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        self.h_state
            .lock()
            .unwrap()
            .hs_swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(SquallError::INVALID)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<u32> {
        let mut st = self.h_state.lock().unwrap();
        if st.hs_out_of_date {
            return Err(SquallError::OUT_OF_DATE);
        }

        let count = match st.hs_swapchain_images.get(&swapchain.as_raw()) {
            Some(images) => images.len() as u32,
            None => {
                st.error(format!("acquiring from dead swapchain {:?}", swapchain));
                return Err(SquallError::INVALID);
            }
        };

        match st.hs_semaphores.get_mut(&signal.as_raw()) {
            Some(signaled) if !*signaled => *signaled = true,
            Some(_) => st.error(format!("acquire signals already signaled semaphore {:?}", signal)),
            None => st.error(format!("acquire signals dead semaphore {:?}", signal)),
        }

        let index = st.hs_next_image;
        st.hs_next_image = (index + 1) % count;
        Ok(index)
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        index: u32,
        wait: &[vk::Semaphore],
    ) -> Result<()> {
        let mut st = self.h_state.lock().unwrap();
        st.check_live(swapchain.as_raw(), ResourceKind::Swapchain, "queue_present");

        // Waits are performed even if presentation then fails
        for sema in wait.iter() {
            match st.hs_semaphores.get_mut(&sema.as_raw()) {
                Some(signaled) if *signaled => *signaled = false,
                Some(_) => st.error(format!("present waits on unsignaled semaphore {:?}", sema)),
                None => st.error(format!("present waits on dead semaphore {:?}", sema)),
            }
        }

        st.hs_presents.push(PresentRecord {
            image_index: index,
            wait: wait.to_vec(),
        });

        match st.hs_out_of_date {
            true => Err(SquallError::OUT_OF_DATE),
            false => Ok(()),
        }
    }
}
