// GPU device representation
//
// This stores per-GPU state, such as the backend handle and the
// logic to copy data to this GPU.
//
// Austin Shafer - 2024

use ash::vk;

use crate::backend::{Backend, Command, ImageBarrier, ImageInfo, QueueRole, SamplerInfo};
use crate::execbuf::ExecBuffer;
use crate::{RenderSettings, Result, SquallError};
use monsoon_utils::log;

use std::sync::{Arc, Mutex};

/// Depth formats we are willing to use, in order of preference
const DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Squall Device
///
/// This holds all of the GPU logic for one device. Everything that
/// needs to allocate, upload or submit does it through here.
pub struct Device {
    pub(crate) d_back: Arc<dyn Backend>,
    pub(crate) d_mem_props: vk::PhysicalDeviceMemoryProperties,
    /// Upper bound for fence waits
    d_fence_timeout: u64,
    /// Externally synchronized and mutable state
    d_internal: Mutex<DeviceInternal>,
}

/// The set of per-device data that needs to be "externally synchronized"
/// according to Vulkan.
struct DeviceInternal {
    /// Command pools for one-shot copy work, created on first use
    copy_pools: Vec<(QueueRole, vk::CommandPool)>,
}

impl Device {
    /// Create a new Device on top of a backend
    pub fn new(back: Arc<dyn Backend>, settings: &RenderSettings) -> Result<Arc<Self>> {
        let mem_props = back.memory_properties();

        log::debug!(
            "Creating device: graphics family {}, transfer family {}, present family {}",
            back.queue_family(QueueRole::Graphics),
            back.queue_family(QueueRole::Transfer),
            back.queue_family(QueueRole::Present),
        );

        Ok(Arc::new(Self {
            d_back: back,
            d_mem_props: mem_props,
            d_fence_timeout: settings.fence_timeout_ns,
            d_internal: Mutex::new(DeviceInternal {
                copy_pools: Vec::new(),
            }),
        }))
    }

    pub fn backend(&self) -> &dyn Backend {
        self.d_back.as_ref()
    }

    pub fn queue_family(&self, role: QueueRole) -> u32 {
        self.d_back.queue_family(role)
    }

    /// How long fence waits may block before we give up on the GPU
    pub fn fence_timeout(&self) -> u64 {
        self.d_fence_timeout
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> Result<()> {
        self.d_back.device_wait_idle().map_err(|e| {
            log::error!("Waiting for device idle failed: {}", e);
            e
        })
    }

    pub fn queue_wait_idle(&self, role: QueueRole) -> Result<()> {
        self.d_back.queue_wait_idle(role)
    }

    /// Returns an index into the array of memory types for the memory
    /// properties
    ///
    /// Memory types specify the location and accessability of memory. Device
    /// local memory is resident on the GPU, while host visible memory can be
    /// read from the system side. Both of these are part of the
    /// vk::MemoryPropertyFlags type.
    pub fn find_memory_type_index(
        props: &vk::PhysicalDeviceMemoryProperties,
        reqs: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        let count = props.memory_type_count as usize;
        // for each memory type
        for (i, ref mem_type) in props.memory_types[..count].iter().enumerate() {
            // Bit i of memoryBitTypes will be set if the resource supports
            // the ith memory type in props.
            if (reqs.memory_type_bits >> i) & 1 == 1 && mem_type.property_flags.contains(flags) {
                return Some(i as u32);
            }
        }
        None
    }

    /// Allocate memory that satisfies `reqs` with the properties in `flags`
    fn allocate_for(
        &self,
        reqs: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let index = Self::find_memory_type_index(&self.d_mem_props, reqs, flags).ok_or_else(|| {
            log::error!(
                "No memory type with flags {:?} in type bits {:#b}",
                flags,
                reqs.memory_type_bits
            );
            SquallError::NO_SUITABLE_MEMORY_TYPE
        })?;

        self.d_back.allocate_memory(reqs.size, index)
    }

    /// Allocates a buffer/memory pair of size `size`.
    ///
    /// The memory is bound to the buffer, but the buffer's contents
    /// are left undefined.
    pub(crate) fn create_buffer_with_size(
        &self,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
        size: u64,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let buffer = self.d_back.create_buffer(size, usage)?;
        let reqs = self.d_back.buffer_memory_requirements(buffer);

        let memory = match self.allocate_for(&reqs, flags) {
            Ok(m) => m,
            Err(e) => {
                self.d_back.destroy_buffer(buffer);
                return Err(e);
            }
        };

        if let Err(e) = self.d_back.bind_buffer_memory(buffer, memory) {
            self.destroy_buffer(buffer, memory);
            return Err(e);
        }

        Ok((buffer, memory))
    }

    /// Writes `data` to `memory`
    ///
    /// Memory needs to be host visible and coherent.
    pub(crate) fn update_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if data.len() == 0 {
            return Ok(());
        }

        self.d_back.write_memory(memory, offset, data)
    }

    /// allocates a host visible buffer/memory pair and fills it with `data`
    ///
    /// Both are returned, as both need to be destroyed when they are done.
    pub(crate) fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let (buffer, memory) = self.create_buffer_with_size(
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            data.len() as u64,
        )?;

        if let Err(e) = self.update_memory(memory, 0, data) {
            self.destroy_buffer(buffer, memory);
            return Err(e);
        }

        Ok((buffer, memory))
    }

    /// Create a device local buffer and fill it through a staging copy
    pub(crate) fn create_device_local_buffer(
        self: &Arc<Self>,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let (buffer, memory) = self.create_buffer_with_size(
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            data.len() as u64,
        )?;

        if let Err(e) = self.upload_buffer(buffer, data) {
            self.destroy_buffer(buffer, memory);
            return Err(e);
        }

        Ok((buffer, memory))
    }

    pub(crate) fn destroy_buffer(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) {
        self.d_back.destroy_buffer(buffer);
        self.d_back.free_memory(memory);
    }

    /// Get (or create) the one-shot command pool for a queue role
    fn copy_pool(&self, role: QueueRole) -> Result<vk::CommandPool> {
        let mut internal = self.d_internal.lock().unwrap();

        if let Some((_, pool)) = internal.copy_pools.iter().find(|(r, _)| *r == role) {
            return Ok(*pool);
        }

        let pool = self.d_back.create_command_pool(role)?;
        internal.copy_pools.push((role, pool));
        Ok(pool)
    }

    /// Record some work into a fresh ExecBuffer and run it to completion
    pub(crate) fn run_one_shot<F>(self: &Arc<Self>, role: QueueRole, record: F) -> Result<()>
    where
        F: FnOnce(&mut ExecBuffer) -> Result<()>,
    {
        let pool = self.copy_pool(role)?;
        let mut exec = ExecBuffer::new(self.clone(), pool, role);

        exec.create()?;
        exec.begin_recording()?;
        record(&mut exec)?;
        exec.end_recording()?;
        exec.execute(&[], &[], true)?;
        exec.release()
    }

    /// Replace the contents of a device local buffer
    ///
    /// `data` goes into a short lived staging buffer which is copied on the
    /// transfer queue. The graphics queue is drained first so that we never
    /// overwrite memory an in-flight frame is reading.
    pub(crate) fn upload_buffer(self: &Arc<Self>, dst: vk::Buffer, data: &[u8]) -> Result<()> {
        if data.len() == 0 {
            return Ok(());
        }

        self.queue_wait_idle(QueueRole::Graphics)?;

        let (staging, staging_mem) = self.create_buffer(vk::BufferUsageFlags::TRANSFER_SRC, data)?;
        let size = data.len() as u64;

        let ret = self.run_one_shot(QueueRole::Transfer, |exec| {
            exec.record(Command::CopyBuffer {
                src: staging,
                dst: dst,
                size: size,
            })
        });

        self.destroy_buffer(staging, staging_mem);
        ret
    }

    /// Check if `format` supports all of `features` with optimal tiling
    pub(crate) fn supports_format(
        &self,
        format: vk::Format,
        features: vk::FormatFeatureFlags,
    ) -> bool {
        self.d_back.format_features(format).contains(features)
    }

    /// Pick the first depth format the device can render to
    pub(crate) fn select_depth_format(&self) -> Result<vk::Format> {
        DEPTH_FORMATS
            .iter()
            .copied()
            .find(|f| {
                self.supports_format(*f, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or(SquallError::INVALID_FORMAT)
    }

    /// Create an image, back it with memory, and make a view for it
    ///
    /// usage defines the role the image will serve (transfer, depth data, etc)
    /// flags defines the memory type (probably DEVICE_LOCAL)
    pub(crate) fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        flags: vk::MemoryPropertyFlags,
        mip_levels: u32,
    ) -> Result<(vk::Image, vk::ImageView, vk::DeviceMemory)> {
        let image = self.d_back.create_image(&ImageInfo {
            extent: extent,
            format: format,
            usage: usage,
            mip_levels: mip_levels,
        })?;

        // we need to find a memory type that matches the type our
        // new image needs
        let reqs = self.d_back.image_memory_requirements(image);
        let memory = match self.allocate_for(&reqs, flags) {
            Ok(m) => m,
            Err(e) => {
                self.d_back.destroy_image(image);
                return Err(e);
            }
        };

        let view = self
            .d_back
            .bind_image_memory(image, memory)
            .and_then(|_| {
                self.d_back
                    .create_image_view(image, format, aspect, mip_levels)
            });

        match view {
            Ok(view) => Ok((image, view, memory)),
            Err(e) => {
                self.d_back.destroy_image(image);
                self.d_back.free_memory(memory);
                Err(e)
            }
        }
    }

    pub(crate) fn destroy_image(
        &self,
        image: vk::Image,
        view: vk::ImageView,
        memory: vk::DeviceMemory,
    ) {
        self.d_back.destroy_image_view(view);
        self.d_back.destroy_image(image);
        self.d_back.free_memory(memory);
    }

    pub(crate) fn create_sampler(&self, info: &SamplerInfo) -> Result<vk::Sampler> {
        self.d_back.create_sampler(info)
    }

    /// Build a layout transition barrier for the color aspect
    ///
    /// The access masks and stages are derived from the layouts, straight
    /// from `transitionImageLayout` in the tutorial.
    pub(crate) fn color_barrier(
        image: vk::Image,
        base_mip: u32,
        mip_count: u32,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> ImageBarrier {
        let (src_access, src_stage) = match old {
            vk::ImageLayout::UNDEFINED => (
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::TOP_OF_PIPE,
            ),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
                vk::AccessFlags::TRANSFER_READ,
                vk::PipelineStageFlags::TRANSFER,
            ),
            _ => (
                vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
            ),
        };
        let (dst_access, dst_stage) = match new {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
                vk::AccessFlags::TRANSFER_READ,
                vk::PipelineStageFlags::TRANSFER,
            ),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            _ => (
                vk::AccessFlags::MEMORY_READ,
                vk::PipelineStageFlags::ALL_COMMANDS,
            ),
        };

        ImageBarrier {
            image: image,
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip: base_mip,
            mip_count: mip_count,
            old_layout: old,
            new_layout: new,
            src_access: src_access,
            dst_access: dst_access,
            src_stage: src_stage,
            dst_stage: dst_stage,
        }
    }

    /// Fill a sampled image from raw pixels
    ///
    /// This copies the pixels into a staging buffer, copies that into mip
    /// level 0 and then either blits the rest of the mip chain or
    /// transitions the image straight to shader read only.
    ///
    /// This runs on the graphics queue since blits and fragment shader
    /// barriers are not available on transfer-only queues.
    pub(crate) fn upload_image(
        self: &Arc<Self>,
        image: vk::Image,
        extent: vk::Extent2D,
        mip_levels: u32,
        data: &[u8],
    ) -> Result<()> {
        let (staging, staging_mem) = self.create_buffer(vk::BufferUsageFlags::TRANSFER_SRC, data)?;

        let ret = self.run_one_shot(QueueRole::Graphics, |exec| {
            exec.record(Command::ImageBarrier(Self::color_barrier(
                image,
                0,
                mip_levels,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )))?;
            exec.record(Command::CopyBufferToImage {
                src: staging,
                dst: image,
                extent: extent,
            })?;

            Self::record_mip_chain(exec, image, extent, mip_levels)
        });

        self.destroy_buffer(staging, staging_mem);
        ret
    }

    /// Downsample level 0 into every other level
    ///
    /// All levels must start out in TRANSFER_DST_OPTIMAL. They all end
    /// up in SHADER_READ_ONLY_OPTIMAL.
    fn record_mip_chain(
        exec: &mut ExecBuffer,
        image: vk::Image,
        extent: vk::Extent2D,
        mip_levels: u32,
    ) -> Result<()> {
        let mut level_extent = extent;

        for level in 1..mip_levels {
            exec.record(Command::ImageBarrier(Self::color_barrier(
                image,
                level - 1,
                1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )))?;
            exec.record(Command::BlitMip {
                image: image,
                src_mip: level - 1,
                src_extent: level_extent,
            })?;
            exec.record(Command::ImageBarrier(Self::color_barrier(
                image,
                level - 1,
                1,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )))?;

            level_extent = vk::Extent2D {
                width: std::cmp::max(level_extent.width / 2, 1),
                height: std::cmp::max(level_extent.height / 2, 1),
            };
        }

        // The last level was only ever written to
        exec.record(Command::ImageBarrier(Self::color_barrier(
            image,
            mip_levels - 1,
            1,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // first wait for the device to finish working
        if let Err(e) = self.d_back.device_wait_idle() {
            log::error!("Could not idle device during teardown: {}", e);
        }

        let internal = self.d_internal.get_mut().unwrap();
        for (_, pool) in internal.copy_pools.drain(..) {
            self.d_back.destroy_command_pool(pool);
        }
    }
}
