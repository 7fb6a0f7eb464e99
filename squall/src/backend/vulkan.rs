// The Vulkan backend
//
// This holds the instance, the VkSurfaceKHR for the window, the physical
// and logical device, and the queues. Every Backend call is a thin wrapper
// over the matching ash call.
//
// Austin Shafer - 2020

use ash::extensions::{ext, khr};
use ash::{vk, Entry};

use super::{
    Backend, Command, DescriptorWrite, ImageInfo, PipelineInfo, QueueRole, RenderPassInfo,
    SamplerInfo, Submission, SurfaceInfo, SwapchainInfo,
};
use crate::pass::LoadOp;
use crate::pipeline::DescriptorBinding;
use crate::window::WindowSurface;
use crate::{RenderSettings, Result, SquallError};
use monsoon_utils::log;

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

// this happy little debug callback is from the ash examples
// all it does is hand the message to our logger at a matching level.
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg = match p_callback_data.as_ref() {
        Some(data) if !data.p_message.is_null() => {
            CStr::from_ptr(data.p_message).to_string_lossy().into_owned()
        }
        _ => String::from("<no message>"),
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[VK][{:?}] {}", message_types, msg);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[VK][{:?}] {}", message_types, msg);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!("[VK][{:?}] {}", message_types, msg);
    } else {
        log::trace!("[VK][{:?}] {}", message_types, msg);
    }
    vk::FALSE
}

/// Queue family index for each role
#[derive(Debug, Copy, Clone)]
struct QueueFamilies {
    graphics: u32,
    transfer: u32,
    compute: u32,
}

impl QueueFamilies {
    fn unique(&self) -> Vec<u32> {
        let mut ret = vec![self.graphics];
        for f in [self.transfer, self.compute].iter() {
            if !ret.contains(f) {
                ret.push(*f);
            }
        }
        ret
    }
}

/// A Backend driving a real GPU through ash
pub struct VkBackend {
    /// the entry just loads function pointers from the dynamic library
    /// I am calling it a loader, because that's what it does
    v_loader: Entry,
    /// the big vulkan instance.
    v_inst: ash::Instance,
    /// debug callback sugar mentioned earlier
    v_debug: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    v_window: Box<dyn WindowSurface>,
    v_surface_loader: khr::Surface,
    v_surface: vk::SurfaceKHR,
    /// the physical device selected to display to
    v_pdev: vk::PhysicalDevice,
    /// the logical device we are using
    v_dev: ash::Device,
    v_families: QueueFamilies,
    v_graphics_queue: vk::Queue,
    v_transfer_queue: vk::Queue,
    v_compute_queue: vk::Queue,
    v_swapchain_loader: khr::Swapchain,
    v_mem_props: vk::PhysicalDeviceMemoryProperties,
}

impl VkBackend {
    /// Create a vkInstance
    ///
    /// Validation is only turned on if it was asked for and the layer is
    /// installed.
    fn create_instance(
        entry: &Entry,
        window: &dyn WindowSurface,
        settings: &RenderSettings,
    ) -> Result<(ash::Instance, bool)> {
        let app_name = CString::new("Monsoon").or(Err(SquallError::INVALID))?;

        let mut validation = false;
        if settings.validation {
            let layers = entry.enumerate_instance_layer_properties()?;
            validation = layers.iter().any(|l| {
                let name = unsafe { CStr::from_ptr(l.layer_name.as_ptr()) };
                name.to_str() == Ok(VALIDATION_LAYER)
            });
            if !validation {
                log::warn!("Validation was requested but {} is not installed", VALIDATION_LAYER);
            }
        }

        let layer_names = match validation {
            true => vec![CString::new(VALIDATION_LAYER).or(Err(SquallError::INVALID))?],
            false => Vec::new(),
        };
        let layer_names_raw: Vec<*const c_char> = layer_names
            .iter()
            .map(|raw_name: &CString| raw_name.as_ptr())
            .collect();

        let mut extension_names_raw = window.extension_names()?;
        if validation {
            extension_names_raw.push(ext::DebugUtils::name().as_ptr());
        }

        let appinfo = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(&app_name)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_1);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&appinfo)
            .enabled_layer_names(&layer_names_raw)
            .enabled_extension_names(&extension_names_raw);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        Ok((instance, validation))
    }

    /// Creates a new debug reporter and registers our function
    /// for debug callbacks so we get nice error messages
    fn setup_debug(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let dr_loader = ext::DebugUtils::new(entry, instance);
        let callback = unsafe { dr_loader.create_debug_utils_messenger(&debug_info, None)? };
        Ok((dr_loader, callback))
    }

    /// Does `pdev` have every device extension we need
    fn has_extensions(inst: &ash::Instance, pdev: vk::PhysicalDevice) -> bool {
        let props = match unsafe { inst.enumerate_device_extension_properties(pdev) } {
            Ok(p) => p,
            Err(_) => return false,
        };

        props.iter().any(|p| {
            let name = unsafe { CStr::from_ptr(p.extension_name.as_ptr()) };
            name == khr::Swapchain::name()
        })
    }

    /// Choose a queue family
    ///
    /// Prefer a family that does `flags` without graphics, since that is
    /// usually a dedicated engine. Fall back to the graphics family.
    fn select_queue_family(
        families: &[vk::QueueFamilyProperties],
        flags: vk::QueueFlags,
        graphics: u32,
    ) -> u32 {
        families
            .iter()
            .enumerate()
            .filter_map(|(index, info)| {
                match info.queue_flags.contains(flags)
                    && !info.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                {
                    true => Some(index as u32),
                    false => None,
                }
            })
            .nth(0)
            .unwrap_or(graphics)
    }

    /// Choose a vkPhysicalDevice and its queue families
    ///
    /// The device needs the swapchain extension and a queue family that
    /// can do graphics and present to our surface. Discrete GPUs win.
    fn select_pdev(
        inst: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let pdevices = unsafe { inst.enumerate_physical_devices()? };
        let mut best: Option<(vk::PhysicalDevice, QueueFamilies, bool)> = None;
        let mut missing_extensions = false;

        for pdev in pdevices.iter() {
            if !Self::has_extensions(inst, *pdev) {
                log::debug!("Skipping {:?}: missing device extensions", pdev);
                missing_extensions = true;
                continue;
            }

            let families = unsafe { inst.get_physical_device_queue_family_properties(*pdev) };
            let graphics = families.iter().enumerate().position(|(index, info)| {
                info.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && unsafe {
                        surface_loader
                            // ensure compatibility with the surface
                            .get_physical_device_surface_support(*pdev, index as u32, surface)
                            .unwrap_or(false)
                    }
            });
            let graphics = match graphics {
                Some(g) => g as u32,
                None => continue,
            };

            let qf = QueueFamilies {
                graphics: graphics,
                transfer: Self::select_queue_family(&families, vk::QueueFlags::TRANSFER, graphics),
                compute: Self::select_queue_family(&families, vk::QueueFlags::COMPUTE, graphics),
            };
            let props = unsafe { inst.get_physical_device_properties(*pdev) };
            let discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;

            match best {
                Some((_, _, true)) => {}
                Some((_, _, false)) if !discrete => {}
                _ => best = Some((*pdev, qf, discrete)),
            }
        }

        match best {
            Some((pdev, qf, _)) => Ok((pdev, qf)),
            None if missing_extensions => Err(SquallError::VK_NOT_ALL_EXTENSIONS_AVAILABLE),
            None => Err(SquallError::NO_SUITABLE_DEVICE),
        }
    }

    /// Create a vkDevice from a vkPhysicalDevice
    ///
    /// One queue is created in each unique family.
    fn create_device(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        families: &QueueFamilies,
    ) -> Result<ash::Device> {
        let dev_extension_names = [khr::Swapchain::name().as_ptr()];

        // for now we only have one queue per family, so one priority
        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .iter()
            .map(|i| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*i)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures::builder().build();
        let dev_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(queue_infos.as_slice())
            .enabled_extension_names(&dev_extension_names)
            .enabled_features(&features);

        Ok(unsafe { inst.create_device(pdev, &dev_create_info, None)? })
    }

    pub fn new(window: Box<dyn WindowSurface>, settings: &RenderSettings) -> Result<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            log::error!("Could not load Vulkan: {}", e);
            SquallError::COULD_NOT_LOAD_VULKAN
        })?;

        let (inst, validation) = Self::create_instance(&entry, window.as_ref(), settings)?;
        let debug = match validation {
            true => Some(Self::setup_debug(&entry, &inst)?),
            false => None,
        };

        let surface_loader = khr::Surface::new(&entry, &inst);
        let surface = window.create_surface(&entry, &inst).map_err(|e| {
            log::error!("Could not create a surface for the window: {:?}", e);
            SquallError::VK_SURF_NOT_SUPPORTED
        })?;

        let (pdev, families) = Self::select_pdev(&inst, &surface_loader, surface)?;
        let dev = Self::create_device(&inst, pdev, &families)?;
        let swapchain_loader = khr::Swapchain::new(&inst, &dev);
        let mem_props = unsafe { inst.get_physical_device_memory_properties(pdev) };

        let ret = unsafe {
            Self {
                v_graphics_queue: dev.get_device_queue(families.graphics, 0),
                v_transfer_queue: dev.get_device_queue(families.transfer, 0),
                v_compute_queue: dev.get_device_queue(families.compute, 0),
                v_loader: entry,
                v_inst: inst,
                v_debug: debug,
                v_window: window,
                v_surface_loader: surface_loader,
                v_surface: surface,
                v_pdev: pdev,
                v_dev: dev,
                v_families: families,
                v_swapchain_loader: swapchain_loader,
                v_mem_props: mem_props,
            }
        };

        let props = unsafe { ret.v_inst.get_physical_device_properties(pdev) };
        log::info!(
            "Using {:?} with queue families {:?}",
            unsafe { CStr::from_ptr(props.device_name.as_ptr()) },
            ret.v_families
        );
        Ok(ret)
    }

    fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics | QueueRole::Present => self.v_graphics_queue,
            QueueRole::Transfer => self.v_transfer_queue,
            QueueRole::Compute => self.v_compute_queue,
        }
    }

    /// The Vulkan entry points, for anyone who needs to go around us
    pub fn entry(&self) -> &Entry {
        &self.v_loader
    }

    pub fn device(&self) -> &ash::Device {
        &self.v_dev
    }
}

fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
    }
}

impl Backend for VkBackend {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.v_mem_props
    }

    fn queue_family(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics | QueueRole::Present => self.v_families.graphics,
            QueueRole::Transfer => self.v_families.transfer,
            QueueRole::Compute => self.v_families.compute,
        }
    }

    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.v_inst
                .get_physical_device_format_properties(self.v_pdev, format)
                .optimal_tiling_features
        }
    }

    fn device_wait_idle(&self) -> Result<()> {
        Ok(unsafe { self.v_dev.device_wait_idle()? })
    }

    fn queue_wait_idle(&self, role: QueueRole) -> Result<()> {
        Ok(unsafe { self.v_dev.queue_wait_idle(self.queue(role))? })
    }

    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> Result<vk::Buffer> {
        // Buffers are written on the transfer queue and read on the
        // graphics queue
        let families = [self.v_families.graphics, self.v_families.transfer];
        let mut info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        info = match families[0] == families[1] {
            true => info.sharing_mode(vk::SharingMode::EXCLUSIVE),
            false => info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families),
        };

        Ok(unsafe { self.v_dev.create_buffer(&info, None)? })
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.v_dev.get_buffer_memory_requirements(buffer) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.v_dev.destroy_buffer(buffer, None) }
    }

    fn allocate_memory(&self, size: u64, type_index: u32) -> Result<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(type_index);
        Ok(unsafe { self.v_dev.allocate_memory(&info, None)? })
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.v_dev.free_memory(memory, None) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        Ok(unsafe { self.v_dev.bind_buffer_memory(buffer, memory, 0)? })
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: u64, data: &[u8]) -> Result<()> {
        unsafe {
            let ptr = self.v_dev.map_memory(
                memory,
                offset,
                data.len() as u64,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
            self.v_dev.unmap_memory(memory);
        }
        Ok(())
    }

    fn create_image(&self, info: &ImageInfo) -> Result<vk::Image> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(info.format)
            .extent(vk::Extent3D {
                width: info.extent.width,
                height: info.extent.height,
                depth: 1,
            })
            .mip_levels(info.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        Ok(unsafe {
            self.v_dev
                .create_image(&create_info, None)
                .or(Err(SquallError::COULD_NOT_CREATE_IMAGE))?
        })
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.v_dev.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> Result<()> {
        Ok(unsafe { self.v_dev.bind_image_memory(image, memory, 0)? })
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.v_dev.destroy_image(image, None) }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        Ok(unsafe { self.v_dev.create_image_view(&info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.v_dev.destroy_image_view(view, None) }
    }

    fn create_sampler(&self, info: &SamplerInfo) -> Result<vk::Sampler> {
        // Unnormalized coordinates restrict what the sampler may do
        let (address, max_lod, mip_mode) = match info.unnormalized {
            true => (
                vk::SamplerAddressMode::CLAMP_TO_EDGE,
                0.0,
                vk::SamplerMipmapMode::NEAREST,
            ),
            false => (
                vk::SamplerAddressMode::REPEAT,
                info.mip_levels as f32,
                vk::SamplerMipmapMode::LINEAR,
            ),
        };

        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(info.filter)
            .min_filter(info.filter)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(info.unnormalized)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(mip_mode)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(max_lod);

        Ok(unsafe { self.v_dev.create_sampler(&create_info, None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.v_dev.destroy_sampler(sampler, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        Ok(unsafe { self.v_dev.create_shader_module(&info, None)? })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.v_dev.destroy_shader_module(module, None) }
    }

    /// Descriptor layouts specify the number and characteristics
    /// of descriptor sets which will be made available to the
    /// pipeline through the pipeline layout.
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.kind.as_vk())
                    .stage_flags(b.stages)
                    .descriptor_count(1)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);

        Ok(unsafe { self.v_dev.create_descriptor_set_layout(&info, None)? })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.v_dev.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(sizes)
            // we want to be able to free descriptor sets individually
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets);

        Ok(unsafe { self.v_dev.create_descriptor_pool(&info, None)? })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.v_dev.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.v_dev.allocate_descriptor_sets(&info)? };
        sets.into_iter().nth(0).ok_or(SquallError::INVALID)
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> Result<()> {
        Ok(unsafe { self.v_dev.free_descriptor_sets(pool, &[set])? })
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        // The info structs have to stay put while the writes point at them
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        for w in writes.iter() {
            match w {
                DescriptorWrite::Buffer { buffer, range, .. } => {
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::builder()
                            .buffer(*buffer)
                            .offset(0)
                            .range(*range)
                            .build(),
                    );
                }
                DescriptorWrite::Image { view, sampler, .. } => {
                    image_infos.push(
                        vk::DescriptorImageInfo::builder()
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                            .image_view(*view)
                            .sampler(*sampler)
                            .build(),
                    );
                }
            }
        }

        let mut next_buffer = 0;
        let mut next_image = 0;
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|w| match w {
                DescriptorWrite::Buffer { binding, .. } => {
                    let info = &buffer_infos[next_buffer..next_buffer + 1];
                    next_buffer += 1;
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(*binding)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(info)
                        .build()
                }
                DescriptorWrite::Image { binding, .. } => {
                    let info = &image_infos[next_image..next_image + 1];
                    next_image += 1;
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(*binding)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(info)
                        .build()
                }
            })
            .collect();

        unsafe { self.v_dev.update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        Ok(unsafe { self.v_dev.create_pipeline_layout(&info, None)? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.v_dev.destroy_pipeline_layout(layout, None) }
    }

    /// This roughly follows the "fixed function" part of the
    /// vulkan tutorial. Viewport and scissor are dynamic so the
    /// pipeline survives resizes and splitscreen.
    fn create_graphics_pipeline(&self, info: &PipelineInfo) -> Result<vk::Pipeline> {
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = info
            .stages
            .iter()
            .map(|s| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(s.stage)
                    .module(s.module)
                    .name(&s.entry)
                    .build()
            })
            .collect();

        // This binds our vertex input to binding 0
        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: info.vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        // These describe how the shader should parse the data passed
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = info
            .attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                binding: 0,
                location: a.location,
                format: a.format,
                offset: a.offset,
            })
            .collect();
        let vertex_info = match info.vertex_stride {
            0 => vk::PipelineVertexInputStateCreateInfo::builder(),
            _ => vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&vertex_bindings)
                .vertex_attribute_descriptions(&vertex_attributes),
        };

        // input assembly describes how to turn the vertex
        // and index buffers into primatives
        let assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(info.raster.topology);

        let viewport_info = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let raster_info = vk::PipelineRasterizationStateCreateInfo::builder()
            .front_face(info.raster.front_face)
            .line_width(1.0)
            .polygon_mode(info.raster.polygon_mode)
            .cull_mode(info.raster.cull_mode);

        let multisample_info = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let stencil_state = vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            ..Default::default()
        };
        let depth_info = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(info.has_depth && info.raster.depth_test)
            .depth_write_enable(info.has_depth && info.raster.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .front(stencil_state)
            .back(stencil_state)
            .max_depth_bounds(1.0);

        let blend_attachment_states = [vk::PipelineColorBlendAttachmentState {
            blend_enable: info.raster.blend as vk::Bool32,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }];
        let blend_info = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op(vk::LogicOp::CLEAR)
            .attachments(&blend_attachment_states);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_info)
            .input_assembly_state(&assembly)
            .viewport_state(&viewport_info)
            .rasterization_state(&raster_info)
            .multisample_state(&multisample_info)
            .color_blend_state(&blend_info)
            .dynamic_state(&dynamic_info)
            .layout(info.layout)
            .render_pass(info.render_pass);
        if info.has_depth {
            pipeline_info = pipeline_info.depth_stencil_state(&depth_info);
        }

        let pipelines = unsafe {
            self.v_dev
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, e)| {
                    log::error!("vkCreateGraphicsPipelines failed: {:?}", e);
                    SquallError::COULD_NOT_CREATE_PIPELINE
                })?
        };
        pipelines
            .into_iter()
            .nth(0)
            .ok_or(SquallError::COULD_NOT_CREATE_PIPELINE)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.v_dev.destroy_pipeline(pipeline, None) }
    }

    /// Create a single subpass render pass
    ///
    /// The color attachment always ends up ready to present. If it is
    /// loaded, it is coming from an earlier pass that already left it in
    /// that layout.
    fn create_render_pass(&self, info: &RenderPassInfo) -> Result<vk::RenderPass> {
        let mut attachments = vec![vk::AttachmentDescription {
            format: info.color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: load_op(info.load),
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: match info.load {
                LoadOp::Clear => vk::ImageLayout::UNDEFINED,
                LoadOp::Load => vk::ImageLayout::PRESENT_SRC_KHR,
            },
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }];
        if let Some(depth_format) = info.depth_format {
            attachments.push(vk::AttachmentDescription {
                format: depth_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
        }

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::builder()
            .color_attachments(&color_refs)
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS);
        if info.depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        // Wait for whoever wrote the attachments before us
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_stage_mask: stages,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        }];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        Ok(unsafe { self.v_dev.create_render_pass(&create_info, None)? })
    }

    fn destroy_render_pass(&self, pass: vk::RenderPass) {
        unsafe { self.v_dev.destroy_render_pass(pass, None) }
    }

    fn create_framebuffer(
        &self,
        pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        Ok(unsafe { self.v_dev.create_framebuffer(&info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.v_dev.destroy_framebuffer(framebuffer, None) }
    }

    /// Command buffers from these pools can be individually reset
    fn create_command_pool(&self, role: QueueRole) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.queue_family(role));

        Ok(unsafe { self.v_dev.create_command_pool(&info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.v_dev.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(1)
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        let cbufs = unsafe { self.v_dev.allocate_command_buffers(&info)? };
        cbufs.into_iter().nth(0).ok_or(SquallError::INVALID)
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, cbuf: vk::CommandBuffer) {
        unsafe { self.v_dev.free_command_buffers(pool, &[cbuf]) }
    }

    fn reset_command_buffer(&self, cbuf: vk::CommandBuffer) -> Result<()> {
        Ok(unsafe {
            self.v_dev
                .reset_command_buffer(cbuf, vk::CommandBufferResetFlags::RELEASE_RESOURCES)?
        })
    }

    fn begin_command_buffer(&self, cbuf: vk::CommandBuffer, one_time: bool) -> Result<()> {
        let flags = match one_time {
            true => vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            false => vk::CommandBufferUsageFlags::empty(),
        };
        let info = vk::CommandBufferBeginInfo::builder().flags(flags);

        Ok(unsafe { self.v_dev.begin_command_buffer(cbuf, &info)? })
    }

    fn end_command_buffer(&self, cbuf: vk::CommandBuffer) -> Result<()> {
        Ok(unsafe { self.v_dev.end_command_buffer(cbuf)? })
    }

    fn cmd(&self, cbuf: vk::CommandBuffer, cmd: &Command) {
        let dev = &self.v_dev;
        unsafe {
            match cmd {
                Command::BeginRenderPass {
                    pass,
                    framebuffer,
                    extent,
                    clear_color,
                    clear_depth,
                } => {
                    // Clear values are indexed by attachment, so the color
                    // slot is filled even when it is loaded
                    let mut clears = vec![vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_color.unwrap_or([0.0; 4]),
                        },
                    }];
                    if let Some(depth) = clear_depth {
                        clears.push(vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: *depth,
                                stencil: 0,
                            },
                        });
                    }

                    let info = vk::RenderPassBeginInfo::builder()
                        .render_pass(*pass)
                        .framebuffer(*framebuffer)
                        .render_area(vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent: *extent,
                        })
                        .clear_values(&clears);
                    dev.cmd_begin_render_pass(cbuf, &info, vk::SubpassContents::INLINE);
                }
                Command::EndRenderPass => dev.cmd_end_render_pass(cbuf),
                Command::SetViewport(rect) => {
                    let viewport = vk::Viewport {
                        x: rect.r_pos.0,
                        y: rect.r_pos.1,
                        width: rect.r_size.0,
                        height: rect.r_size.1,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };
                    dev.cmd_set_viewport(cbuf, 0, &[viewport]);
                }
                Command::SetScissor(extent) => {
                    let scissor = vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: *extent,
                    };
                    dev.cmd_set_scissor(cbuf, 0, &[scissor]);
                }
                Command::BindPipeline(pipeline) => {
                    dev.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, *pipeline)
                }
                Command::BindDescriptorSet { layout, set } => dev.cmd_bind_descriptor_sets(
                    cbuf,
                    vk::PipelineBindPoint::GRAPHICS,
                    *layout,
                    0,
                    &[*set],
                    &[],
                ),
                Command::BindVertexBuffer(buffer) => {
                    dev.cmd_bind_vertex_buffers(cbuf, 0, &[*buffer], &[0])
                }
                Command::BindIndexBuffer(buffer) => {
                    dev.cmd_bind_index_buffer(cbuf, *buffer, 0, vk::IndexType::UINT32)
                }
                Command::DrawIndexed { index_count } => {
                    dev.cmd_draw_indexed(cbuf, *index_count, 1, 0, 0, 0)
                }
                Command::CopyBuffer { src, dst, size } => {
                    let region = vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: *size,
                    };
                    dev.cmd_copy_buffer(cbuf, *src, *dst, &[region]);
                }
                Command::CopyBufferToImage { src, dst, extent } => {
                    let region = vk::BufferImageCopy::builder()
                        .buffer_offset(0)
                        // 0 means tightly packed
                        .buffer_row_length(0)
                        .buffer_image_height(0)
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                        .image_extent(vk::Extent3D {
                            width: extent.width,
                            height: extent.height,
                            depth: 1,
                        })
                        .build();
                    dev.cmd_copy_buffer_to_image(
                        cbuf,
                        *src,
                        *dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                Command::ImageBarrier(b) => {
                    let barrier = vk::ImageMemoryBarrier::builder()
                        .old_layout(b.old_layout)
                        .new_layout(b.new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(b.image)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: b.aspect,
                            base_mip_level: b.base_mip,
                            level_count: b.mip_count,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .src_access_mask(b.src_access)
                        .dst_access_mask(b.dst_access)
                        .build();
                    dev.cmd_pipeline_barrier(
                        cbuf,
                        b.src_stage,
                        b.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
                Command::BlitMip {
                    image,
                    src_mip,
                    src_extent,
                } => {
                    let corner = |e: &vk::Extent2D| vk::Offset3D {
                        x: e.width as i32,
                        y: e.height as i32,
                        z: 1,
                    };
                    let dst_extent = vk::Extent2D {
                        width: std::cmp::max(src_extent.width / 2, 1),
                        height: std::cmp::max(src_extent.height / 2, 1),
                    };
                    let layers = |mip| vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: mip,
                        base_array_layer: 0,
                        layer_count: 1,
                    };

                    let blit = vk::ImageBlit {
                        src_subresource: layers(*src_mip),
                        src_offsets: [vk::Offset3D::default(), corner(src_extent)],
                        dst_subresource: layers(*src_mip + 1),
                        dst_offsets: [vk::Offset3D::default(), corner(&dst_extent)],
                    };
                    dev.cmd_blit_image(
                        cbuf,
                        *image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        *image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );
                }
            }
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = match signaled {
            true => vk::FenceCreateFlags::SIGNALED,
            false => vk::FenceCreateFlags::empty(),
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.v_dev.create_fence(&info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.v_dev.destroy_fence(fence, None) }
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        Ok(unsafe { self.v_dev.wait_for_fences(&[fence], true, timeout_ns)? })
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        Ok(unsafe { self.v_dev.reset_fences(&[fence])? })
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        Ok(unsafe { self.v_dev.get_fence_status(fence)? })
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.v_dev.create_semaphore(&info, None)? })
    }

    fn destroy_semaphore(&self, sema: vk::Semaphore) {
        unsafe { self.v_dev.destroy_semaphore(sema, None) }
    }

    fn queue_submit(&self, role: QueueRole, submit: &Submission) -> Result<()> {
        let cbufs = [submit.cbuf];
        let info = vk::SubmitInfo::builder()
            .wait_semaphores(submit.wait)
            .wait_dst_stage_mask(submit.wait_stages)
            .command_buffers(&cbufs)
            .signal_semaphores(submit.signal)
            .build();

        Ok(unsafe {
            self.v_dev
                .queue_submit(self.queue(role), &[info], submit.fence)?
        })
    }

    fn surface_info(&self) -> Result<SurfaceInfo> {
        unsafe {
            Ok(SurfaceInfo {
                caps: self
                    .v_surface_loader
                    .get_physical_device_surface_capabilities(self.v_pdev, self.v_surface)?,
                formats: self
                    .v_surface_loader
                    .get_physical_device_surface_formats(self.v_pdev, self.v_surface)?,
                present_modes: self
                    .v_surface_loader
                    .get_physical_device_surface_present_modes(self.v_pdev, self.v_surface)?,
            })
        }
    }

    fn drawable_extent(&self) -> Option<vk::Extent2D> {
        self.v_window.drawable_extent()
    }

    fn create_swapchain(
        &self,
        info: &SwapchainInfo,
        old: vk::SwapchainKHR,
    ) -> Result<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.v_surface)
            .min_image_count(info.image_count)
            .image_color_space(info.surface_format.color_space)
            .image_format(info.surface_format.format)
            .image_extent(info.extent)
            // the color attachment is guaranteed to be available
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(info.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(info.present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old);

        Ok(unsafe {
            self.v_swapchain_loader
                .create_swapchain(&create_info, None)?
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.v_swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        Ok(unsafe { self.v_swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<u32> {
        // Block until an image is free. Implementations may still come back
        // early without one, in which case we try once more before giving up.
        for _ in 0..2 {
            let ret = unsafe {
                self.v_swapchain_loader.acquire_next_image(
                    swapchain,
                    u64::MAX,
                    signal,
                    vk::Fence::null(),
                )
            };

            match ret {
                // A suboptimal image can still be drawn to, the resize
                // will be picked up at present time
                Ok((index, _suboptimal)) => return Ok(index),
                Err(vk::Result::NOT_READY) | Err(vk::Result::TIMEOUT) => {
                    log::debug!("vkAcquireNextImageKHR returned without an image");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SquallError::TIMEOUT)
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        index: u32,
        wait: &[vk::Semaphore],
    ) -> Result<()> {
        let swapchains = [swapchain];
        let indices = [index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe {
            self.v_swapchain_loader
                .queue_present(self.queue(QueueRole::Present), &info)
        } {
            Ok(false) => Ok(()),
            // suboptimal
            Ok(true) => Err(SquallError::OUT_OF_DATE),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.v_dev.device_wait_idle() {
                log::error!("Could not idle device during teardown: {:?}", e);
            }
            self.v_dev.destroy_device(None);
            self.v_surface_loader.destroy_surface(self.v_surface, None);
            if let Some((loader, callback)) = self.v_debug.take() {
                loader.destroy_debug_utils_messenger(callback, None);
            }
            self.v_inst.destroy_instance(None);
        }
    }
}
