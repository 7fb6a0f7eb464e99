//! # Squall
//!
//! Squall is the GPU half of Monsoon. It owns the Vulkan device, the
//! swapchain, the 3D and 2D render passes and the per-frame submission
//! chain, along with the GPU resources (meshes, buffers, textures and
//! shaders) that get drawn.
//!
//! The pieces, leaves first:
//! * `Device` - queues, memory type selection, buffer/image allocation
//! * `ExecBuffer` - a command buffer + fence with an explicit state machine
//! * `Swapchain` - presentable images, recreated in place on resize
//! * `RenderPass` - one pass type parameterized by `PassCaps`
//! * `Renderer` - records and submits both passes and presents
//! * `Shader` - pipeline state and per-object descriptor sets
//!
//! All GPU access goes through the `Backend` trait so that the whole
//! stack can run headless for testing.

// Austin Shafer - 2020
#![allow(non_camel_case_types)]

extern crate ash;
extern crate bitflags;
#[macro_use]
extern crate memoffset;
extern crate serde;
extern crate utils as monsoon_utils;

pub mod backend;
mod descpool;
pub mod device;
pub mod execbuf;
pub mod pass;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod swapchain;
pub mod vertex;
pub mod window;

#[cfg(test)]
mod tests;

pub use backend::{Backend, Command, HeadlessBackend, QueueRole, ResourceKind, VkBackend};
pub use descpool::Descriptor;
pub use device::Device;
pub use execbuf::{ExecBuffer, ExecState};
pub use pass::{LoadOp, PassCaps, PassKind, RenderPass};
pub use pipeline::{
    DescriptorBinding, DescriptorKind, RasterState, Shader, ShaderDesc, ShaderStage,
    VertexAttribute,
};
pub use renderer::{DrawItem, Quadrant, Renderer};
pub use resources::{Binding, BoundResource, Buffer, Mesh, Object, Texture, TextureDesc};
pub use swapchain::Swapchain;
pub use vertex::{Vertex2D, Vertex3D};
pub use window::{RawWindow, WindowSurface};

pub use ash::vk;
pub use monsoon_utils::region::Rect;

use monsoon_utils::log;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Eq, PartialEq, Clone, Copy)]
pub enum SquallError {
    #[error("Operation failed")]
    INVALID,
    #[error("Invalid or unsupported format")]
    INVALID_FORMAT,
    #[error("Invalid create info: {0}")]
    INVALID_CREATE_INFO(&'static str),
    #[error("Resource bound to binding {0} does not match the shader's layout")]
    INVALID_BINDING(u32),
    #[error("Invalid handle: {0}")]
    INVALID_HANDLE(#[from] granizo::RegistryError),
    #[error("ExecBuffer cannot {op} while {state:?}")]
    INVALID_STATE { op: &'static str, state: ExecState },
    #[error("Operation not allowed: {0}")]
    INVALID_OPERATION(&'static str),
    #[error("Resource is still referenced by a live object")]
    RESOURCE_IN_USE,
    #[error("Capacity of {0} exceeded")]
    CAPACITY_EXCEEDED(u32),
    #[error("Could not load the Vulkan library")]
    COULD_NOT_LOAD_VULKAN,
    #[error("Vulkan device does not support the required extensions")]
    VK_NOT_ALL_EXTENSIONS_AVAILABLE,
    #[error("Vulkan surface does not support this device")]
    VK_SURF_NOT_SUPPORTED,
    #[error("No suitable Vulkan physical device")]
    NO_SUITABLE_DEVICE,
    #[error("No memory type fits the request")]
    NO_SUITABLE_MEMORY_TYPE,
    #[error("Could not create the swapchain")]
    COULD_NOT_CREATE_SWAPCHAIN,
    #[error("Could not create image")]
    COULD_NOT_CREATE_IMAGE,
    #[error("Could not create pipeline")]
    COULD_NOT_CREATE_PIPELINE,
    #[error("Could not acquire the next swapchain image")]
    COULD_NOT_ACQUIRE_NEXT_IMAGE,
    #[error("The swapchain is out of date and must be recreated")]
    OUT_OF_DATE,
    #[error("Presentation failed")]
    PRESENT_FAILED,
    #[error("Out of memory")]
    OUT_OF_MEMORY,
    #[error("Timed out waiting for the GPU")]
    TIMEOUT,
    #[error("The Vulkan device was lost")]
    DEVICE_LOST,
    #[error("Vulkan error {0:?}")]
    VK_ERROR(vk::Result),
}

impl From<vk::Result> for SquallError {
    fn from(res: vk::Result) -> Self {
        match res {
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
                SquallError::OUT_OF_DATE
            }
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                SquallError::OUT_OF_MEMORY
            }
            vk::Result::ERROR_DEVICE_LOST => SquallError::DEVICE_LOST,
            vk::Result::TIMEOUT => SquallError::TIMEOUT,
            other => SquallError::VK_ERROR(other),
        }
    }
}

impl SquallError {
    /// Errors after which the device can't be used anymore
    pub fn is_fatal(&self) -> bool {
        match self {
            SquallError::DEVICE_LOST | SquallError::TIMEOUT | SquallError::OUT_OF_MEMORY => true,
            SquallError::VK_ERROR(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SquallError>;

/// How frames are handed to the display
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentMode {
    /// Vsync, always available
    Fifo,
    /// Triple buffering, falls back to FIFO if unsupported
    Mailbox,
    /// No vsync, falls back to FIFO if unsupported
    Immediate,
}

impl PresentMode {
    pub fn as_vk(&self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fifo" => Some(PresentMode::Fifo),
            "mailbox" => Some(PresentMode::Mailbox),
            "immediate" => Some(PresentMode::Immediate),
            _ => None,
        }
    }
}

/// User tunable renderer settings
///
/// These can be deserialized from an application's config file. Any
/// missing field takes its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub enable_3d: bool,
    pub enable_2d: bool,
    pub splitscreen: bool,
    pub present_mode: PresentMode,
    pub clear_color: [f32; 4],
    /// How long a fence wait may take before the GPU is considered hung
    pub fence_timeout_ns: u64,
    /// Enable the Khronos validation layer
    pub validation: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enable_3d: true,
            enable_2d: true,
            splitscreen: false,
            present_mode: PresentMode::Mailbox,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout_ns: 5_000_000_000,
            validation: cfg!(debug_assertions),
        }
    }
}

impl RenderSettings {
    /// Apply `MONSOON_PRESENT_MODE` and `MONSOON_VALIDATION` if set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("MONSOON_PRESENT_MODE") {
            match PresentMode::from_name(&name) {
                Some(mode) => self.present_mode = mode,
                None => log::warn!("Ignoring unknown MONSOON_PRESENT_MODE {:?}", name),
            }
        }

        if let Ok(val) = std::env::var("MONSOON_VALIDATION") {
            self.validation = val != "0";
        }
    }
}

/// What we are drawing to
pub enum SurfaceType {
    /// No display. Frames are recorded but go nowhere, used for testing.
    Headless { width: u32, height: u32 },
    /// A window provided by the window system collaborator
    Window(Box<dyn WindowSurface>),
}

/// Parameters for Renderer creation.
pub struct CreateInfo {
    pub surface_type: SurfaceType,
    pub settings: RenderSettings,
}

impl CreateInfo {
    pub fn builder() -> CreateInfoBuilder {
        CreateInfoBuilder {
            ci: CreateInfo {
                surface_type: SurfaceType::Headless {
                    width: 640,
                    height: 480,
                },
                settings: RenderSettings::default(),
            },
        }
    }
}

/// Implements the builder pattern for easier squall creation
pub struct CreateInfoBuilder {
    ci: CreateInfo,
}

impl CreateInfoBuilder {
    pub fn surface_type(mut self, ty: SurfaceType) -> Self {
        self.ci.surface_type = ty;
        self
    }

    pub fn settings(mut self, settings: RenderSettings) -> Self {
        self.ci.settings = settings;
        self
    }

    pub fn enable_3d(mut self, enable: bool) -> Self {
        self.ci.settings.enable_3d = enable;
        self
    }

    pub fn enable_2d(mut self, enable: bool) -> Self {
        self.ci.settings.enable_2d = enable;
        self
    }

    pub fn splitscreen(mut self, enable: bool) -> Self {
        self.ci.settings.splitscreen = enable;
        self
    }

    pub fn present_mode(mut self, mode: PresentMode) -> Self {
        self.ci.settings.present_mode = mode;
        self
    }

    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.ci.settings.clear_color = color;
        self
    }

    pub fn validation(mut self, enable: bool) -> Self {
        self.ci.settings.validation = enable;
        self
    }

    pub fn build(self) -> CreateInfo {
        self.ci
    }
}
