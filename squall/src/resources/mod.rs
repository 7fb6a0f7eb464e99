// GPU resources that the user creates and hands out handles to
//
// Austin Shafer - 2024

mod buffer;
mod mesh;
mod object;
mod texture;

pub use buffer::Buffer;
pub use mesh::Mesh;
pub use object::Object;
pub use texture::{mip_levels_for, Texture, TextureDesc};

use granizo::Handle;

/// The resource an object's binding points at
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoundResource {
    Buffer(Handle<Buffer>),
    Texture(Handle<Texture>),
}

/// Attach a resource to one binding of a shader's descriptor set
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Binding {
    pub binding: u32,
    pub resource: BoundResource,
}

impl Binding {
    pub fn buffer(binding: u32, buffer: Handle<Buffer>) -> Self {
        Self {
            binding: binding,
            resource: BoundResource::Buffer(buffer),
        }
    }

    pub fn texture(binding: u32, texture: Handle<Texture>) -> Self {
        Self {
            binding: binding,
            resource: BoundResource::Texture(texture),
        }
    }
}
