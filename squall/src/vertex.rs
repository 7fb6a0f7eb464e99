// Stock vertex layouts
//
// Shaders can use any layout they like, these just cover the common
// cases.
//
// Austin Shafer - 2024

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::pipeline::VertexAttribute;

/// Contains a vertex and all its related data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex2D {
    pub pos: [f32; 2],
    pub tex: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex3D {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub tex: [f32; 2],
}

impl Vertex2D {
    pub fn stride() -> u32 {
        std::mem::size_of::<Self>() as u32
    }

    pub fn attributes() -> Vec<VertexAttribute> {
        vec![
            VertexAttribute {
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex2D, pos) as u32,
            },
            VertexAttribute {
                location: 1,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex2D, tex) as u32,
            },
        ]
    }
}

impl Vertex3D {
    pub fn stride() -> u32 {
        std::mem::size_of::<Self>() as u32
    }

    pub fn attributes() -> Vec<VertexAttribute> {
        vec![
            VertexAttribute {
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex3D, pos) as u32,
            },
            VertexAttribute {
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex3D, normal) as u32,
            },
            VertexAttribute {
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex3D, tex) as u32,
            },
        ]
    }
}

/// View a slice of vertices as the bytes Mesh takes
pub fn as_bytes<T: Pod>(verts: &[T]) -> &[u8] {
    bytemuck::cast_slice(verts)
}
