// Vertex and index data
//
// Austin Shafer - 2024

use ash::vk;

use crate::device::Device;
use crate::{Result, SquallError};
use monsoon_utils::log;

use std::sync::Arc;

/// Indexed geometry in device local memory
pub struct Mesh {
    m_dev: Arc<Device>,
    m_vbuf: vk::Buffer,
    m_vbuf_mem: vk::DeviceMemory,
    m_ibuf: vk::Buffer,
    m_ibuf_mem: vk::DeviceMemory,
    m_vertex_bytes: usize,
    m_vertex_count: u32,
    m_index_count: u32,
}

fn validate(vertices: &[u8], vertex_count: u32, indices: &[u32]) -> Result<()> {
    if vertex_count == 0 || vertices.len() == 0 || indices.len() == 0 {
        return Err(SquallError::INVALID_CREATE_INFO("empty mesh"));
    }
    if vertices.len() % vertex_count as usize != 0 {
        return Err(SquallError::INVALID_CREATE_INFO(
            "vertex data is not a whole number of vertices",
        ));
    }
    if let Some(bad) = indices.iter().find(|i| **i >= vertex_count) {
        log::error!("Index {} is out of range for {} vertices", bad, vertex_count);
        return Err(SquallError::INVALID_CREATE_INFO("index out of range"));
    }
    Ok(())
}

fn index_bytes(indices: &[u32]) -> &[u8] {
    bytemuck::cast_slice(indices)
}

impl Mesh {
    /// Upload a mesh
    ///
    /// `vertices` holds `vertex_count` tightly packed vertices in whatever
    /// layout the shader expects. Every index must name one of them.
    pub fn new(
        dev: Arc<Device>,
        vertices: &[u8],
        vertex_count: u32,
        indices: &[u32],
    ) -> Result<Self> {
        validate(vertices, vertex_count, indices)?;

        let (vbuf, vbuf_mem) =
            dev.create_device_local_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, vertices)?;
        let (ibuf, ibuf_mem) = match dev
            .create_device_local_buffer(vk::BufferUsageFlags::INDEX_BUFFER, index_bytes(indices))
        {
            Ok(pair) => pair,
            Err(e) => {
                dev.destroy_buffer(vbuf, vbuf_mem);
                return Err(e);
            }
        };

        Ok(Self {
            m_dev: dev,
            m_vbuf: vbuf,
            m_vbuf_mem: vbuf_mem,
            m_ibuf: ibuf,
            m_ibuf_mem: ibuf_mem,
            m_vertex_bytes: vertices.len(),
            m_vertex_count: vertex_count,
            m_index_count: indices.len() as u32,
        })
    }

    /// Replace the mesh contents
    ///
    /// If the sizes are unchanged the existing buffers are rewritten in
    /// place. Otherwise new buffers are made and `true` is returned, since
    /// anything that recorded the old buffers has to be recorded again.
    pub fn update(&mut self, vertices: &[u8], vertex_count: u32, indices: &[u32]) -> Result<bool> {
        validate(vertices, vertex_count, indices)?;

        if vertices.len() == self.m_vertex_bytes && indices.len() as u32 == self.m_index_count {
            self.m_dev.upload_buffer(self.m_vbuf, vertices)?;
            self.m_dev.upload_buffer(self.m_ibuf, index_bytes(indices))?;
            self.m_vertex_count = vertex_count;
            return Ok(false);
        }

        // Build the replacement first so a failure leaves us untouched
        let new = Mesh::new(self.m_dev.clone(), vertices, vertex_count, indices)?;
        self.m_dev.queue_wait_idle(crate::QueueRole::Graphics)?;
        *self = new;
        Ok(true)
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.m_vbuf
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.m_ibuf
    }

    pub fn vertex_count(&self) -> u32 {
        self.m_vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.m_index_count
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.m_dev.destroy_buffer(self.m_vbuf, self.m_vbuf_mem);
        self.m_dev.destroy_buffer(self.m_ibuf, self.m_ibuf_mem);
    }
}
