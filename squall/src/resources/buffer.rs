// Uniform buffers
//
// Austin Shafer - 2024

use ash::vk;

use crate::device::Device;
use crate::{Result, SquallError};
use monsoon_utils::log;

use std::sync::Arc;

/// A device local uniform buffer
///
/// GPU memory is not allocated until the buffer is first written or
/// bound to an object.
pub struct Buffer {
    b_dev: Arc<Device>,
    b_size: u64,
    b_storage: Option<(vk::Buffer, vk::DeviceMemory)>,
}

impl Buffer {
    pub fn new(dev: Arc<Device>, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(SquallError::INVALID_CREATE_INFO("zero sized buffer"));
        }

        Ok(Self {
            b_dev: dev,
            b_size: size,
            b_storage: None,
        })
    }

    /// Give this buffer GPU memory if it doesn't have any yet
    pub fn ensure_backed(&mut self) -> Result<()> {
        if self.b_storage.is_none() {
            self.b_storage = Some(self.b_dev.create_buffer_with_size(
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                self.b_size,
            )?);
        }
        Ok(())
    }

    /// Replace the start of the buffer with `data`
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.b_size {
            log::error!(
                "Tried to write {} bytes into a buffer of {} bytes",
                data.len(),
                self.b_size
            );
            return Err(SquallError::INVALID_OPERATION("write larger than the buffer"));
        }

        self.ensure_backed()?;
        self.b_dev.upload_buffer(self.handle(), data)
    }

    pub fn size(&self) -> u64 {
        self.b_size
    }

    pub fn is_backed(&self) -> bool {
        self.b_storage.is_some()
    }

    /// The Vulkan buffer, null until the buffer is backed
    pub fn handle(&self) -> vk::Buffer {
        match self.b_storage {
            Some((buf, _)) => buf,
            None => vk::Buffer::null(),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some((buf, mem)) = self.b_storage.take() {
            self.b_dev.destroy_buffer(buf, mem);
        }
    }
}
