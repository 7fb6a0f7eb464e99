// Sampled images
//
// Austin Shafer - 2024

use ash::vk;

use crate::backend::SamplerInfo;
use crate::device::Device;
use crate::{Result, SquallError};
use monsoon_utils::log;

use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    /// Generate a full mip chain from the pixels
    pub mipmapping: bool,
    /// Sample with texel coordinates instead of [0, 1). Such samplers can't
    /// use mipmaps, so this wins over `mipmapping`.
    pub unnormalized: bool,
}

/// Bytes per texel of the formats we know how to upload
fn format_size(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8_UNORM => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Number of levels in a full mip chain for `extent`
pub fn mip_levels_for(extent: vk::Extent2D) -> u32 {
    let largest = std::cmp::max(extent.width, extent.height);
    32 - largest.leading_zeros()
}

pub struct Texture {
    t_dev: Arc<Device>,
    t_image: vk::Image,
    t_view: vk::ImageView,
    t_mem: vk::DeviceMemory,
    t_sampler: vk::Sampler,
    t_desc: TextureDesc,
    t_mip_levels: u32,
}

impl Texture {
    /// Create a texture and fill it with `pixels`
    ///
    /// `pixels` must hold exactly width * height texels of `desc.format`.
    pub fn new(dev: Arc<Device>, pixels: &[u8], desc: &TextureDesc) -> Result<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(SquallError::INVALID_CREATE_INFO("zero sized texture"));
        }

        let texel_size = format_size(desc.format).ok_or_else(|| {
            log::error!("Unsupported texture format {:?}", desc.format);
            SquallError::INVALID_FORMAT
        })?;
        let expected = desc.extent.width as usize * desc.extent.height as usize * texel_size;
        if pixels.len() != expected {
            log::error!(
                "Texture of {:?} needs {} bytes but was given {}",
                desc.extent,
                expected,
                pixels.len()
            );
            return Err(SquallError::INVALID_CREATE_INFO("pixel buffer does not match extent"));
        }

        if !dev.supports_format(desc.format, vk::FormatFeatureFlags::SAMPLED_IMAGE) {
            log::error!("Format {:?} can't be sampled on this device", desc.format);
            return Err(SquallError::INVALID_FORMAT);
        }

        if desc.mipmapping && desc.unnormalized {
            log::warn!("Ignoring mipmapping for a texture with unnormalized coordinates");
        }
        let mip_levels = match desc.mipmapping && !desc.unnormalized {
            true => mip_levels_for(desc.extent),
            false => 1,
        };

        // Generating mips needs linear blits
        if mip_levels > 1
            && !dev.supports_format(
                desc.format,
                vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                    | vk::FormatFeatureFlags::BLIT_SRC
                    | vk::FormatFeatureFlags::BLIT_DST,
            )
        {
            log::error!("Format {:?} does not support linear blits for mipmapping", desc.format);
            return Err(SquallError::INVALID_FORMAT);
        }

        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let (image, view, mem) = dev.create_image(
            desc.extent,
            desc.format,
            usage,
            vk::ImageAspectFlags::COLOR,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            mip_levels,
        )?;

        let sampler = dev
            .upload_image(image, desc.extent, mip_levels, pixels)
            .and_then(|_| {
                dev.create_sampler(&SamplerInfo {
                    filter: vk::Filter::LINEAR,
                    mip_levels: mip_levels,
                    unnormalized: desc.unnormalized,
                })
            });
        let sampler = match sampler {
            Ok(s) => s,
            Err(e) => {
                dev.destroy_image(image, view, mem);
                return Err(e);
            }
        };

        Ok(Self {
            t_dev: dev,
            t_image: image,
            t_view: view,
            t_mem: mem,
            t_sampler: sampler,
            t_desc: *desc,
            t_mip_levels: mip_levels,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.t_view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.t_sampler
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.t_desc.extent
    }

    pub fn format(&self) -> vk::Format {
        self.t_desc.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.t_mip_levels
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.t_dev.backend().destroy_sampler(self.t_sampler);
        self.t_dev.destroy_image(self.t_image, self.t_view, self.t_mem);
    }
}
