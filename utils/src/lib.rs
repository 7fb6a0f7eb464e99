// A set of helper structs for common operations
//
// Austin Shafer - 2020
pub mod log;
pub mod logging;
pub mod region;
pub mod spirv;

#[cfg(test)]
mod tests;

use std::ops::Deref;

extern crate anyhow;
pub use anyhow::{anyhow, Context, Error, Result};

// Represents a region of memory containing a decoded image
//
// This is what the asset loaders hand us: tightly packed pixels
// with the dimensions and channel count needed to upload them.
#[derive(Debug, Clone)]
pub struct PixelData {
    pd_data: Vec<u8>,
    // size of the pixel elements, in bytes
    pub element_size: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelData {
    /// Wrap decoded pixels
    ///
    /// Returns an error if `data` does not hold exactly
    /// `width * height * element_size` bytes.
    pub fn new(data: Vec<u8>, element_size: usize, width: usize, height: usize) -> Result<Self> {
        let expected = width * height * element_size;
        if data.len() != expected {
            return Err(anyhow!(
                "Pixel buffer is {} bytes but a {}x{} image with {} byte pixels needs {}",
                data.len(),
                width,
                height,
                element_size,
                expected
            ));
        }

        Ok(Self {
            pd_data: data,
            element_size: element_size,
            width: width,
            height: height,
        })
    }

    /// An image where every pixel is `pixel`
    pub fn solid(pixel: &[u8], width: usize, height: usize) -> Self {
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(pixel.len() * width * height)
            .collect();

        Self {
            pd_data: data,
            element_size: pixel.len(),
            width: width,
            height: height,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.pd_data.as_slice()
    }

    /// Performs a simple checksum of adding all the pixels
    /// up in a gigantic int. Not perfect but should work for
    /// comparisons.
    pub fn checksum(&self) -> usize {
        self.pd_data.iter().map(|b| *b as usize).sum()
    }
}

impl Deref for PixelData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Helper to perform max on PartialOrd types
///
/// We are using PartialOrd so that size and offset can handle
/// floating point types that do not support Ord
pub fn partial_max<T: PartialOrd>(a: T, b: T) -> T {
    if a >= b {
        return a;
    } else {
        return b;
    }
}

/// Helper to perform min on PartialOrd types
pub fn partial_min<T: PartialOrd>(a: T, b: T) -> T {
    if a <= b {
        return a;
    } else {
        return b;
    }
}
