// Loading compiled shader blobs
//
// Shaders are compiled ahead of time, all we do here is get the
// SPIR-V words off disk and sanity check them.
//
// Austin Shafer - 2020
use crate::{anyhow, Context, Result};
use std::path::Path;

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Turn a byte blob into SPIR-V words
///
/// The module may have been written with either endianness, we use the
/// magic number to tell which.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(anyhow!(
            "SPIR-V blob is {} bytes, which is not a multiple of 4",
            bytes.len()
        ));
    }

    let mut words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    match words.first() {
        Some(&SPIRV_MAGIC) => {}
        Some(w) if w.swap_bytes() == SPIRV_MAGIC => {
            for w in words.iter_mut() {
                *w = w.swap_bytes();
            }
        }
        Some(w) => return Err(anyhow!("Bad SPIR-V magic number {:#x}", w)),
        None => return Err(anyhow!("SPIR-V blob is empty")),
    }

    Ok(words)
}

/// Read a compiled `.spv` file
pub fn read_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Could not read shader {}", path.display()))?;

    words_from_bytes(&bytes).with_context(|| format!("Invalid shader {}", path.display()))
}
