/*
 * A bounded allocator of per-object descriptor sets
 *
 * Each Shader owns one of these, sized for its maxObjects.
 *
 * Austin Shafer - 2020
 */

use ash::vk;

use crate::device::Device;
use crate::{Result, SquallError};
use monsoon_utils::log;

use std::sync::{Arc, Mutex};

/// Single descriptor
///
/// This tracks the lifetime of one object's descriptor set. When this
/// is dropped the set will be freed and returned to the pool.
pub struct Descriptor {
    /// The owning pool
    d_pool: Arc<Mutex<DescPool>>,
    /// The descriptor set itself. Null if the shader has no bindings.
    pub(crate) d_set: vk::DescriptorSet,
}

impl Descriptor {
    pub fn set(&self) -> vk::DescriptorSet {
        self.d_set
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        self.d_pool.lock().unwrap().free_set(self.d_set);
    }
}

/// A fixed size pool of descriptor sets sharing one layout
pub struct DescPool {
    dp_dev: Arc<Device>,
    /// Null if the layout has no bindings
    dp_pool: vk::DescriptorPool,
    dp_layout: vk::DescriptorSetLayout,
    /// number of live allocations made from this pool, from 0 to dp_max
    dp_capacity: u32,
    dp_max: u32,
}

impl DescPool {
    /// Create a pool that can hand out `max_sets` sets of `layout`
    ///
    /// `sizes` holds the descriptor count of each type for a single set.
    /// If it is empty no Vulkan pool is made, but allocations are still
    /// counted against `max_sets`.
    pub fn new(
        dev: Arc<Device>,
        layout: vk::DescriptorSetLayout,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<Self> {
        let pool = match sizes.len() {
            0 => vk::DescriptorPool::null(),
            _ => {
                let total: Vec<vk::DescriptorPoolSize> = sizes
                    .iter()
                    .map(|s| vk::DescriptorPoolSize {
                        ty: s.ty,
                        descriptor_count: s.descriptor_count * max_sets,
                    })
                    .collect();
                dev.backend()
                    .create_descriptor_pool(total.as_slice(), max_sets)?
            }
        };

        Ok(Self {
            dp_dev: dev,
            dp_pool: pool,
            dp_layout: layout,
            dp_capacity: 0,
            dp_max: max_sets,
        })
    }

    /// Allocate one Descriptor
    ///
    /// Fails with CAPACITY_EXCEEDED once `max_sets` are live.
    pub fn alloc_descriptor(pool: &Arc<Mutex<DescPool>>) -> Result<Descriptor> {
        let mut internal = pool.lock().unwrap();

        if internal.dp_capacity >= internal.dp_max {
            log::error!(
                "Descriptor pool is full: {} of {} sets in use",
                internal.dp_capacity,
                internal.dp_max
            );
            return Err(SquallError::CAPACITY_EXCEEDED(internal.dp_max));
        }

        let set = match internal.dp_pool {
            p if p == vk::DescriptorPool::null() => vk::DescriptorSet::null(),
            p => internal
                .dp_dev
                .backend()
                .allocate_descriptor_set(p, internal.dp_layout)?,
        };

        internal.dp_capacity += 1;

        Ok(Descriptor {
            d_pool: pool.clone(),
            d_set: set,
        })
    }

    /// Free one set in this pool
    ///
    /// This frees the set object, and decrements the tracker of sets
    /// allocated from this pool
    fn free_set(&mut self, set: vk::DescriptorSet) {
        if set != vk::DescriptorSet::null() {
            if let Err(e) = self.dp_dev.backend().free_descriptor_set(self.dp_pool, set) {
                log::error!("Could not free descriptor set: {}", e);
            }
        }
        self.dp_capacity -= 1;
    }

    pub fn live_count(&self) -> u32 {
        self.dp_capacity
    }

    pub fn max_sets(&self) -> u32 {
        self.dp_max
    }
}

impl Drop for DescPool {
    fn drop(&mut self) {
        if self.dp_pool != vk::DescriptorPool::null() {
            self.dp_dev.backend().destroy_descriptor_pool(self.dp_pool);
        }
    }
}
