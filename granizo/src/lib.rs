//! Granizo - A dense resource registry that hands out typed handles.
//!
//! Every resource kind in a renderer (meshes, buffers, textures, shaders,
//! drawable objects) follows the same lifecycle: it is created, the caller
//! gets back an opaque handle, the handle is used to look the resource up a
//! number of times, and finally it is released. Granizo stores the live
//! resources in one contiguous `Vec` so that walking all of them (for example
//! to record draw commands) is a plain slice iteration in creation order.
//!
//! Handles are `{ id, generation }` pairs. The id names an indirection cell
//! which tracks where in the dense storage the resource currently lives.
//! Releasing a resource shifts every later resource down by one and the cells
//! are renumbered to match, so handles held by the application never have to
//! be touched. The generation is bumped on release, which lets stale copies of
//! a released handle be rejected in O(1).
//!
//! Basic usage looks like:
//! ```
//! use granizo as gr;
//! let mut reg = gr::Registry::new();
//! let a = reg.insert("Hola");
//! let b = reg.insert("Granizo");
//!
//! assert_eq!(*reg.get(b).unwrap(), "Granizo");
//! reg.remove(a).unwrap();
//!
//! // b moved from dense index 1 to 0, but the handle is unchanged
//! assert_eq!(reg.index_of(b).unwrap(), 0);
//! assert!(reg.get(a).is_err());
//! ```
// Austin Shafer - 2022

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

#[cfg(test)]
mod tests;

/// The raw id reserved for the null handle
const NULL_ID: u32 = u32::MAX;

#[derive(thiserror::Error, Debug, Eq, PartialEq, Clone, Copy)]
pub enum RegistryError {
    #[error("Null handle passed to the registry")]
    NullHandle,
    #[error("Handle {id} is stale (generation {found}, current {current})")]
    StaleHandle { id: u32, found: u32, current: u32 },
    #[error("Handle {id} is out of range for a registry with {cells} ids")]
    OutOfRange { id: u32, cells: usize },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// An opaque reference to a resource stored in a `Registry<T>`
///
/// Handles are plain values: copying one does not keep the resource alive.
/// The type parameter only exists so that a mesh handle can't be handed to
/// the texture registry.
pub struct Handle<T> {
    h_id: u32,
    h_gen: u32,
    h_marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The null sentinel. Every registry rejects it.
    pub fn null() -> Self {
        Self {
            h_id: NULL_ID,
            h_gen: 0,
            h_marker: PhantomData,
        }
    }

    fn new(id: u32, gen: u32) -> Self {
        Self {
            h_id: id,
            h_gen: gen,
            h_marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.h_id == NULL_ID
    }

    /// Get the id backing this handle
    ///
    /// Ids are recycled once released, so this is only unique among the
    /// currently live handles.
    pub fn get_raw_id(&self) -> u32 {
        self.h_id
    }

    pub fn generation(&self) -> u32 {
        self.h_gen
    }

    /// Replace this handle with the null sentinel, returning the old value
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::null())
    }
}

// These are implemented by hand since derive would require T to implement
// them as well.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.h_id == other.h_id && self.h_gen == other.h_gen
    }
}
impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.h_id.hash(state);
        self.h_gen.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Handle(null)");
        }
        f.debug_struct("Handle")
            .field("id", &self.h_id)
            .field("gen", &self.h_gen)
            .finish()
    }
}

/// One indirection cell
///
/// There is one of these per id ever issued. While the id is live
/// `c_index` holds the position of its resource in the dense arrays.
#[derive(Debug, Clone, Copy)]
struct Cell {
    c_index: Option<usize>,
    c_gen: u32,
}

/// The registry itself
///
/// `r_slots` and `r_handles` are always the same length and index aligned:
/// `r_handles[i]` is the handle that names `r_slots[i]`.
pub struct Registry<T> {
    r_slots: Vec<T>,
    r_handles: Vec<Handle<T>>,
    r_cells: Vec<Cell>,
    /// Released ids waiting to be handed out again
    r_free_ids: Vec<u32>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            r_slots: Vec::new(),
            r_handles: Vec::new(),
            r_cells: Vec::new(),
            r_free_ids: Vec::new(),
        }
    }

    /// Get an id for a new resource, recycling a released one if possible
    fn alloc_id(&mut self) -> u32 {
        if let Some(id) = self.r_free_ids.pop() {
            return id;
        }

        let id = self.r_cells.len() as u32;
        assert!(id != NULL_ID, "Registry ran out of ids");
        self.r_cells.push(Cell {
            c_index: None,
            c_gen: 0,
        });
        id
    }

    /// Add a resource to the end of the dense pool
    pub fn insert(&mut self, val: T) -> Handle<T> {
        let id = self.alloc_id();
        let cell = &mut self.r_cells[id as usize];
        cell.c_index = Some(self.r_slots.len());
        let handle = Handle::new(id, cell.c_gen);

        self.r_slots.push(val);
        self.r_handles.push(handle);
        handle
    }

    /// Construct a resource and add it
    ///
    /// The constructor is called before anything is appended, so a failed
    /// construction leaves the registry exactly as it was.
    pub fn try_insert<E, F>(&mut self, ctor: F) -> std::result::Result<Handle<T>, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let val = ctor()?;
        Ok(self.insert(val))
    }

    /// Resolve a handle to its cell, validating it on the way
    fn cell(&self, handle: Handle<T>) -> Result<&Cell> {
        if handle.is_null() {
            return Err(RegistryError::NullHandle);
        }

        let cell = self
            .r_cells
            .get(handle.h_id as usize)
            .ok_or(RegistryError::OutOfRange {
                id: handle.h_id,
                cells: self.r_cells.len(),
            })?;

        if cell.c_gen != handle.h_gen || cell.c_index.is_none() {
            return Err(RegistryError::StaleHandle {
                id: handle.h_id,
                found: handle.h_gen,
                current: cell.c_gen,
            });
        }

        Ok(cell)
    }

    /// Get the current position of this handle's resource in the dense pool
    pub fn index_of(&self, handle: Handle<T>) -> Result<usize> {
        let index = self.cell(handle)?.c_index.ok_or(RegistryError::NullHandle)?;
        // The cell table and the dense arrays disagreeing is a bug in
        // the registry itself, not in the caller.
        debug_assert!(index < self.r_slots.len());
        Ok(index)
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.cell(handle).is_ok()
    }

    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        let index = self.index_of(handle)?;
        Ok(&self.r_slots[index])
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        let index = self.index_of(handle)?;
        Ok(&mut self.r_slots[index])
    }

    /// Remove a resource, returning it to the caller
    ///
    /// Every resource after it moves down one spot, keeping creation order
    /// intact. Their cells are renumbered so outstanding handles stay valid,
    /// and this handle's generation is bumped so it is rejected from now on.
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T> {
        let index = self.index_of(handle)?;

        let val = self.r_slots.remove(index);
        let removed = self.r_handles.remove(index);
        debug_assert!(removed == handle);

        for later in self.r_handles[index..].iter() {
            let cell = &mut self.r_cells[later.h_id as usize];
            cell.c_index = cell.c_index.map(|i| i - 1);
        }

        let cell = &mut self.r_cells[handle.h_id as usize];
        cell.c_index = None;
        cell.c_gen = cell.c_gen.wrapping_add(1);
        self.r_free_ids.push(handle.h_id);

        Ok(val)
    }

    /// Remove every resource, newest first
    pub fn clear(&mut self) {
        while let Some(handle) = self.r_handles.last().copied() {
            // Can't fail, the handle came from our own table
            let _ = self.remove(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.r_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r_slots.is_empty()
    }

    /// The issued handles in dense order
    pub fn handles(&self) -> &[Handle<T>] {
        self.r_handles.as_slice()
    }

    /// The live resources in dense order
    pub fn slots(&self) -> &[T] {
        self.r_slots.as_slice()
    }

    /// Iterate over (handle, resource) pairs in dense order
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.r_handles.iter().copied().zip(self.r_slots.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.r_handles.iter().copied().zip(self.r_slots.iter_mut())
    }

    /// Verify that the dense arrays and the cell table agree
    ///
    /// This walks every live handle, so it is meant for tests and debug
    /// checks rather than the hot path.
    pub fn is_consistent(&self) -> bool {
        if self.r_slots.len() != self.r_handles.len() {
            return false;
        }

        let live_cells = self
            .r_cells
            .iter()
            .filter(|c| c.c_index.is_some())
            .count();
        if live_cells != self.r_handles.len() {
            return false;
        }

        self.r_handles
            .iter()
            .enumerate()
            .all(|(i, h)| match self.r_cells.get(h.h_id as usize) {
                Some(cell) => cell.c_index == Some(i) && cell.c_gen == h.h_gen,
                None => false,
            })
    }
}

impl<T: fmt::Debug> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
