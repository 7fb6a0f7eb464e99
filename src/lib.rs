//! # Monsoon
//!
//! Monsoon is a small Vulkan renderer. Applications hand it meshes,
//! buffers, textures and shaders, tie them together as objects, and
//! call `draw` once per frame. Everything the user creates is referred
//! to by a generation checked `Handle`, so a handle that outlives its
//! resource is caught instead of touching freed GPU memory.
//!
//! Frames are drawn in two passes which can be toggled independently:
//! * `Opaque3D` - depth tested geometry, cleared every frame
//! * `Overlay2D` - drawn on top of the 3D output, or cleared if there is none
//!
//! ```no_run
//! use monsoon::*;
//!
//! let info = CreateInfo::builder()
//!     .surface_type(SurfaceType::Headless {
//!         width: 640,
//!         height: 480,
//!     })
//!     .build();
//! let mut mon = Monsoon::new(info).unwrap();
//!
//! // upload a quad and draw it with a shader from disk
//! # let (vertex_bytes, shader_desc): (Vec<u8>, ShaderDesc) = unimplemented!();
//! let mesh = mon.create_mesh(&vertex_bytes, 4, &[0, 1, 2, 2, 3, 0]).unwrap();
//! let shader = mon.create_shader(&shader_desc).unwrap();
//! let _obj = mon
//!     .create_object(shader, mesh, &[], Quadrant::empty())
//!     .unwrap();
//!
//! loop {
//!     mon.draw().unwrap();
//! }
//! ```

// Austin Shafer - 2024
extern crate cgmath;
extern crate granizo;
extern crate squall;
extern crate utils as monsoon_utils;

pub mod camera;
#[cfg(test)]
mod tests;

pub use granizo::Handle;
pub use squall::*;

use cgmath::{Matrix4, Rad};
use monsoon_utils::{log, PixelData};

use granizo::Registry;
use std::sync::Arc;

/// Used when neither the caller nor the window system has a size for us
const DEFAULT_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 640,
    height: 480,
};

/// The renderer and every resource created through it
pub struct Monsoon {
    // Objects hold descriptor sets from their shaders' pools, keep them first
    m_objects: Registry<Object>,
    m_shaders: Registry<Shader>,
    m_meshes: Registry<Mesh>,
    m_buffers: Registry<Buffer>,
    m_textures: Registry<Texture>,
    m_rend: Renderer,
    m_dev: Arc<Device>,
    /// The recorded draw items no longer match the object set
    m_dirty: bool,
    m_settings: RenderSettings,
}

impl Monsoon {
    /// Create a renderer for the surface in `info`
    ///
    /// This installs the logger and applies the environment overrides
    /// (`MONSOON_PRESENT_MODE`, `MONSOON_VALIDATION`) to the settings.
    pub fn new(info: CreateInfo) -> Result<Self> {
        monsoon_utils::logging::init();

        let CreateInfo {
            surface_type,
            mut settings,
        } = info;
        settings.apply_env_overrides();

        let back = backend::create(surface_type, &settings)?;
        Self::with_backend(back, settings)
    }

    /// Create a renderer on top of an existing backend
    pub fn with_backend(back: Arc<dyn Backend>, settings: RenderSettings) -> Result<Self> {
        let dev = Device::new(back, &settings)?;
        let extent = dev.backend().drawable_extent().unwrap_or(DEFAULT_EXTENT);

        let mut rend = Renderer::new(
            dev.clone(),
            extent,
            settings.present_mode,
            settings.clear_color,
            settings.splitscreen,
        )?;
        if settings.enable_3d {
            rend.create_3d()?;
        }
        if settings.enable_2d {
            rend.create_2d()?;
        }

        log::info!(
            "Monsoon started at {}x{} (3D: {}, 2D: {})",
            rend.extent().width,
            rend.extent().height,
            settings.enable_3d,
            settings.enable_2d
        );

        Ok(Self {
            m_objects: Registry::new(),
            m_shaders: Registry::new(),
            m_meshes: Registry::new(),
            m_buffers: Registry::new(),
            m_textures: Registry::new(),
            m_rend: rend,
            m_dev: dev,
            m_dirty: false,
            m_settings: settings,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.m_dev
    }

    pub fn renderer(&self) -> &Renderer {
        &self.m_rend
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.m_settings
    }

    // ---------------- creation ----------------

    /// Upload a mesh
    ///
    /// `vertices` holds `vertex_count` packed vertices in whatever layout
    /// the shaders drawing this mesh expect.
    pub fn create_mesh(
        &mut self,
        vertices: &[u8],
        vertex_count: u32,
        indices: &[u32],
    ) -> Result<Handle<Mesh>> {
        let dev = self.m_dev.clone();
        self.m_meshes
            .try_insert(|| Mesh::new(dev, vertices, vertex_count, indices))
            .map_err(|e| {
                log::error!("Could not create mesh: {}", e);
                e
            })
    }

    /// Create a uniform buffer of `size` bytes
    ///
    /// Storage is allocated on the first update or when the buffer is first
    /// bound to an object.
    pub fn create_buffer(&mut self, size: u64) -> Result<Handle<Buffer>> {
        let dev = self.m_dev.clone();
        self.m_buffers
            .try_insert(|| Buffer::new(dev, size))
            .map_err(|e| {
                log::error!("Could not create buffer: {}", e);
                e
            })
    }

    pub fn create_texture(
        &mut self,
        pixels: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
        mipmapping: bool,
        unnormalized: bool,
    ) -> Result<Handle<Texture>> {
        let desc = TextureDesc {
            extent: extent,
            format: format,
            mipmapping: mipmapping,
            unnormalized: unnormalized,
        };
        let dev = self.m_dev.clone();
        self.m_textures
            .try_insert(|| Texture::new(dev, pixels, &desc))
            .map_err(|e| {
                log::error!("Could not create texture: {}", e);
                e
            })
    }

    /// Create a normalized texture from a decoded image
    pub fn create_texture_from_pixels(
        &mut self,
        pixels: &PixelData,
        format: vk::Format,
        mipmapping: bool,
    ) -> Result<Handle<Texture>> {
        let extent = vk::Extent2D {
            width: pixels.width as u32,
            height: pixels.height as u32,
        };
        self.create_texture(pixels.as_slice(), extent, format, mipmapping, false)
    }

    /// Build a pipeline for the pass named in `desc`
    ///
    /// The pass does not need to exist yet. Shaders stay valid across
    /// resizes and pass toggles.
    pub fn create_shader(&mut self, desc: &ShaderDesc) -> Result<Handle<Shader>> {
        let info = self.m_rend.pass_info(desc.pass);
        let dev = self.m_dev.clone();
        self.m_shaders
            .try_insert(|| Shader::new(dev, desc, &info))
            .map_err(|e| {
                log::error!("Could not create shader: {}", e);
                e
            })
    }

    /// Draw `mesh` with `shader`, reading `bindings` from its descriptor set
    ///
    /// Fails with `CAPACITY_EXCEEDED` once the shader already has
    /// `max_objects` live objects.
    pub fn create_object(
        &mut self,
        shader: Handle<Shader>,
        mesh: Handle<Mesh>,
        bindings: &[Binding],
        quadrant: Quadrant,
    ) -> Result<Handle<Object>> {
        self.m_meshes.get(mesh).map_err(|e| {
            log::error!("Could not create object: bad mesh handle: {}", e);
            e
        })?;
        let sh = self.m_shaders.get(shader).map_err(|e| {
            log::error!("Could not create object: bad shader handle: {}", e);
            e
        })?;

        let desc = sh.create_descriptor_set()?;
        sh.update_descriptor_set(&desc, bindings, &self.m_textures, &mut self.m_buffers)?;

        let ret = self
            .m_objects
            .insert(Object::new(shader, mesh, desc, bindings, quadrant));
        self.m_dirty = true;
        Ok(ret)
    }

    // ---------------- updates ----------------

    pub fn update_buffer(&mut self, handle: Handle<Buffer>, data: &[u8]) -> Result<()> {
        self.m_buffers.get_mut(handle)?.update(data)
    }

    /// Replace the contents of a mesh
    ///
    /// If the new data does not fit the old allocation the mesh gets new
    /// buffers and the draw commands are recorded again.
    pub fn update_mesh(
        &mut self,
        handle: Handle<Mesh>,
        vertices: &[u8],
        vertex_count: u32,
        indices: &[u32],
    ) -> Result<()> {
        let realloc = self
            .m_meshes
            .get_mut(handle)?
            .update(vertices, vertex_count, indices)?;

        if realloc {
            // the recorded commands point at the old buffers
            self.flush()?;
        }
        Ok(())
    }

    pub fn set_object_visible(&mut self, handle: Handle<Object>, visible: bool) -> Result<()> {
        let obj = self.m_objects.get_mut(handle)?;
        if obj.visible() != visible {
            obj.set_visible(visible);
            self.m_dirty = true;
        }
        Ok(())
    }

    // ---------------- release ----------------

    /// Wait for the GPU to stop using everything we have submitted
    fn idle(&mut self) -> Result<()> {
        self.m_rend.wait_till_idle()?;
        self.m_dev.wait_idle()
    }

    pub fn release_object(&mut self, handle: &mut Handle<Object>) -> Result<()> {
        if handle.is_null() {
            log::warn!("Ignoring release of a null object handle");
            return Ok(());
        }
        self.m_objects.get(*handle)?;

        self.idle()?;
        // dropping the object returns its descriptor set to the pool
        self.m_objects.remove(handle.take())?;
        self.flush()
    }

    pub fn release_mesh(&mut self, handle: &mut Handle<Mesh>) -> Result<()> {
        if handle.is_null() {
            log::warn!("Ignoring release of a null mesh handle");
            return Ok(());
        }
        self.m_meshes.get(*handle)?;

        let h = *handle;
        if self.m_objects.iter().any(|(_, o)| o.mesh() == h) {
            log::error!("Cannot release a mesh that live objects are drawing");
            return Err(SquallError::RESOURCE_IN_USE);
        }

        self.idle()?;
        self.m_meshes.remove(handle.take())?;
        Ok(())
    }

    pub fn release_shader(&mut self, handle: &mut Handle<Shader>) -> Result<()> {
        if handle.is_null() {
            log::warn!("Ignoring release of a null shader handle");
            return Ok(());
        }
        self.m_shaders.get(*handle)?;

        let h = *handle;
        if self.m_objects.iter().any(|(_, o)| o.shader() == h) {
            log::error!("Cannot release a shader that live objects are drawn with");
            return Err(SquallError::RESOURCE_IN_USE);
        }

        self.idle()?;
        self.m_shaders.remove(handle.take())?;
        Ok(())
    }

    pub fn release_texture(&mut self, handle: &mut Handle<Texture>) -> Result<()> {
        if handle.is_null() {
            log::warn!("Ignoring release of a null texture handle");
            return Ok(());
        }
        self.m_textures.get(*handle)?;

        let bound = BoundResource::Texture(*handle);
        if self.m_objects.iter().any(|(_, o)| o.references(&bound)) {
            log::error!("Cannot release a texture bound to a live object");
            return Err(SquallError::RESOURCE_IN_USE);
        }

        self.idle()?;
        self.m_textures.remove(handle.take())?;
        Ok(())
    }

    pub fn release_buffer(&mut self, handle: &mut Handle<Buffer>) -> Result<()> {
        if handle.is_null() {
            log::warn!("Ignoring release of a null buffer handle");
            return Ok(());
        }
        self.m_buffers.get(*handle)?;

        let bound = BoundResource::Buffer(*handle);
        if self.m_objects.iter().any(|(_, o)| o.references(&bound)) {
            log::error!("Cannot release a buffer bound to a live object");
            return Err(SquallError::RESOURCE_IN_USE);
        }

        self.idle()?;
        self.m_buffers.remove(handle.take())?;
        Ok(())
    }

    // ---------------- drawing ----------------

    /// The draw list for every visible object
    fn draw_items(&self) -> Vec<DrawItem> {
        self.m_objects
            .iter()
            .filter(|(_, obj)| obj.visible())
            .filter_map(|(_, obj)| {
                // live objects pin their shader and mesh, so these lookups
                // only miss if the registries are corrupt
                let shader = self.m_shaders.get(obj.shader()).ok()?;
                let mesh = self.m_meshes.get(obj.mesh()).ok()?;

                Some(DrawItem {
                    pass: shader.pass(),
                    pipeline: shader.pipeline(),
                    layout: shader.layout(),
                    set: obj.descriptor().set(),
                    vertex_buffer: mesh.vertex_buffer(),
                    index_buffer: mesh.index_buffer(),
                    index_count: mesh.index_count(),
                    quadrant: obj.quadrant(),
                })
            })
            .collect()
    }

    /// Record the current object set into every pass
    fn flush(&mut self) -> Result<()> {
        let items = self.draw_items();
        self.m_rend.record_draw_commands(items.as_slice())?;
        self.m_dirty = false;
        Ok(())
    }

    /// Draw and present one frame
    ///
    /// If the swapchain turns out to be out of date it is rebuilt at the
    /// window's current size and this frame is dropped.
    pub fn draw(&mut self) -> Result<()> {
        if self.m_dirty {
            self.flush()?;
        }

        match self.m_rend.draw() {
            Err(SquallError::OUT_OF_DATE) => {
                let extent = self
                    .m_dev
                    .backend()
                    .drawable_extent()
                    .unwrap_or(self.m_rend.extent());
                log::debug!(
                    "Swapchain out of date, skipping frame and resizing to {}x{}",
                    extent.width,
                    extent.height
                );
                self.resize(extent.width, extent.height)
            }
            res => res,
        }
    }

    /// Rebuild the swapchain and passes at a new size
    ///
    /// A zero sized window (minimized) is ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }

        let items = self.draw_items();
        self.m_rend.resize(
            vk::Extent2D {
                width: width,
                height: height,
            },
            items.as_slice(),
        )?;
        self.m_dirty = false;
        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.m_rend.extent()
    }

    pub fn wait_till_idle(&mut self) -> Result<()> {
        self.idle()
    }

    // ---------------- pass toggles ----------------

    /// Turn the 3D pass on or off
    pub fn enable_3d(&mut self, enable: bool) -> Result<()> {
        if enable == self.m_rend.is_created_3d() {
            return Ok(());
        }

        if enable {
            // the 2D pass has to be rebuilt on top of the 3D pass
            let had_2d = self.m_rend.is_created_2d();
            self.m_rend.destroy_2d()?;
            self.m_rend.create_3d()?;
            if had_2d {
                self.m_rend.create_2d()?;
            }
        } else {
            self.m_rend.destroy_3d()?;
        }
        self.m_settings.enable_3d = enable;
        self.flush()
    }

    /// Turn the 2D pass on or off
    pub fn enable_2d(&mut self, enable: bool) -> Result<()> {
        if enable == self.m_rend.is_created_2d() {
            return Ok(());
        }

        match enable {
            true => self.m_rend.create_2d()?,
            false => self.m_rend.destroy_2d()?,
        }
        self.m_settings.enable_2d = enable;
        self.flush()
    }

    pub fn set_splitscreen(&mut self, enable: bool) -> Result<()> {
        self.m_rend.set_splitscreen(enable);
        self.m_settings.splitscreen = enable;
        self.flush()
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) -> Result<()> {
        self.m_rend.set_clear_color(color);
        self.m_settings.clear_color = color;
        self.flush()
    }

    // ---------------- lookups ----------------

    pub fn shader(&self, handle: Handle<Shader>) -> Result<&Shader> {
        Ok(self.m_shaders.get(handle)?)
    }

    pub fn mesh(&self, handle: Handle<Mesh>) -> Result<&Mesh> {
        Ok(self.m_meshes.get(handle)?)
    }

    pub fn object(&self, handle: Handle<Object>) -> Result<&Object> {
        Ok(self.m_objects.get(handle)?)
    }

    pub fn object_count(&self) -> usize {
        self.m_objects.len()
    }

    // ---------------- camera ----------------

    fn aspect(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height as f32
    }

    /// Orthographic projection with one unit per pixel, origin at the top left
    pub fn ortho_lh(&self, near: f32, far: f32) -> Matrix4<f32> {
        let extent = self.extent();
        camera::ortho_lh(
            0.0,
            extent.width as f32,
            0.0,
            extent.height as f32,
            near,
            far,
        )
    }

    /// Orthographic projection with one unit per pixel, origin at the top left
    pub fn ortho_rh(&self, near: f32, far: f32) -> Matrix4<f32> {
        let extent = self.extent();
        camera::ortho_rh(
            0.0,
            extent.width as f32,
            0.0,
            extent.height as f32,
            near,
            far,
        )
    }

    /// Perspective projection matching the aspect ratio of the swapchain
    pub fn perspective_lh(&self, fovy: Rad<f32>, near: f32, far: f32) -> Matrix4<f32> {
        camera::perspective_lh(fovy, self.aspect(), near, far)
    }

    pub fn perspective_rh(&self, fovy: Rad<f32>, near: f32, far: f32) -> Matrix4<f32> {
        camera::perspective_rh(fovy, self.aspect(), near, far)
    }

    pub fn look_at_lh(
        &self,
        eye: cgmath::Point3<f32>,
        center: cgmath::Point3<f32>,
        up: cgmath::Vector3<f32>,
    ) -> Matrix4<f32> {
        camera::look_at_lh(eye, center, up)
    }

    pub fn look_at_rh(
        &self,
        eye: cgmath::Point3<f32>,
        center: cgmath::Point3<f32>,
        up: cgmath::Vector3<f32>,
    ) -> Matrix4<f32> {
        camera::look_at_rh(eye, center, up)
    }
}

impl Drop for Monsoon {
    fn drop(&mut self) {
        if let Err(e) = self.idle() {
            log::error!("Could not idle the GPU while shutting down: {}", e);
        }

        self.m_objects.clear();
        self.m_shaders.clear();
        self.m_meshes.clear();
        self.m_buffers.clear();
        self.m_textures.clear();
    }
}
