// Something that gets drawn
//
// Austin Shafer - 2024

use granizo::Handle;

use super::{Binding, Mesh};
use crate::descpool::Descriptor;
use crate::pipeline::Shader;
use crate::renderer::Quadrant;

/// A mesh drawn with a shader
///
/// The object owns its descriptor set, which goes back to the shader's
/// pool when the object is dropped.
pub struct Object {
    o_shader: Handle<Shader>,
    o_mesh: Handle<Mesh>,
    o_desc: Descriptor,
    o_bindings: Vec<Binding>,
    o_quadrant: Quadrant,
    o_visible: bool,
}

impl Object {
    pub fn new(
        shader: Handle<Shader>,
        mesh: Handle<Mesh>,
        desc: Descriptor,
        bindings: &[Binding],
        quadrant: Quadrant,
    ) -> Self {
        Self {
            o_shader: shader,
            o_mesh: mesh,
            o_desc: desc,
            o_bindings: bindings.to_vec(),
            o_quadrant: quadrant,
            o_visible: true,
        }
    }

    pub fn shader(&self) -> Handle<Shader> {
        self.o_shader
    }

    pub fn mesh(&self) -> Handle<Mesh> {
        self.o_mesh
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.o_desc
    }

    pub fn bindings(&self) -> &[Binding] {
        self.o_bindings.as_slice()
    }

    /// Does this object read from `other` through any binding
    pub fn references(&self, other: &super::BoundResource) -> bool {
        self.o_bindings.iter().any(|b| b.resource == *other)
    }

    pub fn quadrant(&self) -> Quadrant {
        self.o_quadrant
    }

    pub fn visible(&self) -> bool {
        self.o_visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.o_visible = visible;
    }
}
