// Projection and view matrices
//
// These follow the Vulkan clip space convention, where depth runs from 0
// at the near plane to 1 at the far plane. Matrices are column major, like
// the ones shaders expect in uniform buffers.
//
// Austin Shafer - 2024

use cgmath::{InnerSpace, Matrix4, Point3, Rad, Vector3};

/// Orthographic projection looking down +z
pub fn ortho_lh(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Matrix4<f32> {
    let w = right - left;
    let h = top - bottom;
    let d = far - near;

    #[rustfmt::skip]
    let ret = Matrix4::new(
        2.0 / w,                0.0,                    0.0,          0.0,
        0.0,                    2.0 / h,                0.0,          0.0,
        0.0,                    0.0,                    1.0 / d,      0.0,
        -(right + left) / w,    -(top + bottom) / h,    -near / d,    1.0,
    );
    ret
}

/// Orthographic projection looking down -z
pub fn ortho_rh(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Matrix4<f32> {
    let mut ret = ortho_lh(left, right, bottom, top, near, far);
    ret.z.z = -ret.z.z;
    ret
}

/// Perspective projection looking down +z
///
/// `fovy` is the full vertical field of view.
pub fn perspective_lh(fovy: Rad<f32>, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let f = 1.0 / (fovy.0 / 2.0).tan();
    let d = far - near;

    #[rustfmt::skip]
    let ret = Matrix4::new(
        f / aspect,   0.0,   0.0,                   0.0,
        0.0,          f,     0.0,                   0.0,
        0.0,          0.0,   far / d,               1.0,
        0.0,          0.0,   -(far * near) / d,     0.0,
    );
    ret
}

/// Perspective projection looking down -z
pub fn perspective_rh(fovy: Rad<f32>, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let mut ret = perspective_lh(fovy, aspect, near, far);
    ret.z.z = -ret.z.z;
    ret.z.w = -1.0;
    ret
}

fn view(side: Vector3<f32>, up: Vector3<f32>, forward: Vector3<f32>, eye: Point3<f32>) -> Matrix4<f32> {
    let eye = Vector3::new(eye.x, eye.y, eye.z);

    #[rustfmt::skip]
    let ret = Matrix4::new(
        side.x,             up.x,             forward.x,             0.0,
        side.y,             up.y,             forward.y,             0.0,
        side.z,             up.z,             forward.z,             0.0,
        -side.dot(eye),     -up.dot(eye),     -forward.dot(eye),     1.0,
    );
    ret
}

/// View matrix for a camera at `eye` looking at `center`, with +z forward
pub fn look_at_lh(eye: Point3<f32>, center: Point3<f32>, up: Vector3<f32>) -> Matrix4<f32> {
    let f = (center - eye).normalize();
    let s = up.cross(f).normalize();
    let u = f.cross(s);
    view(s, u, f, eye)
}

/// View matrix for a camera at `eye` looking at `center`, with -z forward
pub fn look_at_rh(eye: Point3<f32>, center: Point3<f32>, up: Vector3<f32>) -> Matrix4<f32> {
    let f = (center - eye).normalize();
    let s = f.cross(up).normalize();
    let u = s.cross(f);
    view(s, u, -f, eye)
}
