use crate::*;
use cgmath::{Point3, Rad, Vector3, Vector4};
use monsoon_utils::PixelData;
use std::sync::Arc;

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

fn spirv() -> Vec<u32> {
    vec![0x0723_0203, 0x0001_0000, 0, 1, 0]
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: width,
        height: height,
    }
}

fn vert(x: f32, y: f32) -> Vertex2D {
    Vertex2D {
        pos: [x, y],
        tex: [x, y],
    }
}

fn quad_bytes() -> Vec<u8> {
    let verts = [
        vert(0.0, 0.0),
        vert(1.0, 0.0),
        vert(1.0, 1.0),
        vert(0.0, 1.0),
    ];
    vertex::as_bytes(&verts).to_vec()
}

fn shader_desc(pass: PassKind, bindings: Vec<DescriptorBinding>, max_objects: u32) -> ShaderDesc {
    ShaderDesc {
        stages: vec![ShaderStage::vertex(spirv()), ShaderStage::fragment(spirv())],
        pass: pass,
        vertex_stride: Vertex2D::stride(),
        attributes: Vertex2D::attributes(),
        bindings: bindings,
        max_objects: max_objects,
        raster: RasterState::overlay(),
    }
}

fn monsoon(width: u32, height: u32) -> (Arc<HeadlessBackend>, Monsoon) {
    monsoon_utils::logging::init_for_tests();

    let back = Arc::new(HeadlessBackend::new(extent(width, height)));
    let settings = RenderSettings {
        present_mode: PresentMode::Fifo,
        validation: false,
        ..RenderSettings::default()
    };
    let mon = Monsoon::with_backend(back.clone(), settings).unwrap();
    (back, mon)
}

/// A quad drawn by a 2D shader without descriptors
fn quad_object(mon: &mut Monsoon, quadrant: Quadrant) -> Handle<Object> {
    let mesh = mon.create_mesh(&quad_bytes(), 4, &QUAD_INDICES).unwrap();
    let shader = mon
        .create_shader(&shader_desc(PassKind::Overlay2D, Vec::new(), 4))
        .unwrap();
    mon.create_object(shader, mesh, &[], quadrant).unwrap()
}

fn draws(back: &HeadlessBackend) -> Vec<u32> {
    back.submissions()
        .iter()
        .flat_map(|s| s.commands.iter())
        .filter_map(|c| match c {
            Command::DrawIndexed { index_count } => Some(*index_count),
            _ => None,
        })
        .collect()
}

#[test]
fn quad_end_to_end() {
    let (back, mut mon) = monsoon(640, 480);
    quad_object(&mut mon, Quadrant::empty());
    back.clear_records();

    mon.draw().unwrap();

    // one submission per pass, the quad lands in the 2D one
    let subs = back.submissions();
    assert_eq!(subs.len(), 2);
    assert_eq!(draws(&back), vec![6]);
    assert!(subs[1]
        .commands
        .contains(&Command::DrawIndexed { index_count: 6 }));
    assert!(!subs[1]
        .commands
        .iter()
        .any(|c| matches!(c, Command::BindDescriptorSet { .. })));
    assert_eq!(back.presents().len(), 1);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn hidden_objects_are_not_drawn() {
    let (back, mut mon) = monsoon(640, 480);
    let obj = quad_object(&mut mon, Quadrant::empty());

    mon.set_object_visible(obj, false).unwrap();
    back.clear_records();
    mon.draw().unwrap();
    assert!(draws(&back).is_empty());

    mon.set_object_visible(obj, true).unwrap();
    back.clear_records();
    mon.draw().unwrap();
    assert_eq!(draws(&back), vec![6]);
}

#[test]
fn stale_handles_are_rejected() {
    let (back, mut mon) = monsoon(640, 480);
    let mesh = mon.create_mesh(&quad_bytes(), 4, &QUAD_INDICES).unwrap();
    let shader = mon
        .create_shader(&shader_desc(PassKind::Overlay2D, Vec::new(), 4))
        .unwrap();

    let mut released = mesh;
    mon.release_mesh(&mut released).unwrap();
    assert!(released.is_null());

    // the old copy of the handle points at nothing now
    let mut stale = mesh;
    assert!(matches!(
        mon.release_mesh(&mut stale),
        Err(SquallError::INVALID_HANDLE(_))
    ));
    assert!(!stale.is_null());
    assert!(matches!(
        mon.update_mesh(mesh, &quad_bytes(), 4, &QUAD_INDICES),
        Err(SquallError::INVALID_HANDLE(_))
    ));
    assert!(matches!(
        mon.create_object(shader, mesh, &[], Quadrant::empty()),
        Err(SquallError::INVALID_HANDLE(_))
    ));
    assert_eq!(mon.object_count(), 0);

    // a new mesh may reuse the slot but not the generation
    let fresh = mon.create_mesh(&quad_bytes(), 4, &QUAD_INDICES).unwrap();
    assert!(mon.mesh(fresh).is_ok());
    assert!(mon.mesh(mesh).is_err());

    let mut old_shader = shader;
    mon.release_shader(&mut old_shader).unwrap();
    assert!(matches!(
        mon.create_object(shader, fresh, &[], Quadrant::empty()),
        Err(SquallError::INVALID_HANDLE(_))
    ));
    assert_eq!(mon.object_count(), 0);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn releasing_null_handles_does_nothing() {
    let (back, mut mon) = monsoon(64, 64);
    let before = back.live_total();

    mon.release_object(&mut Handle::null()).unwrap();
    mon.release_mesh(&mut Handle::null()).unwrap();
    mon.release_shader(&mut Handle::null()).unwrap();
    mon.release_texture(&mut Handle::null()).unwrap();
    mon.release_buffer(&mut Handle::null()).unwrap();

    assert_eq!(back.live_total(), before);
}

#[test]
fn referenced_resources_stay_alive() {
    let (back, mut mon) = monsoon(640, 480);
    let bindings = vec![
        DescriptorBinding {
            binding: 0,
            kind: DescriptorKind::UniformBuffer,
            stages: vk::ShaderStageFlags::VERTEX,
        },
        DescriptorBinding {
            binding: 1,
            kind: DescriptorKind::SampledImage,
            stages: vk::ShaderStageFlags::FRAGMENT,
        },
    ];

    let mut mesh = mon.create_mesh(&quad_bytes(), 4, &QUAD_INDICES).unwrap();
    let mut shader = mon
        .create_shader(&shader_desc(PassKind::Opaque3D, bindings, 4))
        .unwrap();
    let mut buffer = mon.create_buffer(64).unwrap();
    let mut texture = mon
        .create_texture(&[0; 64], extent(4, 4), vk::Format::R8G8B8A8_UNORM, true, false)
        .unwrap();
    let mut obj = mon
        .create_object(
            shader,
            mesh,
            &[Binding::buffer(0, buffer), Binding::texture(1, texture)],
            Quadrant::empty(),
        )
        .unwrap();
    mon.draw().unwrap();

    assert_eq!(mon.release_mesh(&mut mesh), Err(SquallError::RESOURCE_IN_USE));
    assert_eq!(mon.release_shader(&mut shader), Err(SquallError::RESOURCE_IN_USE));
    assert_eq!(mon.release_buffer(&mut buffer), Err(SquallError::RESOURCE_IN_USE));
    assert_eq!(mon.release_texture(&mut texture), Err(SquallError::RESOURCE_IN_USE));
    assert!(!mesh.is_null() && !shader.is_null());
    assert!(mon.mesh(mesh).is_ok());

    // once the object is gone everything can go
    mon.release_object(&mut obj).unwrap();
    assert!(obj.is_null());
    mon.release_mesh(&mut mesh).unwrap();
    mon.release_shader(&mut shader).unwrap();
    mon.release_buffer(&mut buffer).unwrap();
    mon.release_texture(&mut texture).unwrap();

    mon.draw().unwrap();
    drop(mon);
    assert_eq!(back.live_total(), 0);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn object_capacity_is_per_shader() {
    let (back, mut mon) = monsoon(64, 64);
    let mesh = mon.create_mesh(&quad_bytes(), 4, &QUAD_INDICES).unwrap();
    let shader = mon
        .create_shader(&shader_desc(PassKind::Overlay2D, Vec::new(), 2))
        .unwrap();

    let mut first = mon
        .create_object(shader, mesh, &[], Quadrant::empty())
        .unwrap();
    mon.create_object(shader, mesh, &[], Quadrant::empty())
        .unwrap();
    assert_eq!(
        mon.create_object(shader, mesh, &[], Quadrant::empty()),
        Err(SquallError::CAPACITY_EXCEEDED(2))
    );
    assert_eq!(mon.object_count(), 2);
    assert_eq!(mon.shader(shader).unwrap().live_objects(), 2);

    // releasing an object frees up its slot
    mon.release_object(&mut first).unwrap();
    assert_eq!(mon.shader(shader).unwrap().live_objects(), 1);
    mon.create_object(shader, mesh, &[], Quadrant::empty())
        .unwrap();
    assert_eq!(mon.object_count(), 2);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn bad_bindings_do_not_create_objects() {
    let (back, mut mon) = monsoon(64, 64);
    let uniform = DescriptorBinding {
        binding: 0,
        kind: DescriptorKind::UniformBuffer,
        stages: vk::ShaderStageFlags::VERTEX,
    };
    let mesh = mon.create_mesh(&quad_bytes(), 4, &QUAD_INDICES).unwrap();
    let shader = mon
        .create_shader(&shader_desc(PassKind::Overlay2D, vec![uniform], 1))
        .unwrap();
    let buffer = mon.create_buffer(16).unwrap();

    assert_eq!(
        mon.create_object(shader, mesh, &[Binding::buffer(3, buffer)], Quadrant::empty()),
        Err(SquallError::INVALID_BINDING(3))
    );
    assert_eq!(mon.object_count(), 0);
    // the descriptor set went back to the pool
    assert_eq!(mon.shader(shader).unwrap().live_objects(), 0);
    mon.create_object(shader, mesh, &[Binding::buffer(0, buffer)], Quadrant::empty())
        .unwrap();
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn out_of_date_resizes_and_skips_frame() {
    let (back, mut mon) = monsoon(640, 480);
    quad_object(&mut mon, Quadrant::empty());
    mon.draw().unwrap();

    back.set_extent(800, 600);
    back.force_out_of_date();
    back.clear_records();

    mon.draw().unwrap();
    assert!(back.presents().is_empty());
    assert_eq!(mon.extent(), extent(800, 600));

    // the object is still recorded after the rebuild
    mon.draw().unwrap();
    assert_eq!(back.presents().len(), 1);
    assert_eq!(draws(&back), vec![6]);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn zero_sized_resize_is_ignored() {
    let (back, mut mon) = monsoon(640, 480);
    let swapchains = back.swapchain_history().len();

    mon.resize(0, 480).unwrap();
    mon.resize(640, 0).unwrap();
    assert_eq!(mon.extent(), extent(640, 480));
    assert_eq!(back.swapchain_history().len(), swapchains);

    mon.draw().unwrap();
}

#[test]
fn failed_resize_is_retried_on_draw() {
    let (back, mut mon) = monsoon(640, 480);
    quad_object(&mut mon, Quadrant::empty());
    mon.draw().unwrap();

    // a minimized window keeps the old swapchain
    back.set_extent(0, 0);
    mon.resize(800, 600).unwrap();
    assert_eq!(mon.extent(), extent(640, 480));

    back.set_extent(800, 600);
    back.fail_next_swapchain();
    assert!(mon.resize(800, 600).is_err());
    assert!(mon.renderer().is_created_3d());
    assert!(mon.renderer().is_created_2d());

    // the next frame is spent rebuilding
    back.clear_records();
    mon.draw().unwrap();
    assert!(back.presents().is_empty());
    assert_eq!(mon.extent(), extent(800, 600));

    mon.draw().unwrap();
    assert_eq!(back.submissions().len(), 2);
    assert_eq!(draws(&back), vec![6]);
    assert_eq!(back.presents().len(), 1);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn mesh_growth_rerecords() {
    let (back, mut mon) = monsoon(640, 480);
    let mesh = mon.create_mesh(&quad_bytes(), 4, &QUAD_INDICES).unwrap();
    let shader = mon
        .create_shader(&shader_desc(PassKind::Overlay2D, Vec::new(), 1))
        .unwrap();
    mon.create_object(shader, mesh, &[], Quadrant::empty())
        .unwrap();
    mon.draw().unwrap();

    // same sizes are written in place
    let old_vbuf = mon.mesh(mesh).unwrap().vertex_buffer();
    mon.update_mesh(mesh, &quad_bytes(), 4, &[3, 2, 1, 1, 0, 3])
        .unwrap();
    assert_eq!(mon.mesh(mesh).unwrap().vertex_buffer(), old_vbuf);

    let verts = [
        vert(0.0, 0.0),
        vert(1.0, 0.0),
        vert(1.0, 1.0),
        vert(0.0, 1.0),
        vert(2.0, 0.0),
        vert(2.0, 1.0),
    ];
    mon.update_mesh(
        mesh,
        vertex::as_bytes(&verts),
        6,
        &[0, 1, 2, 2, 3, 0, 1, 4, 5],
    )
    .unwrap();
    let new_vbuf = mon.mesh(mesh).unwrap().vertex_buffer();
    assert_ne!(new_vbuf, old_vbuf);

    back.clear_records();
    mon.draw().unwrap();
    assert_eq!(draws(&back), vec![9]);
    let subs = back.submissions();
    assert!(subs[1]
        .commands
        .contains(&Command::BindVertexBuffer(new_vbuf)));
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn passes_toggle_independently() {
    let (back, mut mon) = monsoon(640, 480);
    quad_object(&mut mon, Quadrant::empty());

    mon.enable_3d(false).unwrap();
    back.clear_records();
    mon.draw().unwrap();
    assert_eq!(back.submissions().len(), 1);
    assert_eq!(draws(&back), vec![6]);

    // turning 3D back on puts it underneath the 2D pass again
    mon.enable_3d(true).unwrap();
    assert!(mon.renderer().is_created_3d());
    assert!(mon.renderer().is_created_2d());
    back.clear_records();
    mon.draw().unwrap();
    let subs = back.submissions();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[1].wait, subs[0].signal);
    assert_eq!(draws(&back), vec![6]);

    // only the 3D pass is left, and the quad belongs to 2D
    mon.enable_2d(false).unwrap();
    back.clear_records();
    mon.draw().unwrap();
    assert_eq!(back.submissions().len(), 1);
    assert!(draws(&back).is_empty());

    // with nothing enabled frames are still presented
    mon.enable_3d(false).unwrap();
    back.clear_records();
    mon.draw().unwrap();
    mon.draw().unwrap();
    assert_eq!(back.presents().len(), 2);
    assert!(draws(&back).is_empty());
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn splitscreen_uses_quadrant_viewports() {
    let (back, mut mon) = monsoon(800, 600);
    quad_object(&mut mon, Quadrant::RIGHT | Quadrant::BOTTOM);
    mon.set_splitscreen(true).unwrap();
    back.clear_records();

    mon.draw().unwrap();
    let subs = back.submissions();
    assert!(subs[1]
        .commands
        .contains(&Command::SetViewport(Rect::new(400.0, 300.0, 400.0, 300.0))));

    mon.set_splitscreen(false).unwrap();
    back.clear_records();
    mon.draw().unwrap();
    let subs = back.submissions();
    assert!(subs[1]
        .commands
        .contains(&Command::SetViewport(Rect::new(0.0, 0.0, 800.0, 600.0))));
}

#[test]
fn textures_from_pixel_data() {
    let (back, mut mon) = monsoon(64, 64);
    let pixels = PixelData::solid(&[255, 0, 0, 255], 8, 4);
    let images = back.live_count(ResourceKind::Image);

    let mut tex = mon
        .create_texture_from_pixels(&pixels, vk::Format::R8G8B8A8_UNORM, true)
        .unwrap();
    assert_eq!(back.live_count(ResourceKind::Image), images + 1);

    // eight bytes short
    assert!(matches!(
        mon.create_texture(&pixels[8..], extent(8, 4), vk::Format::R8G8B8A8_UNORM, false, false),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));
    assert_eq!(back.live_count(ResourceKind::Image), images + 1);

    mon.release_texture(&mut tex).unwrap();
    assert_eq!(back.live_count(ResourceKind::Image), images);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}

/// Transform a point and divide by w
fn project(m: cgmath::Matrix4<f32>, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
    let p = m * Vector4::new(x, y, z, 1.0);
    (p.x / p.w, p.y / p.w, p.z / p.w)
}

#[test]
fn perspective_depth_is_zero_to_one() {
    let fovy = Rad(std::f32::consts::FRAC_PI_2);

    let rh = camera::perspective_rh(fovy, 2.0, 0.1, 100.0);
    let (_, _, near) = project(rh, 0.0, 0.0, -0.1);
    let (_, _, far) = project(rh, 0.0, 0.0, -100.0);
    assert!(close(near, 0.0), "{}", near);
    assert!(close(far, 1.0), "{}", far);
    // 90 degrees vertically, twice as wide as tall
    assert!(close(rh.y.y, 1.0));
    assert!(close(rh.x.x, 0.5));

    let lh = camera::perspective_lh(fovy, 2.0, 0.1, 100.0);
    let (_, _, near) = project(lh, 0.0, 0.0, 0.1);
    let (_, _, far) = project(lh, 0.0, 0.0, 100.0);
    assert!(close(near, 0.0), "{}", near);
    assert!(close(far, 1.0), "{}", far);
}

#[test]
fn ortho_covers_the_swapchain() {
    let (_back, mon) = monsoon(640, 480);

    let rh = mon.ortho_rh(0.0, 10.0);
    assert_eq!(project(rh, 0.0, 0.0, 0.0), (-1.0, -1.0, 0.0));
    let (x, y, z) = project(rh, 640.0, 480.0, -10.0);
    assert!(close(x, 1.0) && close(y, 1.0) && close(z, 1.0));

    let lh = mon.ortho_lh(0.0, 10.0);
    let (x, y, z) = project(lh, 320.0, 240.0, 5.0);
    assert!(close(x, 0.0) && close(y, 0.0) && close(z, 0.5));
}

#[test]
fn look_at_moves_the_world() {
    let up = Vector3::new(0.0, 1.0, 0.0);
    let origin = Point3::new(0.0, 0.0, 0.0);

    // the default orientation of each handedness is the identity
    let rh = camera::look_at_rh(origin, Point3::new(0.0, 0.0, -1.0), up);
    let lh = camera::look_at_lh(origin, Point3::new(0.0, 0.0, 1.0), up);
    let identity = cgmath::Matrix4::<f32>::from_scale(1.0);
    for m in [rh, lh].iter() {
        for col in 0..4 {
            for row in 0..4 {
                assert!(close(m[col][row], identity[col][row]), "{:?}", m);
            }
        }
    }

    // a camera backed off along +z sees the origin in front of it
    let view = camera::look_at_rh(Point3::new(0.0, 0.0, 5.0), origin, up);
    let (x, y, z) = project(view, 0.0, 0.0, 0.0);
    assert!(close(x, 0.0) && close(y, 0.0) && close(z, -5.0));

    let view = camera::look_at_lh(Point3::new(0.0, 0.0, -5.0), origin, up);
    let (_, _, z) = project(view, 0.0, 0.0, 0.0);
    assert!(close(z, 5.0));
}
