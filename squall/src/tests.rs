use crate::backend::RenderPassInfo;
use crate::*;
use granizo::Registry;
use std::sync::Arc;

// Enough of a SPIR-V header to get a module handle from the headless backend
fn spirv() -> Vec<u32> {
    vec![0x0723_0203, 0x0001_0000, 0, 1, 0]
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: width,
        height: height,
    }
}

fn headless(width: u32, height: u32) -> (Arc<HeadlessBackend>, Arc<Device>) {
    let back = Arc::new(HeadlessBackend::new(extent(width, height)));
    let dev = Device::new(back.clone(), &RenderSettings::default()).unwrap();
    (back, dev)
}

fn renderer(dev: &Arc<Device>, width: u32, height: u32) -> Renderer {
    Renderer::new(
        dev.clone(),
        extent(width, height),
        PresentMode::Fifo,
        [0.1, 0.2, 0.3, 1.0],
        false,
    )
    .unwrap()
}

fn uniform_binding(binding: u32) -> DescriptorBinding {
    DescriptorBinding {
        binding: binding,
        kind: DescriptorKind::UniformBuffer,
        stages: vk::ShaderStageFlags::VERTEX,
    }
}

fn shader_desc(pass: PassKind, max_objects: u32) -> ShaderDesc {
    ShaderDesc {
        stages: vec![ShaderStage::vertex(spirv()), ShaderStage::fragment(spirv())],
        pass: pass,
        vertex_stride: Vertex2D::stride(),
        attributes: Vertex2D::attributes(),
        bindings: vec![uniform_binding(0)],
        max_objects: max_objects,
        raster: RasterState::overlay(),
    }
}

fn quad(dev: &Arc<Device>) -> Mesh {
    let verts = [
        Vertex2D {
            pos: [0.0, 0.0],
            tex: [0.0, 0.0],
        },
        Vertex2D {
            pos: [1.0, 0.0],
            tex: [1.0, 0.0],
        },
        Vertex2D {
            pos: [1.0, 1.0],
            tex: [1.0, 1.0],
        },
        Vertex2D {
            pos: [0.0, 1.0],
            tex: [0.0, 1.0],
        },
    ];
    Mesh::new(dev.clone(), vertex::as_bytes(&verts), 4, &[0, 1, 2, 2, 3, 0]).unwrap()
}

fn draw_item(pass: PassKind, shader: &Shader, mesh: &Mesh, quadrant: Quadrant) -> DrawItem {
    DrawItem {
        pass: pass,
        pipeline: shader.pipeline(),
        layout: shader.layout(),
        set: vk::DescriptorSet::null(),
        vertex_buffer: mesh.vertex_buffer(),
        index_buffer: mesh.index_buffer(),
        index_count: mesh.index_count(),
        quadrant: quadrant,
    }
}

fn begin_pass_of(commands: &[Command]) -> (Option<[f32; 4]>, Option<f32>) {
    commands
        .iter()
        .find_map(|c| match c {
            Command::BeginRenderPass {
                clear_color,
                clear_depth,
                ..
            } => Some((*clear_color, *clear_depth)),
            _ => None,
        })
        .unwrap()
}

#[test]
fn execbuf_state_machine() {
    let (back, dev) = headless(64, 64);
    let pool = dev.backend().create_command_pool(QueueRole::Graphics).unwrap();
    let mut exec = ExecBuffer::new(dev.clone(), pool, QueueRole::Graphics);
    assert_eq!(exec.state(), ExecState::Allocated);

    // nothing but create is allowed before create
    assert!(matches!(
        exec.begin_recording(),
        Err(SquallError::INVALID_STATE { .. })
    ));
    assert!(matches!(
        exec.execute(&[], &[], false),
        Err(SquallError::INVALID_STATE { .. })
    ));
    assert!(exec.release().is_err());

    exec.create().unwrap();
    assert_eq!(exec.state(), ExecState::Created);
    assert!(exec.create().is_err());
    assert!(exec.record(Command::EndRenderPass).is_err());
    assert!(exec.end_recording().is_err());
    assert!(exec.execute(&[], &[], false).is_err());

    exec.begin_recording().unwrap();
    assert_eq!(exec.state(), ExecState::Recording);
    assert!(exec.execute(&[], &[], false).is_err());
    exec.end_recording().unwrap();
    assert_eq!(exec.state(), ExecState::Executable);

    // executable buffers can be submitted again and again
    exec.execute(&[], &[], false).unwrap();
    assert!(exec.is_pending());
    exec.execute(&[], &[], true).unwrap();
    assert!(!exec.is_pending());
    assert_eq!(exec.state(), ExecState::Executable);

    // and re-recorded
    exec.begin_recording().unwrap();
    exec.end_recording().unwrap();

    exec.release().unwrap();
    assert_eq!(exec.state(), ExecState::Allocated);
    assert_eq!(back.live_count(ResourceKind::Fence), 0);
    assert_eq!(back.live_count(ResourceKind::CommandBuffer), 0);

    dev.backend().destroy_command_pool(pool);
    assert_eq!(back.submissions().len(), 2);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn frame_chains_2d_after_3d() {
    let (back, dev) = headless(640, 480);
    let mut rend = renderer(&dev, 640, 480);
    rend.create_3d().unwrap();
    rend.create_2d().unwrap();
    back.clear_records();

    rend.draw().unwrap();

    let subs = back.submissions();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].wait.len(), 1);
    assert_eq!(subs[1].wait, subs[0].signal);
    let presents = back.presents();
    assert_eq!(presents.len(), 1);
    assert_eq!(presents[0].wait, subs[1].signal);

    // 3D clears color and depth, 2D loads on top of it
    assert_eq!(begin_pass_of(&subs[0].commands), (Some([0.1, 0.2, 0.3, 1.0]), Some(1.0)));
    assert_eq!(begin_pass_of(&subs[1].commands), (None, None));

    // the semaphores are reusable frame after frame
    for _ in 0..5 {
        rend.draw().unwrap();
    }
    assert_eq!(back.submissions().len(), 12);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn lone_2d_pass_clears() {
    let (back, dev) = headless(640, 480);
    let mut rend = renderer(&dev, 640, 480);
    rend.create_2d().unwrap();
    assert!(!rend.is_created_3d());
    back.clear_records();

    rend.draw().unwrap();
    let subs = back.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(begin_pass_of(&subs[0].commands), (Some([0.1, 0.2, 0.3, 1.0]), None));
    assert_eq!(back.presents()[0].wait, subs[0].signal);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn draw_without_passes_presents() {
    let (back, dev) = headless(320, 240);
    let mut rend = renderer(&dev, 320, 240);
    back.clear_records();

    for _ in 0..4 {
        rend.draw().unwrap();
    }

    let subs = back.submissions();
    let presents = back.presents();
    assert_eq!(subs.len(), 4);
    assert_eq!(presents.len(), 4);
    for (sub, present) in subs.iter().zip(presents.iter()) {
        assert_eq!(sub.wait.len(), 1);
        assert_eq!(present.wait, sub.signal);

        // the image only gets moved to the present layout
        let image = rend.swapchain().images()[present.image_index as usize];
        match sub.commands.as_slice() {
            [Command::ImageBarrier(b)] => {
                assert_eq!(b.image, image);
                assert_eq!(b.old_layout, vk::ImageLayout::UNDEFINED);
                assert_eq!(b.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
            }
            other => panic!("unexpected commands {:?}", other),
        }
    }

    // creating a pass takes over from the blank frames
    rend.create_2d().unwrap();
    back.clear_records();
    rend.draw().unwrap();
    assert!(begin_pass_of(&back.submissions()[0].commands).0.is_some());
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn pass_ordering_is_enforced() {
    let (back, dev) = headless(320, 240);
    let mut rend = renderer(&dev, 320, 240);

    rend.create_2d().unwrap();
    assert!(matches!(
        rend.create_3d(),
        Err(SquallError::INVALID_OPERATION(_))
    ));

    // tearing the 2D pass down lets the 3D pass go first
    rend.destroy_2d().unwrap();
    rend.create_3d().unwrap();
    rend.create_2d().unwrap();
    assert_eq!(
        rend.pass(PassKind::Overlay2D).unwrap().caps().load,
        LoadOp::Load
    );

    // without 3D output to draw over, 2D has to clear
    rend.destroy_3d().unwrap();
    assert_eq!(
        rend.pass(PassKind::Overlay2D).unwrap().caps().load,
        LoadOp::Clear
    );
    assert_eq!(back.live_count(ResourceKind::RenderPass), 1);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn resize_rebuilds_in_place() {
    let (back, dev) = headless(640, 480);
    let mut rend = renderer(&dev, 640, 480);
    rend.create_3d().unwrap();
    rend.create_2d().unwrap();
    rend.draw().unwrap();

    let kinds = [
        ResourceKind::RenderPass,
        ResourceKind::Framebuffer,
        ResourceKind::ImageView,
        ResourceKind::Image,
        ResourceKind::CommandBuffer,
        ResourceKind::Fence,
        ResourceKind::Swapchain,
    ];
    let before: Vec<usize> = kinds.iter().map(|k| back.live_count(*k)).collect();
    let old = rend.swapchain().handle();

    back.set_extent(800, 600);
    rend.resize(extent(800, 600), &[]).unwrap();

    let after: Vec<usize> = kinds.iter().map(|k| back.live_count(*k)).collect();
    assert_eq!(before, after);
    assert_eq!(rend.extent(), extent(800, 600));
    assert!(rend.is_created_3d() && rend.is_created_2d());

    // the old swapchain was handed over when making the new one
    let history = back.swapchain_history();
    assert_eq!(history.last().unwrap().1, old);
    assert_eq!(history.last().unwrap().0, rend.swapchain().handle());

    // resizing to the same size again changes nothing either
    rend.resize(extent(800, 600), &[]).unwrap();
    let again: Vec<usize> = kinds.iter().map(|k| back.live_count(*k)).collect();
    assert_eq!(before, again);

    rend.draw().unwrap();
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn out_of_date_recovers_after_resize() {
    let (back, dev) = headless(640, 480);
    let mut rend = renderer(&dev, 640, 480);
    rend.create_3d().unwrap();
    rend.draw().unwrap();

    back.force_out_of_date();
    assert_eq!(rend.draw(), Err(SquallError::OUT_OF_DATE));

    rend.resize(extent(640, 480), &[]).unwrap();
    rend.draw().unwrap();
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn failed_resize_keeps_passes_enabled() {
    let (back, dev) = headless(640, 480);
    let mut rend = renderer(&dev, 640, 480);
    rend.create_3d().unwrap();
    rend.create_2d().unwrap();
    rend.draw().unwrap();

    // a zero sized drawable leaves the swapchain alone
    let swapchains = back.swapchain_history().len();
    back.set_extent(0, 0);
    rend.resize(extent(800, 600), &[]).unwrap();
    assert_eq!(back.swapchain_history().len(), swapchains);
    assert!(rend.pass(PassKind::Opaque3D).is_some());
    assert!(rend.pass(PassKind::Overlay2D).is_some());

    back.set_extent(800, 600);
    back.fail_next_swapchain();
    assert!(rend.resize(extent(800, 600), &[]).is_err());
    assert!(rend.is_created_3d() && rend.is_created_2d());
    assert_eq!(rend.draw(), Err(SquallError::OUT_OF_DATE));

    // toggling passes in between is remembered for the rebuild
    rend.destroy_2d().unwrap();
    rend.create_2d().unwrap();

    rend.resize(extent(800, 600), &[]).unwrap();
    assert_eq!(rend.extent(), extent(800, 600));
    assert!(rend.pass(PassKind::Opaque3D).is_some());
    assert_eq!(
        rend.pass(PassKind::Overlay2D).unwrap().caps().load,
        LoadOp::Load
    );

    back.clear_records();
    rend.draw().unwrap();
    assert_eq!(back.submissions().len(), 2);
    assert_eq!(back.presents().len(), 1);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn abandoned_frame_resets_semaphores() {
    let (back, dev) = headless(640, 480);
    let mut rend = renderer(&dev, 640, 480);
    rend.create_3d().unwrap();
    rend.create_2d().unwrap();
    rend.draw().unwrap();
    let semaphores = back.live_count(ResourceKind::Semaphore);

    // the image is acquired but nothing gets submitted
    back.fail_next_submit();
    assert_eq!(rend.draw(), Err(SquallError::DEVICE_LOST));
    assert_eq!(back.live_count(ResourceKind::Semaphore), semaphores);

    back.clear_records();
    rend.draw().unwrap();
    rend.draw().unwrap();
    assert_eq!(back.submissions().len(), 4);
    assert_eq!(back.presents().len(), 2);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

fn without_pass_handles(commands: &[Command]) -> Vec<Command> {
    commands
        .iter()
        .map(|c| match c {
            Command::BeginRenderPass {
                extent,
                clear_color,
                clear_depth,
                ..
            } => Command::BeginRenderPass {
                pass: vk::RenderPass::null(),
                framebuffer: vk::Framebuffer::null(),
                extent: *extent,
                clear_color: *clear_color,
                clear_depth: *clear_depth,
            },
            other => other.clone(),
        })
        .collect()
}

#[test]
fn resize_to_same_extent_records_the_same_frame() {
    let (back, dev) = headless(800, 600);
    let mut rend = renderer(&dev, 800, 600);
    rend.set_splitscreen(true);
    rend.create_3d().unwrap();
    rend.create_2d().unwrap();

    let shader_3d = Shader::new(
        dev.clone(),
        &shader_desc(PassKind::Opaque3D, 4),
        &rend.pass_info(PassKind::Opaque3D),
    )
    .unwrap();
    let shader_2d = Shader::new(
        dev.clone(),
        &shader_desc(PassKind::Overlay2D, 4),
        &rend.pass_info(PassKind::Overlay2D),
    )
    .unwrap();
    let mesh = quad(&dev);
    let items = [
        draw_item(PassKind::Opaque3D, &shader_3d, &mesh, Quadrant::LEFT),
        draw_item(PassKind::Overlay2D, &shader_2d, &mesh, Quadrant::RIGHT),
    ];
    rend.record_draw_commands(&items).unwrap();

    back.clear_records();
    rend.draw().unwrap();
    let before: Vec<Vec<Command>> = back
        .submissions()
        .iter()
        .map(|s| without_pass_handles(&s.commands))
        .collect();
    assert_eq!(before.len(), 2);
    assert!(before[0].contains(&Command::SetViewport(Rect::new(0.0, 0.0, 400.0, 600.0))));
    assert!(before[1].contains(&Command::SetViewport(Rect::new(400.0, 0.0, 400.0, 600.0))));

    rend.resize(extent(800, 600), &items).unwrap();
    back.clear_records();
    rend.draw().unwrap();
    let after: Vec<Vec<Command>> = back
        .submissions()
        .iter()
        .map(|s| without_pass_handles(&s.commands))
        .collect();

    assert_eq!(before, after);
    assert!(rend.splitscreen());
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn viewport_quadrants() {
    let ext = extent(800, 600);

    let full = renderer::viewport_for(ext, Quadrant::LEFT, false);
    assert_eq!(full, Rect::new(0.0, 0.0, 800.0, 600.0));

    let whole = renderer::viewport_for(ext, Quadrant::empty(), true);
    assert_eq!(whole, Rect::new(0.0, 0.0, 800.0, 600.0));

    let left = renderer::viewport_for(ext, Quadrant::LEFT, true);
    assert_eq!(left, Rect::new(0.0, 0.0, 400.0, 600.0));

    let right = renderer::viewport_for(ext, Quadrant::RIGHT, true);
    assert_eq!(right, Rect::new(400.0, 0.0, 400.0, 600.0));

    let bottom_right = renderer::viewport_for(ext, Quadrant::RIGHT | Quadrant::BOTTOM, true);
    assert_eq!(bottom_right, Rect::new(400.0, 300.0, 400.0, 300.0));

    let top = renderer::viewport_for(ext, Quadrant::TOP, true);
    assert_eq!(top, Rect::new(0.0, 0.0, 800.0, 300.0));
}

#[test]
fn splitscreen_records_viewport_per_quadrant() {
    let (back, dev) = headless(800, 600);
    let mut rend = renderer(&dev, 800, 600);
    rend.set_splitscreen(true);
    rend.create_2d().unwrap();

    let shader = Shader::new(
        dev.clone(),
        &shader_desc(PassKind::Overlay2D, 4),
        &rend.pass_info(PassKind::Overlay2D),
    )
    .unwrap();
    let mesh = quad(&dev);
    let items = [
        draw_item(PassKind::Overlay2D, &shader, &mesh, Quadrant::LEFT),
        draw_item(PassKind::Overlay2D, &shader, &mesh, Quadrant::LEFT),
        draw_item(PassKind::Overlay2D, &shader, &mesh, Quadrant::RIGHT),
        // no 3D pass, so this is skipped
        draw_item(PassKind::Opaque3D, &shader, &mesh, Quadrant::empty()),
    ];
    rend.record_draw_commands(&items).unwrap();
    back.clear_records();
    rend.draw().unwrap();

    let commands = &back.submissions()[0].commands;
    let viewports: Vec<Rect<f32>> = commands
        .iter()
        .filter_map(|c| match c {
            Command::SetViewport(r) => Some(*r),
            _ => None,
        })
        .collect();
    assert_eq!(
        viewports,
        vec![
            Rect::new(0.0, 0.0, 400.0, 600.0),
            Rect::new(400.0, 0.0, 400.0, 600.0)
        ]
    );

    let binds = commands
        .iter()
        .filter(|c| matches!(c, Command::BindPipeline(_)))
        .count();
    assert_eq!(binds, 1);
    let draws = commands
        .iter()
        .filter(|c| **c == Command::DrawIndexed { index_count: 6 })
        .count();
    assert_eq!(draws, 3);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn descriptor_capacity_and_recycling() {
    let (back, dev) = headless(64, 64);
    let info = RenderPassInfo {
        color_format: vk::Format::B8G8R8A8_UNORM,
        depth_format: Some(vk::Format::D32_SFLOAT),
        load: LoadOp::Clear,
    };
    let shader = Shader::new(dev.clone(), &shader_desc(PassKind::Opaque3D, 2), &info).unwrap();
    assert_eq!(shader.max_objects(), 2);

    let a = shader.create_descriptor_set().unwrap();
    let b = shader.create_descriptor_set().unwrap();
    assert_ne!(a.set(), b.set());
    assert_eq!(
        shader.create_descriptor_set().err(),
        Some(SquallError::CAPACITY_EXCEEDED(2))
    );
    assert_eq!(shader.live_objects(), 2);
    assert_eq!(back.live_count(ResourceKind::DescriptorSet), 2);

    // dropping a descriptor hands its slot back
    drop(a);
    assert_eq!(shader.live_objects(), 1);
    assert_eq!(back.live_count(ResourceKind::DescriptorSet), 1);
    let c = shader.create_descriptor_set().unwrap();
    assert_eq!(shader.live_objects(), 2);

    drop(b);
    drop(c);
    drop(shader);
    drop(dev);
    assert_eq!(back.live_total(), 0);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn shader_without_bindings_has_no_sets() {
    let (back, dev) = headless(64, 64);
    let mut desc = shader_desc(PassKind::Overlay2D, 1);
    desc.bindings.clear();
    let info = RenderPassInfo {
        color_format: vk::Format::B8G8R8A8_UNORM,
        depth_format: None,
        load: LoadOp::Clear,
    };
    let shader = Shader::new(dev.clone(), &desc, &info).unwrap();

    let set = shader.create_descriptor_set().unwrap();
    assert_eq!(set.set(), vk::DescriptorSet::null());
    // the object limit still applies
    assert!(shader.create_descriptor_set().is_err());
    assert_eq!(back.live_count(ResourceKind::DescriptorPool), 0);
}

#[test]
fn shader_desc_is_validated() {
    let (back, dev) = headless(64, 64);
    let info = RenderPassInfo {
        color_format: vk::Format::B8G8R8A8_UNORM,
        depth_format: None,
        load: LoadOp::Clear,
    };

    let mut no_vertex = shader_desc(PassKind::Overlay2D, 1);
    no_vertex.stages.remove(0);
    assert!(matches!(
        Shader::new(dev.clone(), &no_vertex, &info),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));

    let zero = shader_desc(PassKind::Overlay2D, 0);
    assert!(matches!(
        Shader::new(dev.clone(), &zero, &info),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));

    let mut dup = shader_desc(PassKind::Overlay2D, 1);
    dup.bindings.push(uniform_binding(0));
    assert!(matches!(
        Shader::new(dev.clone(), &dup, &info),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));

    assert_eq!(back.live_total(), 0);
}

#[test]
fn failed_pipeline_leaks_nothing() {
    let (back, dev) = headless(64, 64);
    let info = RenderPassInfo {
        color_format: vk::Format::B8G8R8A8_UNORM,
        depth_format: Some(vk::Format::D32_SFLOAT),
        load: LoadOp::Clear,
    };
    let before = back.live_total();

    back.fail_next_pipeline();
    let ret = Shader::new(dev.clone(), &shader_desc(PassKind::Opaque3D, 4), &info);
    assert_eq!(ret.err(), Some(SquallError::COULD_NOT_CREATE_PIPELINE));
    assert_eq!(back.live_total(), before);

    // the next attempt goes through
    let shader = Shader::new(dev.clone(), &shader_desc(PassKind::Opaque3D, 4), &info).unwrap();
    assert_ne!(shader.pipeline(), vk::Pipeline::null());
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn descriptor_updates_check_bindings() {
    let (back, dev) = headless(64, 64);
    let mut desc = shader_desc(PassKind::Overlay2D, 4);
    desc.bindings.push(DescriptorBinding {
        binding: 1,
        kind: DescriptorKind::SampledImage,
        stages: vk::ShaderStageFlags::FRAGMENT,
    });
    let info = RenderPassInfo {
        color_format: vk::Format::B8G8R8A8_UNORM,
        depth_format: None,
        load: LoadOp::Clear,
    };
    let shader = Shader::new(dev.clone(), &desc, &info).unwrap();
    let set = shader.create_descriptor_set().unwrap();

    let mut buffers = Registry::new();
    let mut textures = Registry::new();
    let buf = buffers.insert(Buffer::new(dev.clone(), 64).unwrap());
    let tex = textures.insert(
        Texture::new(
            dev.clone(),
            &[255; 16],
            &TextureDesc {
                extent: extent(2, 2),
                format: vk::Format::R8G8B8A8_UNORM,
                mipmapping: false,
                unnormalized: false,
            },
        )
        .unwrap(),
    );

    // wrong kind of resource for the binding
    assert_eq!(
        shader.update_descriptor_set(&set, &[Binding::buffer(1, buf)], &textures, &mut buffers),
        Err(SquallError::INVALID_BINDING(1))
    );
    // binding the shader doesn't have
    assert_eq!(
        shader.update_descriptor_set(&set, &[Binding::texture(7, tex)], &textures, &mut buffers),
        Err(SquallError::INVALID_BINDING(7))
    );
    assert_eq!(back.descriptor_updates(), 0);

    shader
        .update_descriptor_set(
            &set,
            &[Binding::buffer(0, buf), Binding::texture(1, tex)],
            &textures,
            &mut buffers,
        )
        .unwrap();
    // one batched write, and the buffer got memory for it
    assert_eq!(back.descriptor_updates(), 1);
    assert!(buffers.get(buf).unwrap().is_backed());
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn buffer_update_reaches_gpu_memory() {
    let (back, dev) = headless(64, 64);
    assert!(matches!(
        Buffer::new(dev.clone(), 0),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));

    let mut buf = Buffer::new(dev.clone(), 16).unwrap();
    assert!(!buf.is_backed());
    assert_eq!(buf.handle(), vk::Buffer::null());

    let data: Vec<u8> = (1..=16).collect();
    buf.update(&data).unwrap();
    assert!(buf.is_backed());
    assert_eq!(back.read_buffer(buf.handle()).unwrap(), data);

    // partial writes only touch the start
    buf.update(&[0xff, 0xff]).unwrap();
    let contents = back.read_buffer(buf.handle()).unwrap();
    assert_eq!(&contents[..3], &[0xff, 0xff, 3]);

    assert!(matches!(
        buf.update(&[0; 17]),
        Err(SquallError::INVALID_OPERATION(_))
    ));
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn texture_format_checks() {
    let (back, dev) = headless(64, 64);
    let desc = |format, mipmapping| TextureDesc {
        extent: extent(4, 4),
        format: format,
        mipmapping: mipmapping,
        unnormalized: false,
    };

    let tex = Texture::new(dev.clone(), &[0; 64], &desc(vk::Format::R8G8B8A8_UNORM, true)).unwrap();
    assert_eq!(tex.mip_levels(), 3);

    // R8 can be sampled but not blitted, so no mipmaps
    assert_eq!(
        Texture::new(dev.clone(), &[0; 16], &desc(vk::Format::R8_UNORM, true)).err(),
        Some(SquallError::INVALID_FORMAT)
    );
    let plain = Texture::new(dev.clone(), &[0; 16], &desc(vk::Format::R8_UNORM, false)).unwrap();
    assert_eq!(plain.mip_levels(), 1);

    assert_eq!(
        Texture::new(dev.clone(), &[0; 16], &desc(vk::Format::D32_SFLOAT, false)).err(),
        Some(SquallError::INVALID_FORMAT)
    );
    assert!(matches!(
        Texture::new(dev.clone(), &[0; 63], &desc(vk::Format::R8G8B8A8_UNORM, false)),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));

    // unnormalized coordinates win over mipmapping
    let mut unnorm = desc(vk::Format::R8G8B8A8_UNORM, true);
    unnorm.unnormalized = true;
    let tex2 = Texture::new(dev.clone(), &[0; 64], &unnorm).unwrap();
    assert_eq!(tex2.mip_levels(), 1);

    drop(tex);
    drop(plain);
    drop(tex2);
    assert_eq!(back.live_count(ResourceKind::Image), 0);
    assert_eq!(back.live_count(ResourceKind::Sampler), 0);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn mip_levels() {
    assert_eq!(resources::mip_levels_for(extent(1, 1)), 1);
    assert_eq!(resources::mip_levels_for(extent(256, 16)), 9);
    assert_eq!(resources::mip_levels_for(extent(300, 200)), 9);
}

#[test]
fn mesh_validation_and_update() {
    let (back, dev) = headless(64, 64);
    let verts = [0u8; 32];

    assert!(matches!(
        Mesh::new(dev.clone(), &verts, 4, &[0, 1, 4]),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));
    assert!(matches!(
        Mesh::new(dev.clone(), &verts[..30], 4, &[0, 1, 2]),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));
    assert!(matches!(
        Mesh::new(dev.clone(), &verts, 4, &[]),
        Err(SquallError::INVALID_CREATE_INFO(_))
    ));

    let mut mesh = Mesh::new(dev.clone(), &verts, 4, &[0, 1, 2]).unwrap();
    let vbuf = mesh.vertex_buffer();
    assert_eq!(back.read_buffer(mesh.index_buffer()).unwrap(), vec![0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]);

    // same size is rewritten in place
    assert_eq!(mesh.update(&[1u8; 32], 4, &[3, 2, 1]).unwrap(), false);
    assert_eq!(mesh.vertex_buffer(), vbuf);
    assert_eq!(back.read_buffer(vbuf).unwrap(), vec![1u8; 32]);

    // growing needs new buffers
    assert_eq!(mesh.update(&[2u8; 48], 6, &[0, 1, 2, 3, 4, 5]).unwrap(), true);
    assert_ne!(mesh.vertex_buffer(), vbuf);
    assert_eq!(mesh.index_count(), 6);
    assert_eq!(back.live_count(ResourceKind::Buffer), 2);

    // a failed update leaves the mesh alone
    assert!(mesh.update(&[2u8; 48], 6, &[9]).is_err());
    assert_eq!(mesh.index_count(), 6);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}

#[test]
fn teardown_releases_everything() {
    let (back, dev) = headless(640, 480);
    {
        let mut rend = renderer(&dev, 640, 480);
        rend.create_3d().unwrap();
        rend.create_2d().unwrap();

        let shader = Shader::new(
            dev.clone(),
            &shader_desc(PassKind::Opaque3D, 4),
            &rend.pass_info(PassKind::Opaque3D),
        )
        .unwrap();
        let mesh = quad(&dev);
        let set = shader.create_descriptor_set().unwrap();
        let mut item = draw_item(PassKind::Opaque3D, &shader, &mesh, Quadrant::empty());
        item.set = set.set();

        rend.record_draw_commands(&[item]).unwrap();
        rend.draw().unwrap();
        rend.draw().unwrap();
    }
    drop(dev);

    assert_eq!(back.live_total(), 0);
    assert!(back.errors().is_empty(), "{:?}", back.errors());
}
