use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::Mat4;
use meshwork_engine::render::{
    BufferOptions, ColoredVertex, GpuApi, GpuBuffer, HeadlessApi, Mesh, PathVertex, ProgramId,
    Renderer, ShaderError, Topology, compile_and_link,
};

const VERTEX: &str = r#"
@group(0) @binding(0) var<uniform> u_mvp: mat4x4<f32>;

@vertex
fn vs_main(@location(0) i_position: vec3<f32>, @location(2) i_color: vec4<f32>) -> @builtin(position) vec4<f32> {
    return u_mvp * vec4<f32>(i_position, 1.0) + i_color * 0.0;
}
"#;

const FRAGMENT: &str = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.5, 0.0, 1.0);
}
"#;

const MVP_ON_SECOND_BINDING: &str = r#"
@group(0) @binding(1) var<uniform> u_mvp: mat4x4<f32>;

@vertex
fn vs_main(@location(0) i_position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return u_mvp * vec4<f32>(i_position, 1.0);
}
"#;

const LAYER_AS_FLOAT: &str = r#"
@group(0) @binding(0) var<uniform> u_mvp: mat4x4<f32>;

@vertex
fn vs_main(@location(0) i_position: vec3<f32>, @location(3) i_layer: f32) -> @builtin(position) vec4<f32> {
    return u_mvp * vec4<f32>(i_position, 1.0 + i_layer);
}
"#;

fn setup() -> (HeadlessApi, ProgramId) {
    let mut api = HeadlessApi::new();
    let program = compile_and_link(&mut api, VERTEX, FRAGMENT, None).expect("test shaders link");
    (api, program)
}

fn triangle() -> [ColoredVertex; 3] {
    [
        ColoredVertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]),
        ColoredVertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0]),
        ColoredVertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]),
    ]
}

#[test]
fn deleted_mesh_is_released_before_first_draw() {
    let (mut api, program) = setup();
    let mut renderer = Renderer::new();

    let a = Mesh::new::<ColoredVertex>("a");
    a.last_buffer::<ColoredVertex>().unwrap().extend(triangle());
    a.set_shader_program(Some(program));

    let b = Mesh::with_buffer(
        "b",
        GpuBuffer::<PathVertex>::shared(BufferOptions::default().with_topology(Topology::Points)),
    );
    b.last_buffer::<PathVertex>()
        .unwrap()
        .append(PathVertex::new([0.0; 3], [0.0; 3], [1.0; 4], 0));
    b.set_shader_program(Some(program));
    b.request_delete();

    renderer.add_mesh(Arc::clone(&a));
    renderer.add_mesh(Arc::clone(&b));

    let stats = renderer.render(&mut api, Mat4::IDENTITY);

    assert_eq!(stats.removed, 1);
    assert_eq!(renderer.len(), 1);
    assert_eq!(renderer.meshes()[0].name(), "a");

    let draws = api.draws();
    assert_eq!(draws.len(), 1);
    let a_storage = a.buffer::<ColoredVertex>(0).unwrap().storage().unwrap();
    assert_eq!(draws[0].call.storage, a_storage);
    assert_eq!(draws[0].call.topology, Topology::Triangles);
    assert_eq!(draws[0].call.count, 3);

    assert!(!b.has_gpu_resources());
    assert_eq!(api.live_storage(), 1);

    renderer.shutdown(&mut api);
    assert_eq!(api.live_storage(), 0);
}

#[test]
fn uncontended_fill_then_render() {
    let (mut api, program) = setup();
    let mut renderer = Renderer::new();

    let buffer = GpuBuffer::<ColoredVertex>::shared(BufferOptions::default());
    let mesh = Mesh::with_buffer("filled", Arc::clone(&buffer));
    mesh.set_shader_program(Some(program));
    renderer.add_mesh(mesh);

    let writer = {
        let buffer = Arc::clone(&buffer);
        std::thread::spawn(move || {
            for i in 0..10_000 {
                let x = i as f32;
                buffer.append(ColoredVertex::new([x, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0; 4]));
            }
        })
    };
    writer.join().unwrap();

    renderer.render(&mut api, Mat4::IDENTITY);
    let uploads = api.take_uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].bytes, 10_000 * size_of::<ColoredVertex>());

    let storage = buffer.storage().unwrap();
    let contents = api.storage_contents(storage).unwrap();
    assert_eq!(contents, bytemuck::cast_slice::<ColoredVertex, u8>(&buffer.to_vec()));

    renderer.shutdown(&mut api);
}

#[test]
fn contended_fill_while_rendering() {
    let (mut api, program) = setup();
    let mut renderer = Renderer::new();

    let buffer = GpuBuffer::<ColoredVertex>::shared(BufferOptions::default());
    let mesh = Mesh::with_buffer("streamed", Arc::clone(&buffer));
    mesh.set_shader_program(Some(program));
    renderer.add_mesh(mesh);

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let buffer = Arc::clone(&buffer);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            for i in 0..10_000 {
                let x = i as f32;
                buffer.append(ColoredVertex::new([x, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0; 4]));
                if i % 500 == 0 {
                    std::thread::yield_now();
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    loop {
        let finished = done.load(Ordering::Acquire);
        renderer.render(&mut api, Mat4::IDENTITY);
        if finished {
            break;
        }
    }
    writer.join().unwrap();

    // Every upload is a whole number of records: no torn reads.
    let record = size_of::<ColoredVertex>();
    let uploads = api.take_uploads();
    assert!(uploads.iter().all(|u| u.bytes % record == 0));
    assert!(uploads.windows(2).all(|w| w[0].bytes <= w[1].bytes));
    assert_eq!(uploads.last().unwrap().bytes, 10_000 * record);

    let storage = buffer.storage().unwrap();
    let contents = api.storage_contents(storage).unwrap();
    assert_eq!(contents.len(), 10_000 * record);
    // Records arrive in append order; position.x is the record index.
    assert!(
        contents
            .chunks_exact(record)
            .enumerate()
            .all(|(i, r)| bytemuck::pod_read_unaligned::<f32>(&r[..4]) == i as f32)
    );

    renderer.shutdown(&mut api);
}

#[test]
fn transform_updates_reach_the_next_draw() {
    let (mut api, program) = setup();
    let mut renderer = Renderer::new();

    let mesh = Mesh::new::<ColoredVertex>("moving");
    mesh.last_buffer::<ColoredVertex>().unwrap().extend(triangle());
    mesh.set_shader_program(Some(program));
    renderer.add_mesh(Arc::clone(&mesh));

    renderer.render(&mut api, Mat4::IDENTITY);
    let first = api.take_draws();
    assert!(first[0].mvp.unwrap().abs_diff_eq(Mat4::IDENTITY, 1e-6));

    let mover = {
        let mesh = Arc::clone(&mesh);
        std::thread::spawn(move || mesh.set_position(glam::Vec3::new(2.0, 0.0, 0.0)))
    };
    mover.join().unwrap();

    renderer.render(&mut api, Mat4::IDENTITY);
    let second = api.take_draws();
    let expected = Mat4::from_translation(glam::Vec3::new(2.0, 0.0, 0.0));
    assert!(second[0].mvp.unwrap().abs_diff_eq(expected, 1e-6));

    // Contents unchanged, so no re-upload.
    assert_eq!(api.uploads().len(), 1);
    assert_eq!(api.name(), "headless");

    renderer.shutdown(&mut api);
}

#[test]
fn program_outside_the_pipeline_layout_fails_to_link() {
    let mut api = HeadlessApi::new();
    let err = compile_and_link(&mut api, MVP_ON_SECOND_BINDING, FRAGMENT, None).unwrap_err();

    assert!(matches!(err, ShaderError::Link { .. }));
    assert!(err.diagnostic().contains("u_mvp"));
    assert_eq!(api.live_programs(), 0);
    assert_eq!(api.live_stages(), 0);
}

#[test]
fn input_type_mismatch_draws_nothing() {
    let mut api = HeadlessApi::new();
    let program = compile_and_link(&mut api, LAYER_AS_FLOAT, FRAGMENT, None).expect("links");
    let mut renderer = Renderer::new();

    let path = Mesh::new::<PathVertex>("path");
    path.last_buffer::<PathVertex>()
        .unwrap()
        .extend([PathVertex::new([0.0; 3], [1.0, 0.0, 0.0], [1.0; 4], 7); 2]);
    path.set_shader_program(Some(program));
    renderer.add_mesh(path);

    // The request is issued, but the backend refuses the layout.
    renderer.render(&mut api, Mat4::IDENTITY);
    assert!(api.draws().is_empty());
    assert_eq!(api.live_storage(), 1);

    renderer.shutdown(&mut api);
}

fn filled_buffer(x: f32) -> Arc<GpuBuffer<ColoredVertex>> {
    let buffer = GpuBuffer::<ColoredVertex>::shared(BufferOptions::default());
    buffer.extend(triangle().map(|mut v| {
        v.position[0] += x;
        v
    }));
    buffer
}

#[test]
fn buffers_attached_before_rendering_draw_in_order() {
    let (mut api, program) = setup();
    let mut renderer = Renderer::new();

    let mesh = Mesh::with_buffer("layers", filled_buffer(0.0));
    mesh.set_shader_program(Some(program));
    renderer.add_mesh(Arc::clone(&mesh));

    let mut attached = vec![mesh.buffer::<ColoredVertex>(0).unwrap()];
    for i in 1..50 {
        let buffer = filled_buffer(i as f32);
        mesh.add_buffer(Arc::clone(&buffer));
        attached.push(buffer);
    }

    let stats = renderer.render(&mut api, Mat4::IDENTITY);
    assert_eq!(stats.draw_calls, 50);
    let drawn: Vec<_> = api.draws().iter().map(|d| d.call.storage).collect();
    let expected: Vec<_> = attached.iter().map(|b| b.storage().unwrap()).collect();
    assert_eq!(drawn, expected);

    renderer.shutdown(&mut api);
}

#[test]
fn buffers_attached_while_rendering_draw_as_a_prefix() {
    const ADDED: usize = 200;

    let (mut api, program) = setup();
    let mut renderer = Renderer::new();

    let mesh = Mesh::with_buffer("layers", filled_buffer(0.0));
    mesh.set_shader_program(Some(program));
    renderer.add_mesh(Arc::clone(&mesh));

    let mut attached = vec![mesh.buffer::<ColoredVertex>(0).unwrap()];
    attached.extend((1..=ADDED).map(|i| filled_buffer(i as f32)));

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let mesh = Arc::clone(&mesh);
        let pending = attached[1..].to_vec();
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            for (i, buffer) in pending.into_iter().enumerate() {
                mesh.add_buffer(buffer);
                if i % 10 == 0 {
                    std::thread::yield_now();
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut last_count = 0;
    loop {
        let finished = done.load(Ordering::Acquire);
        let stats = renderer.render(&mut api, Mat4::IDENTITY);
        let draws = api.take_draws();

        // Each pass sees the buffer list as it was at one instant: a prefix
        // of the attachment order, never shorter than the previous pass.
        assert_eq!(stats.draw_calls, draws.len());
        assert!(draws.len() >= last_count);
        for (draw, buffer) in draws.iter().zip(&attached) {
            assert_eq!(Some(draw.call.storage), buffer.storage());
        }
        last_count = draws.len();

        if finished {
            break;
        }
    }
    writer.join().unwrap();

    assert_eq!(last_count, ADDED + 1);
    assert_eq!(mesh.buffer_count(), ADDED + 1);
    assert_eq!(api.live_storage(), ADDED + 1);

    renderer.shutdown(&mut api);
    assert_eq!(api.live_storage(), 0);
}
