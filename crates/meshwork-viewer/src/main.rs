//! Meshwork viewer: hosts the mesh renderer on a window.
//!
//! Scene: a lit, spinning pyramid; a toolpath grown by a worker thread while
//! it is drawn; a point cloud that is deleted after a few seconds.

mod scene;
mod toolpath;

use std::sync::Arc;

use anyhow::Result;
use glam::{Mat4, Quat, Vec3};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use meshwork_engine::core::{App, AppControl, FrameCtx};
use meshwork_engine::device::{Gpu, GpuInit};
use meshwork_engine::logging::{LoggingConfig, init_logging};
use meshwork_engine::render::{
    BufferOptions, ColoredVertex, GpuApi, GpuBuffer, Mesh, PathVertex, ProgramId, Renderer,
    Topology, UsageHint, WgpuApi, compile_and_link,
};
use meshwork_engine::window::{Runtime, RuntimeConfig};

use toolpath::{FeedConfig, ToolpathFeed};

const MESH_VERT: &str = include_str!("../shaders/mesh.vert.wgsl");
const MESH_FRAG: &str = include_str!("../shaders/mesh.frag.wgsl");
const PATH_VERT: &str = include_str!("../shaders/path.vert.wgsl");
const PATH_FRAG: &str = include_str!("../shaders/path.frag.wgsl");

/// Frames the point cloud lives before it is flagged for deletion.
const POINTS_LIFETIME_FRAMES: u64 = 300;
const STATS_EVERY_FRAMES: u64 = 60;

const CLEAR: wgpu::Color = wgpu::Color {
    r: 0.05,
    g: 0.05,
    b: 0.07,
    a: 1.0,
};

struct GpuState {
    api: WgpuApi,
    lit: ProgramId,
    unlit: ProgramId,
}

#[derive(Default)]
struct Viewer {
    gpu: Option<GpuState>,
    renderer: Renderer,
    pyramid: Option<Arc<Mesh>>,
    path: Option<Arc<Mesh>>,
    points: Option<Arc<Mesh>>,
    feed: Option<ToolpathFeed>,
}

impl Viewer {
    fn build_scene(&mut self, lit: ProgramId, unlit: ProgramId) -> Result<()> {
        let pyramid = Mesh::new::<ColoredVertex>("pyramid");
        pyramid
            .last_buffer::<ColoredVertex>()?
            .extend(scene::pyramid(0.6, 1.0, [0.85, 0.55, 0.25, 1.0]));
        // Spin about the pyramid's middle rather than its base.
        pyramid.set_origin(Vec3::new(0.0, -0.5, 0.0));
        pyramid.set_position(Vec3::new(0.0, 0.9, 0.0));
        pyramid.set_shader_program(Some(lit));

        let path_buffer = GpuBuffer::<PathVertex>::shared(
            BufferOptions::default()
                .with_topology(Topology::LineStrip)
                .with_usage(UsageHint::Dynamic),
        );
        let path = Mesh::with_buffer("toolpath", Arc::clone(&path_buffer));
        path.set_shader_program(Some(unlit));

        let points = Mesh::with_buffer(
            "probe-points",
            GpuBuffer::<PathVertex>::shared(BufferOptions::default().with_topology(Topology::Points)),
        );
        points
            .last_buffer::<PathVertex>()?
            .extend(scene::point_disc(4000, 1.6, 0.0));
        points.set_shader_program(Some(unlit));

        self.renderer.add_mesh(Arc::clone(&path));
        self.renderer.add_mesh(Arc::clone(&points));
        self.renderer.add_mesh(Arc::clone(&pyramid));

        self.feed = Some(ToolpathFeed::spawn(path_buffer, FeedConfig::default())?);
        self.pyramid = Some(pyramid);
        self.path = Some(path);
        self.points = Some(points);
        Ok(())
    }

    fn camera(aspect: f32) -> Mat4 {
        let proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(3.5, 2.8, 3.5), Vec3::new(0.0, 0.5, 0.0), Vec3::Y);
        proj * view
    }
}

impl App for Viewer {
    fn on_start(&mut self, gpu: &mut Gpu<'_>) -> Result<()> {
        let mut api = gpu.create_api();
        let lit = compile_and_link(&mut api, MESH_VERT, MESH_FRAG, None)?;
        let unlit = compile_and_link(&mut api, PATH_VERT, PATH_FRAG, None)?;
        self.gpu = Some(GpuState { api, lit, unlit });
        self.build_scene(lit, unlit)?;
        log::info!("viewer: scene ready with {} meshes", self.renderer.len());
        Ok(())
    }

    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        let WindowEvent::KeyboardInput { event, .. } = event else {
            return AppControl::Continue;
        };
        if event.state != ElementState::Pressed || event.repeat {
            return AppControl::Continue;
        }

        match event.physical_key {
            PhysicalKey::Code(KeyCode::Escape) => AppControl::Exit,
            PhysicalKey::Code(KeyCode::Space) => {
                if let Some(path) = &self.path {
                    path.set_visible(!path.is_visible());
                }
                AppControl::Continue
            }
            _ => AppControl::Continue,
        }
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        let Some(state) = self.gpu.as_mut() else {
            return AppControl::Continue;
        };

        if let Some(pyramid) = &self.pyramid {
            pyramid.set_rotation(Quat::from_rotation_y(ctx.time.elapsed * 0.8));
        }
        if ctx.time.frame_index == POINTS_LIFETIME_FRAMES {
            if let Some(points) = self.points.take() {
                log::info!("viewer: retiring `{}`", points.name());
                points.request_delete();
            }
        }

        state.api.begin_frame();
        let global = Self::camera(ctx.gpu.aspect());
        let stats = self.renderer.render(&mut state.api, global);

        if ctx.time.frame_index % STATS_EVERY_FRAMES == 0 {
            ctx.runtime.set_title(format!(
                "meshwork - {} meshes, {} draws, {} vertices",
                self.renderer.len(),
                stats.draw_calls,
                stats.elements
            ));
        }

        let api = &mut state.api;
        ctx.render(CLEAR, |rctx, target| api.flush(rctx, target))
    }

    fn on_shutdown(&mut self) {
        if let Some(points) = self.feed.as_mut().and_then(ToolpathFeed::stop) {
            log::info!("viewer: toolpath reached {points} points");
        }
        let Some(mut state) = self.gpu.take() else { return };
        self.renderer.shutdown(&mut state.api);
        state.api.delete_program(state.lit);
        state.api.delete_program(state.unlit);
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let config = RuntimeConfig {
        title: "meshwork".to_owned(),
        initial_size: LogicalSize::new(1280.0, 800.0),
    };
    Runtime::run(config, GpuInit::default(), Viewer::default())
}
