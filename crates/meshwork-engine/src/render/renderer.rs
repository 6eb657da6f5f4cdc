//! Per-frame render traversal over a mesh collection.

use std::sync::Arc;

use glam::Mat4;

use super::api::GpuApi;
use super::mesh::Mesh;

/// Documented upper bound on the total element count of one render pass.
pub const MAX_BUFFER_ELEMENTS: usize = 100_000;

#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Element budget per pass. Exceeding it is reported, not rejected.
    pub max_elements: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_elements: MAX_BUFFER_ELEMENTS,
        }
    }
}

/// What one render pass did.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct RenderStats {
    /// Meshes removed at the start of the pass.
    pub removed: usize,
    /// Meshes that issued at least one draw call.
    pub rendered: usize,
    pub draw_calls: usize,
    /// Records held by the remaining meshes.
    pub elements: usize,
}

/// Owns the mesh collection and drives render passes.
///
/// Meshes flagged with [`Mesh::request_delete`] are released and removed at
/// the start of the next [`Renderer::render`] and never mid-pass. That removal
/// is the only place a renderer-owned mesh gives back its GPU storage.
#[derive(Debug, Default)]
pub struct Renderer {
    meshes: Vec<Arc<Mesh>>,
    config: RendererConfig,
    over_budget: bool,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RendererConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Appends a mesh. Draw order is insertion order.
    pub fn add_mesh(&mut self, mesh: Arc<Mesh>) {
        log::debug!("renderer: added mesh `{}`", mesh.name());
        self.meshes.push(mesh);
    }

    pub fn meshes(&self) -> &[Arc<Mesh>] {
        &self.meshes
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Mesh>> {
        self.meshes.iter().find(|m| m.name() == name)
    }

    /// Runs one pass: prune deleted meshes, then render the rest in order
    /// with the same `global_transform`.
    pub fn render(&mut self, api: &mut dyn GpuApi, global_transform: Mat4) -> RenderStats {
        let mut stats = RenderStats {
            removed: self.prune(api),
            ..RenderStats::default()
        };

        for mesh in &self.meshes {
            stats.elements += mesh.element_count();
            // Visibility is read once, inside `Mesh::render`.
            let draws = mesh.render(api, global_transform);
            if draws > 0 {
                stats.rendered += 1;
                stats.draw_calls += draws;
            }
        }

        self.check_budget(stats.elements);
        stats
    }

    /// Releases every mesh's GPU storage and empties the collection.
    pub fn shutdown(&mut self, api: &mut dyn GpuApi) {
        for mesh in self.meshes.drain(..) {
            mesh.free_gpu_resources(api);
        }
        log::debug!("renderer: shut down");
    }

    fn prune(&mut self, api: &mut dyn GpuApi) -> usize {
        let before = self.meshes.len();
        self.meshes.retain(|mesh| {
            if !mesh.is_delete_requested() {
                return true;
            }
            mesh.free_gpu_resources(api);
            log::debug!("renderer: removed mesh `{}`", mesh.name());
            false
        });
        before - self.meshes.len()
    }

    fn check_budget(&mut self, elements: usize) {
        let over = elements > self.config.max_elements;
        if over && !self.over_budget {
            log::warn!(
                "render pass holds {elements} elements, budget is {}",
                self.config.max_elements
            );
        } else if !over && self.over_budget {
            log::debug!("render pass back under element budget ({elements})");
        }
        self.over_budget = over;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessApi;
    use crate::render::api::ProgramId;
    use crate::render::layout::ColoredVertex;
    use crate::render::shader::compile_and_link;
    use crate::render::wgsl::sources;

    fn setup() -> (HeadlessApi, ProgramId) {
        let mut api = HeadlessApi::new();
        let program = compile_and_link(&mut api, sources::VERTEX, sources::FRAGMENT, None).unwrap();
        (api, program)
    }

    fn mesh(name: &str, program: ProgramId, vertices: usize) -> Arc<Mesh> {
        let mesh = Mesh::new::<ColoredVertex>(name);
        mesh.set_shader_program(Some(program));
        mesh.last_buffer::<ColoredVertex>()
            .unwrap()
            .extend(std::iter::repeat_n(ColoredVertex::default(), vertices));
        mesh
    }

    #[test]
    fn deletion_is_deferred_to_next_pass() {
        let (mut api, program) = setup();
        let mut renderer = Renderer::new();
        let a = mesh("a", program, 3);
        renderer.add_mesh(a.clone());
        renderer.render(&mut api, Mat4::IDENTITY);
        assert!(a.has_gpu_resources());

        a.request_delete();
        assert_eq!(renderer.len(), 1);
        assert!(renderer.find("a").is_some());

        let stats = renderer.render(&mut api, Mat4::IDENTITY);
        assert_eq!(stats.removed, 1);
        assert!(renderer.is_empty());
        assert!(!a.has_gpu_resources());
        assert_eq!(api.live_storage(), 0);
    }

    #[test]
    fn order_is_insertion_order() {
        let (mut api, program) = setup();
        let mut renderer = Renderer::new();
        let names = ["c", "a", "b"];
        for name in names {
            renderer.add_mesh(mesh(name, program, 3));
        }
        renderer.render(&mut api, Mat4::IDENTITY);

        let storages: Vec<_> = renderer
            .meshes()
            .iter()
            .map(|m| m.buffer::<ColoredVertex>(0).unwrap().storage().unwrap())
            .collect();
        let drawn: Vec<_> = api.draws().iter().map(|d| d.call.storage).collect();
        assert_eq!(drawn, storages);
        renderer.shutdown(&mut api);
    }

    #[test]
    fn invisible_meshes_are_skipped() {
        let (mut api, program) = setup();
        let mut renderer = Renderer::new();
        let hidden = mesh("hidden", program, 3);
        hidden.set_visible(false);
        renderer.add_mesh(hidden);

        let stats = renderer.render(&mut api, Mat4::IDENTITY);
        assert_eq!(stats.rendered, 0);
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(stats.elements, 3);
        assert!(api.draws().is_empty());
    }

    #[test]
    fn only_meshes_that_drew_are_counted() {
        let (mut api, program) = setup();
        let mut renderer = Renderer::new();
        renderer.add_mesh(mesh("drawn", program, 3));
        renderer.add_mesh(mesh("empty", program, 0));
        let unbound = mesh("unbound", program, 3);
        unbound.set_shader_program(None);
        renderer.add_mesh(unbound);

        let stats = renderer.render(&mut api, Mat4::IDENTITY);
        assert_eq!(stats.rendered, 1);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.elements, 6);
        renderer.shutdown(&mut api);
    }

    #[test]
    fn hidden_between_passes_is_not_counted() {
        let (mut api, program) = setup();
        let mut renderer = Renderer::new();
        let flicker = mesh("flicker", program, 3);
        renderer.add_mesh(flicker.clone());

        let hider = {
            let flicker = flicker.clone();
            std::thread::spawn(move || flicker.set_visible(false))
        };
        hider.join().unwrap();

        let stats = renderer.render(&mut api, Mat4::IDENTITY);
        assert_eq!(stats, RenderStats { elements: 3, ..RenderStats::default() });
        assert!(api.draws().is_empty());
    }

    #[test]
    fn same_global_transform_for_all_meshes() {
        let (mut api, program) = setup();
        let mut renderer = Renderer::new();
        renderer.add_mesh(mesh("a", program, 3));
        renderer.add_mesh(mesh("b", program, 3));

        let global = Mat4::from_rotation_z(0.5);
        renderer.render(&mut api, global);
        for draw in api.draws() {
            assert!(draw.mvp.unwrap().abs_diff_eq(global, 1e-6));
        }
        renderer.shutdown(&mut api);
    }

    #[test]
    fn shutdown_releases_everything() {
        let (mut api, program) = setup();
        let mut renderer = Renderer::new();
        renderer.add_mesh(mesh("a", program, 3));
        renderer.add_mesh(mesh("b", program, 6));
        renderer.render(&mut api, Mat4::IDENTITY);
        assert_eq!(api.live_storage(), 2);

        renderer.shutdown(&mut api);
        assert!(renderer.is_empty());
        assert_eq!(api.live_storage(), 0);
    }

    #[test]
    fn budget_is_reported_not_enforced() {
        let (mut api, program) = setup();
        let mut renderer = Renderer::with_config(RendererConfig { max_elements: 4 });
        renderer.add_mesh(mesh("big", program, 6));

        let stats = renderer.render(&mut api, Mat4::IDENTITY);
        assert_eq!(stats.elements, 6);
        assert_eq!(stats.draw_calls, 1);
        assert!(renderer.over_budget);
        renderer.shutdown(&mut api);
    }
}
