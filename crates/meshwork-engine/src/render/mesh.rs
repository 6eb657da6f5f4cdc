//! Meshes: buffers + transform + shader binding.
//!
//! A [`Mesh`] is shared (`Arc<Mesh>`) between the renderer and client code,
//! so every setter takes `&self`. Lock order inside a mesh is
//! transform/shader state, then the buffer list, then individual buffers; the
//! state lock is released before the buffer list is taken.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::{Mat4, Quat, Vec3};
use parking_lot::Mutex;
use thiserror::Error;

use super::api::{GpuApi, ProgramId, UniformLocation};
use super::buffer::{AnyBuffer, GpuBuffer};
use super::layout::Vertex;
use super::shader::MVP_UNIFORM;

/// Local transform of a mesh.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    /// Offset applied last, after scaling (see [`Transform::matrix`]).
    pub origin: Vec3,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        origin: Vec3::ZERO,
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// `translate(position) * rotate(rotation) * scale(scale) * translate(origin)`.
    ///
    /// The origin offset is expressed in the mesh's scaled, rotated frame.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_quat(self.rotation)
            * Mat4::from_scale(self.scale)
            * Mat4::from_translation(self.origin)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MeshError {
    #[error("mesh `{mesh}` has {len} buffers, slot {index} requested")]
    SlotOutOfRange {
        mesh: String,
        index: usize,
        len: usize,
    },

    #[error("mesh `{mesh}` slot {index} holds `{found}` vertices, `{expected}` requested")]
    VertexTypeMismatch {
        mesh: String,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

struct MeshState {
    local: Transform,
    transform: Mat4,
    transform_dirty: bool,

    program: Option<ProgramId>,
    mvp_location: Option<UniformLocation>,
    shader_dirty: bool,
}

/// Named renderable: buffers, local transform, shader program, flags.
pub struct Mesh {
    name: String,
    state: Mutex<MeshState>,
    visible: AtomicBool,
    delete_requested: AtomicBool,
    buffers: Mutex<Vec<AnyBuffer>>,
}

impl Mesh {
    /// Creates a mesh with one fresh, empty buffer of `V`.
    pub fn new<V: Vertex>(name: impl Into<String>) -> Arc<Self> {
        Self::with_buffer(name, Arc::new(GpuBuffer::<V>::new()))
    }

    /// Creates a mesh around an existing buffer.
    pub fn with_buffer<V: Vertex>(name: impl Into<String>, buffer: Arc<GpuBuffer<V>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(MeshState {
                local: Transform::IDENTITY,
                transform: Mat4::IDENTITY,
                transform_dirty: true,
                program: None,
                mvp_location: None,
                shader_dirty: true,
            }),
            visible: AtomicBool::new(true),
            delete_requested: AtomicBool::new(false),
            buffers: Mutex::new(vec![V::into_any(buffer)]),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── buffers ───────────────────────────────────────────────────────────

    pub fn add_buffer<V: Vertex>(&self, buffer: Arc<GpuBuffer<V>>) {
        self.buffers.lock().push(V::into_any(buffer));
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Typed access to buffer slot `index`; fails if the slot holds another
    /// vertex type.
    pub fn buffer<V: Vertex>(&self, index: usize) -> Result<Arc<GpuBuffer<V>>, MeshError> {
        let buffers = self.buffers.lock();
        let slot = buffers.get(index).ok_or_else(|| MeshError::SlotOutOfRange {
            mesh: self.name.clone(),
            index,
            len: buffers.len(),
        })?;

        V::from_any(slot)
            .cloned()
            .ok_or_else(|| MeshError::VertexTypeMismatch {
                mesh: self.name.clone(),
                index,
                expected: V::NAME,
                found: slot.vertex_name(),
            })
    }

    /// Typed access to the most recently attached buffer.
    pub fn last_buffer<V: Vertex>(&self) -> Result<Arc<GpuBuffer<V>>, MeshError> {
        let len = self.buffer_count();
        match len.checked_sub(1) {
            Some(index) => self.buffer(index),
            None => Err(MeshError::SlotOutOfRange {
                mesh: self.name.clone(),
                index: 0,
                len,
            }),
        }
    }

    /// Total record count across all buffers.
    pub fn element_count(&self) -> usize {
        self.buffers.lock().iter().map(AnyBuffer::len).sum()
    }

    /// True if any buffer currently owns GPU storage.
    pub fn has_gpu_resources(&self) -> bool {
        self.buffers.lock().iter().any(AnyBuffer::is_generated)
    }

    // ── transform ─────────────────────────────────────────────────────────

    pub fn local_transform(&self) -> Transform {
        self.state.lock().local
    }

    pub fn set_transform(&self, transform: Transform) {
        self.update_local(|t| *t = transform);
    }

    pub fn set_position(&self, position: Vec3) {
        self.update_local(|t| t.position = position);
    }

    pub fn set_rotation(&self, rotation: Quat) {
        self.update_local(|t| t.rotation = rotation.normalize());
    }

    pub fn set_scale(&self, scale: Vec3) {
        self.update_local(|t| t.scale = scale);
    }

    pub fn set_origin(&self, origin: Vec3) {
        self.update_local(|t| t.origin = origin);
    }

    fn update_local(&self, f: impl FnOnce(&mut Transform)) {
        let mut state = self.state.lock();
        f(&mut state.local);
        state.transform_dirty = true;
    }

    /// Computes the local matrix from the current fields without touching the
    /// render cache.
    pub fn build_transform(&self) -> Mat4 {
        self.state.lock().local.matrix()
    }

    /// Matrix used by the last render; stale while [`Mesh::is_transform_dirty`].
    pub fn cached_transform(&self) -> Mat4 {
        self.state.lock().transform
    }

    pub fn is_transform_dirty(&self) -> bool {
        self.state.lock().transform_dirty
    }

    // ── shader ────────────────────────────────────────────────────────────

    /// Binds a program. The program's lifetime is managed by the caller.
    pub fn set_shader_program(&self, program: Option<ProgramId>) {
        let mut state = self.state.lock();
        state.program = program;
        state.shader_dirty = true;
    }

    pub fn shader_program(&self) -> Option<ProgramId> {
        self.state.lock().program
    }

    pub fn is_shader_dirty(&self) -> bool {
        self.state.lock().shader_dirty
    }

    // ── flags ─────────────────────────────────────────────────────────────

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    /// Flags the mesh for removal at the start of the next render pass.
    pub fn request_delete(&self) {
        self.delete_requested.store(true, Ordering::Release);
    }

    pub fn is_delete_requested(&self) -> bool {
        self.delete_requested.load(Ordering::Acquire)
    }

    // ── GPU ───────────────────────────────────────────────────────────────

    /// Renders every buffer with `global_transform * local_transform`.
    ///
    /// Returns the number of draw calls issued. Invisible meshes and meshes
    /// without a program draw nothing.
    pub fn render(&self, api: &mut dyn GpuApi, global_transform: Mat4) -> usize {
        if !self.is_visible() {
            return 0;
        }

        let (program, location, local) = {
            let mut state = self.state.lock();
            if state.transform_dirty {
                state.transform = state.local.matrix();
                state.transform_dirty = false;
            }
            if state.shader_dirty {
                state.mvp_location = state
                    .program
                    .and_then(|p| api.uniform_location(p, MVP_UNIFORM));
                state.shader_dirty = false;
            }
            (state.program, state.mvp_location, state.transform)
        };

        let Some(program) = program else {
            log::trace!("mesh `{}` has no shader program; skipped", self.name);
            return 0;
        };

        match location {
            Some(location) => api.set_uniform_mat4(program, location, &(global_transform * local)),
            None => log::trace!("mesh `{}`: program {program:?} has no `{MVP_UNIFORM}`", self.name),
        }

        let buffers = self.buffers.lock();
        buffers
            .iter()
            .filter(|buffer| buffer.render(api, program))
            .count()
    }

    /// Destroys every buffer's GPU storage. Idempotent.
    pub fn free_gpu_resources(&self, api: &mut dyn GpuApi) {
        for buffer in self.buffers.lock().iter() {
            buffer.destroy(api);
        }
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("name", &self.name)
            .field("visible", &self.is_visible())
            .field("delete_requested", &self.is_delete_requested())
            .field("buffers", &self.buffer_count())
            .finish()
    }
}
