//! Typed vertex buffers with deferred upload.
//!
//! A [`GpuBuffer`] keeps its records in memory and mirrors them to GPU storage
//! lazily: storage is generated on the first bind, and content is re-uploaded
//! (whole) only when the dirty flag is set.
//!
//! # Locking
//!
//! All state sits behind one per-buffer mutex. Writers (`append`, `data_mut`,
//! ...) and the render path (`upload`, `render`) take the same lock, so a
//! content change and its dirty flag are always observed together. Do not
//! call back into the same buffer while holding a [`BufferWriter`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::api::{
    AttributeSlot, DrawCall, GpuApi, ProgramId, StorageId, Topology, UsageHint, VertexStorageDesc,
};
use super::layout::{ColoredVertex, PathVertex, Vertex};

/// Per-buffer draw settings.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct BufferOptions {
    /// First vertex drawn.
    pub offset: u32,
    pub usage: UsageHint,
    pub topology: Topology,
}

impl BufferOptions {
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_usage(mut self, usage: UsageHint) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

struct BufferState<V> {
    data: Vec<V>,
    dirty: bool,
    storage: Option<StorageId>,
    /// Set when generation failed; cleared by `destroy`.
    allocation_failed: bool,
    options: BufferOptions,
}

/// Growable vertex array of `V` mirrored to GPU storage.
pub struct GpuBuffer<V: Vertex> {
    state: Mutex<BufferState<V>>,
}

impl<V: Vertex> GpuBuffer<V> {
    pub fn new() -> Self {
        Self::with_options(BufferOptions::default())
    }

    pub fn with_options(options: BufferOptions) -> Self {
        Self {
            state: Mutex::new(BufferState {
                data: Vec::new(),
                dirty: true,
                storage: None,
                allocation_failed: false,
                options,
            }),
        }
    }

    /// Creates a shareable buffer.
    pub fn shared(options: BufferOptions) -> Arc<Self> {
        Arc::new(Self::with_options(options))
    }

    // ── content ───────────────────────────────────────────────────────────

    /// Appends one record and marks the buffer dirty.
    pub fn append(&self, vertex: V) {
        let mut state = self.state.lock();
        state.dirty = true;
        state.data.push(vertex);
    }

    pub fn extend<I: IntoIterator<Item = V>>(&self, vertices: I) {
        let mut state = self.state.lock();
        state.dirty = true;
        state.data.extend(vertices);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.dirty = true;
        state.data.clear();
    }

    /// Locks the buffer for in-place edits.
    ///
    /// The dirty flag is set as soon as the writer is taken, whether or not
    /// anything is changed through it.
    pub fn data_mut(&self) -> BufferWriter<'_, V> {
        let mut guard = self.state.lock();
        guard.dirty = true;
        BufferWriter { guard }
    }

    /// Runs `f` on the records under the buffer lock.
    pub fn read<R>(&self, f: impl FnOnce(&[V]) -> R) -> R {
        f(&self.state.lock().data)
    }

    pub fn to_vec(&self) -> Vec<V> {
        self.state.lock().data.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    // ── flags + options ───────────────────────────────────────────────────

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// True while GPU storage is allocated.
    pub fn is_generated(&self) -> bool {
        self.state.lock().storage.is_some()
    }

    pub fn storage(&self) -> Option<StorageId> {
        self.state.lock().storage
    }

    pub fn options(&self) -> BufferOptions {
        self.state.lock().options
    }

    pub fn set_topology(&self, topology: Topology) {
        self.state.lock().options.topology = topology;
    }

    pub fn set_usage(&self, usage: UsageHint) {
        self.state.lock().options.usage = usage;
    }

    pub fn set_offset(&self, offset: u32) {
        self.state.lock().options.offset = offset;
    }

    // ── GPU lifecycle ─────────────────────────────────────────────────────

    /// Allocates storage and describes the attribute slots. No-op when
    /// storage already exists or a previous attempt failed.
    pub fn generate(&self, api: &mut dyn GpuApi) {
        self.state.lock().generate(api);
    }

    /// Releases storage if allocated. Safe to call repeatedly.
    pub fn destroy(&self, api: &mut dyn GpuApi) {
        self.state.lock().destroy(api);
    }

    /// Generates storage on first use; false when no storage is available.
    pub fn bind(&self, api: &mut dyn GpuApi) -> bool {
        self.state.lock().bind(api)
    }

    /// Uploads the whole record sequence if dirty.
    pub fn upload(&self, api: &mut dyn GpuApi) {
        self.state.lock().upload(api);
    }

    /// Binds, uploads if dirty and draws with `program`.
    ///
    /// The draw covers records `[offset, len)`: `len - offset` vertices
    /// starting at the configured offset, never past the end of the data. An
    /// offset at or beyond `len` issues nothing. Returns whether a draw call
    /// was issued.
    pub fn render(&self, api: &mut dyn GpuApi, program: ProgramId) -> bool {
        self.state.lock().render(api, program)
    }
}

impl<V: Vertex> BufferState<V> {
    fn generate(&mut self, api: &mut dyn GpuApi) {
        if self.storage.is_some() || self.allocation_failed {
            return;
        }

        let mut attributes = Vec::with_capacity(V::LAYOUT.len());
        let mut offset = 0u64;
        for (location, attr) in V::LAYOUT.iter().enumerate() {
            attributes.push(AttributeSlot {
                location: location as u32,
                offset,
                components: attr.components,
                kind: attr.kind,
            });
            offset += attr.byte_len as u64;
        }
        debug_assert_eq!(offset as usize, size_of::<V>(), "layout of `{}` does not cover the record", V::NAME);

        let desc = VertexStorageDesc {
            label: V::NAME,
            stride: size_of::<V>() as u64,
            attributes: &attributes,
        };

        match api.create_vertex_storage(&desc) {
            Ok(id) => {
                self.storage = Some(id);
                // Fresh storage is empty.
                self.dirty = true;
            }
            Err(err) => {
                log::warn!("skipping `{}` buffer: {err}", V::NAME);
                self.allocation_failed = true;
            }
        }
    }

    fn destroy(&mut self, api: &mut dyn GpuApi) {
        if let Some(id) = self.storage.take() {
            api.delete_vertex_storage(id);
            log::trace!("released `{}` storage {id:?}", V::NAME);
        }
        self.allocation_failed = false;
        self.dirty = true;
    }

    fn bind(&mut self, api: &mut dyn GpuApi) -> bool {
        self.generate(api);
        self.storage.is_some()
    }

    fn upload(&mut self, api: &mut dyn GpuApi) {
        if !self.dirty {
            return;
        }
        let Some(storage) = self.storage else { return };
        api.upload_vertices(storage, bytemuck::cast_slice(&self.data), self.options.usage);
        self.dirty = false;
    }

    fn render(&mut self, api: &mut dyn GpuApi, program: ProgramId) -> bool {
        if !self.bind(api) {
            return false;
        }
        self.upload(api);

        let Some(storage) = self.storage else { return false };
        let first = self.options.offset;
        let count = (self.data.len() as u32).saturating_sub(first);
        if count == 0 {
            return false;
        }

        api.draw(DrawCall {
            program,
            storage,
            topology: self.options.topology,
            first,
            count,
        });
        true
    }
}

impl<V: Vertex> Default for GpuBuffer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Vertex> fmt::Debug for GpuBuffer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GpuBuffer")
            .field("vertex", &V::NAME)
            .field("len", &state.data.len())
            .field("dirty", &state.dirty)
            .field("storage", &state.storage)
            .field("options", &state.options)
            .finish()
    }
}

impl<V: Vertex> Drop for GpuBuffer<V> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) {
            if let Some(id) = self.state.get_mut().storage {
                log::warn!(
                    "`{}` buffer dropped while owning GPU storage {id:?}; it leaks until the device is destroyed",
                    V::NAME
                );
            }
        }
    }
}

/// Exclusive, dirty-marking access to a buffer's records.
pub struct BufferWriter<'a, V> {
    guard: MutexGuard<'a, BufferState<V>>,
}

impl<V> Deref for BufferWriter<'_, V> {
    type Target = Vec<V>;

    fn deref(&self) -> &Vec<V> {
        &self.guard.data
    }
}

impl<V> DerefMut for BufferWriter<'_, V> {
    fn deref_mut(&mut self) -> &mut Vec<V> {
        &mut self.guard.data
    }
}

/// A mesh buffer slot: one variant per supported vertex type.
#[derive(Debug, Clone)]
pub enum AnyBuffer {
    Colored(Arc<GpuBuffer<ColoredVertex>>),
    Path(Arc<GpuBuffer<PathVertex>>),
}

impl AnyBuffer {
    fn ops(&self) -> &dyn BufferOps {
        match self {
            AnyBuffer::Colored(b) => &**b,
            AnyBuffer::Path(b) => &**b,
        }
    }

    pub fn vertex_name(&self) -> &'static str {
        self.ops().vertex_name()
    }

    pub fn len(&self) -> usize {
        self.ops().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_generated(&self) -> bool {
        self.ops().is_generated()
    }

    pub fn render(&self, api: &mut dyn GpuApi, program: ProgramId) -> bool {
        self.ops().render(api, program)
    }

    pub fn destroy(&self, api: &mut dyn GpuApi) {
        self.ops().destroy(api)
    }
}

/// Type-erased buffer operations used by [`AnyBuffer`].
trait BufferOps {
    fn vertex_name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn is_generated(&self) -> bool;
    fn render(&self, api: &mut dyn GpuApi, program: ProgramId) -> bool;
    fn destroy(&self, api: &mut dyn GpuApi);
}

impl<V: Vertex> BufferOps for GpuBuffer<V> {
    fn vertex_name(&self) -> &'static str {
        V::NAME
    }

    fn len(&self) -> usize {
        GpuBuffer::len(self)
    }

    fn is_generated(&self) -> bool {
        GpuBuffer::is_generated(self)
    }

    fn render(&self, api: &mut dyn GpuApi, program: ProgramId) -> bool {
        GpuBuffer::render(self, api, program)
    }

    fn destroy(&self, api: &mut dyn GpuApi) {
        GpuBuffer::destroy(self, api)
    }
}
