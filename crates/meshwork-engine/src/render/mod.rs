//! Mesh rendering subsystem.
//!
//! - `layout`: vertex record types and their attribute layouts.
//! - `buffer`: typed, lockable vertex arrays with lazily created GPU storage.
//! - `mesh`: buffers + transform + shader program.
//! - `renderer`: the ordered mesh collection and per-frame traversal.
//!
//! Everything GPU-facing goes through [`GpuApi`]. [`WgpuApi`] drives a real
//! device; [`HeadlessApi`] records calls for tests and tooling.
//!
//! Convention: right-handed world space, matrices are column-major `glam`
//! types, and the MVP is `global * local`.

pub mod api;
mod buffer;
mod ctx;
mod headless;
pub mod layout;
mod mesh;
mod renderer;
mod shader;
mod wgpu_api;
mod wgsl;

pub use api::{DrawCall, GpuApi, ProgramId, ShaderStage, StorageId, Topology, UsageHint};
pub use buffer::{AnyBuffer, BufferOptions, BufferWriter, GpuBuffer};
pub use ctx::{RenderCtx, RenderTarget};
pub use headless::{HeadlessApi, RecordedDraw, RecordedUpload};
pub use layout::{ColoredVertex, PathVertex, Vertex};
pub use mesh::{Mesh, MeshError, Transform};
pub use renderer::{MAX_BUFFER_ELEMENTS, RenderStats, Renderer, RendererConfig};
pub use shader::{
    ATTRIBUTE_BINDINGS, COLOR_ATTRIBUTE, MVP_UNIFORM, POSITION_ATTRIBUTE, ShaderError,
    compile_and_link,
};
pub use wgpu_api::{MVP_SLOT, WgpuApi};
