//! Rendering API seam.
//!
//! Buffers, meshes and the renderer issue every GPU operation through
//! [`GpuApi`]. The production implementation is [`WgpuApi`]; [`HeadlessApi`]
//! records calls without a device and backs the test suite.
//!
//! There is no ambient "current program" or "bound buffer": every call names
//! the objects it operates on.
//!
//! [`WgpuApi`]: super::WgpuApi
//! [`HeadlessApi`]: super::HeadlessApi

use std::num::NonZeroU32;

use glam::Mat4;
use thiserror::Error;

use super::layout::NumericKind;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            #[inline]
            pub fn new(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            #[inline]
            pub fn get(self) -> u32 {
                self.0.get()
            }
        }
    };
}

handle!(
    /// Compiled, not yet linked, shader stage.
    StageId
);
handle!(
    /// Linked shader program.
    ProgramId
);
handle!(
    /// Vertex array + vertex buffer pair owned by one `GpuBuffer`.
    StorageId
);

/// Hands out non-zero handle values. Zero is reserved as the null handle.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    last: u32,
}

impl HandleAllocator {
    pub(crate) fn next(&mut self) -> NonZeroU32 {
        self.last = self.last.wrapping_add(1);
        NonZeroU32::new(self.last).unwrap_or_else(|| {
            self.last = 1;
            NonZeroU32::MIN
        })
    }

    pub(crate) fn stage(&mut self) -> StageId {
        StageId(self.next())
    }

    pub(crate) fn program(&mut self) -> ProgramId {
        ProgramId(self.next())
    }

    pub(crate) fn storage(&mut self) -> StorageId {
        StorageId(self.next())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
}

/// Primitive topology used by a buffer's draw call.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

/// Storage usage hint for uploads.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum UsageHint {
    /// Written once, drawn many times.
    #[default]
    Static,
    /// Rewritten occasionally.
    Dynamic,
    /// Rewritten nearly every frame.
    Stream,
}

/// Fixed attribute slot for a named vertex shader input.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AttributeBinding {
    pub location: u32,
    pub name: &'static str,
}

/// Resolved uniform (resource group + binding index).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct UniformLocation {
    pub group: u32,
    pub binding: u32,
}

/// One enabled vertex attribute slot inside a vertex storage.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AttributeSlot {
    pub location: u32,
    pub offset: u64,
    pub components: u32,
    pub kind: NumericKind,
}

/// Describes the memory layout a vertex storage is created with.
#[derive(Debug, Copy, Clone)]
pub struct VertexStorageDesc<'a> {
    pub label: &'a str,
    /// Size of one vertex record in bytes.
    pub stride: u64,
    pub attributes: &'a [AttributeSlot],
}

/// A single draw request. `first..first + count` is the vertex range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub storage: StorageId,
    pub topology: Topology,
    pub first: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{stage:?} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },

    #[error("shader program failed to link: {log}")]
    Link { log: String },

    #[error("{0:?} shaders are not supported by this backend")]
    UnsupportedStage(ShaderStage),

    #[error("vertex storage allocation failed: {0}")]
    Allocation(String),

    #[error("unknown {0} handle")]
    UnknownHandle(&'static str),
}

/// Primitive GPU operations used by the render core.
///
/// Implementations are driven from a single render thread.
pub trait GpuApi {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Compiles one stage. On failure the stage leaves nothing allocated.
    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageId, ApiError>;

    fn delete_stage(&mut self, stage: StageId);

    /// Links compiled stages into a program, honoring the attribute bindings.
    ///
    /// The stages stay alive; callers release them with [`GpuApi::delete_stage`].
    fn link_program(
        &mut self,
        stages: &[StageId],
        bindings: &[AttributeBinding],
    ) -> Result<ProgramId, ApiError>;

    fn delete_program(&mut self, program: ProgramId);

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Sets a matrix uniform used by subsequent draws with `program`.
    fn set_uniform_mat4(&mut self, program: ProgramId, location: UniformLocation, value: &Mat4);

    fn create_vertex_storage(&mut self, desc: &VertexStorageDesc<'_>) -> Result<StorageId, ApiError>;

    fn delete_vertex_storage(&mut self, storage: StorageId);

    /// Replaces the whole content of `storage` with `bytes`.
    fn upload_vertices(&mut self, storage: StorageId, bytes: &[u8], usage: UsageHint);

    fn draw(&mut self, call: DrawCall);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_never_zero() {
        let mut ids = HandleAllocator::default();
        let a = ids.stage();
        let b = ids.program();
        let c = ids.storage();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(c.get(), 3);
        assert!(StorageId::new(0).is_none());
    }

    #[test]
    fn defaults() {
        assert_eq!(Topology::default(), Topology::Triangles);
        assert_eq!(UsageHint::default(), UsageHint::Static);
    }
}
