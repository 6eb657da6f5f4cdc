//! Headless GPU API.
//!
//! Performs no GPU work. Shader text is validated exactly like the wgpu
//! backend, and every storage allocation, upload and draw is recorded so
//! tests and tooling can inspect what a render pass would have submitted.

use std::collections::HashMap;

use glam::Mat4;

use super::api::{
    ApiError, AttributeBinding, AttributeSlot, DrawCall, GpuApi, HandleAllocator, ProgramId,
    ShaderStage, StageId, StorageId, UniformLocation, UsageHint, VertexStorageDesc,
};
use super::wgsl::{self, ValidatedStage, VertexInput};

/// A draw as submitted, with the matrix uniform in effect at the time.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RecordedDraw {
    pub call: DrawCall,
    pub mvp: Option<Mat4>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RecordedUpload {
    pub storage: StorageId,
    pub bytes: usize,
    pub usage: UsageHint,
}

#[derive(Debug)]
struct HeadlessProgram {
    vertex: naga::Module,
    inputs: Vec<VertexInput>,
    mvp: HashMap<UniformLocation, Mat4>,
}

#[derive(Debug)]
struct HeadlessStorage {
    stride: u64,
    attributes: Vec<AttributeSlot>,
    contents: Vec<u8>,
}

/// Recording [`GpuApi`] implementation.
#[derive(Debug, Default)]
pub struct HeadlessApi {
    ids: HandleAllocator,

    stages: HashMap<StageId, ValidatedStage>,
    programs: HashMap<ProgramId, HeadlessProgram>,
    storage: HashMap<StorageId, HeadlessStorage>,

    draws: Vec<RecordedDraw>,
    uploads: Vec<RecordedUpload>,

    storage_created: usize,
    storage_released: usize,
    stages_released: usize,

    /// Remaining storage allocations to fail on purpose.
    failing_allocations: usize,
}

impl HeadlessApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `create_vertex_storage` fail.
    pub fn fail_next_allocations(&mut self, count: usize) {
        self.failing_allocations = count;
    }

    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    /// Returns and clears the recorded draws (one frame's worth, typically).
    pub fn take_draws(&mut self) -> Vec<RecordedDraw> {
        std::mem::take(&mut self.draws)
    }

    pub fn uploads(&self) -> &[RecordedUpload] {
        &self.uploads
    }

    pub fn take_uploads(&mut self) -> Vec<RecordedUpload> {
        std::mem::take(&mut self.uploads)
    }

    /// Number of vertex storages currently allocated.
    pub fn live_storage(&self) -> usize {
        self.storage.len()
    }

    pub fn storage_created(&self) -> usize {
        self.storage_created
    }

    pub fn storage_released(&self) -> usize {
        self.storage_released
    }

    pub fn is_storage_live(&self, storage: StorageId) -> bool {
        self.storage.contains_key(&storage)
    }

    /// Last uploaded bytes of a storage.
    pub fn storage_contents(&self, storage: StorageId) -> Option<&[u8]> {
        self.storage.get(&storage).map(|s| s.contents.as_slice())
    }

    pub fn storage_attributes(&self, storage: StorageId) -> Option<&[AttributeSlot]> {
        self.storage.get(&storage).map(|s| s.attributes.as_slice())
    }

    pub fn storage_stride(&self, storage: StorageId) -> Option<u64> {
        self.storage.get(&storage).map(|s| s.stride)
    }

    /// Compiled stages not yet released.
    pub fn live_stages(&self) -> usize {
        self.stages.len()
    }

    pub fn stages_released(&self) -> usize {
        self.stages_released
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }
}

impl GpuApi for HeadlessApi {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageId, ApiError> {
        let validated = wgsl::validate_stage(stage, source)?;
        let id = self.ids.stage();
        self.stages.insert(id, validated);
        Ok(id)
    }

    fn delete_stage(&mut self, stage: StageId) {
        if self.stages.remove(&stage).is_some() {
            self.stages_released += 1;
        }
    }

    fn link_program(
        &mut self,
        stages: &[StageId],
        bindings: &[AttributeBinding],
    ) -> Result<ProgramId, ApiError> {
        let attached = stages
            .iter()
            .map(|id| self.stages.get(id).ok_or(ApiError::UnknownHandle("shader stage")))
            .collect::<Result<Vec<_>, _>>()?;

        let linked = wgsl::link(&attached, bindings)?;
        let program = HeadlessProgram {
            vertex: linked.vertex.module.clone(),
            inputs: wgsl::vertex_inputs(linked.vertex),
            mvp: HashMap::new(),
        };

        let id = self.ids.program();
        self.programs.insert(id, program);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(&program)?;
        wgsl::find_uniform(&program.vertex, name)
    }

    fn set_uniform_mat4(&mut self, program: ProgramId, location: UniformLocation, value: &Mat4) {
        match self.programs.get_mut(&program) {
            Some(p) => {
                p.mvp.insert(location, *value);
            }
            None => log::warn!("headless: uniform write to unknown program {program:?}"),
        }
    }

    fn create_vertex_storage(&mut self, desc: &VertexStorageDesc<'_>) -> Result<StorageId, ApiError> {
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            return Err(ApiError::Allocation(format!(
                "injected failure for `{}`",
                desc.label
            )));
        }

        let id = self.ids.storage();
        self.storage.insert(
            id,
            HeadlessStorage {
                stride: desc.stride,
                attributes: desc.attributes.to_vec(),
                contents: Vec::new(),
            },
        );
        self.storage_created += 1;
        log::trace!("headless: created storage {id:?} for `{}`", desc.label);
        Ok(id)
    }

    fn delete_vertex_storage(&mut self, storage: StorageId) {
        if self.storage.remove(&storage).is_some() {
            self.storage_released += 1;
        }
    }

    fn upload_vertices(&mut self, storage: StorageId, bytes: &[u8], usage: UsageHint) {
        let Some(s) = self.storage.get_mut(&storage) else {
            log::warn!("headless: upload to unknown storage {storage:?}");
            return;
        };
        s.contents.clear();
        s.contents.extend_from_slice(bytes);
        self.uploads.push(RecordedUpload {
            storage,
            bytes: bytes.len(),
            usage,
        });
    }

    fn draw(&mut self, call: DrawCall) {
        let Some(storage) = self.storage.get(&call.storage) else {
            log::warn!("headless: draw from unknown storage {:?}", call.storage);
            return;
        };
        let Some(program) = self.programs.get(&call.program) else {
            log::warn!("headless: draw with unknown program {:?}", call.program);
            return;
        };
        if let Err(reason) = wgsl::check_vertex_layout(&program.inputs, &storage.attributes) {
            log::warn!("headless: program {:?} cannot draw {:?}: {reason}", call.program, call.storage);
            return;
        }
        let mvp = program.mvp.values().next().copied();
        self.draws.push(RecordedDraw { call, mvp });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::Topology;
    use crate::render::layout::NumericKind;
    use crate::render::wgsl::sources;

    const BINDINGS: [AttributeBinding; 2] = [
        AttributeBinding { location: 0, name: "i_position" },
        AttributeBinding { location: 2, name: "i_color" },
    ];

    fn program(api: &mut HeadlessApi) -> ProgramId {
        let v = api.compile_stage(ShaderStage::Vertex, sources::VERTEX).unwrap();
        let f = api.compile_stage(ShaderStage::Fragment, sources::FRAGMENT).unwrap();
        let p = api.link_program(&[v, f], &BINDINGS).unwrap();
        api.delete_stage(v);
        api.delete_stage(f);
        p
    }

    fn storage(api: &mut HeadlessApi) -> Result<StorageId, ApiError> {
        let attrs = [
            AttributeSlot {
                location: 0,
                offset: 0,
                components: 3,
                kind: NumericKind::Float32,
            },
            AttributeSlot {
                location: 2,
                offset: 12,
                components: 4,
                kind: NumericKind::Float32,
            },
        ];
        api.create_vertex_storage(&VertexStorageDesc {
            label: "test",
            stride: 28,
            attributes: &attrs,
        })
    }

    #[test]
    fn failed_compile_allocates_nothing() {
        let mut api = HeadlessApi::new();
        assert!(api.compile_stage(ShaderStage::Vertex, sources::BROKEN).is_err());
        assert_eq!(api.live_stages(), 0);
    }

    #[test]
    fn injected_allocation_failures() {
        let mut api = HeadlessApi::new();
        api.fail_next_allocations(1);
        assert!(matches!(storage(&mut api), Err(ApiError::Allocation(_))));
        assert!(storage(&mut api).is_ok());
        assert_eq!(api.live_storage(), 1);
    }

    #[test]
    fn draw_records_mvp() {
        let mut api = HeadlessApi::new();
        let p = program(&mut api);
        let s = storage(&mut api).unwrap();
        let loc = api.uniform_location(p, "u_mvp").unwrap();

        let m = Mat4::from_translation(glam::Vec3::X);
        api.set_uniform_mat4(p, loc, &m);
        api.draw(DrawCall {
            program: p,
            storage: s,
            topology: Topology::Lines,
            first: 0,
            count: 2,
        });

        assert_eq!(api.draws().len(), 1);
        assert_eq!(api.draws()[0].mvp, Some(m));
    }

    #[test]
    fn draw_from_released_storage_is_dropped() {
        let mut api = HeadlessApi::new();
        let p = program(&mut api);
        let s = storage(&mut api).unwrap();
        api.delete_vertex_storage(s);
        api.draw(DrawCall {
            program: p,
            storage: s,
            topology: Topology::Points,
            first: 0,
            count: 1,
        });
        assert!(api.draws().is_empty());
        assert_eq!(api.storage_released(), 1);
    }

    #[test]
    fn draw_with_mismatched_layout_is_dropped() {
        let mut api = HeadlessApi::new();
        let v = api.compile_stage(ShaderStage::Vertex, sources::FLOAT_LAYER).unwrap();
        let f = api.compile_stage(ShaderStage::Fragment, sources::FRAGMENT).unwrap();
        let p = api.link_program(&[v, f], &BINDINGS).unwrap();

        let path = [
            AttributeSlot {
                location: 0,
                offset: 0,
                components: 3,
                kind: NumericKind::Float32,
            },
            AttributeSlot {
                location: 3,
                offset: 12,
                components: 1,
                kind: NumericKind::Uint32,
            },
        ];
        let s = api
            .create_vertex_storage(&VertexStorageDesc {
                label: "path",
                stride: 16,
                attributes: &path,
            })
            .unwrap();
        api.draw(DrawCall {
            program: p,
            storage: s,
            topology: Topology::LineStrip,
            first: 0,
            count: 2,
        });
        assert!(api.draws().is_empty());

        // The storage without slot 3 cannot feed it either.
        let short = storage(&mut api).unwrap();
        api.draw(DrawCall {
            program: p,
            storage: short,
            topology: Topology::Points,
            first: 0,
            count: 1,
        });
        assert!(api.draws().is_empty());
    }
}
