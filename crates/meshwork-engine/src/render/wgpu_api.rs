//! wgpu implementation of [`GpuApi`].
//!
//! Stage and link checks run through naga up front; shader modules are
//! created once a program links. Draws are recorded during the mesh
//! traversal and encoded into one render pass by [`WgpuApi::flush`]. Each
//! draw gets its own `u_mvp` slot in a dynamic-offset uniform buffer.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;

use glam::Mat4;

use super::api::{
    ApiError, AttributeBinding, AttributeSlot, DrawCall, GpuApi, HandleAllocator, ProgramId,
    ShaderStage, StageId, StorageId, Topology, UniformLocation, UsageHint, VertexStorageDesc,
};
use super::layout::NumericKind;
use super::wgsl::{self, ValidatedStage, VertexInput};
use super::{RenderCtx, RenderTarget};

/// Resource slot the per-draw MVP matrix is bound to.
pub const MVP_SLOT: UniformLocation = UniformLocation {
    group: 0,
    binding: 0,
};

/// Distance between MVP slots; the WebGPU default for
/// `min_uniform_buffer_offset_alignment`.
const UNIFORM_STRIDE: u64 = 256;
const MAT4_SIZE: u64 = std::mem::size_of::<Mat4>() as u64;
const MIN_UNIFORM_SLOTS: usize = 64;

struct Program {
    vertex: wgpu::ShaderModule,
    vertex_entry: String,
    fragment: wgpu::ShaderModule,
    fragment_entry: String,
    /// Vertex stage module, kept for uniform lookups.
    interface: naga::Module,
    /// Inputs the vertex stage reads.
    inputs: Vec<VertexInput>,
}

struct Storage {
    label: String,
    stride: u64,
    slots: Vec<AttributeSlot>,
    attributes: Vec<wgpu::VertexAttribute>,
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
    vertices: u32,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    stride: u64,
    attributes: Vec<wgpu::VertexAttribute>,
    topology: Topology,
    format: wgpu::TextureFormat,
}

#[derive(Copy, Clone)]
struct PendingDraw {
    call: DrawCall,
    slot: u32,
}

/// [`GpuApi`] backed by a wgpu device.
pub struct WgpuApi {
    device: wgpu::Device,
    queue: wgpu::Queue,
    ids: HandleAllocator,

    stages: HashMap<StageId, ValidatedStage>,
    programs: HashMap<ProgramId, Program>,
    storage: HashMap<StorageId, Storage>,

    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    rejected: HashSet<PipelineKey>,

    mvp_ubo: Option<wgpu::Buffer>,
    mvp_bind_group: Option<wgpu::BindGroup>,
    mvp_capacity: usize,

    current_mvp: HashMap<ProgramId, Mat4>,
    slots: Vec<Mat4>,
    draws: Vec<PendingDraw>,
}

impl WgpuApi {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("meshwork mvp bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: MVP_SLOT.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(MAT4_SIZE),
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("meshwork pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        Self {
            device: device.clone(),
            queue: queue.clone(),
            ids: HandleAllocator::default(),
            stages: HashMap::new(),
            programs: HashMap::new(),
            storage: HashMap::new(),
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            rejected: HashSet::new(),
            mvp_ubo: None,
            mvp_bind_group: None,
            mvp_capacity: 0,
            current_mvp: HashMap::new(),
            slots: Vec::new(),
            draws: Vec::new(),
        }
    }

    /// Draws recorded since the last flush.
    pub fn pending_draws(&self) -> usize {
        self.draws.len()
    }

    /// Drops draws recorded for a frame that will not be presented.
    pub fn begin_frame(&mut self) {
        self.draws.clear();
        self.slots.clear();
    }

    /// Encodes every pending draw into one render pass on `target`, on top of
    /// whatever the target already holds.
    pub fn flush(&mut self, ctx: &RenderCtx<'_>, target: &mut RenderTarget<'_>) {
        let draws = std::mem::take(&mut self.draws);
        let slots = std::mem::take(&mut self.slots);
        if draws.is_empty() {
            return;
        }

        self.write_mvp_slots(&slots);

        // Mutating methods must happen before borrowing pipelines immutably.
        let mut resolved = Vec::with_capacity(draws.len());
        for draw in draws {
            if let Some(key) = self.ensure_pipeline(&draw.call, ctx.surface_format) {
                resolved.push((key, draw));
            }
        }
        if resolved.is_empty() {
            return;
        }

        let Some(bind_group) = self.mvp_bind_group.as_ref() else { return };

        let mut rpass = target.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("meshwork mesh pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        for (key, draw) in &resolved {
            let Some(pipeline) = self.pipelines.get(key) else { continue };
            let Some(storage) = self.storage.get(&draw.call.storage) else { continue };
            let Some(buffer) = storage.buffer.as_ref() else { continue };

            let first = draw.call.first.min(storage.vertices);
            let end = draw.call.first.saturating_add(draw.call.count).min(storage.vertices);
            if first >= end {
                continue;
            }

            let offset = draw.slot * UNIFORM_STRIDE as u32;
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(MVP_SLOT.group, bind_group, &[offset]);
            rpass.set_vertex_buffer(0, buffer.slice(..));
            rpass.draw(first..end, 0..1);
        }
    }

    fn write_mvp_slots(&mut self, slots: &[Mat4]) {
        if slots.len() > self.mvp_capacity || self.mvp_ubo.is_none() {
            let capacity = slots.len().next_power_of_two().max(MIN_UNIFORM_SLOTS);
            let ubo = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("meshwork mvp ubo"),
                size: capacity as u64 * UNIFORM_STRIDE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("meshwork mvp bind group"),
                layout: &self.bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: MVP_SLOT.binding,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &ubo,
                        offset: 0,
                        size: NonZeroU64::new(MAT4_SIZE),
                    }),
                }],
            });
            self.mvp_ubo = Some(ubo);
            self.mvp_bind_group = Some(bind_group);
            self.mvp_capacity = capacity;
        }

        let Some(ubo) = self.mvp_ubo.as_ref() else { return };
        self.queue.write_buffer(ubo, 0, &pack_mvp_slots(slots));
    }

    fn ensure_pipeline(
        &mut self,
        call: &DrawCall,
        format: wgpu::TextureFormat,
    ) -> Option<PipelineKey> {
        let storage = self.storage.get(&call.storage)?;
        storage.buffer.as_ref()?;

        let key = PipelineKey {
            program: call.program,
            stride: storage.stride,
            attributes: storage.attributes.clone(),
            topology: call.topology,
            format,
        };
        if self.pipelines.contains_key(&key) {
            return Some(key);
        }
        if self.rejected.contains(&key) {
            return None;
        }

        let Some(program) = self.programs.get(&call.program) else {
            log::warn!("wgpu: draw names unknown program {:?}", call.program);
            return None;
        };

        if let Err(reason) = wgsl::check_vertex_layout(&program.inputs, &storage.slots) {
            log::warn!(
                "wgpu: program {:?} cannot draw `{}`: {reason}",
                call.program,
                storage.label
            );
            self.rejected.insert(key);
            return None;
        }

        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("meshwork mesh pipeline"),
                layout: Some(&self.pipeline_layout),

                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: Some(program.vertex_entry.as_str()),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: key.stride,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &key.attributes,
                    }],
                },

                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment,
                    entry_point: Some(program.fragment_entry.as_str()),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),

                primitive: wgpu::PrimitiveState {
                    topology: primitive_topology(key.topology),
                    strip_index_format: None,
                    // No depth buffer: closed meshes rely on back-face culling.
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Some(wgpu::Face::Back),
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },

                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(scope.pop()) {
            log::warn!("wgpu: pipeline for {:?} rejected: {err}", key.program);
            self.rejected.insert(key);
            return None;
        }

        log::debug!(
            "wgpu: built pipeline for {:?} ({:?}, stride {})",
            key.program,
            key.topology,
            key.stride
        );
        self.pipelines.insert(key.clone(), pipeline);
        Some(key)
    }
}

impl GpuApi for WgpuApi {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageId, ApiError> {
        let validated = wgsl::validate_stage(stage, source)?;
        let id = self.ids.stage();
        self.stages.insert(id, validated);
        Ok(id)
    }

    fn delete_stage(&mut self, stage: StageId) {
        self.stages.remove(&stage);
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

        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("meshwork vertex stage"),
            source: wgpu::ShaderSource::Wgsl(linked.vertex.source.clone().into()),
        });
        let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("meshwork fragment stage"),
            source: wgpu::ShaderSource::Wgsl(linked.fragment.source.clone().into()),
        });
        if let Some(err) = pollster::block_on(scope.pop()) {
            return Err(ApiError::Link {
                log: err.to_string(),
            });
        }

        let program = Program {
            vertex,
            vertex_entry: linked.vertex.entry_point.clone(),
            fragment,
            fragment_entry: linked.fragment.entry_point.clone(),
            interface: linked.vertex.module.clone(),
            inputs: wgsl::vertex_inputs(linked.vertex),
        };

        let id = self.ids.program();
        self.programs.insert(id, program);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.current_mvp.remove(&program);
        self.pipelines.retain(|key, _| key.program != program);
        self.rejected.retain(|key| key.program != program);
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(&program)?;
        wgsl::find_uniform(&program.interface, name)
    }

    fn set_uniform_mat4(&mut self, program: ProgramId, location: UniformLocation, value: &Mat4) {
        if location != MVP_SLOT {
            log::warn!("wgpu: only the matrix at {MVP_SLOT:?} is bound, ignoring {location:?}");
            return;
        }
        self.current_mvp.insert(program, *value);
    }

    fn create_vertex_storage(&mut self, desc: &VertexStorageDesc<'_>) -> Result<StorageId, ApiError> {
        if desc.stride == 0 {
            return Err(ApiError::Allocation(format!("`{}` has a zero stride", desc.label)));
        }
        let attributes = desc
            .attributes
            .iter()
            .map(|slot| {
                vertex_attribute(slot).ok_or_else(|| {
                    ApiError::Allocation(format!(
                        "`{}`: no vertex format for {} x {:?}",
                        desc.label, slot.components, slot.kind
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = self.ids.storage();
        self.storage.insert(
            id,
            Storage {
                label: desc.label.to_owned(),
                stride: desc.stride,
                slots: desc.attributes.to_vec(),
                attributes,
                buffer: None,
                capacity: 0,
                vertices: 0,
            },
        );
        Ok(id)
    }

    fn delete_vertex_storage(&mut self, storage: StorageId) {
        if self.storage.remove(&storage).is_none() {
            log::debug!("wgpu: release of unknown storage {storage:?}");
        }
    }

    fn upload_vertices(&mut self, storage: StorageId, bytes: &[u8], usage: UsageHint) {
        let Some(s) = self.storage.get_mut(&storage) else {
            log::warn!("wgpu: upload to unknown storage {storage:?}");
            return;
        };

        s.vertices = u32::try_from(bytes.len() as u64 / s.stride).unwrap_or(u32::MAX);
        if bytes.is_empty() {
            return;
        }

        let padded = wgpu::util::align_to(bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        if s.buffer.is_none() || padded > s.capacity {
            let capacity = storage_capacity(padded, usage);
            s.buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(s.label.as_str()),
                size: capacity,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            s.capacity = capacity;
        }

        let Some(buffer) = s.buffer.as_ref() else { return };
        if padded == bytes.len() as u64 {
            self.queue.write_buffer(buffer, 0, bytes);
        } else {
            let mut tail = bytes.to_vec();
            tail.resize(padded as usize, 0);
            self.queue.write_buffer(buffer, 0, &tail);
        }
    }

    fn draw(&mut self, call: DrawCall) {
        if !self.programs.contains_key(&call.program) {
            log::warn!("wgpu: draw names unknown program {:?}", call.program);
            return;
        }
        if !self.storage.contains_key(&call.storage) {
            log::warn!("wgpu: draw names unknown storage {:?}", call.storage);
            return;
        }

        let mvp = self
            .current_mvp
            .get(&call.program)
            .copied()
            .unwrap_or(Mat4::IDENTITY);
        let slot = self.slots.len() as u32;
        self.slots.push(mvp);
        self.draws.push(PendingDraw { call, slot });
    }
}

/// Buffer size for `len` bytes. Static data is sized exactly; data that is
/// rewritten grows in powers of two so appends rarely reallocate.
fn storage_capacity(len: u64, usage: UsageHint) -> u64 {
    match usage {
        UsageHint::Static => len,
        UsageHint::Dynamic | UsageHint::Stream => len.next_power_of_two(),
    }
}

/// Lays the matrices out at `UNIFORM_STRIDE` intervals.
fn pack_mvp_slots(slots: &[Mat4]) -> Vec<u8> {
    let stride = UNIFORM_STRIDE as usize;
    let mut bytes = vec![0u8; slots.len() * stride];
    for (i, m) in slots.iter().enumerate() {
        let at = i * stride;
        bytes[at..at + MAT4_SIZE as usize].copy_from_slice(bytemuck::bytes_of(m));
    }
    bytes
}

fn primitive_topology(topology: Topology) -> wgpu::PrimitiveTopology {
    match topology {
        Topology::Points => wgpu::PrimitiveTopology::PointList,
        Topology::Lines => wgpu::PrimitiveTopology::LineList,
        Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn vertex_format(kind: NumericKind, components: u32) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;
    Some(match (kind, components) {
        (NumericKind::Float32, 1) => F::Float32,
        (NumericKind::Float32, 2) => F::Float32x2,
        (NumericKind::Float32, 3) => F::Float32x3,
        (NumericKind::Float32, 4) => F::Float32x4,
        (NumericKind::Uint32, 1) => F::Uint32,
        (NumericKind::Uint32, 2) => F::Uint32x2,
        (NumericKind::Uint32, 3) => F::Uint32x3,
        (NumericKind::Uint32, 4) => F::Uint32x4,
        (NumericKind::Sint32, 1) => F::Sint32,
        (NumericKind::Sint32, 2) => F::Sint32x2,
        (NumericKind::Sint32, 3) => F::Sint32x3,
        (NumericKind::Sint32, 4) => F::Sint32x4,
        _ => return None,
    })
}

fn vertex_attribute(slot: &AttributeSlot) -> Option<wgpu::VertexAttribute> {
    Some(wgpu::VertexAttribute {
        format: vertex_format(slot.kind, slot.components)?,
        offset: slot.offset,
        shader_location: slot.location,
    })
}
