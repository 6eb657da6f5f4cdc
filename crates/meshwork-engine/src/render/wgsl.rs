//! WGSL stage validation and program interface checks.
//!
//! Both backends validate shader text with naga before creating anything, so
//! compile diagnostics are synchronous and identical with or without a device.

use super::api::{ApiError, AttributeBinding, AttributeSlot, ShaderStage, UniformLocation};
use super::layout::NumericKind;
use super::shader::MVP_UNIFORM;
use super::wgpu_api::MVP_SLOT;

/// A stage that parsed and passed validation.
#[derive(Debug)]
pub(crate) struct ValidatedStage {
    pub stage: ShaderStage,
    pub source: String,
    pub module: naga::Module,
    pub entry_point: String,
}

/// One `@location` input of a vertex entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VertexInput {
    pub name: String,
    pub location: u32,
    /// `None` for scalar types no vertex format can feed.
    pub kind: Option<NumericKind>,
}

/// The stages of a program that passed the link checks.
#[derive(Debug, Copy, Clone)]
pub(crate) struct LinkedStages<'a> {
    pub vertex: &'a ValidatedStage,
    pub fragment: &'a ValidatedStage,
}

fn naga_stage(stage: ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderStage::Geometry => None,
    }
}

pub(crate) fn validate_stage(stage: ShaderStage, source: &str) -> Result<ValidatedStage, ApiError> {
    let target = naga_stage(stage).ok_or(ApiError::UnsupportedStage(stage))?;

    let module = naga::front::wgsl::parse_str(source).map_err(|e| ApiError::Compile {
        stage,
        log: e.emit_to_string(source),
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| ApiError::Compile {
        stage,
        log: e.emit_to_string(source),
    })?;

    let entry_point = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == target)
        .map(|ep| ep.name.clone())
        .ok_or_else(|| ApiError::Compile {
            stage,
            log: format!("module has no {stage:?} entry point"),
        })?;

    Ok(ValidatedStage {
        stage,
        source: source.to_owned(),
        module,
        entry_point,
    })
}

/// Checks that the stages form a vertex + fragment program, that every bound
/// attribute name sits on its fixed location, and that the only resource
/// either stage declares is the `u_mvp` matrix at [`MVP_SLOT`].
pub(crate) fn link<'a>(
    stages: &[&'a ValidatedStage],
    bindings: &[AttributeBinding],
) -> Result<LinkedStages<'a>, ApiError> {
    let mut vertex = None;
    let mut fragment = None;

    for &s in stages {
        let slot = match s.stage {
            ShaderStage::Vertex => &mut vertex,
            ShaderStage::Fragment => &mut fragment,
            ShaderStage::Geometry => return Err(ApiError::UnsupportedStage(s.stage)),
        };
        if slot.replace(s).is_some() {
            return Err(ApiError::Link {
                log: format!("more than one {:?} stage attached", s.stage),
            });
        }
    }

    let vertex = vertex.ok_or_else(|| ApiError::Link {
        log: "no vertex stage attached".to_owned(),
    })?;
    let fragment = fragment.ok_or_else(|| ApiError::Link {
        log: "no fragment stage attached".to_owned(),
    })?;

    for input in vertex_inputs(vertex) {
        let Some(b) = bindings.iter().find(|b| b.name == input.name) else { continue };
        if b.location != input.location {
            return Err(ApiError::Link {
                log: format!(
                    "vertex input `{}` is declared at location {}, must be {}",
                    input.name, input.location, b.location
                ),
            });
        }
    }

    check_resources(vertex)?;
    check_resources(fragment)?;

    Ok(LinkedStages { vertex, fragment })
}

/// Every program shares one pipeline layout: a single `mat4x4<f32>` uniform
/// at [`MVP_SLOT`]. Declared resources must fit it, used or not.
fn check_resources(stage: &ValidatedStage) -> Result<(), ApiError> {
    let module = &stage.module;
    let fail = |log: String| ApiError::Link {
        log: format!("{:?} stage: {log}", stage.stage),
    };

    for (_, var) in module.global_variables.iter() {
        if matches!(
            var.space,
            naga::AddressSpace::Private | naga::AddressSpace::WorkGroup
        ) {
            continue;
        }

        let name = var.name.as_deref().unwrap_or("<unnamed>");
        if name != MVP_UNIFORM {
            return Err(fail(format!(
                "resource `{name}` is not bound; `{MVP_UNIFORM}` is the only resource available"
            )));
        }
        if var.space != naga::AddressSpace::Uniform {
            return Err(fail(format!("`{MVP_UNIFORM}` must be declared `var<uniform>`")));
        }

        let at = var.binding.as_ref().map(|rb| UniformLocation {
            group: rb.group,
            binding: rb.binding,
        });
        if at != Some(MVP_SLOT) {
            return Err(fail(format!(
                "`{MVP_UNIFORM}` must be at @group({}) @binding({}), found {at:?}",
                MVP_SLOT.group, MVP_SLOT.binding
            )));
        }

        let is_mat4 = matches!(
            module.types[var.ty].inner,
            naga::TypeInner::Matrix {
                columns: naga::VectorSize::Quad,
                rows: naga::VectorSize::Quad,
                scalar,
            } if scalar == naga::Scalar::F32
        );
        if !is_mat4 {
            return Err(fail(format!("`{MVP_UNIFORM}` must be a mat4x4<f32>")));
        }
    }
    Ok(())
}

/// Checks that a storage layout feeds every input the vertex stage reads,
/// with the scalar kind the input declares.
pub(crate) fn check_vertex_layout(
    inputs: &[VertexInput],
    attributes: &[AttributeSlot],
) -> Result<(), String> {
    for input in inputs {
        let Some(attr) = attributes.iter().find(|a| a.location == input.location) else {
            return Err(format!(
                "input `{}` reads location {}, which the layout does not provide",
                input.name, input.location
            ));
        };
        if input.kind != Some(attr.kind) {
            return Err(format!(
                "input `{}` at location {} is {:?}, the attribute holds {:?}",
                input.name, input.location, input.kind, attr.kind
            ));
        }
    }
    Ok(())
}

fn input_kind(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<NumericKind> {
    let scalar = match module.types[ty].inner {
        naga::TypeInner::Scalar(scalar) | naga::TypeInner::Vector { scalar, .. } => scalar,
        _ => return None,
    };
    match (scalar.kind, scalar.width) {
        (naga::ScalarKind::Float, 4) => Some(NumericKind::Float32),
        (naga::ScalarKind::Uint, 4) => Some(NumericKind::Uint32),
        (naga::ScalarKind::Sint, 4) => Some(NumericKind::Sint32),
        _ => None,
    }
}

/// `@location` inputs of the stage's entry point, flattened through struct
/// arguments.
pub(crate) fn vertex_inputs(stage: &ValidatedStage) -> Vec<VertexInput> {
    let module = &stage.module;
    let Some(ep) = module
        .entry_points
        .iter()
        .find(|ep| ep.name == stage.entry_point)
    else {
        return Vec::new();
    };

    let mut inputs = Vec::new();
    for arg in &ep.function.arguments {
        match (&arg.binding, &module.types[arg.ty].inner) {
            (Some(naga::Binding::Location { location, .. }), _) => inputs.push(VertexInput {
                name: arg.name.clone().unwrap_or_default(),
                location: *location,
                kind: input_kind(module, arg.ty),
            }),
            (None, naga::TypeInner::Struct { members, .. }) => {
                for m in members {
                    if let Some(naga::Binding::Location { location, .. }) = &m.binding {
                        inputs.push(VertexInput {
                            name: m.name.clone().unwrap_or_default(),
                            location: *location,
                            kind: input_kind(module, m.ty),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    inputs
}

/// Looks up a uniform-space global by name.
pub(crate) fn find_uniform(module: &naga::Module, name: &str) -> Option<UniformLocation> {
    module.global_variables.iter().find_map(|(_, var)| {
        if var.name.as_deref() != Some(name) || var.space != naga::AddressSpace::Uniform {
            return None;
        }
        var.binding.as_ref().map(|rb| UniformLocation {
            group: rb.group,
            binding: rb.binding,
        })
    })
}
