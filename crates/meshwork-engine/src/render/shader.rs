//! Shader program loading.

use thiserror::Error;

use super::api::{ApiError, AttributeBinding, GpuApi, ProgramId, ShaderStage};

/// Vertex input name bound to attribute slot 0.
pub const POSITION_ATTRIBUTE: &str = "i_position";

/// Vertex input name bound to attribute slot 2.
pub const COLOR_ATTRIBUTE: &str = "i_color";

/// Model-view-projection matrix uniform.
pub const MVP_UNIFORM: &str = "u_mvp";

/// Fixed attribute bindings applied to every program, so vertex layout order
/// lines up with shader inputs without per-mesh configuration.
pub const ATTRIBUTE_BINDINGS: [AttributeBinding; 2] = [
    AttributeBinding {
        location: 0,
        name: POSITION_ATTRIBUTE,
    },
    AttributeBinding {
        location: 2,
        name: COLOR_ATTRIBUTE,
    },
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShaderError {
    #[error("{stage:?} stage failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },

    #[error("program failed to link:\n{log}")]
    Link { log: String },
}

impl ShaderError {
    /// Compiler or linker output.
    pub fn diagnostic(&self) -> &str {
        match self {
            ShaderError::Compile { log, .. } | ShaderError::Link { log } => log,
        }
    }

    fn from_compile(stage: ShaderStage, err: ApiError) -> Self {
        match err {
            ApiError::Compile { stage, log } => ShaderError::Compile { stage, log },
            other => ShaderError::Compile {
                stage,
                log: other.to_string(),
            },
        }
    }

    fn from_link(err: ApiError) -> Self {
        match err {
            ApiError::Link { log } => ShaderError::Link { log },
            other => ShaderError::Link {
                log: other.to_string(),
            },
        }
    }
}

/// Compiles and links a vertex + fragment (+ optional geometry) program.
///
/// Every present stage is compiled so all diagnostics reach the log. A failed
/// stage or link is reported through `log::error!` and returned as an error;
/// nothing here panics. Intermediate stage objects are always released before
/// returning.
///
/// The program is not made "current": draws name their program explicitly.
pub fn compile_and_link(
    api: &mut dyn GpuApi,
    vertex_source: &str,
    fragment_source: &str,
    geometry_source: Option<&str>,
) -> Result<ProgramId, ShaderError> {
    let stages = [
        (ShaderStage::Vertex, Some(vertex_source)),
        (ShaderStage::Fragment, Some(fragment_source)),
        (ShaderStage::Geometry, geometry_source),
    ];

    let mut compiled = Vec::with_capacity(stages.len());
    let mut failure = None;

    for (stage, source) in stages {
        let Some(source) = source else { continue };
        match api.compile_stage(stage, source) {
            Ok(id) => compiled.push(id),
            Err(err) => {
                let err = ShaderError::from_compile(stage, err);
                log::error!("{err}");
                failure.get_or_insert(err);
            }
        }
    }

    let result = match failure {
        Some(err) => Err(err),
        None => api
            .link_program(&compiled, &ATTRIBUTE_BINDINGS)
            .map_err(|err| {
                let err = ShaderError::from_link(err);
                log::error!("{err}");
                err
            }),
    };

    for id in compiled {
        api.delete_stage(id);
    }

    if let Ok(program) = &result {
        log::debug!("linked shader program {program:?} on {}", api.name());
    }
    result
}
