//! Core engine-facing contracts.
//!
//! The stable interface between the runtime (platform loop) and the host
//! application that owns the meshes and the renderer.

mod app;
mod ctx;

pub use app::{App, AppControl};
pub use ctx::FrameCtx;
