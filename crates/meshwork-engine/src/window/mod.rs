//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and a single Window, and wires them to the GPU
//! layer and the host [`crate::core::App`].

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
