//! Meshwork engine crate.
//!
//! GPU-resident geometry for a real-time 3D viewer: typed vertex buffers with
//! lazily created GPU storage, meshes that group buffers under a transform and
//! shader program, and a renderer that walks the mesh collection once per
//! frame. Buffers can be filled from any thread while the render thread draws.
//!
//! `render` is the core. `device`, `window`, `core` and `time` host it on a
//! winit window with a wgpu surface.

pub mod core;
pub mod device;
pub mod logging;
pub mod render;
pub mod time;
pub mod window;
