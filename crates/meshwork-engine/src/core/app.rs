use winit::event::WindowEvent;

use crate::device::Gpu;

use super::ctx::FrameCtx;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract implemented by hosts of the renderer.
pub trait App {
    /// Called once, after the window and GPU context exist. Create GPU-side
    /// state (APIs, shader programs) here.
    fn on_start(&mut self, gpu: &mut Gpu<'_>) -> anyhow::Result<()>;

    /// Called for window events before the runtime handles them.
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        let _ = event;
        AppControl::Continue
    }

    /// Called once per rendered frame.
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl;

    /// Called once when the event loop exits, while the GPU context is still
    /// alive.
    fn on_shutdown(&mut self) {}
}
