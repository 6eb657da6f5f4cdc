//! Simulated machine toolpath, grown from a worker thread while the render
//! thread draws it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use meshwork_engine::render::{GpuBuffer, PathVertex};

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Points written per batch.
    pub batch: usize,
    /// Pause between batches.
    pub interval: Duration,
    /// The feed stops on its own after this many points.
    pub max_points: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            batch: 8,
            interval: Duration::from_millis(16),
            max_points: 20_000,
        }
    }
}

const STEPS_PER_LAYER: usize = 720;
const LAYER_HEIGHT: f32 = 0.02;
const BASE_RADIUS: f32 = 1.2;

/// Point `step` of a tapering helix, one layer per revolution.
pub fn toolpath_point(step: usize) -> PathVertex {
    let layer = step / STEPS_PER_LAYER;
    let turn = (step % STEPS_PER_LAYER) as f32 / STEPS_PER_LAYER as f32;
    let angle = turn * std::f32::consts::TAU;
    let radius = BASE_RADIUS * (1.0 - 0.015 * layer as f32).max(0.2);
    let y = (layer as f32 + turn) * LAYER_HEIGHT;

    let hue = (layer % 6) as f32 / 6.0;
    PathVertex::new(
        [radius * angle.cos(), y, radius * angle.sin()],
        [-angle.sin(), 0.0, angle.cos()],
        [0.2 + 0.8 * hue, 0.8 - 0.5 * hue, 1.0 - hue, 1.0],
        layer as u32,
    )
}

/// Owns the worker thread appending to a shared path buffer.
pub struct ToolpathFeed {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<usize>>,
}

impl ToolpathFeed {
    pub fn spawn(buffer: Arc<GpuBuffer<PathVertex>>, config: FeedConfig) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("toolpath-feed".to_owned())
            .spawn(move || {
                let mut step = buffer.len();
                while !flag.load(Ordering::Relaxed) && step < config.max_points {
                    let end = (step + config.batch).min(config.max_points);
                    buffer.extend((step..end).map(toolpath_point));
                    step = end;
                    std::thread::sleep(config.interval);
                }
                log::debug!("toolpath feed stopped at {step} points");
                step
            })
            .context("failed to spawn toolpath feed thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the worker and waits for it. Returns the point count it reached.
    pub fn stop(&mut self) -> Option<usize> {
        self.stop.store(true, Ordering::Relaxed);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(points) => Some(points),
            Err(_) => {
                log::error!("toolpath feed thread panicked");
                None
            }
        }
    }
}

impl Drop for ToolpathFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwork_engine::render::BufferOptions;

    #[test]
    fn helix_climbs_one_layer_per_turn() {
        let a = toolpath_point(0);
        let b = toolpath_point(STEPS_PER_LAYER);
        assert_eq!(a.layer, 0);
        assert_eq!(b.layer, 1);
        assert!((b.position[1] - a.position[1] - LAYER_HEIGHT).abs() < 1e-6);
        assert!((a.position[0] - BASE_RADIUS).abs() < 1e-6);
    }

    #[test]
    fn feed_fills_to_max_points() {
        let buffer = GpuBuffer::<PathVertex>::shared(BufferOptions::default());
        let mut feed = ToolpathFeed::spawn(
            Arc::clone(&buffer),
            FeedConfig {
                batch: 64,
                interval: Duration::ZERO,
                max_points: 1000,
            },
        )
        .unwrap();

        while feed.is_running() {
            std::thread::yield_now();
        }
        assert_eq!(feed.stop(), Some(1000));
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.to_vec()[999], toolpath_point(999));
    }

    #[test]
    fn stop_interrupts_feed() {
        let buffer = GpuBuffer::<PathVertex>::shared(BufferOptions::default());
        let mut feed = ToolpathFeed::spawn(
            Arc::clone(&buffer),
            FeedConfig {
                batch: 1,
                interval: Duration::from_millis(5),
                max_points: usize::MAX,
            },
        )
        .unwrap();

        let reached = feed.stop().unwrap();
        assert_eq!(buffer.len(), reached);
        assert!(!feed.is_running());
        assert_eq!(feed.stop(), None);
    }
}
