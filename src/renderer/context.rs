//! Device handles and frame-tagged buffer reclamation.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// GPU submissions a buffer can still be referenced by after its last use
/// was recorded. Buffers are reclaimed this many frames after release.
pub const FRAMES_IN_FLIGHT: u64 = 2;

/// Shared device and queue handles passed to everything that records GPU
/// work.
#[derive(Clone)]
pub struct RenderContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl RenderContext {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Stand up a headless context on the first available adapter. Used by
    /// offline tools and GPU tests; windowed apps wrap their swapchain
    /// device instead.
    pub fn request_headless() -> EngineResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| EngineError::GpuOperationFailed {
            operation: "request_adapter".into(),
            error: "no compatible adapter".into(),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Terrain Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| EngineError::GpuOperationFailed {
            operation: "request_device".into(),
            error: e.to_string(),
        })?;

        log::info!("[Renderer] headless context on {}", adapter.get_info().name);
        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }
}

/// Frame-tagged queue of retired GPU buffers.
///
/// A buffer handed to `push` at frame N is dropped once `reclaim` sees a
/// frame >= N + FRAMES_IN_FLIGHT, at which point no queued submission can
/// still read it. Generic over the resource type so the bookkeeping is
/// testable without a device.
pub struct DeferredFreeQueue<T = wgpu::Buffer> {
    entries: VecDeque<(u64, Arc<T>)>,
}

impl<T> Default for DeferredFreeQueue<T> {
    fn default() -> Self {
        Self { entries: VecDeque::new() }
    }
}

impl<T> DeferredFreeQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame_index: u64, buffer: Arc<T>) {
        self.entries.push_back((frame_index, buffer));
    }

    pub fn reclaim(&mut self, current_frame: u64) {
        while let Some(&(released, _)) = self.entries.front() {
            if released + FRAMES_IN_FLIGHT > current_frame {
                break;
            }
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reclaim_waits_for_frames_in_flight() {
        let mut q: DeferredFreeQueue<u32> = DeferredFreeQueue::new();
        q.push(10, Arc::new(0));
        q.push(11, Arc::new(1));

        q.reclaim(10);
        assert_eq!(q.len(), 2);
        q.reclaim(11);
        assert_eq!(q.len(), 2);
        q.reclaim(12);
        assert_eq!(q.len(), 1);
        q.reclaim(13);
        assert!(q.is_empty());
    }

    #[test]
    fn reclaim_on_empty_is_a_noop() {
        let mut q: DeferredFreeQueue<u32> = DeferredFreeQueue::new();
        q.reclaim(100);
        assert!(q.is_empty());
    }
}
