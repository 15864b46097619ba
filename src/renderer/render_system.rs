//! Registry of dynamic drawables consumed by the frame graph.

use glam::Vec3;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Axis-aligned bounding box in world space, used for frustum culling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Self { min: first, max: first };
        for p in iter {
            aabb.min = aabb.min.min(p);
            aabb.max = aabb.max.max(p);
        }
        Some(aabb)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// A mesh the renderer rebinds every frame because its buffers can be
/// swapped out from under it (terrain chunks, debris, previews).
#[derive(Clone)]
pub struct DynamicDrawable {
    pub vertex_buffer: Arc<wgpu::Buffer>,
    pub index_buffer: Arc<wgpu::Buffer>,
    pub index_count: u32,
    pub bounds: Aabb,
}

/// Handle to a registered dynamic drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawableId(u64);

/// Flat registry the frame graph iterates when recording draw calls.
/// Registration order is not draw order; sorting happens per pass.
#[derive(Default)]
pub struct RenderSystem {
    drawables: FxHashMap<DrawableId, DynamicDrawable>,
    next_id: u64,
}

impl RenderSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_dynamic(&mut self, drawable: DynamicDrawable) -> DrawableId {
        let id = DrawableId(self.next_id);
        self.next_id += 1;
        self.drawables.insert(id, drawable);
        id
    }

    /// Replace the drawable behind `id`. Stale ids are ignored with a log
    /// line rather than treated as fatal; the caller re-registers next frame.
    pub fn update_dynamic(&mut self, id: DrawableId, drawable: DynamicDrawable) {
        match self.drawables.get_mut(&id) {
            Some(slot) => *slot = drawable,
            None => log::warn!("[Renderer] update for unregistered drawable {:?}", id),
        }
    }

    pub fn unregister_dynamic(&mut self, id: DrawableId) {
        self.drawables.remove(&id);
    }

    pub fn is_dynamic_registered(&self, id: DrawableId) -> bool {
        self.drawables.contains_key(&id)
    }

    pub fn dynamic_count(&self) -> usize {
        self.drawables.len()
    }

    pub fn iter_dynamic(&self) -> impl Iterator<Item = (DrawableId, &DynamicDrawable)> {
        self.drawables.iter().map(|(&id, d)| (id, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_from_points() {
        let aabb = Aabb::from_points([
            Vec3::new(1.0, -2.0, 3.0),
            Vec3::new(-1.0, 5.0, 0.0),
            Vec3::new(0.0, 0.0, 7.0),
        ])
        .unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 5.0, 7.0));
        assert!(Aabb::from_points([]).is_none());
    }
}
