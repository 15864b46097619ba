//! Per-chunk GPU mesh slots for streamed terrain geometry.
//!
//! Each live chunk owns a vertex and an index buffer. Updates that fit the
//! existing allocations are written in place; growth swaps in larger
//! buffers and retires the old ones through the deferred free queue so an
//! in-flight frame never loses the memory it is drawing from.

use glam::Vec3;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use wgpu::util::DeviceExt;

use crate::renderer::context::{DeferredFreeQueue, RenderContext};
use crate::renderer::render_system::{Aabb, DynamicDrawable};
use crate::terrain::types::{ChunkKey, ChunkUpdate, GeometryData, TerrainVertex};

struct ChunkSlot {
    vertex_buffer: Arc<wgpu::Buffer>,
    index_buffer: Arc<wgpu::Buffer>,
    /// Allocation sizes in elements, not bytes.
    vertex_capacity: usize,
    index_capacity: usize,
    index_count: u32,
    bounds: Aabb,
}

/// What `apply_updates` did to a chunk, so the caller can mirror the change
/// into its drawable registry.
pub enum SlotEvent {
    /// Chunk gained or replaced geometry.
    Upserted(ChunkKey, DynamicDrawable),
    /// Chunk became empty and its slot was retired.
    Removed(ChunkKey),
}

#[derive(Default)]
pub struct MeshChunkRenderer {
    slots: FxHashMap<ChunkKey, ChunkSlot>,
}

impl MeshChunkRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_resident(&self, key: ChunkKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Apply a batch of chunk updates, returning one event per change.
    /// Empty updates for chunks that were never resident are dropped
    /// silently.
    pub fn apply_updates(
        &mut self,
        ctx: &RenderContext,
        frame_index: u64,
        updates: &[ChunkUpdate],
        free_queue: &mut DeferredFreeQueue,
    ) -> Vec<SlotEvent> {
        let mut events = Vec::new();
        for update in updates {
            if update.empty {
                if let Some(slot) = self.slots.remove(&update.key) {
                    free_queue.push(frame_index, slot.vertex_buffer);
                    free_queue.push(frame_index, slot.index_buffer);
                    events.push(SlotEvent::Removed(update.key));
                }
                continue;
            }
            let drawable = self.upsert(ctx, frame_index, update, free_queue);
            events.push(SlotEvent::Upserted(update.key, drawable));
        }
        events
    }

    /// Drop every slot, retiring all buffers.
    pub fn clear(&mut self, frame_index: u64, free_queue: &mut DeferredFreeQueue) {
        for (_, slot) in self.slots.drain() {
            free_queue.push(frame_index, slot.vertex_buffer);
            free_queue.push(frame_index, slot.index_buffer);
        }
    }

    fn upsert(
        &mut self,
        ctx: &RenderContext,
        frame_index: u64,
        update: &ChunkUpdate,
        free_queue: &mut DeferredFreeQueue,
    ) -> DynamicDrawable {
        let geometry = &update.geometry;
        let bounds = geometry_bounds(geometry);

        let slot = match self.slots.entry(update.key) {
            // A fresh slot's buffers are created with the data in place.
            Entry::Vacant(entry) => entry.insert(ChunkSlot {
                vertex_buffer: Arc::new(create_vertex_buffer(ctx, update.key, geometry)),
                index_buffer: Arc::new(create_index_buffer(ctx, update.key, geometry)),
                vertex_capacity: geometry.vertices.len(),
                index_capacity: geometry.indices.len(),
                index_count: geometry.indices.len() as u32,
                bounds,
            }),
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();

                if geometry.vertices.len() <= slot.vertex_capacity {
                    ctx.queue.write_buffer(
                        &slot.vertex_buffer,
                        0,
                        bytemuck::cast_slice(&geometry.vertices),
                    );
                } else {
                    let old = std::mem::replace(
                        &mut slot.vertex_buffer,
                        Arc::new(create_vertex_buffer(ctx, update.key, geometry)),
                    );
                    free_queue.push(frame_index, old);
                    slot.vertex_capacity = geometry.vertices.len();
                }

                if geometry.indices.len() <= slot.index_capacity {
                    ctx.queue.write_buffer(
                        &slot.index_buffer,
                        0,
                        bytemuck::cast_slice(&geometry.indices),
                    );
                } else {
                    let old = std::mem::replace(
                        &mut slot.index_buffer,
                        Arc::new(create_index_buffer(ctx, update.key, geometry)),
                    );
                    free_queue.push(frame_index, old);
                    slot.index_capacity = geometry.indices.len();
                }

                slot.index_count = geometry.indices.len() as u32;
                slot.bounds = bounds;
                slot
            }
        };

        DynamicDrawable {
            vertex_buffer: slot.vertex_buffer.clone(),
            index_buffer: slot.index_buffer.clone(),
            index_count: slot.index_count,
            bounds: slot.bounds,
        }
    }
}

fn geometry_bounds(geometry: &GeometryData) -> Aabb {
    Aabb::from_points(geometry.vertices.iter().map(|v| Vec3::from(v.position)))
        .unwrap_or(Aabb { min: Vec3::ZERO, max: Vec3::ZERO })
}

fn create_vertex_buffer(
    ctx: &RenderContext,
    key: ChunkKey,
    geometry: &GeometryData,
) -> wgpu::Buffer {
    ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("Chunk VB ({},{},{})", key.x, key.y, key.z)),
        contents: bytemuck::cast_slice::<TerrainVertex, u8>(&geometry.vertices),
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
    })
}

fn create_index_buffer(
    ctx: &RenderContext,
    key: ChunkKey,
    geometry: &GeometryData,
) -> wgpu::Buffer {
    ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("Chunk IB ({},{},{})", key.x, key.y, key.z)),
        contents: bytemuck::cast_slice(&geometry.indices),
        usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
    })
}
