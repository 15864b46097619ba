//! Staging-buffer readback and triangle bucketing for the GPU backend.

use futures::channel::oneshot;
use glam::{IVec3, UVec3, Vec3};

use crate::error::{EngineError, EngineResult, TerrainErrorContext};
use crate::terrain::gpu::pipeline::{GpuTri, GPU_TRI_SIZE};
use crate::terrain::types::{ChunkKey, ChunkUpdate, GeometryData, TerrainVertex};

/// One submitted remesh awaiting readback. Holds only the staging buffers;
/// the storage-side buffers are released once the copies are encoded.
pub struct PendingReadback {
    pub tri_staging: wgpu::Buffer,
    pub counter_staging: wgpu::Buffer,
    /// First chunk key of the dispatched chunk box.
    pub chunk_min: IVec3,
    /// Chunk box extent per axis.
    pub chunk_dims: UVec3,
    /// Triangle pool capacity this submission was given.
    pub max_tris: u32,
}

pub struct ReadbackResult {
    pub updates: Vec<ChunkUpdate>,
    /// Triangles the shader tried to emit.
    pub attempted: u64,
    /// Triangles that fit in the pool.
    pub stored: u64,
}

impl PendingReadback {
    /// Chunk key for a linearized slot of the dispatched box (x fastest).
    pub fn decode_chunk_key(&self, slot: u32) -> ChunkKey {
        let dx = self.chunk_dims.x;
        let dy = self.chunk_dims.y;
        let x = slot % dx;
        let y = (slot / dx) % dy;
        let z = slot / (dx * dy);
        ChunkKey::new(
            self.chunk_min.x + x as i32,
            self.chunk_min.y + y as i32,
            self.chunk_min.z + z as i32,
        )
    }

    /// Map both staging buffers, block for the GPU, and bucket the triangle
    /// pool into per-chunk geometry.
    pub fn resolve(self, device: &wgpu::Device) -> EngineResult<ReadbackResult> {
        let tri_slice = self.tri_staging.slice(..);
        let (tri_tx, tri_rx) = oneshot::channel();
        tri_slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tri_tx.send(r);
        });

        let counter_slice = self.counter_staging.slice(..);
        let (cnt_tx, cnt_rx) = oneshot::channel();
        counter_slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = cnt_tx.send(r);
        });

        device.poll(wgpu::Maintain::Wait);

        pollster::block_on(tri_rx)
            .terrain_context("tri staging map callback dropped")?
            .map_err(|e| map_error("terrain tri staging", &e.to_string()))?;
        pollster::block_on(cnt_rx)
            .terrain_context("counter staging map callback dropped")?
            .map_err(|e| map_error("terrain counter staging", &e.to_string()))?;

        let counters: Vec<u32> = {
            let data = counter_slice.get_mapped_range();
            bytemuck::cast_slice(&data).to_vec()
        };
        self.counter_staging.unmap();

        let attempted = counters[0] as u64;
        let stored = attempted.min(self.max_tris as u64);

        let chunk_count =
            (self.chunk_dims.x * self.chunk_dims.y * self.chunk_dims.z) as usize;
        let mut buckets: Vec<Vec<GpuTri>> = vec![Vec::new(); chunk_count];
        {
            let data = tri_slice.get_mapped_range();
            let bytes = &data[..stored as usize * GPU_TRI_SIZE as usize];
            for tri in bytemuck::cast_slice::<u8, GpuTri>(bytes) {
                if (tri.chunk as usize) < chunk_count {
                    buckets[tri.chunk as usize].push(*tri);
                }
            }
        }
        self.tri_staging.unmap();

        let mut updates = Vec::with_capacity(chunk_count);
        for (slot, mut tris) in buckets.into_iter().enumerate() {
            let key = self.decode_chunk_key(slot as u32);
            if tris.is_empty() {
                if counters[1 + slot] == 0 {
                    // Remeshed and genuinely empty.
                    updates.push(ChunkUpdate::emptied(key));
                }
                // Attempted but dropped by pool overflow: keep the chunk's
                // previous geometry, it heals on the next remesh.
                continue;
            }
            // Atomic allocation interleaves cells; a stable sort by emitting
            // cell restores a deterministic triangle order.
            tris.sort_by_key(|t| t.cell);
            updates.push(ChunkUpdate::filled(key, geometry_from(&tris)));
        }

        Ok(ReadbackResult { updates, attempted, stored })
    }
}

fn geometry_from(tris: &[GpuTri]) -> GeometryData {
    let mut geometry = GeometryData {
        vertices: Vec::with_capacity(tris.len() * 3),
        indices: Vec::with_capacity(tris.len() * 3),
    };
    for tri in tris {
        for v in &tri.verts {
            let position = Vec3::new(v[0], v[1], v[2]);
            let normal = Vec3::new(v[3], v[4], v[5]);
            geometry.indices.push(geometry.vertices.len() as u32);
            geometry.vertices.push(TerrainVertex::new(position, normal));
        }
    }
    geometry
}

fn map_error(buffer: &str, error: &str) -> EngineError {
    EngineError::BufferMapping { buffer: buffer.to_string(), error: error.to_string() }
}
