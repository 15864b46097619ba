//! GPU compute backend: brush blending and marching cubes on the device,
//! with a double-buffered asynchronous readback ring.
//!
//! `request_brush` and `request_remesh` encode and submit compute work
//! immediately; results stay on the GPU until `try_fetch` resolves the
//! oldest in-flight submission. At most [`RB_FRAME_COUNT`] submissions are
//! in flight; pushing a third forces the oldest to resolve so a stalled
//! caller never grows the queue without bound.

pub mod pipeline;
pub mod readback;

use std::collections::VecDeque;
use std::sync::Arc;

use glam::{IVec3, UVec3, Vec3};
use wgpu::util::DeviceExt;

use crate::error::{EngineError, EngineResult};
use crate::renderer::RenderContext;
use crate::terrain::tables::{EDGE_TABLE, TRI_TABLE};
use crate::terrain::types::*;
use crate::terrain::SharedField;

use pipeline::{BrushUniforms, MeshUniforms, TerrainPipelines, GPU_TRI_SIZE, WORKGROUP_EDGE};
use readback::PendingReadback;

/// Readback queue depth.
pub const RB_FRAME_COUNT: usize = 2;

/// Per-chunk triangle budget used to size the shared pool of a submission.
pub const MAX_TRIS_PER_CHUNK: u32 = 20_480;

struct TableBuffers {
    edge: wgpu::Buffer,
    tri: wgpu::Buffer,
}

/// Running count of triangles dropped by pool overflow.
#[derive(Default)]
struct OverflowTracker {
    total: u64,
}

impl OverflowTracker {
    fn record(&mut self, result: &readback::ReadbackResult) {
        let dropped = result.attempted.saturating_sub(result.stored);
        if dropped > 0 {
            self.total += dropped;
            log::warn!(
                "[GpuTerrain] triangle pool overflow: {} of {} dropped",
                dropped,
                result.attempted
            );
        }
    }
}

pub struct GpuTerrainBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    grid: GridDesc,
    field: SharedField,
    pipelines: TerrainPipelines,
    field_buffer: wgpu::Buffer,
    /// Lookup tables, uploaded on the first remesh dispatch.
    tables: Option<TableBuffers>,
    pending: VecDeque<PendingReadback>,
    /// Updates force-resolved when the ring was full, drained by `try_fetch`.
    ready: Vec<ChunkUpdate>,
    overflow: OverflowTracker,
}

impl GpuTerrainBackend {
    pub fn new(ctx: &RenderContext, grid: GridDesc, field: SharedField) -> EngineResult<Self> {
        validate_grid(&grid)?;
        let pipelines = TerrainPipelines::new(&ctx.device)?;
        let field_buffer = create_field_buffer(&ctx.device, &grid);
        let backend = Self {
            device: ctx.device.clone(),
            queue: ctx.queue.clone(),
            grid,
            field,
            pipelines,
            field_buffer,
            tables: None,
            pending: VecDeque::with_capacity(RB_FRAME_COUNT),
            ready: Vec::new(),
            overflow: OverflowTracker::default(),
        };
        backend.upload_field();
        Ok(backend)
    }

    /// Total triangles dropped by pool overflow since construction.
    pub fn overflowed_triangles(&self) -> u64 {
        self.overflow.total
    }

    fn upload_field(&self) {
        let field = self.field.read();
        let samples = self.grid.sample_counts();
        let expected = (samples.x * samples.y * samples.z) as usize;
        if field.len() != expected {
            log::warn!(
                "[GpuTerrain] field has {} samples, grid wants {}; skipping upload",
                field.len(),
                expected
            );
            return;
        }
        self.queue
            .write_buffer(&self.field_buffer, 0, bytemuck::cast_slice(field.as_slice()));
    }

    fn ensure_tables(&mut self) -> &TableBuffers {
        if self.tables.is_none() {
            let edge: Vec<u32> = EDGE_TABLE.iter().map(|&e| e as u32).collect();
            let tri: Vec<i32> = TRI_TABLE.iter().flatten().map(|&t| t as i32).collect();
            let edge = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Terrain Edge Table"),
                contents: bytemuck::cast_slice(&edge),
                usage: wgpu::BufferUsages::STORAGE,
            });
            let tri = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Terrain Tri Table"),
                contents: bytemuck::cast_slice(&tri),
                usage: wgpu::BufferUsages::STORAGE,
            });
            log::debug!("[GpuTerrain] uploaded marching cubes tables");
            self.tables = Some(TableBuffers { edge, tri });
        }
        self.tables.as_ref().unwrap()
    }

    /// Encode one submission: optional brush pass, then marching cubes over
    /// the chunk box, then copies into fresh staging buffers.
    fn encode(
        &mut self,
        brush: Option<BrushUniforms>,
        chunk_min: IVec3,
        chunk_max: IVec3,
        iso: f32,
    ) -> EngineResult<()> {
        self.ensure_tables();
        let tables = self.tables.as_ref().unwrap();

        let cells = self.grid.cells.as_ivec3();
        let cs = self.grid.chunk_size as i32;
        let chunk_dims = (chunk_max - chunk_min + IVec3::ONE).as_uvec3();
        let chunk_count = chunk_dims.x * chunk_dims.y * chunk_dims.z;
        let box_min_cell = chunk_min * cs;
        let box_cells = (chunk_dims.as_ivec3() * cs).min(cells - box_min_cell).as_uvec3();
        let max_tris = chunk_count * MAX_TRIS_PER_CHUNK;

        let tri_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Tri Pool"),
            size: max_tris as u64 * GPU_TRI_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let counter_zeroes = vec![0u32; 1 + chunk_count as usize];
        let counter_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Counters"),
            contents: bytemuck::cast_slice(&counter_zeroes),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        let mesh_uniforms = MeshUniforms {
            origin: self.grid.origin.to_array(),
            cell_size: self.grid.cell_size,
            cells: self.grid.cells.to_array(),
            chunk_size: self.grid.chunk_size,
            box_min_cell: box_min_cell.to_array(),
            iso,
            box_cells: box_cells.to_array(),
            max_tris,
            chunk_min: chunk_min.to_array(),
            _pad0: 0,
            chunk_dims: chunk_dims.to_array(),
            _pad1: 0,
        };
        let mesh_uniform_buffer =
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Terrain MC Uniforms"),
                contents: bytemuck::cast_slice(&[mesh_uniforms]),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mesh_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain MC BG"),
            layout: &self.pipelines.mesh_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.field_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: mesh_uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry { binding: 2, resource: tables.edge.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: tables.tri.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: tri_buffer.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: counter_buffer.as_entire_binding(),
                },
            ],
        });

        let tri_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Tri Staging"),
            size: max_tris as u64 * GPU_TRI_SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let counter_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Counter Staging"),
            size: (counter_zeroes.len() * 4) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Terrain Encoder"),
        });

        if let Some(brush_uniforms) = brush {
            let brush_uniform_buffer =
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Terrain Brush Uniforms"),
                    contents: bytemuck::cast_slice(&[brush_uniforms]),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let brush_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Terrain Brush BG"),
                layout: &self.pipelines.brush_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.field_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: brush_uniform_buffer.as_entire_binding(),
                    },
                ],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Terrain Brush Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.brush_pipeline);
            pass.set_bind_group(0, &brush_bind_group, &[]);
            let extent = UVec3::from_array(brush_uniforms.aabb_extent);
            pass.dispatch_workgroups(
                extent.x.div_ceil(WORKGROUP_EDGE),
                extent.y.div_ceil(WORKGROUP_EDGE),
                extent.z.div_ceil(WORKGROUP_EDGE),
            );
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Terrain MC Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.mesh_pipeline);
            pass.set_bind_group(0, &mesh_bind_group, &[]);
            pass.dispatch_workgroups(
                box_cells.x.div_ceil(WORKGROUP_EDGE),
                box_cells.y.div_ceil(WORKGROUP_EDGE),
                box_cells.z.div_ceil(WORKGROUP_EDGE),
            );
        }

        encoder.copy_buffer_to_buffer(
            &tri_buffer,
            0,
            &tri_staging,
            0,
            max_tris as u64 * GPU_TRI_SIZE,
        );
        encoder.copy_buffer_to_buffer(
            &counter_buffer,
            0,
            &counter_staging,
            0,
            (counter_zeroes.len() * 4) as u64,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // Ring is full: resolve the oldest submission now so the queue never
        // outgrows RB_FRAME_COUNT.
        if self.pending.len() == RB_FRAME_COUNT {
            if let Some(oldest) = self.pending.pop_front() {
                let result = oldest.resolve(&self.device)?;
                self.overflow.record(&result);
                self.ready.extend(result.updates);
            }
        }

        log::trace!(
            "[GpuTerrain] submitted {} chunks ({} cells), {} in flight",
            chunk_count,
            box_cells.x * box_cells.y * box_cells.z,
            self.pending.len() + 1
        );
        self.pending.push_back(PendingReadback {
            tri_staging,
            counter_staging,
            chunk_min,
            chunk_dims,
            max_tris,
        });
        Ok(())
    }

    /// Chunk box covering the cells whose geometry a sample AABB affects.
    fn dirty_chunk_box(&self, sample_lo: IVec3, sample_hi: IVec3) -> (IVec3, IVec3) {
        let cells = self.grid.cells.as_ivec3();
        let cell_lo = (sample_lo - IVec3::ONE).max(IVec3::ZERO);
        let cell_hi = sample_hi.min(cells - IVec3::ONE);
        (
            IVec3::from(ChunkKey::containing(cell_lo, self.grid.chunk_size)),
            IVec3::from(ChunkKey::containing(cell_hi, self.grid.chunk_size)),
        )
    }
}

impl TerrainBackend for GpuTerrainBackend {
    fn set_grid_desc(&mut self, grid: GridDesc) -> EngineResult<()> {
        validate_grid(&grid)?;
        self.grid = grid;
        self.field_buffer = create_field_buffer(&self.device, &self.grid);
        self.pending.clear();
        self.ready.clear();
        self.upload_field();
        Ok(())
    }

    fn set_field(&mut self, field: SharedField) {
        self.field = field;
        self.pending.clear();
        self.ready.clear();
        self.upload_field();
    }

    fn request_brush(&mut self, _frame_index: u64, req: &BrushRequest) -> EngineResult<()> {
        let samples = self.grid.sample_counts().as_ivec3();
        let center_idx = self.grid.world_to_index(req.hit_pos);
        let radius_cells = req.radius / self.grid.cell_size;
        let lo = (center_idx - Vec3::splat(radius_cells)).floor().as_ivec3().max(IVec3::ZERO);
        let hi = (center_idx + Vec3::splat(radius_cells))
            .ceil()
            .as_ivec3()
            .min(samples - IVec3::ONE);
        if lo.x > hi.x || lo.y > hi.y || lo.z > hi.z {
            return Ok(());
        }

        let uniforms = BrushUniforms {
            center: req.hit_pos.to_array(),
            radius: req.radius,
            origin: self.grid.origin.to_array(),
            cell_size: self.grid.cell_size,
            aabb_min: lo.to_array(),
            rate: (BRUSH_RATE * req.delta_time * req.weight.abs()).clamp(0.0, 1.0),
            aabb_extent: (hi - lo + IVec3::ONE).as_uvec3().to_array(),
            add: (req.weight > 0.0) as u32,
            samples: samples.as_uvec3().to_array(),
            _pad: 0,
        };

        let (chunk_min, chunk_max) = self.dirty_chunk_box(lo, hi);
        self.encode(Some(uniforms), chunk_min, chunk_max, req.iso_value)
    }

    fn request_remesh(&mut self, _frame_index: u64, req: &RemeshRequest) -> EngineResult<()> {
        let counts = self.grid.chunk_counts().as_ivec3();
        let (chunk_min, chunk_max) = if req.is_full() {
            (IVec3::ZERO, counts - IVec3::ONE)
        } else {
            let mut min = IVec3::MAX;
            let mut max = IVec3::MIN;
            for key in &req.chunks {
                let k = IVec3::from(*key);
                min = min.min(k);
                max = max.max(k);
            }
            (min.max(IVec3::ZERO), max.min(counts - IVec3::ONE))
        };
        if chunk_min.x > chunk_max.x || chunk_min.y > chunk_max.y || chunk_min.z > chunk_max.z {
            return Ok(());
        }
        self.encode(None, chunk_min, chunk_max, req.iso_value)
    }

    fn try_fetch(&mut self, out: &mut Vec<ChunkUpdate>) -> EngineResult<bool> {
        let mut produced = false;
        if !self.ready.is_empty() {
            out.append(&mut self.ready);
            produced = true;
        }
        if let Some(oldest) = self.pending.pop_front() {
            let result = oldest.resolve(&self.device)?;
            self.overflow.record(&result);
            produced |= !result.updates.is_empty();
            out.extend(result.updates);
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::readback::ReadbackResult;
    use super::OverflowTracker;

    fn result(attempted: u64, stored: u64) -> ReadbackResult {
        ReadbackResult { updates: Vec::new(), attempted, stored }
    }

    #[test]
    fn overflow_accumulates_dropped_triangles() {
        let mut tracker = OverflowTracker::default();
        tracker.record(&result(100, 60));
        assert_eq!(tracker.total, 40);
        tracker.record(&result(30, 25));
        assert_eq!(tracker.total, 45);
    }

    #[test]
    fn overflow_ignores_submissions_that_fit() {
        let mut tracker = OverflowTracker::default();
        tracker.record(&result(20_480, 20_480));
        tracker.record(&result(0, 0));
        assert_eq!(tracker.total, 0);
    }
}

fn validate_grid(grid: &GridDesc) -> EngineResult<()> {
    if grid.cells.min_element() == 0 {
        return Err(EngineError::InvalidGrid { reason: "zero cells on an axis".into() });
    }
    if grid.chunk_size == 0 {
        return Err(EngineError::InvalidGrid { reason: "zero chunk size".into() });
    }
    if grid.cell_size <= 0.0 {
        return Err(EngineError::InvalidGrid {
            reason: format!("non-positive cell size {}", grid.cell_size),
        });
    }
    Ok(())
}

fn create_field_buffer(device: &wgpu::Device, grid: &GridDesc) -> wgpu::Buffer {
    let samples = grid.sample_counts();
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Terrain Field"),
        size: (samples.x * samples.y * samples.z) as u64 * 4,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
