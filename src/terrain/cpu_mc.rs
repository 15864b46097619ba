//! Synchronous CPU marching-cubes backend.
//!
//! Each dirty chunk's `(chunk_size+1)^3` sample sub-block is copied out of
//! the shared field and triangulated at the requested iso value. All work
//! finishes inside `request_remesh`; `try_fetch` only drains results.

use glam::{IVec3, Vec3};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::error::EngineResult;
use crate::terrain::brush::apply_brush;
use crate::terrain::tables::{CORNER_OFFSETS, EDGE_CONNECTIONS, EDGE_TABLE, TRI_TABLE};
use crate::terrain::types::*;
use crate::terrain::SharedField;
use crate::SdfField;

pub struct CpuMarchingCubes {
    grid: GridDesc,
    field: SharedField,
    /// Freshly triangulated chunks, drained by `try_fetch`.
    results: FxHashMap<ChunkKey, GeometryData>,
}

impl CpuMarchingCubes {
    pub fn new(grid: GridDesc, field: SharedField) -> Self {
        Self { grid, field, results: FxHashMap::default() }
    }

    fn all_chunks(&self) -> Vec<ChunkKey> {
        let counts = self.grid.chunk_counts();
        let mut keys = Vec::with_capacity((counts.x * counts.y * counts.z) as usize);
        for z in 0..counts.z as i32 {
            for y in 0..counts.y as i32 {
                for x in 0..counts.x as i32 {
                    keys.push(ChunkKey::new(x, y, z));
                }
            }
        }
        keys
    }
}

impl TerrainBackend for CpuMarchingCubes {
    fn set_grid_desc(&mut self, grid: GridDesc) -> EngineResult<()> {
        self.grid = grid;
        self.results.clear();
        Ok(())
    }

    fn set_field(&mut self, field: SharedField) {
        self.field = field;
        self.results.clear();
    }

    fn request_brush(&mut self, frame_index: u64, req: &BrushRequest) -> EngineResult<()> {
        let dirty = {
            let mut field = self.field.write();
            apply_brush(&mut field, &self.grid, req).dirty_chunks
        };
        if dirty.is_empty() {
            return Ok(());
        }
        log::trace!("[CpuMc] brush dirtied {} chunks", dirty.len());
        self.request_remesh(frame_index, &RemeshRequest::for_chunks(req.iso_value, dirty))
    }

    fn request_remesh(&mut self, _frame_index: u64, req: &RemeshRequest) -> EngineResult<()> {
        let keys: Vec<ChunkKey> = if req.is_full() {
            self.all_chunks()
        } else {
            req.chunks.iter().copied().collect()
        };

        let grid = self.grid;
        let field = self.field.read();
        let meshed: Vec<(ChunkKey, GeometryData)> = keys
            .par_iter()
            .map(|&key| (key, extract_chunk(&field, &grid, key, req.iso_value)))
            .collect();
        drop(field);

        for (key, geometry) in meshed {
            self.results.insert(key, geometry);
        }
        Ok(())
    }

    fn try_fetch(&mut self, out: &mut Vec<ChunkUpdate>) -> EngineResult<bool> {
        if self.results.is_empty() {
            return Ok(false);
        }
        out.extend(self.results.drain().map(|(key, geo)| ChunkUpdate::filled(key, geo)));
        Ok(true)
    }
}

/// Triangulate one chunk of the field at `iso`.
///
/// Geometry is a function only of the chunk's own `(chunk_size+1)^3` sample
/// sub-block; trailing chunks at the grid edge triangulate their partial
/// extent.
pub fn extract_chunk(
    field: &SdfField<f32>,
    grid: &GridDesc,
    key: ChunkKey,
    iso: f32,
) -> GeometryData {
    let base = key.min_cell(grid.chunk_size);
    let cells = grid.cells.as_ivec3();
    let extent = IVec3::splat(grid.chunk_size as i32).min(cells - base);
    if extent.x <= 0 || extent.y <= 0 || extent.z <= 0 {
        return GeometryData::default();
    }

    // Scratch copy of the sub-block, clamped at the field border.
    let n = (extent.max_element() + 1) as usize;
    let mut scratch = vec![0.0f32; n * n * n];
    for z in 0..=extent.z {
        for y in 0..=extent.y {
            for x in 0..=extent.x {
                scratch[((z as usize * n) + y as usize) * n + x as usize] = field.at_clamped(
                    (base.x + x) as i64,
                    (base.y + y) as i64,
                    (base.z + z) as i64,
                );
            }
        }
    }
    let sample = |p: IVec3| scratch[((p.z as usize * n) + p.y as usize) * n + p.x as usize];
    // Central-difference gradient of the sub-block, clamped at its edges so
    // geometry never reads samples a neighboring chunk owns.
    let gradient = |p: IVec3| -> Vec3 {
        let s = |q: IVec3| sample(q.clamp(IVec3::ZERO, extent));
        Vec3::new(
            (s(p + IVec3::X) - s(p - IVec3::X)) * 0.5,
            (s(p + IVec3::Y) - s(p - IVec3::Y)) * 0.5,
            (s(p + IVec3::Z) - s(p - IVec3::Z)) * 0.5,
        )
    };

    let mut geometry = GeometryData::default();

    for z in 0..extent.z {
        for y in 0..extent.y {
            for x in 0..extent.x {
                let cell = IVec3::new(x, y, z);

                let mut corner_values = [0.0f32; 8];
                let mut cube_index = 0usize;
                for (i, offs) in CORNER_OFFSETS.iter().enumerate() {
                    let c = cell + IVec3::new(offs[0] as i32, offs[1] as i32, offs[2] as i32);
                    corner_values[i] = sample(c);
                    // Bit set = corner inside material (density above iso).
                    if corner_values[i] > iso {
                        cube_index |= 1 << i;
                    }
                }

                if EDGE_TABLE[cube_index] == 0 {
                    continue;
                }

                let mut edge_positions = [Vec3::ZERO; 12];
                let mut edge_normals = [Vec3::ZERO; 12];
                for e in 0..12 {
                    if EDGE_TABLE[cube_index] & (1 << e) == 0 {
                        continue;
                    }
                    let c0 = EDGE_CONNECTIONS[e][0];
                    let c1 = EDGE_CONNECTIONS[e][1];
                    let v0 = corner_values[c0];
                    let v1 = corner_values[c1];
                    let t = ((iso - v0) / (v1 - v0)).clamp(0.0, 1.0);

                    let p0 = cell
                        + IVec3::new(
                            CORNER_OFFSETS[c0][0] as i32,
                            CORNER_OFFSETS[c0][1] as i32,
                            CORNER_OFFSETS[c0][2] as i32,
                        );
                    let p1 = cell
                        + IVec3::new(
                            CORNER_OFFSETS[c1][0] as i32,
                            CORNER_OFFSETS[c1][1] as i32,
                            CORNER_OFFSETS[c1][2] as i32,
                        );
                    let g0 = gradient(p0);
                    let g1 = gradient(p1);

                    let local = p0.as_vec3() + (p1 - p0).as_vec3() * t;
                    edge_positions[e] = grid.index_to_world(base.as_vec3() + local);
                    // Density increases inward, so the outward normal is the
                    // negated gradient.
                    let n = -(g0 + (g1 - g0) * t);
                    edge_normals[e] = if n.length_squared() > 1e-12 {
                        n.normalize()
                    } else {
                        Vec3::Y
                    };
                }

                let tri_row = &TRI_TABLE[cube_index];
                let mut i = 0;
                while tri_row[i] != -1 {
                    let base_idx = geometry.vertices.len() as u32;
                    for k in 0..3 {
                        let e = tri_row[i + k] as usize;
                        geometry
                            .vertices
                            .push(TerrainVertex::new(edge_positions[e], edge_normals[e]));
                    }
                    geometry.indices.extend([base_idx, base_idx + 1, base_idx + 2]);
                    i += 3;
                }
            }
        }
    }

    geometry
}
