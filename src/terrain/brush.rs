//! CPU brush blending shared by the marching-cubes and dual-contouring
//! backends.
//!
//! Density moves monotonically toward the brush target: adds never decrease
//! a sample, carves never increase one (the blend factor is in `[0, 1]` and
//! the target is max/min against the current value).

use glam::{IVec3, Vec3};
use rustc_hash::FxHashSet;

use crate::terrain::types::{BrushRequest, ChunkKey, GridDesc, BRUSH_RATE};
use crate::SdfField;

/// Result of one brush application.
pub struct BrushOutcome {
    /// Chunks whose geometry is stale after the edit.
    pub dirty_chunks: FxHashSet<ChunkKey>,
    /// Inclusive sample-index AABB of touched samples, or `None` when the
    /// brush missed the grid entirely.
    pub dirty_aabb: Option<(IVec3, IVec3)>,
}

/// Blend a sphere brush into the field.
///
/// For every sample within Euclidean `radius` of the brush center, blends
/// the density toward `max(F, radius - dist)` (add) or
/// `min(F, -(radius - dist))` (carve) with factor
/// `clamp(BRUSH_RATE * dt * |weight|, 0, 1) * falloff`.
pub fn apply_brush(field: &mut SdfField<f32>, grid: &GridDesc, req: &BrushRequest) -> BrushOutcome {
    let samples = grid.sample_counts();
    let center_idx = grid.world_to_index(req.hit_pos);
    let radius_cells = req.radius / grid.cell_size;

    let lo = (center_idx - Vec3::splat(radius_cells)).floor().as_ivec3();
    let hi = (center_idx + Vec3::splat(radius_cells)).ceil().as_ivec3();
    let lo = lo.max(IVec3::ZERO);
    let hi = hi.min(samples.as_ivec3() - IVec3::ONE);

    let rate = (BRUSH_RATE * req.delta_time * req.weight.abs()).clamp(0.0, 1.0);
    let add = req.weight > 0.0;

    let mut dirty_chunks = FxHashSet::default();
    let mut touched_min = IVec3::MAX;
    let mut touched_max = IVec3::MIN;

    for z in lo.z..=hi.z {
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                let p = grid.index_to_world(Vec3::new(x as f32, y as f32, z as f32));
                let dist = p.distance(req.hit_pos);
                if dist >= req.radius {
                    continue;
                }
                let falloff = ((req.radius - dist) / req.radius).clamp(0.0, 1.0);
                let k = rate * falloff;

                let f = field.at_mut(x as usize, y as usize, z as usize);
                let desired = if add {
                    f.max(req.radius - dist)
                } else {
                    f.min(-(req.radius - dist))
                };
                *f += (desired - *f) * k;

                touched_min = touched_min.min(IVec3::new(x, y, z));
                touched_max = touched_max.max(IVec3::new(x, y, z));
                mark_dirty(&mut dirty_chunks, IVec3::new(x, y, z), grid);
            }
        }
    }

    let dirty_aabb = if touched_min.x <= touched_max.x {
        Some((touched_min, touched_max))
    } else {
        None
    };
    BrushOutcome { dirty_chunks, dirty_aabb }
}

/// Dirty the sample's owning chunk, plus lower neighbors when the sample
/// sits on a shared chunk face (both chunks triangulate that sample).
fn mark_dirty(dirty: &mut FxHashSet<ChunkKey>, sample: IVec3, grid: &GridDesc) {
    let cs = grid.chunk_size as i32;
    let counts = grid.chunk_counts().as_ivec3();
    let base = ChunkKey::containing(sample, grid.chunk_size);

    for dz in 0..=1 {
        for dy in 0..=1 {
            for dx in 0..=1 {
                let offs = IVec3::new(dx, dy, dz);
                // Lower neighbor only shares the sample when it lies exactly
                // on that chunk boundary.
                if (offs.x == 1 && sample.x % cs != 0)
                    || (offs.y == 1 && sample.y % cs != 0)
                    || (offs.z == 1 && sample.z % cs != 0)
                {
                    continue;
                }
                let key = ChunkKey::new(base.x - offs.x, base.y - offs.y, base.z - offs.z);
                if key.x >= 0
                    && key.y >= 0
                    && key.z >= 0
                    && key.x < counts.x
                    && key.y < counts.y
                    && key.z < counts.z
                {
                    dirty.insert(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    fn grid() -> GridDesc {
        GridDesc {
            cells: UVec3::splat(32),
            cell_size: 1.0,
            origin: Vec3::ZERO,
            chunk_size: 16,
        }
    }

    fn flat_field(grid: &GridDesc) -> SdfField<f32> {
        let s = grid.sample_counts();
        let mut f = SdfField::new(s.x as usize, s.y as usize, s.z as usize).unwrap();
        f.fill_with(|_, _, _| -1.0);
        f
    }

    #[test]
    fn add_never_decreases_density() {
        let grid = grid();
        let mut field = flat_field(&grid);
        let before: Vec<f32> = field.as_slice().to_vec();
        let req = BrushRequest {
            hit_pos: Vec3::splat(16.0),
            radius: 4.0,
            weight: 5.0,
            delta_time: 0.016,
            iso_value: 0.0,
        };
        let outcome = apply_brush(&mut field, &grid, &req);
        assert!(!outcome.dirty_chunks.is_empty());
        for (a, b) in before.iter().zip(field.as_slice()) {
            assert!(b >= a, "add stroke decreased density: {} -> {}", a, b);
        }
    }

    #[test]
    fn carve_never_increases_density() {
        let grid = grid();
        let mut field = flat_field(&grid);
        field.fill_with(|_, _, _| 1.0);
        let before: Vec<f32> = field.as_slice().to_vec();
        let req = BrushRequest {
            hit_pos: Vec3::splat(16.0),
            radius: 4.0,
            weight: -5.0,
            delta_time: 0.016,
            iso_value: 0.0,
        };
        apply_brush(&mut field, &grid, &req);
        for (a, b) in before.iter().zip(field.as_slice()) {
            assert!(b <= a, "carve stroke increased density: {} -> {}", a, b);
        }
    }

    #[test]
    fn repeated_add_converges_to_target() {
        let grid = grid();
        let mut field = flat_field(&grid);
        let req = BrushRequest {
            hit_pos: Vec3::splat(16.0),
            radius: 4.0,
            weight: 5.0,
            delta_time: 0.1,
            iso_value: 0.0,
        };
        for _ in 0..64 {
            apply_brush(&mut field, &grid, &req);
        }
        // Center sample target is max(F, radius - 0) = radius.
        let center = field.at(16, 16, 16);
        assert!((center - req.radius).abs() < 1e-3, "center = {}", center);
    }

    #[test]
    fn boundary_sample_dirties_both_chunks() {
        let grid = grid();
        let mut field = flat_field(&grid);
        // Brush centered on the x = 16 chunk boundary.
        let req = BrushRequest {
            hit_pos: Vec3::new(16.0, 8.0, 8.0),
            radius: 2.0,
            weight: 1.0,
            delta_time: 0.016,
            iso_value: 0.0,
        };
        let outcome = apply_brush(&mut field, &grid, &req);
        assert!(outcome.dirty_chunks.contains(&ChunkKey::new(0, 0, 0)));
        assert!(outcome.dirty_chunks.contains(&ChunkKey::new(1, 0, 0)));
    }

    #[test]
    fn miss_produces_no_dirt() {
        let grid = grid();
        let mut field = flat_field(&grid);
        let req = BrushRequest {
            hit_pos: Vec3::splat(-100.0),
            radius: 3.0,
            weight: 1.0,
            delta_time: 0.016,
            iso_value: 0.0,
        };
        let outcome = apply_brush(&mut field, &grid, &req);
        assert!(outcome.dirty_chunks.is_empty());
        assert!(outcome.dirty_aabb.is_none());
    }
}
