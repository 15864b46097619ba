//! Sliding-window cache for the 64^3 truncated-SDF model input.
//!
//! Rebuilding the input block is O(64^3); when a requested block start
//! differs from the cached start along a single axis the retained planes
//! are shifted in place and only the newly exposed slab is resampled from
//! the field. The incremental path must agree bit-for-bit with a full
//! rebuild.

use glam::IVec3;

use crate::terrain::ndc::{K_IN, TSDF_SCALE};
use crate::terrain::types::GridDesc;
use crate::SdfField;

pub struct SlidingCache {
    start: Option<IVec3>,
    data: Vec<f32>,
}

impl Default for SlidingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingCache {
    pub fn new() -> Self {
        Self { start: None, data: vec![0.0; K_IN * K_IN * K_IN] }
    }

    pub fn invalidate(&mut self) {
        self.start = None;
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn start(&self) -> Option<IVec3> {
        self.start
    }

    /// Make the cache hold the block starting at `start` (cell coordinates,
    /// may extend past the grid; out-of-range samples clamp). Slides when
    /// the delta is a single-axis step smaller than the block, otherwise
    /// rebuilds.
    pub fn acquire(&mut self, field: &SdfField<f32>, grid: &GridDesc, start: IVec3) {
        match self.start {
            Some(cached) if cached == start => {}
            Some(cached) => {
                let delta = start - cached;
                let moved_axes =
                    (delta.x != 0) as u32 + (delta.y != 0) as u32 + (delta.z != 0) as u32;
                let step = delta.x + delta.y + delta.z; // only one is nonzero
                if moved_axes == 1 && step.unsigned_abs() < K_IN as u32 {
                    let axis = if delta.x != 0 { 0 } else if delta.y != 0 { 1 } else { 2 };
                    self.slide(field, grid, start, axis, step);
                } else {
                    self.rebuild(field, grid, start);
                }
            }
            None => self.rebuild(field, grid, start),
        }
    }

    /// Re-sample the intersection of a dirty cell AABB (inclusive, sample
    /// coordinates) with the cached block after a brush edit.
    pub fn patch(&mut self, field: &SdfField<f32>, grid: &GridDesc, lo: IVec3, hi: IVec3) {
        let Some(start) = self.start else { return };
        let n = K_IN as i32;
        let lo = (lo - start).max(IVec3::ZERO);
        let hi = (hi - start).min(IVec3::splat(n - 1));
        if lo.x > hi.x || lo.y > hi.y || lo.z > hi.z {
            return;
        }
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    self.data[index(x, y, z)] =
                        tsdf_sample(field, grid, start + IVec3::new(x, y, z));
                }
            }
        }
    }

    fn rebuild(&mut self, field: &SdfField<f32>, grid: &GridDesc, start: IVec3) {
        let n = K_IN as i32;
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    self.data[index(x, y, z)] =
                        tsdf_sample(field, grid, start + IVec3::new(x, y, z));
                }
            }
        }
        self.start = Some(start);
    }

    /// Shift retained planes along `axis` by `step` cells and resample only
    /// the exposed slab.
    fn slide(
        &mut self,
        field: &SdfField<f32>,
        grid: &GridDesc,
        start: IVec3,
        axis: usize,
        step: i32,
    ) {
        let n = K_IN;
        let d = step.unsigned_abs() as usize;
        let keep = n - d;

        match (axis, step > 0) {
            (0, fwd) => {
                // X rows are contiguous: shift every row.
                for row in self.data.chunks_exact_mut(n) {
                    if fwd {
                        row.copy_within(d.., 0);
                    } else {
                        row.copy_within(..keep, d);
                    }
                }
            }
            (1, fwd) => {
                // Y rows are contiguous runs of n inside each Z plane.
                for plane in self.data.chunks_exact_mut(n * n) {
                    if fwd {
                        plane.copy_within(d * n.., 0);
                    } else {
                        plane.copy_within(..keep * n, d * n);
                    }
                }
            }
            (2, fwd) => {
                if fwd {
                    self.data.copy_within(d * n * n.., 0);
                } else {
                    self.data.copy_within(..keep * n * n, d * n * n);
                }
            }
            _ => unreachable!(),
        }

        // Resample the slab the shift exposed.
        let (lo, hi) = if step > 0 {
            (keep as i32, n as i32 - 1)
        } else {
            (0, d as i32 - 1)
        };
        let n = K_IN as i32;
        let (xr, yr, zr) = match axis {
            0 => ((lo, hi), (0, n - 1), (0, n - 1)),
            1 => ((0, n - 1), (lo, hi), (0, n - 1)),
            _ => ((0, n - 1), (0, n - 1), (lo, hi)),
        };
        for z in zr.0..=zr.1 {
            for y in yr.0..=yr.1 {
                for x in xr.0..=xr.1 {
                    self.data[index(x, y, z)] =
                        tsdf_sample(field, grid, start + IVec3::new(x, y, z));
                }
            }
        }
        self.start = Some(start);
    }
}

#[inline]
fn index(x: i32, y: i32, z: i32) -> usize {
    ((z as usize * K_IN) + y as usize) * K_IN + x as usize
}

/// Truncated signed distance: `clamp(s / (100 * cell_size), -1, 1)`.
#[inline]
pub fn tsdf_sample(field: &SdfField<f32>, grid: &GridDesc, sample: IVec3) -> f32 {
    let raw = field.at_clamped(sample.x as i64, sample.y as i64, sample.z as i64);
    (raw / (TSDF_SCALE * grid.cell_size)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::generator::sphere_field;
    use glam::{UVec3, Vec3};

    fn setup() -> (GridDesc, SdfField<f32>) {
        let grid = GridDesc {
            cells: UVec3::splat(128),
            cell_size: 1.0,
            origin: Vec3::ZERO,
            chunk_size: 32,
        };
        let field = sphere_field(&grid, Vec3::splat(64.0), 40.0).unwrap();
        (grid, field)
    }

    fn rebuilt(field: &SdfField<f32>, grid: &GridDesc, start: IVec3) -> Vec<f32> {
        let mut fresh = SlidingCache::new();
        fresh.acquire(field, grid, start);
        fresh.data().to_vec()
    }

    #[test]
    fn slide_matches_rebuild_one_step_each_axis() {
        let (grid, field) = setup();
        let base = IVec3::new(-3, -3, -3);
        let stride = crate::terrain::ndc::K_OUT as i32;

        for step in [
            IVec3::new(stride, 0, 0),
            IVec3::new(-stride, 0, 0),
            IVec3::new(0, stride, 0),
            IVec3::new(0, 0, stride),
        ] {
            let mut cache = SlidingCache::new();
            cache.acquire(&field, &grid, base);
            cache.acquire(&field, &grid, base + step);
            assert_eq!(
                cache.data(),
                rebuilt(&field, &grid, base + step).as_slice(),
                "slide by {:?} diverged from rebuild",
                step
            );
        }
    }

    #[test]
    fn small_slide_matches_rebuild() {
        let (grid, field) = setup();
        let mut cache = SlidingCache::new();
        cache.acquire(&field, &grid, IVec3::new(10, 5, 7));
        cache.acquire(&field, &grid, IVec3::new(10, 5, 9));
        assert_eq!(cache.data(), rebuilt(&field, &grid, IVec3::new(10, 5, 9)).as_slice());
    }

    #[test]
    fn diagonal_move_rebuilds_correctly() {
        let (grid, field) = setup();
        let mut cache = SlidingCache::new();
        cache.acquire(&field, &grid, IVec3::new(0, 0, 0));
        cache.acquire(&field, &grid, IVec3::new(5, 5, 0));
        assert_eq!(cache.data(), rebuilt(&field, &grid, IVec3::new(5, 5, 0)).as_slice());
    }

    #[test]
    fn patch_updates_only_overlap() {
        let (grid, mut field) = setup();
        let mut cache = SlidingCache::new();
        cache.acquire(&field, &grid, IVec3::ZERO);

        *field.at_mut(8, 8, 8) = 123.0;
        cache.patch(&field, &grid, IVec3::splat(8), IVec3::splat(8));
        assert_eq!(cache.data(), rebuilt(&field, &grid, IVec3::ZERO).as_slice());
    }
}
