//! Dual-contouring sweep over a 64^3 truncated-SDF block.
//!
//! One vertex per cell that contains a sign change, placed at the cell base
//! plus the model's fractional offset; one quad (two triangles) per
//! sign-changing grid edge, connecting the four cells around that edge.
//! Only edges whose base sample lies in the interior 58^3 region are owned
//! by this block, so adjacent blocks never emit the same quad twice.

use glam::{IVec3, Vec3};
use rustc_hash::FxHashMap;

use crate::terrain::ndc::{K_IN, K_OUT, K_PAD};
use crate::terrain::types::{GeometryData, GridDesc, TerrainVertex};

const AXES: [IVec3; 3] = [IVec3::X, IVec3::Y, IVec3::Z];

/// Triangulate the interior region of one block.
///
/// `tsdf` is the 64^3 normalized input, `offsets` the model's `3 * 64^3`
/// channel-major fractional vertex offsets, `block_start` the block's first
/// sample in grid cell coordinates (may be negative from padding).
pub fn dual_contour(
    tsdf: &[f32],
    offsets: &[f32],
    grid: &GridDesc,
    block_start: IVec3,
    iso_norm: f32,
) -> GeometryData {
    let voxels = K_IN * K_IN * K_IN;
    debug_assert_eq!(tsdf.len(), voxels);
    debug_assert_eq!(offsets.len(), 3 * voxels);

    let inside = |s: IVec3| tsdf[index(s)] > iso_norm;
    let cells = grid.cells.as_ivec3();

    let mut geometry = GeometryData::default();
    let mut cell_vertex: FxHashMap<IVec3, u32> = FxHashMap::default();

    let lo = K_PAD as i32;
    let hi = (K_PAD + K_OUT) as i32;

    for (axis, &ea) in AXES.iter().enumerate() {
        let eb = AXES[(axis + 1) % 3];
        let ec = AXES[(axis + 2) % 3];

        for z in lo..hi {
            for y in lo..hi {
                for x in lo..hi {
                    let s = IVec3::new(x, y, z);
                    // Blocks overhang the grid at its far faces; samples out
                    // there are clamped copies, never real surface.
                    let abs = block_start + s;
                    if abs.cmplt(IVec3::ZERO).any() || (abs + ea).cmpgt(cells).any() {
                        continue;
                    }
                    let s_in = inside(s);
                    if s_in == inside(s + ea) {
                        continue;
                    }

                    // The four cells sharing this edge, wound so that the
                    // surface faces out of the material.
                    let quad = [s - eb - ec, s - ec, s, s - eb];
                    let mut idx = [0u32; 4];
                    for (i, &cell) in quad.iter().enumerate() {
                        idx[i] = *cell_vertex.entry(cell).or_insert_with(|| {
                            let v = make_vertex(tsdf, offsets, grid, block_start, cell);
                            geometry.vertices.push(v);
                            (geometry.vertices.len() - 1) as u32
                        });
                    }

                    if s_in {
                        geometry.indices.extend([idx[0], idx[1], idx[2]]);
                        geometry.indices.extend([idx[0], idx[2], idx[3]]);
                    } else {
                        geometry.indices.extend([idx[0], idx[2], idx[1]]);
                        geometry.indices.extend([idx[0], idx[3], idx[2]]);
                    }
                }
            }
        }
    }

    geometry
}

fn make_vertex(
    tsdf: &[f32],
    offsets: &[f32],
    grid: &GridDesc,
    block_start: IVec3,
    cell: IVec3,
) -> TerrainVertex {
    let voxels = K_IN * K_IN * K_IN;
    let i = index(cell);
    let offset = Vec3::new(
        offsets[i].clamp(0.0, 1.0),
        offsets[voxels + i].clamp(0.0, 1.0),
        offsets[2 * voxels + i].clamp(0.0, 1.0),
    );

    let local = cell.as_vec3() + offset;
    let position = grid.index_to_world((block_start + cell).as_vec3() + offset);

    // Density rises inward, so the outward normal is the negated gradient.
    let g = -gradient_at(tsdf, local);
    let normal = if g.length_squared() > 1e-12 { g.normalize() } else { Vec3::Y };
    TerrainVertex::new(position, normal)
}

/// Central-difference gradient of the block at a fractional position.
fn gradient_at(tsdf: &[f32], p: Vec3) -> Vec3 {
    let h = 0.5;
    Vec3::new(
        sample_trilinear(tsdf, p + Vec3::X * h) - sample_trilinear(tsdf, p - Vec3::X * h),
        sample_trilinear(tsdf, p + Vec3::Y * h) - sample_trilinear(tsdf, p - Vec3::Y * h),
        sample_trilinear(tsdf, p + Vec3::Z * h) - sample_trilinear(tsdf, p - Vec3::Z * h),
    )
}

fn sample_trilinear(tsdf: &[f32], p: Vec3) -> f32 {
    let max = (K_IN - 1) as f32;
    let p = p.clamp(Vec3::ZERO, Vec3::splat(max));
    let base = p.floor();
    let f = p - base;
    let b = base.as_ivec3().min(IVec3::splat(K_IN as i32 - 2)).max(IVec3::ZERO);

    let at = |dx: i32, dy: i32, dz: i32| tsdf[index(b + IVec3::new(dx, dy, dz))];
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;

    let x00 = lerp(at(0, 0, 0), at(1, 0, 0), f.x);
    let x10 = lerp(at(0, 1, 0), at(1, 1, 0), f.x);
    let x01 = lerp(at(0, 0, 1), at(1, 0, 1), f.x);
    let x11 = lerp(at(0, 1, 1), at(1, 1, 1), f.x);
    let y0 = lerp(x00, x10, f.y);
    let y1 = lerp(x01, x11, f.y);
    lerp(y0, y1, f.z)
}

#[inline]
fn index(s: IVec3) -> usize {
    ((s.z as usize * K_IN) + s.y as usize) * K_IN + s.x as usize
}
