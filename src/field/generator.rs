//! Procedural field generators backing the "Generate" action.
//!
//! Density convention: positive values are inside material, negative are
//! air. The brush adds toward positive and carves toward negative.

use glam::Vec3;
use noise::{NoiseFn, Perlin};

use crate::error::EngineResult;
use crate::terrain::GridDesc;
use crate::SdfField;

/// Signed distance to a sphere, positive inside. Samples are vertex-centered
/// (`cells + 1` per axis).
pub fn sphere_field(grid: &GridDesc, center: Vec3, radius: f32) -> EngineResult<SdfField<f32>> {
    let samples = grid.sample_counts();
    let mut field =
        SdfField::new(samples.x as usize, samples.y as usize, samples.z as usize)?;
    let origin = grid.origin;
    let cell_size = grid.cell_size;
    field.fill_with(|x, y, z| {
        let p = origin + Vec3::new(x as f32, y as f32, z as f32) * cell_size;
        radius - p.distance(center)
    });
    Ok(field)
}

/// Perlin heightfield terrain: density = height(x, z) - y, so the surface
/// sits where the column height crosses the sample's Y.
pub fn terrain_field(
    grid: &GridDesc,
    seed: u32,
    base_height: f32,
    amplitude: f32,
    frequency: f64,
) -> EngineResult<SdfField<f32>> {
    let perlin = Perlin::new(seed);
    let samples = grid.sample_counts();
    let mut field =
        SdfField::new(samples.x as usize, samples.y as usize, samples.z as usize)?;
    let origin = grid.origin;
    let cell_size = grid.cell_size;
    field.fill_with(|x, y, z| {
        let p = origin + Vec3::new(x as f32, y as f32, z as f32) * cell_size;
        let h = base_height
            + amplitude * perlin.get([p.x as f64 * frequency, p.z as f64 * frequency]) as f32;
        h - p.y
    });
    Ok(field)
}
