//! Terrain voxel/mesh pipeline.
//!
//! A chunked signed-distance volume is edited by sphere brushes and
//! incrementally re-triangulated by one of three interchangeable backends:
//!
//! - [`CpuMarchingCubes`]: classical marching cubes, synchronous
//! - [`NeuralDualContouring`]: learned sub-voxel offsets + dual contouring,
//!   with a sliding-window input cache
//! - [`GpuTerrainBackend`]: compute-shader brush + marching cubes with a
//!   double-buffered asynchronous readback ring
//!
//! [`TerrainSystem`] owns the active backend and a chunk renderer and keeps
//! the render system's drawable set consistent with the live chunk set.

pub mod brush;
pub mod cpu_mc;
pub mod gpu;
pub mod ndc;
pub mod system;
pub mod tables;
pub mod types;

pub use cpu_mc::CpuMarchingCubes;
pub use gpu::GpuTerrainBackend;
pub use ndc::NeuralDualContouring;
pub use system::{TerrainMode, TerrainSystem};
pub use types::{
    BrushRequest, ChunkKey, ChunkUpdate, GeometryData, GridDesc, RemeshRequest, TerrainBackend,
    TerrainVertex, BRUSH_RATE,
};

use parking_lot::RwLock;
use std::sync::Arc;

use crate::SdfField;

/// Shared ownership of the SDF volume between the terrain system and the
/// active backend. Single-writer-in-practice: brush edits and fetches are
/// serialized by the frame loop.
pub type SharedField = Arc<RwLock<SdfField<f32>>>;

/// Wrap a freshly generated field for shared ownership.
pub fn share_field(field: SdfField<f32>) -> SharedField {
    Arc::new(RwLock::new(field))
}

#[cfg(test)]
mod tests;
