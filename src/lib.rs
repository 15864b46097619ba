//! Interactive terrain sculpting engine.
//!
//! Users paint density changes into a chunked signed-distance field and the
//! system incrementally re-triangulates only the affected chunks, streaming
//! updated meshes into a live renderer without stalling the frame.
//!
//! Core pieces:
//! - [`field::SdfField`]: dense, cache-friendly scalar volume
//! - [`terrain::TerrainBackend`] with three interchangeable backends
//!   (CPU marching cubes, neural dual contouring, GPU compute)
//! - [`terrain::TerrainSystem`]: facade mediating brush/remesh requests
//! - [`renderer::MeshChunkRenderer`]: per-chunk GPU mesh streaming

pub mod error;
pub mod field;
pub mod renderer;
pub mod terrain;

pub use error::{EngineError, EngineResult};
pub use field::SdfField;
pub use renderer::{MeshChunkRenderer, RenderContext, RenderSystem};
pub use terrain::{
    BrushRequest, ChunkKey, ChunkUpdate, GeometryData, GridDesc, RemeshRequest, TerrainBackend,
    TerrainMode, TerrainSystem, TerrainVertex,
};
