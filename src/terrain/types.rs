//! Terrain value types and the backend interface.

use glam::{IVec3, UVec3, Vec3};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::terrain::SharedField;

/// Exponential-smoothing rate for brush blending. The per-cell blend factor
/// is `clamp(BRUSH_RATE * delta_time * |weight|, 0, 1) * falloff`.
pub const BRUSH_RATE: f32 = 20.0;

/// Grid geometry shared by every backend.
///
/// `cells` counts cubic cells per axis; the matching [`crate::SdfField`]
/// holds `cells + 1` vertex-centered samples per axis. Changing any of this
/// goes through `set_grid_desc` and re-initializes the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridDesc {
    pub cells: UVec3,
    pub cell_size: f32,
    pub origin: Vec3,
    pub chunk_size: u32,
}

impl GridDesc {
    /// Samples per axis (`cells + 1`, vertex-centered).
    pub fn sample_counts(&self) -> UVec3 {
        self.cells + UVec3::ONE
    }

    /// Chunks per axis, rounding up so a partial trailing chunk still counts.
    pub fn chunk_counts(&self) -> UVec3 {
        UVec3::new(
            self.cells.x.div_ceil(self.chunk_size),
            self.cells.y.div_ceil(self.chunk_size),
            self.cells.z.div_ceil(self.chunk_size),
        )
    }

    /// Convert a world-space point into continuous index space.
    pub fn world_to_index(&self, p: Vec3) -> Vec3 {
        (p - self.origin) / self.cell_size
    }

    /// World-space position of a sample.
    pub fn index_to_world(&self, idx: Vec3) -> Vec3 {
        self.origin + idx * self.cell_size
    }
}

/// Integer chunk coordinate. Totally ordered (lexicographic x, y, z) and
/// hashable; stable for the lifetime of a given [`GridDesc`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChunkKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkKey {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Owning chunk of a cell index.
    pub fn containing(cell: IVec3, chunk_size: u32) -> Self {
        let size = chunk_size as i32;
        Self::new(
            cell.x.div_euclid(size),
            cell.y.div_euclid(size),
            cell.z.div_euclid(size),
        )
    }

    /// First cell of this chunk.
    pub fn min_cell(&self, chunk_size: u32) -> IVec3 {
        IVec3::new(self.x, self.y, self.z) * chunk_size as i32
    }
}

impl From<ChunkKey> for IVec3 {
    fn from(key: ChunkKey) -> Self {
        IVec3::new(key.x, key.y, key.z)
    }
}

/// One frame's brush intent, consumed immediately by `request_brush`.
/// Positive `weight` adds material, negative carves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BrushRequest {
    /// Brush center in terrain-local space.
    pub hit_pos: Vec3,
    pub radius: f32,
    pub weight: f32,
    pub delta_time: f32,
    pub iso_value: f32,
}

/// Remesh intent. An empty chunk set means "rebuild everything".
#[derive(Debug, Clone, Default)]
pub struct RemeshRequest {
    pub iso_value: f32,
    pub chunks: FxHashSet<ChunkKey>,
}

impl RemeshRequest {
    /// Full rebuild sentinel.
    pub fn full(iso_value: f32) -> Self {
        Self { iso_value, chunks: FxHashSet::default() }
    }

    pub fn for_chunks(iso_value: f32, chunks: FxHashSet<ChunkKey>) -> Self {
        Self { iso_value, chunks }
    }

    pub fn is_full(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Mesh vertex shared by all triangulation backends.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
}

impl TerrainVertex {
    /// Build a vertex, synthesizing a tangent via `cross(up, normal)` with
    /// `up` chosen to dodge the near-parallel degeneracy.
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        let up = if normal.y.abs() > 0.99 { Vec3::X } else { Vec3::Y };
        let tangent = up.cross(normal).normalize_or_zero();
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tangent: tangent.to_array(),
        }
    }
}

/// Triangulated chunk geometry in the engine's vertex format.
#[derive(Debug, Clone, Default)]
pub struct GeometryData {
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
}

impl GeometryData {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// One chunk's remesh result. `empty == true` (or zero indices) tells the
/// chunk renderer to deactivate that chunk's slot instead of replacing it.
#[derive(Debug, Clone)]
pub struct ChunkUpdate {
    pub key: ChunkKey,
    pub geometry: GeometryData,
    pub empty: bool,
}

impl ChunkUpdate {
    pub fn filled(key: ChunkKey, geometry: GeometryData) -> Self {
        let empty = geometry.is_empty();
        Self { key, geometry, empty }
    }

    pub fn emptied(key: ChunkKey) -> Self {
        Self { key, geometry: GeometryData::default(), empty: true }
    }
}

/// Interface every triangulation backend implements. Selected at
/// construction time and driven by [`crate::terrain::TerrainSystem`].
pub trait TerrainBackend {
    /// Adopt new grid geometry; the backend recomputes its own buffers.
    fn set_grid_desc(&mut self, grid: GridDesc) -> EngineResult<()>;

    /// Adopt a new shared field.
    fn set_field(&mut self, field: SharedField);

    /// Blend a brush stroke into the field and queue the dirtied chunks.
    fn request_brush(&mut self, frame_index: u64, req: &BrushRequest) -> EngineResult<()>;

    /// Queue re-triangulation of the given chunks (empty set = everything).
    fn request_remesh(&mut self, frame_index: u64, req: &RemeshRequest) -> EngineResult<()>;

    /// Drain completed chunk updates. Returns `false` when nothing is ready.
    fn try_fetch(&mut self, out: &mut Vec<ChunkUpdate>) -> EngineResult<bool>;
}
