//! Neural dual contouring backend.
//!
//! A small pretrained network infers sub-voxel vertex offsets for each 64^3
//! truncated-SDF input block; a dual-contouring sweep then emits one vertex
//! per sign-changing cell and two triangles per sign-changing quad face.
//! Each block carries 3 cells of padding so that its interior 58^3 region
//! tiles seamlessly with its neighbors.

pub mod cache;
pub mod contour;
pub mod model;

pub use cache::SlidingCache;
pub use model::NdcModel;

use glam::IVec3;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::EngineResult;
use crate::terrain::brush::apply_brush;
use crate::terrain::types::*;
use crate::terrain::SharedField;

/// Input block edge length fed to the model.
pub const K_IN: usize = 64;
/// Interior output region edge length.
pub const K_OUT: usize = 58;
/// Padding on each side (`K_IN = K_OUT + 2 * K_PAD`).
pub const K_PAD: usize = 3;

/// Distance normalization: raw field values become
/// `clamp(s / (TSDF_SCALE * cell_size), -1, 1)` before inference.
pub const TSDF_SCALE: f32 = 100.0;

pub struct NeuralDualContouring {
    grid: GridDesc,
    field: SharedField,
    model: NdcModel,
    cache: SlidingCache,
    results: FxHashMap<ChunkKey, GeometryData>,
}

impl NeuralDualContouring {
    pub fn new(grid: GridDesc, field: SharedField, model: NdcModel) -> Self {
        Self {
            grid,
            field,
            model,
            cache: SlidingCache::new(),
            results: FxHashMap::default(),
        }
    }

    /// Chunks per axis at the NDC output stride (58 cells, not the grid's
    /// render chunk size).
    fn chunk_counts(&self) -> IVec3 {
        let cells = self.grid.cells.as_ivec3();
        IVec3::new(
            (cells.x + K_OUT as i32 - 1) / K_OUT as i32,
            (cells.y + K_OUT as i32 - 1) / K_OUT as i32,
            (cells.z + K_OUT as i32 - 1) / K_OUT as i32,
        )
    }

    fn all_chunks(&self) -> FxHashSet<ChunkKey> {
        let counts = self.chunk_counts();
        let mut keys = FxHashSet::default();
        for z in 0..counts.z {
            for y in 0..counts.y {
                for x in 0..counts.x {
                    keys.insert(ChunkKey::new(x, y, z));
                }
            }
        }
        keys
    }

    /// Output-sized chunks touched by a padded dirty cell AABB.
    fn chunks_touching(&self, lo: IVec3, hi: IVec3) -> FxHashSet<ChunkKey> {
        let counts = self.chunk_counts();
        let k = K_OUT as i32;
        let lo = IVec3::new(lo.x.div_euclid(k), lo.y.div_euclid(k), lo.z.div_euclid(k))
            .max(IVec3::ZERO);
        let hi = IVec3::new(hi.x.div_euclid(k), hi.y.div_euclid(k), hi.z.div_euclid(k))
            .min(counts - IVec3::ONE);
        let mut keys = FxHashSet::default();
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    keys.insert(ChunkKey::new(x, y, z));
                }
            }
        }
        keys
    }
}

impl TerrainBackend for NeuralDualContouring {
    fn set_grid_desc(&mut self, grid: GridDesc) -> EngineResult<()> {
        self.grid = grid;
        self.cache.invalidate();
        self.results.clear();
        Ok(())
    }

    fn set_field(&mut self, field: SharedField) {
        self.field = field;
        self.cache.invalidate();
        self.results.clear();
    }

    fn request_brush(&mut self, frame_index: u64, req: &BrushRequest) -> EngineResult<()> {
        let (dirty_aabb, _) = {
            let mut field = self.field.write();
            let outcome = apply_brush(&mut field, &self.grid, req);
            (outcome.dirty_aabb, outcome.dirty_chunks)
        };
        let Some((lo, hi)) = dirty_aabb else { return Ok(()) };

        // Padded dirty region: patch the cached input in place instead of
        // rebuilding it, then remesh every output chunk the region touches.
        let pad = IVec3::splat(K_PAD as i32);
        let (lo, hi) = (lo - pad, hi + pad);
        {
            let field = self.field.read();
            self.cache.patch(&field, &self.grid, lo, hi);
        }

        let chunks = self.chunks_touching(lo, hi);
        self.request_remesh(frame_index, &RemeshRequest::for_chunks(req.iso_value, chunks))
    }

    fn request_remesh(&mut self, _frame_index: u64, req: &RemeshRequest) -> EngineResult<()> {
        let keys: Vec<ChunkKey> = if req.is_full() {
            let mut v: Vec<_> = self.all_chunks().into_iter().collect();
            v.sort(); // adjacent chunks let the input cache slide
            v
        } else {
            let mut v: Vec<_> = req.chunks.iter().copied().collect();
            v.sort();
            v
        };

        let iso_norm =
            (req.iso_value / (TSDF_SCALE * self.grid.cell_size)).clamp(-1.0, 1.0);

        for key in keys {
            let start = IVec3::new(key.x, key.y, key.z) * K_OUT as i32 - K_PAD as i32;
            {
                let field = self.field.read();
                self.cache.acquire(&field, &self.grid, start);
            }

            let offsets = match self.model.infer(self.cache.data()) {
                Ok(offsets) => offsets,
                Err(e) => {
                    // Non-fatal: the chunk keeps last frame's geometry and
                    // heals on the next successful remesh.
                    log::error!("[Ndc] inference failed for chunk {:?}: {}", key, e);
                    continue;
                }
            };

            let geometry =
                contour::dual_contour(self.cache.data(), &offsets, &self.grid, start, iso_norm);
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
