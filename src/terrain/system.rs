//! Facade owning the active triangulation backend and the chunk renderer.
//!
//! Per frame the caller funnels brush and remesh intents through the
//! system, then calls [`TerrainSystem::try_fetch`] once: finished chunk
//! updates stream into the [`MeshChunkRenderer`] and the render system's
//! drawable registry is reconciled to match the live chunk set.

use rustc_hash::FxHashMap;

use crate::error::{EngineResult, TerrainErrorContext};
use crate::renderer::{
    DeferredFreeQueue, DrawableId, MeshChunkRenderer, RenderContext, RenderSystem, SlotEvent,
};
use crate::terrain::cpu_mc::CpuMarchingCubes;
use crate::terrain::gpu::GpuTerrainBackend;
use crate::terrain::ndc::{NdcModel, NeuralDualContouring};
use crate::terrain::types::*;
use crate::terrain::SharedField;

/// Which backend triangulates the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainMode {
    CpuMarchingCubes,
    NeuralDualContouring,
    Gpu,
}

pub struct TerrainSystem {
    mode: TerrainMode,
    grid: GridDesc,
    field: SharedField,
    backend: Box<dyn TerrainBackend>,
    chunk_renderer: MeshChunkRenderer,
    free_queue: DeferredFreeQueue,
    /// Render-system handle per live chunk.
    drawables: FxHashMap<ChunkKey, DrawableId>,
    frame_index: u64,
    fetch_scratch: Vec<ChunkUpdate>,
}

impl TerrainSystem {
    /// Build a system in the given mode. `ctx` is required for
    /// [`TerrainMode::Gpu`] and ignored by the CPU backends.
    pub fn new(
        mode: TerrainMode,
        grid: GridDesc,
        field: SharedField,
        ctx: Option<&RenderContext>,
    ) -> EngineResult<Self> {
        let backend = make_backend(mode, grid, field.clone(), ctx)?;
        log::info!("[Terrain] system created in {:?} mode", mode);
        Ok(Self {
            mode,
            grid,
            field,
            backend,
            chunk_renderer: MeshChunkRenderer::new(),
            free_queue: DeferredFreeQueue::new(),
            drawables: FxHashMap::default(),
            frame_index: 0,
            fetch_scratch: Vec::new(),
        })
    }

    pub fn mode(&self) -> TerrainMode {
        self.mode
    }

    pub fn grid_desc(&self) -> GridDesc {
        self.grid
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn field(&self) -> &SharedField {
        &self.field
    }

    /// Chunks currently holding GPU geometry.
    pub fn resident_chunks(&self) -> usize {
        self.chunk_renderer.chunk_count()
    }

    /// Swap the active backend. Destructive: results still in flight are
    /// dropped and every streamed chunk is unregistered, because the
    /// backends do not share a chunk key space. The caller follows with a
    /// full remesh.
    pub fn set_mode(
        &mut self,
        mode: TerrainMode,
        ctx: Option<&RenderContext>,
        render_system: &mut RenderSystem,
    ) -> EngineResult<()> {
        if mode == self.mode {
            return Ok(());
        }
        self.backend = make_backend(mode, self.grid, self.field.clone(), ctx)?;
        self.mode = mode;
        self.chunk_renderer.clear(self.frame_index, &mut self.free_queue);
        for (_, id) in self.drawables.drain() {
            render_system.unregister_dynamic(id);
        }
        log::info!("[Terrain] switched to {:?} mode", mode);
        Ok(())
    }

    /// Adopt new grid geometry. Chunk keys from the old grid may not exist
    /// in the new one, so every streamed chunk is retired and unregistered;
    /// the caller follows with a full remesh.
    pub fn set_grid_desc(
        &mut self,
        grid: GridDesc,
        render_system: &mut RenderSystem,
    ) -> EngineResult<()> {
        self.grid = grid;
        self.backend.set_grid_desc(grid)?;
        self.chunk_renderer.clear(self.frame_index, &mut self.free_queue);
        for (_, id) in self.drawables.drain() {
            render_system.unregister_dynamic(id);
        }
        Ok(())
    }

    /// Adopt a new field over the same grid. Chunk keys stay valid, so
    /// streamed chunks are kept; the follow-up full remesh emits empties for
    /// chunks the new field leaves hollow.
    pub fn set_field(&mut self, field: SharedField) {
        self.field = field.clone();
        self.backend.set_field(field);
    }

    pub fn request_brush(&mut self, req: &BrushRequest) -> EngineResult<()> {
        self.backend.request_brush(self.frame_index, req)
    }

    pub fn request_remesh(&mut self, req: &RemeshRequest) -> EngineResult<()> {
        self.backend.request_remesh(self.frame_index, req)
    }

    /// Drain finished updates without touching the renderer. Headless
    /// callers and tests use this; windowed callers use [`Self::try_fetch`].
    pub fn fetch_updates(&mut self, out: &mut Vec<ChunkUpdate>) -> EngineResult<bool> {
        self.frame_index += 1;
        self.backend.try_fetch(out)
    }

    /// Advance one frame: reclaim retired buffers, drain the backend, apply
    /// updates to the chunk renderer, then reconcile the render system's
    /// drawables, strictly in that order.
    pub fn try_fetch(
        &mut self,
        ctx: &RenderContext,
        render_system: &mut RenderSystem,
    ) -> EngineResult<bool> {
        self.frame_index += 1;
        self.free_queue.reclaim(self.frame_index);

        let mut updates = std::mem::take(&mut self.fetch_scratch);
        updates.clear();
        let any = self.backend.try_fetch(&mut updates)?;
        if any {
            let events = self.chunk_renderer.apply_updates(
                ctx,
                self.frame_index,
                &updates,
                &mut self.free_queue,
            );
            for event in events {
                match event {
                    SlotEvent::Upserted(key, drawable) => match self.drawables.get(&key) {
                        Some(&id) if render_system.is_dynamic_registered(id) => {
                            render_system.update_dynamic(id, drawable);
                        }
                        _ => {
                            let id = render_system.register_dynamic(drawable);
                            self.drawables.insert(key, id);
                        }
                    },
                    SlotEvent::Removed(key) => {
                        if let Some(id) = self.drawables.remove(&key) {
                            render_system.unregister_dynamic(id);
                        }
                    }
                }
            }
            log::trace!(
                "[Terrain] frame {}: {} chunk updates, {} resident",
                self.frame_index,
                updates.len(),
                self.chunk_renderer.chunk_count()
            );
        }
        self.fetch_scratch = updates;
        Ok(any)
    }
}

fn make_backend(
    mode: TerrainMode,
    grid: GridDesc,
    field: SharedField,
    ctx: Option<&RenderContext>,
) -> EngineResult<Box<dyn TerrainBackend>> {
    Ok(match mode {
        TerrainMode::CpuMarchingCubes => Box::new(CpuMarchingCubes::new(grid, field)),
        TerrainMode::NeuralDualContouring => Box::new(NeuralDualContouring::new(
            grid,
            field,
            NdcModel::surface_centered(),
        )),
        TerrainMode::Gpu => {
            let ctx = ctx.terrain_context("gpu mode requires a render context")?;
            Box::new(GpuTerrainBackend::new(ctx, grid, field)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::generator::sphere_field;
    use crate::terrain::share_field;
    use glam::{UVec3, Vec3};

    fn system(mode: TerrainMode) -> TerrainSystem {
        let grid = GridDesc {
            cells: UVec3::splat(32),
            cell_size: 1.0,
            origin: Vec3::ZERO,
            chunk_size: 16,
        };
        let field = share_field(sphere_field(&grid, Vec3::splat(16.0), 8.0).unwrap());
        TerrainSystem::new(mode, grid, field, None).unwrap()
    }

    #[test]
    fn gpu_mode_without_context_is_an_error() {
        let grid = GridDesc {
            cells: UVec3::splat(8),
            cell_size: 1.0,
            origin: Vec3::ZERO,
            chunk_size: 8,
        };
        let field = share_field(sphere_field(&grid, Vec3::splat(4.0), 2.0).unwrap());
        assert!(TerrainSystem::new(TerrainMode::Gpu, grid, field, None).is_err());
    }

    #[test]
    fn fetch_updates_advances_the_frame() {
        let mut sys = system(TerrainMode::CpuMarchingCubes);
        let mut out = Vec::new();
        assert_eq!(sys.frame_index(), 0);
        assert!(!sys.fetch_updates(&mut out).unwrap());
        assert_eq!(sys.frame_index(), 1);
    }

    #[test]
    fn full_remesh_produces_every_chunk_once() {
        let mut sys = system(TerrainMode::CpuMarchingCubes);
        sys.request_remesh(&RemeshRequest::full(0.0)).unwrap();

        let mut out = Vec::new();
        assert!(sys.fetch_updates(&mut out).unwrap());
        assert_eq!(out.len(), 8); // 2x2x2 chunks of 16 in a 32^3 grid

        let mut keys: Vec<_> = out.iter().map(|u| u.key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 8);

        // Drained: a second fetch has nothing.
        out.clear();
        assert!(!sys.fetch_updates(&mut out).unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn mode_switch_drops_in_flight_results() {
        let mut sys = system(TerrainMode::CpuMarchingCubes);
        sys.request_remesh(&RemeshRequest::full(0.0)).unwrap();
        let mut render_system = RenderSystem::new();
        sys.set_mode(TerrainMode::NeuralDualContouring, None, &mut render_system)
            .unwrap();
        assert_eq!(sys.mode(), TerrainMode::NeuralDualContouring);

        let mut out = Vec::new();
        assert!(!sys.fetch_updates(&mut out).unwrap());
    }

    #[test]
    fn grid_change_drops_pending_results() {
        let mut sys = system(TerrainMode::CpuMarchingCubes);
        sys.request_remesh(&RemeshRequest::full(0.0)).unwrap();

        let smaller = GridDesc {
            cells: UVec3::splat(16),
            cell_size: 1.0,
            origin: Vec3::ZERO,
            chunk_size: 16,
        };
        let mut render_system = RenderSystem::new();
        sys.set_grid_desc(smaller, &mut render_system).unwrap();
        assert_eq!(sys.grid_desc().cells, UVec3::splat(16));

        let mut out = Vec::new();
        assert!(!sys.fetch_updates(&mut out).unwrap());
        assert_eq!(sys.resident_chunks(), 0);
    }

    #[test]
    fn brush_then_fetch_updates_only_dirty_chunks() {
        let mut sys = system(TerrainMode::CpuMarchingCubes);
        let req = BrushRequest {
            hit_pos: Vec3::new(8.0, 8.0, 8.0),
            radius: 3.0,
            weight: 1.0,
            delta_time: 0.016,
            iso_value: 0.0,
        };
        sys.request_brush(&req).unwrap();

        let mut out = Vec::new();
        assert!(sys.fetch_updates(&mut out).unwrap());
        assert!(!out.is_empty());
        for update in &out {
            assert_eq!(update.key, ChunkKey::new(0, 0, 0));
        }
    }
}
