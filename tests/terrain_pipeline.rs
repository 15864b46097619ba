//! End-to-end terrain pipeline tests: generate a field, sculpt it, remesh
//! it on each backend, and stream the results.
//!
//! GPU tests skip cleanly on machines without an adapter.

use glam::{UVec3, Vec3};

use terrasculpt::field::generator::sphere_field;
use terrasculpt::renderer::{RenderContext, RenderSystem};
use terrasculpt::terrain::cpu_mc::CpuMarchingCubes;
use terrasculpt::terrain::gpu::GpuTerrainBackend;
use terrasculpt::terrain::share_field;
use terrasculpt::{
    BrushRequest, ChunkKey, ChunkUpdate, GridDesc, RemeshRequest, TerrainBackend, TerrainMode,
    TerrainSystem,
};

const SPHERE_RADIUS: f32 = 25.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sphere_grid() -> GridDesc {
    GridDesc {
        cells: UVec3::splat(100),
        cell_size: 1.0,
        origin: Vec3::ZERO,
        chunk_size: 50,
    }
}

fn sphere_center() -> Vec3 {
    Vec3::splat(50.0)
}

fn gpu_context() -> Option<RenderContext> {
    RenderContext::request_headless().ok()
}

fn non_empty_keys(updates: &[ChunkUpdate]) -> Vec<ChunkKey> {
    let mut keys: Vec<_> =
        updates.iter().filter(|u| !u.empty).map(|u| u.key).collect();
    keys.sort();
    keys
}

fn assert_on_sphere(updates: &[ChunkUpdate], tolerance: f32) {
    let center = sphere_center();
    for update in updates {
        for v in &update.geometry.vertices {
            let d = Vec3::from(v.position).distance(center);
            assert!(
                (d - SPHERE_RADIUS).abs() < tolerance,
                "vertex at distance {} from center",
                d
            );
        }
    }
}

#[test]
fn cpu_full_remesh_covers_the_sphere() {
    init_logging();
    let grid = sphere_grid();
    let field = share_field(sphere_field(&grid, sphere_center(), SPHERE_RADIUS).unwrap());
    let mut backend = CpuMarchingCubes::new(grid, field);

    backend.request_remesh(0, &RemeshRequest::full(0.0)).unwrap();
    let mut updates = Vec::new();
    assert!(backend.try_fetch(&mut updates).unwrap());

    // The sphere crosses all eight 50^3 octant chunks.
    let keys = non_empty_keys(&updates);
    assert_eq!(keys.len(), 8, "non-empty chunks: {:?}", keys);
    assert_on_sphere(&updates, 1.0);
}

#[test]
fn brush_add_raises_density_and_dirties_owning_chunks() {
    init_logging();
    let grid = sphere_grid();
    let field = share_field(sphere_field(&grid, sphere_center(), SPHERE_RADIUS).unwrap());
    let mut backend = CpuMarchingCubes::new(grid, field.clone());

    // Stroke on the +X side of the surface.
    let hit = sphere_center() + Vec3::new(SPHERE_RADIUS, 0.0, 0.0);
    let before = field.read().at(75, 50, 50);
    let req = BrushRequest {
        hit_pos: hit,
        radius: 4.0,
        weight: 3.0,
        delta_time: 0.05,
        iso_value: 0.0,
    };
    backend.request_brush(0, &req).unwrap();

    let after = field.read().at(75, 50, 50);
    assert!(after > before, "density at hit: {} -> {}", before, after);

    // The stroke is centered in chunk (1, 1, 1); samples on the y = 50 and
    // z = 50 faces also dirty the sharing neighbors.
    let mut updates = Vec::new();
    assert!(backend.try_fetch(&mut updates).unwrap());
    let keys = non_empty_keys(&updates);
    assert!(keys.contains(&ChunkKey::new(1, 1, 1)), "dirty chunks: {:?}", keys);
}

#[test]
fn repeated_carving_eventually_empties_a_chunk() {
    init_logging();
    let grid = GridDesc {
        cells: UVec3::splat(32),
        cell_size: 1.0,
        origin: Vec3::ZERO,
        chunk_size: 16,
    };
    let center = Vec3::new(8.0, 8.0, 8.0);
    let field = share_field(sphere_field(&grid, center, 4.0).unwrap());
    let mut backend = CpuMarchingCubes::new(grid, field);

    let req = BrushRequest {
        hit_pos: center,
        radius: 8.0,
        weight: -10.0,
        delta_time: 0.1,
        iso_value: 0.0,
    };
    let mut updates = Vec::new();
    for frame in 0..64 {
        backend.request_brush(frame, &req).unwrap();
        backend.try_fetch(&mut updates).unwrap();
        updates.clear();
    }

    backend.request_remesh(64, &RemeshRequest::full(0.0)).unwrap();
    backend.try_fetch(&mut updates).unwrap();
    let emptied = updates
        .iter()
        .any(|u| u.key == ChunkKey::new(0, 0, 0) && u.empty);
    assert!(emptied, "chunk (0,0,0) still has geometry after carving");
}

#[test]
fn gpu_remesh_matches_cpu_surface() {
    init_logging();
    let Some(ctx) = gpu_context() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let grid = sphere_grid();
    let field = share_field(sphere_field(&grid, sphere_center(), SPHERE_RADIUS).unwrap());

    let mut cpu = CpuMarchingCubes::new(grid, field.clone());
    cpu.request_remesh(0, &RemeshRequest::full(0.0)).unwrap();
    let mut cpu_updates = Vec::new();
    cpu.try_fetch(&mut cpu_updates).unwrap();

    let mut gpu = GpuTerrainBackend::new(&ctx, grid, field).unwrap();
    gpu.request_remesh(0, &RemeshRequest::full(0.0)).unwrap();
    let mut gpu_updates = Vec::new();
    assert!(gpu.try_fetch(&mut gpu_updates).unwrap());

    assert_eq!(non_empty_keys(&gpu_updates), non_empty_keys(&cpu_updates));
    assert_on_sphere(&gpu_updates, 1.0);
    assert_eq!(gpu.overflowed_triangles(), 0);
}

#[test]
fn gpu_remesh_is_deterministic() {
    init_logging();
    let Some(ctx) = gpu_context() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let grid = sphere_grid();
    let field = share_field(sphere_field(&grid, sphere_center(), SPHERE_RADIUS).unwrap());
    let mut gpu = GpuTerrainBackend::new(&ctx, grid, field).unwrap();

    let mut runs: Vec<Vec<ChunkUpdate>> = Vec::new();
    for frame in 0..2 {
        gpu.request_remesh(frame, &RemeshRequest::full(0.0)).unwrap();
        let mut updates = Vec::new();
        assert!(gpu.try_fetch(&mut updates).unwrap());
        updates.sort_by_key(|u| u.key);
        runs.push(updates);
    }

    let (a, b) = (&runs[0], &runs[1]);
    assert_eq!(a.len(), b.len());
    for (ua, ub) in a.iter().zip(b) {
        assert_eq!(ua.key, ub.key);
        assert_eq!(ua.geometry.vertices, ub.geometry.vertices);
        assert_eq!(ua.geometry.indices, ub.geometry.indices);
    }
}

#[test]
fn gpu_readback_ring_drains_in_order() {
    init_logging();
    let Some(ctx) = gpu_context() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let grid = GridDesc {
        cells: UVec3::splat(32),
        cell_size: 1.0,
        origin: Vec3::ZERO,
        chunk_size: 16,
    };
    let field = share_field(sphere_field(&grid, Vec3::splat(16.0), 8.0).unwrap());
    let mut gpu = GpuTerrainBackend::new(&ctx, grid, field).unwrap();

    gpu.request_remesh(0, &RemeshRequest::full(0.0)).unwrap();
    gpu.request_remesh(1, &RemeshRequest::full(0.0)).unwrap();

    let mut updates = Vec::new();
    assert!(gpu.try_fetch(&mut updates).unwrap());
    assert!(gpu.try_fetch(&mut updates).unwrap());
    assert!(!gpu.try_fetch(&mut updates).unwrap());
}

#[test]
fn terrain_system_streams_drawables_through_the_renderer() {
    init_logging();
    let Some(ctx) = gpu_context() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let grid = sphere_grid();
    let field = share_field(sphere_field(&grid, sphere_center(), SPHERE_RADIUS).unwrap());
    let mut system =
        TerrainSystem::new(TerrainMode::Gpu, grid, field, Some(&ctx)).unwrap();
    let mut render_system = RenderSystem::new();

    system.request_remesh(&RemeshRequest::full(0.0)).unwrap();
    assert!(system.try_fetch(&ctx, &mut render_system).unwrap());
    assert_eq!(render_system.dynamic_count(), 8);
    assert_eq!(system.resident_chunks(), 8);

    // A repeat remesh refreshes the same drawables instead of leaking new
    // registrations.
    system.request_remesh(&RemeshRequest::full(0.0)).unwrap();
    assert!(system.try_fetch(&ctx, &mut render_system).unwrap());
    assert_eq!(render_system.dynamic_count(), 8);
}

#[test]
fn grid_change_retires_streamed_drawables() {
    init_logging();
    let Some(ctx) = gpu_context() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let grid = sphere_grid();
    let field = share_field(sphere_field(&grid, sphere_center(), SPHERE_RADIUS).unwrap());
    let mut system =
        TerrainSystem::new(TerrainMode::Gpu, grid, field, Some(&ctx)).unwrap();
    let mut render_system = RenderSystem::new();

    system.request_remesh(&RemeshRequest::full(0.0)).unwrap();
    assert!(system.try_fetch(&ctx, &mut render_system).unwrap());
    assert_eq!(render_system.dynamic_count(), 8);

    // Shrinking to a single-chunk grid must not leave chunks keyed outside
    // the new range registered.
    let smaller = GridDesc {
        cells: UVec3::splat(50),
        cell_size: 1.0,
        origin: Vec3::ZERO,
        chunk_size: 50,
    };
    system.set_grid_desc(smaller, &mut render_system).unwrap();
    assert_eq!(render_system.dynamic_count(), 0);
    assert_eq!(system.resident_chunks(), 0);
}
