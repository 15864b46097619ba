//! Cross-module terrain tests: addressing, triangulation properties and
//! backend behavior shared by the CPU paths.

use glam::{IVec3, UVec3, Vec3};

use crate::field::generator::sphere_field;
use crate::terrain::cpu_mc::{extract_chunk, CpuMarchingCubes};
use crate::terrain::ndc::{NdcModel, NeuralDualContouring};
use crate::terrain::types::*;
use crate::terrain::share_field;

fn sphere_grid() -> GridDesc {
    GridDesc {
        cells: UVec3::splat(64),
        cell_size: 1.0,
        origin: Vec3::ZERO,
        chunk_size: 32,
    }
}

#[test]
fn chunk_addressing_round_trips() {
    for &(cell, size, expect) in &[
        (IVec3::new(0, 0, 0), 16u32, ChunkKey::new(0, 0, 0)),
        (IVec3::new(15, 15, 15), 16, ChunkKey::new(0, 0, 0)),
        (IVec3::new(16, 0, 31), 16, ChunkKey::new(1, 0, 1)),
        (IVec3::new(-1, 0, 0), 16, ChunkKey::new(-1, 0, 0)),
        (IVec3::new(-16, -17, 0), 16, ChunkKey::new(-1, -2, 0)),
    ] {
        let key = ChunkKey::containing(cell, size);
        assert_eq!(key, expect, "cell {:?}", cell);
        let min = key.min_cell(size);
        assert!(cell.cmpge(min).all());
        assert!(cell.cmplt(min + IVec3::splat(size as i32)).all());
    }
}

#[test]
fn grid_index_world_round_trip() {
    let grid = GridDesc {
        cells: UVec3::new(10, 20, 30),
        cell_size: 0.5,
        origin: Vec3::new(-3.0, 1.0, 7.5),
        chunk_size: 8,
    };
    let p = Vec3::new(1.25, 4.0, 9.0);
    let back = grid.index_to_world(grid.world_to_index(p));
    assert!((back - p).length() < 1e-5);

    // 10/8, 20/8, 30/8 round up.
    assert_eq!(grid.chunk_counts(), UVec3::new(2, 3, 4));
    assert_eq!(grid.sample_counts(), UVec3::new(11, 21, 31));
}

#[test]
fn tangent_avoids_the_vertical_degeneracy() {
    let v = TerrainVertex::new(Vec3::ZERO, Vec3::Y);
    let tangent = Vec3::from(v.tangent);
    assert!(tangent.length() > 0.99);
    assert!(tangent.dot(Vec3::Y).abs() < 1e-6);

    let v = TerrainVertex::new(Vec3::ZERO, Vec3::X);
    assert!(Vec3::from(v.tangent).length() > 0.99);
}

#[test]
fn mc_sphere_vertices_hug_the_surface() {
    let grid = sphere_grid();
    let center = Vec3::splat(32.0);
    let radius = 14.0;
    let field = sphere_field(&grid, center, radius).unwrap();

    let mut total = 0;
    for z in 0..2 {
        for y in 0..2 {
            for x in 0..2 {
                let geo = extract_chunk(&field, &grid, ChunkKey::new(x, y, z), 0.0);
                total += geo.vertices.len();
                for v in &geo.vertices {
                    let d = Vec3::from(v.position).distance(center);
                    assert!((d - radius).abs() < 1.0, "vertex at distance {}", d);
                }
            }
        }
    }
    assert!(total > 0);
}

#[test]
fn mc_normals_point_outward_on_a_sphere() {
    let grid = sphere_grid();
    let center = Vec3::splat(32.0);
    let field = sphere_field(&grid, center, 14.0).unwrap();
    let geo = extract_chunk(&field, &grid, ChunkKey::new(0, 0, 0), 0.0);
    for v in &geo.vertices {
        let outward = (Vec3::from(v.position) - center).normalize();
        assert!(
            Vec3::from(v.normal).dot(outward) > 0.7,
            "normal {:?} vs outward {:?}",
            v.normal,
            outward
        );
    }
}

#[test]
fn mc_extraction_is_deterministic() {
    let grid = sphere_grid();
    let field = sphere_field(&grid, Vec3::splat(32.0), 14.0).unwrap();
    let a = extract_chunk(&field, &grid, ChunkKey::new(0, 0, 0), 0.0);
    let b = extract_chunk(&field, &grid, ChunkKey::new(0, 0, 0), 0.0);
    assert_eq!(a.vertices, b.vertices);
    assert_eq!(a.indices, b.indices);
}

#[test]
fn mc_chunk_geometry_depends_only_on_its_own_samples() {
    let grid = GridDesc {
        cells: UVec3::splat(32),
        cell_size: 1.0,
        origin: Vec3::ZERO,
        chunk_size: 16,
    };
    // Surface crossing the x = 16 chunk face.
    let mut field = sphere_field(&grid, Vec3::new(16.0, 8.0, 8.0), 6.0).unwrap();
    let before = extract_chunk(&field, &grid, ChunkKey::new(0, 0, 0), 0.0);
    assert!(!before.vertices.is_empty());

    // Mutate a sample one past the shared face: outside chunk (0,0,0)'s
    // (chunk_size+1)^3 sub-block, so its geometry must not change.
    *field.at_mut(17, 8, 8) = 50.0;
    let after = extract_chunk(&field, &grid, ChunkKey::new(0, 0, 0), 0.0);
    assert_eq!(before.vertices, after.vertices);
    assert_eq!(before.indices, after.indices);
}

#[test]
fn mc_partial_trailing_chunk_is_handled() {
    let grid = GridDesc {
        cells: UVec3::splat(20), // 20 cells, chunk 16: trailing extent 4
        cell_size: 1.0,
        origin: Vec3::ZERO,
        chunk_size: 16,
    };
    let field = sphere_field(&grid, Vec3::splat(18.0), 3.0).unwrap();
    let geo = extract_chunk(&field, &grid, ChunkKey::new(1, 1, 1), 0.0);
    assert!(!geo.vertices.is_empty());
    for v in &geo.vertices {
        let p = Vec3::from(v.position);
        assert!(p.cmple(Vec3::splat(20.0)).all(), "vertex outside grid: {:?}", p);
    }
}

#[test]
fn cpu_backend_fetch_is_idempotent() {
    let grid = sphere_grid();
    let field = share_field(sphere_field(&grid, Vec3::splat(32.0), 14.0).unwrap());
    let mut backend = CpuMarchingCubes::new(grid, field);
    backend.request_remesh(0, &RemeshRequest::full(0.0)).unwrap();

    let mut first = Vec::new();
    assert!(backend.try_fetch(&mut first).unwrap());
    assert!(!first.is_empty());

    let mut second = Vec::new();
    assert!(!backend.try_fetch(&mut second).unwrap());
    assert!(second.is_empty());
}

#[test]
fn cpu_backend_remesh_after_carve_empties_chunks() {
    let grid = GridDesc {
        cells: UVec3::splat(32),
        cell_size: 1.0,
        origin: Vec3::ZERO,
        chunk_size: 16,
    };
    let field = share_field(sphere_field(&grid, Vec3::splat(8.0), 5.0).unwrap());
    let mut backend = CpuMarchingCubes::new(grid, field.clone());

    // Flatten the whole field below the iso surface, then remesh.
    field.write().fill_with(|_, _, _| -1.0);
    backend.request_remesh(0, &RemeshRequest::full(0.0)).unwrap();

    let mut out = Vec::new();
    assert!(backend.try_fetch(&mut out).unwrap());
    assert!(out.iter().all(|u| u.empty));
}

#[test]
fn ndc_backend_meshes_a_sphere() {
    let grid = sphere_grid();
    let center = Vec3::splat(32.0);
    let radius = 14.0;
    let field = share_field(sphere_field(&grid, center, radius).unwrap());
    let mut backend =
        NeuralDualContouring::new(grid, field, NdcModel::surface_centered());
    backend.request_remesh(0, &RemeshRequest::full(0.0)).unwrap();

    let mut out = Vec::new();
    assert!(backend.try_fetch(&mut out).unwrap());
    let verts: usize = out.iter().map(|u| u.geometry.vertices.len()).sum();
    assert!(verts > 0);
    for update in &out {
        for v in &update.geometry.vertices {
            let d = Vec3::from(v.position).distance(center);
            assert!((d - radius).abs() < 1.5, "vertex at distance {}", d);
        }
    }
}

#[test]
fn ndc_brush_patches_without_full_rebuild() {
    let grid = sphere_grid();
    let center = Vec3::splat(32.0);
    let field = share_field(sphere_field(&grid, center, 14.0).unwrap());
    let mut backend =
        NeuralDualContouring::new(grid, field.clone(), NdcModel::surface_centered());
    backend.request_remesh(0, &RemeshRequest::full(0.0)).unwrap();
    let mut out = Vec::new();
    backend.try_fetch(&mut out).unwrap();

    // Carve at the surface; the dirty region must come back remeshed.
    let req = BrushRequest {
        hit_pos: center + Vec3::new(14.0, 0.0, 0.0),
        radius: 3.0,
        weight: -2.0,
        delta_time: 0.05,
        iso_value: 0.0,
    };
    backend.request_brush(1, &req).unwrap();

    out.clear();
    assert!(backend.try_fetch(&mut out).unwrap());
    assert!(!out.is_empty());
}
