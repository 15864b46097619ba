//! Compute pipelines and uniform layouts for the GPU terrain backend.

use crate::error::EngineResult;

/// Brush pass uniforms. Rows are 16-byte aligned to match WGSL.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BrushUniforms {
    pub center: [f32; 3],
    pub radius: f32,
    pub origin: [f32; 3],
    pub cell_size: f32,
    pub aabb_min: [i32; 3],
    pub rate: f32,
    pub aabb_extent: [u32; 3],
    pub add: u32,
    pub samples: [u32; 3],
    pub _pad: u32,
}

/// Marching-cubes pass uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshUniforms {
    pub origin: [f32; 3],
    pub cell_size: f32,
    pub cells: [u32; 3],
    pub chunk_size: u32,
    pub box_min_cell: [i32; 3],
    pub iso: f32,
    pub box_cells: [u32; 3],
    pub max_tris: u32,
    pub chunk_min: [i32; 3],
    pub _pad0: u32,
    pub chunk_dims: [u32; 3],
    pub _pad1: u32,
}

/// One triangle as written by the marching-cubes shader: three
/// position+normal vertices, the emitting chunk slot and cell id. 80 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuTri {
    pub verts: [[f32; 6]; 3],
    pub chunk: u32,
    pub cell: u32,
}

pub const GPU_TRI_SIZE: u64 = std::mem::size_of::<GpuTri>() as u64;

/// Compute workgroup edge length for both passes. 4^3 = 64 invocations
/// stays under the default 256-per-workgroup limit.
pub const WORKGROUP_EDGE: u32 = 4;

pub struct TerrainPipelines {
    pub brush_pipeline: wgpu::ComputePipeline,
    pub brush_layout: wgpu::BindGroupLayout,
    pub mesh_pipeline: wgpu::ComputePipeline,
    pub mesh_layout: wgpu::BindGroupLayout,
}

impl TerrainPipelines {
    pub fn new(device: &wgpu::Device) -> EngineResult<Self> {
        let brush_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Terrain Brush Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/terrain/brush.wgsl").into(),
            ),
        });
        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Terrain MC Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/terrain/marching_cubes.wgsl").into(),
            ),
        });

        let brush_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain Brush BGL"),
            entries: &[
                storage_entry(0, false),
                uniform_entry(1),
            ],
        });
        let mesh_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain MC BGL"),
            entries: &[
                storage_entry(0, true),
                uniform_entry(1),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
                storage_entry(5, false),
            ],
        });

        let brush_pipeline = create_pipeline(device, &brush_layout, &brush_shader, "Terrain Brush");
        let mesh_pipeline = create_pipeline(device, &mesh_layout, &mesh_shader, "Terrain MC");

        Ok(Self { brush_pipeline, brush_layout, mesh_pipeline, mesh_layout })
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    shader: &wgpu::ShaderModule,
    label: &str,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: shader,
        entry_point: "main",
    })
}
