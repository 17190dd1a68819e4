//! GPU buffer management for the sort-based pipeline.
//!
//! Creates the two particle banks and every per-tick scratch buffer once,
//! sized for the fixed particle count, and handles GPU->CPU readback.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::SimError;
use crate::grid::CellRange;
use crate::params::{GridSettings, SimParams};
use crate::particle::Particle;
use crate::sort::{SortEntry, SortPass};
use crate::sph::DensitySample;

/// Uniform block shared by the per-particle shaders.
/// Must match `SimParams` in `shaders/common.wgsl` exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct GpuSimParams {
    pub domain_min: [f32; 3],
    pub cell_size: f32,
    pub domain_max: [f32; 3],
    pub h: f32,
    pub gravity: [f32; 3],
    pub h2: f32,
    pub n_particles: u32,
    pub sort_len: u32,
    pub bits_per_axis: u32,
    pub key_scheme: u32,
    pub dt: f32,
    pub sim_scale: f32,
    pub mass: f32,
    pub rest_density: f32,
    pub stiffness: f32,
    pub clamp_pressure: u32,
    pub poly6_coef: f32,
    pub spiky_grad_coef: f32,
    pub lap_coef: f32,
    pub viscosity: f32,
    pub velocity_limit: f32,
    pub wall_margin: f32,
    pub wall_stiffness: f32,
    pub wall_damping: f32,
    pub key_count: u32,
    pub _pad0: u32,
}

impl GpuSimParams {
    pub fn new(params: &SimParams, grid: &GridSettings, n_particles: u32, sort_len: u32) -> Self {
        Self {
            domain_min: params.domain.min.to_array(),
            cell_size: params.cell_size,
            domain_max: params.domain.max.to_array(),
            h: params.h,
            gravity: params.gravity.to_array(),
            h2: params.h2,
            n_particles,
            sort_len,
            bits_per_axis: grid.bits_per_axis,
            key_scheme: grid.key_scheme.shader_id(),
            dt: params.dt,
            sim_scale: params.sim_scale,
            mass: params.mass,
            rest_density: params.rest_density,
            stiffness: params.stiffness,
            clamp_pressure: params.clamp_pressure as u32,
            poly6_coef: params.poly6_coef,
            spiky_grad_coef: params.spiky_grad_coef,
            lap_coef: params.lap_coef,
            viscosity: params.viscosity,
            velocity_limit: params.velocity_limit,
            wall_margin: params.wall_margin,
            wall_stiffness: params.wall_stiffness,
            wall_damping: params.wall_damping,
            key_count: grid.key_count() as u32,
            _pad0: 0,
        }
    }
}

/// Per-pass constants of the sorting network.
/// Must match `SortConstants` in `bitonic.wgsl` / `transpose.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Pod, Zeroable)]
pub struct SortConstants {
    pub level: u32,
    pub level_mask: u32,
    pub width: u32,
    pub height: u32,
}

impl From<SortPass> for SortConstants {
    fn from(pass: SortPass) -> Self {
        match pass {
            SortPass::Merge { level, level_mask } => Self {
                level,
                level_mask,
                ..Default::default()
            },
            SortPass::Transpose { width, height } => Self {
                width,
                height,
                ..Default::default()
            },
        }
    }
}

/// Stride between consecutive [`SortConstants`] in the dynamic-offset buffer.
pub const SORT_CONSTANTS_STRIDE: u64 = 256;

/// Size of one [`SortConstants`] binding.
pub const SORT_CONSTANTS_SIZE: Option<NonZeroU64> =
    NonZeroU64::new(std::mem::size_of::<SortConstants>() as u64);

/// All GPU buffers used by the pipeline.
pub struct GpuBuffers {
    pub params: wgpu::Buffer,
    pub sort_constants: wgpu::Buffer,

    pub banks: [wgpu::Buffer; 2],
    pub entries: wgpu::Buffer,
    pub entries_tmp: wgpu::Buffer,
    pub ranges: wgpu::Buffer,
    pub sorted: wgpu::Buffer,
    pub rank: wgpu::Buffer,
    pub density: wgpu::Buffer,
    pub accel: wgpu::Buffer,

    pub staging_particles: wgpu::Buffer,

    pub n_particles: u32,
    pub sort_len: u32,
    pub key_count: u32,
}

impl GpuBuffers {
    /// Allocate every buffer, rejecting sizes the device cannot bind.
    pub fn new(
        device: &wgpu::Device,
        particles: &[Particle],
        sort_len: usize,
        key_count: usize,
        passes: &[SortPass],
        initial_params: &GpuSimParams,
    ) -> Result<Self, SimError> {
        let limits = device.limits();
        let n = particles.len();
        let check = |buffer: &'static str, bytes: usize| -> Result<u64, SimError> {
            let size = bytes as u64;
            if size > limits.max_storage_buffer_binding_size as u64
                || size > limits.max_buffer_size
            {
                return Err(SimError::Allocation { buffer, bytes });
            }
            Ok(size)
        };

        let particle_bytes = check("particle bank", n * std::mem::size_of::<Particle>())?;
        let entry_bytes = check("sort entries", sort_len * std::mem::size_of::<SortEntry>())?;
        let range_bytes = check("cell ranges", key_count * std::mem::size_of::<CellRange>())?;
        let rank_bytes = check("rank", n * std::mem::size_of::<u32>())?;
        let density_bytes = check("density", n * std::mem::size_of::<DensitySample>())?;
        let accel_bytes = check("acceleration", n * 16)?;

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sim_params"),
            contents: bytemuck::bytes_of(initial_params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let mut constants = vec![0u8; passes.len().max(1) * SORT_CONSTANTS_STRIDE as usize];
        for (i, pass) in passes.iter().enumerate() {
            let c = SortConstants::from(*pass);
            let offset = i * SORT_CONSTANTS_STRIDE as usize;
            constants[offset..offset + std::mem::size_of::<SortConstants>()]
                .copy_from_slice(bytemuck::bytes_of(&c));
        }
        let sort_constants = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort_constants"),
            contents: &constants,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bank_usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let bank0 = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("particles_bank0"),
            contents: bytemuck::cast_slice(particles),
            usage: bank_usage,
        });
        let bank1 = storage(device, "particles_bank1", particle_bytes, bank_usage);

        let scratch = wgpu::BufferUsages::STORAGE;
        Ok(Self {
            params,
            sort_constants,
            banks: [bank0, bank1],
            entries: storage(device, "sort_entries", entry_bytes, scratch),
            entries_tmp: storage(device, "sort_entries_tmp", entry_bytes, scratch),
            ranges: storage(
                device,
                "cell_ranges",
                range_bytes,
                scratch | wgpu::BufferUsages::COPY_DST,
            ),
            sorted: storage(device, "sorted_particles", particle_bytes, scratch),
            rank: storage(device, "rank", rank_bytes, scratch),
            density: storage(device, "density", density_bytes, scratch),
            accel: storage(device, "acceleration", accel_bytes, scratch),
            staging_particles: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("staging_particles"),
                size: particle_bytes,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            n_particles: n as u32,
            sort_len: sort_len as u32,
            key_count: key_count as u32,
        })
    }

    /// Upload the per-tick parameter block.
    pub fn update_params(&self, queue: &wgpu::Queue, params: &GpuSimParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }

    /// Copy bank `bank` back to the CPU.
    pub fn readback_particles(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bank: usize,
    ) -> Result<Vec<Particle>, SimError> {
        let bytes = self.n_particles as u64 * std::mem::size_of::<Particle>() as u64;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback"),
        });
        encoder.copy_buffer_to_buffer(&self.banks[bank], 0, &self.staging_particles, 0, bytes);
        queue.submit(std::iter::once(encoder.finish()));

        read_buffer(device, &self.staging_particles, self.n_particles as usize)
    }
}

fn storage(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(4),
        usage,
        mapped_at_creation: false,
    })
}

/// Block on mapping a staging buffer and copy out `count` elements.
fn read_buffer<T: Pod>(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, SimError> {
    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| SimError::Device("readback callback never ran".into()))?
        .map_err(|e| SimError::Device(format!("failed to map staging buffer: {e}")))?;

    let data = slice.get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data)[..count].to_vec();
    drop(data);
    buffer.unmap();
    Ok(result)
}
