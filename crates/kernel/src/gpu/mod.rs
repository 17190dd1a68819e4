//! wgpu implementation of the sort-based SPH pipeline.
//!
//! `GpuKernel` runs the same stages as [`CpuKernel`](crate::CpuKernel), each
//! as a compute shader, and records a whole tick into one command encoder:
//!
//! 1. `hash`: cell key per particle, sentinels in the padding
//! 2. `bitonic` / `transpose`: the sorting network from
//!    [`plan_passes`](crate::sort::plan_passes), with
//!    per-pass constants selected by a dynamic uniform offset
//! 3. range clear (`clear_buffer`) and `grid_indices`
//! 4. `rearrange`: gather into sorted order and record ranks
//! 5. `density`, `force`, `integrate`
//!
//! Particle state stays on the device. Integration writes the opposite bank,
//! so the bank that was read during a tick is never written by it.
//! Readback happens lazily on the first [`SimulationKernel::particles`] call
//! after a tick.
//!
//! Workgroups are 256 invocations, so the sort block is 256 entries and the
//! sorted array is padded to at least one full block.

pub mod buffers;

use std::time::Instant;

use buffers::{GpuBuffers, GpuSimParams, SORT_CONSTANTS_SIZE, SORT_CONSTANTS_STRIDE};

use crate::error::SimError;
use crate::params::{FluidParams, GridSettings, SimParams, SimulationDomain};
use crate::particle::Particle;
use crate::sort::{self, SortPass};
use crate::{validate_setup, SimulationKernel};

/// Invocations per workgroup in every shader.
pub const WORKGROUP_SIZE: u32 = 256;

/// Entries sorted inside one workgroup.
pub const GPU_SORT_BLOCK: usize = WORKGROUP_SIZE as usize;

/// Largest sorted array the two-level network supports on the GPU.
pub const MAX_GPU_SORT_LEN: usize = GPU_SORT_BLOCK * GPU_SORT_BLOCK;

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

/// Length of the GPU sort array for `count` particles.
pub fn gpu_sort_length(count: usize, grid: &GridSettings) -> Result<usize, SimError> {
    let len = sort::sort_length(count, grid.pad_to_power_of_two, MAX_GPU_SORT_LEN)?;
    Ok(len.max(GPU_SORT_BLOCK))
}

/// GPU-accelerated SPH kernel.
pub struct GpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,

    pipeline_hash: wgpu::ComputePipeline,
    pipeline_bitonic: wgpu::ComputePipeline,
    pipeline_transpose: wgpu::ComputePipeline,
    pipeline_grid: wgpu::ComputePipeline,
    pipeline_rearrange: wgpu::ComputePipeline,
    pipeline_density: wgpu::ComputePipeline,
    pipeline_force: wgpu::ComputePipeline,
    pipeline_integrate: wgpu::ComputePipeline,

    // Indexed by read bank.
    hash_bg: [wgpu::BindGroup; 2],
    rearrange_bg: [wgpu::BindGroup; 2],
    integrate_bg: [wgpu::BindGroup; 2],
    // Indexed by the entry buffer currently holding the data.
    bitonic_bg: [wgpu::BindGroup; 2],
    transpose_bg: [wgpu::BindGroup; 2],
    grid_bg: wgpu::BindGroup,
    density_bg: wgpu::BindGroup,
    force_bg: wgpu::BindGroup,

    bufs: GpuBuffers,
    passes: Vec<SortPass>,

    fluid: FluidParams,
    domain: SimulationDomain,
    grid: GridSettings,

    read: usize,
    tick: u64,
    last_step_us: u64,

    cached_particles: Vec<Particle>,
    cache_dirty: bool,
}

impl GpuKernel {
    /// Create a GPU kernel over `particles`.
    ///
    /// Performs the same validation as the CPU backend, then fails with
    /// [`SimError::Device`] when no adapter or device is available or a
    /// pipeline does not validate, and with [`SimError::Allocation`] when a
    /// buffer exceeds the device's limits.
    pub fn new(
        particles: Vec<Particle>,
        fluid: FluidParams,
        domain: SimulationDomain,
        grid: GridSettings,
    ) -> Result<Self, SimError> {
        let n = particles.len();
        validate_setup(n, &fluid, &domain, &grid)?;
        let sort_len = gpu_sort_length(n, &grid)?;
        let passes = sort::plan_passes(sort_len, GPU_SORT_BLOCK);

        // --- Device initialization ---
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| SimError::Device("no suitable GPU adapter found".into()))?;

        let adapter_name = adapter.get_info().name;
        tracing::info!("GPU adapter: {:?}", adapter_name);

        // Large particle sets need storage bindings above the 128 MiB default.
        let adapter_limits = adapter.limits();
        let mut required_limits = wgpu::Limits::default();
        required_limits.max_storage_buffer_binding_size =
            adapter_limits.max_storage_buffer_binding_size;
        required_limits.max_buffer_size = adapter_limits.max_buffer_size;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sph_gpu_device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| SimError::Device(format!("failed to create device: {e}")))?;

        // --- Buffers ---
        let params = SimParams::new(&fluid, &domain, fluid.timestep.resolve(0.0));
        let initial = GpuSimParams::new(&params, &grid, n as u32, sort_len as u32);
        let bufs = GpuBuffers::new(
            &device,
            &particles,
            sort_len,
            grid.key_count(),
            &passes,
            &initial,
        )?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        // --- Shaders ---
        let hash_shader = stage_shader(&device, "hash", include_str!("shaders/hash.wgsl"));
        let grid_shader = stage_shader(
            &device,
            "grid_indices",
            include_str!("shaders/grid_indices.wgsl"),
        );
        let rearrange_shader =
            stage_shader(&device, "rearrange", include_str!("shaders/rearrange.wgsl"));
        let density_shader = stage_shader(&device, "density", include_str!("shaders/density.wgsl"));
        let force_shader = stage_shader(&device, "force", include_str!("shaders/force.wgsl"));
        let integrate_shader =
            stage_shader(&device, "integrate", include_str!("shaders/integrate.wgsl"));
        let bitonic_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("bitonic"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/bitonic.wgsl").into()),
        });
        let transpose_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("transpose"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/transpose.wgsl").into()),
        });

        // --- Bind group layouts ---
        // params, input (read), output (rw): hash and grid_indices
        let bgl_in_out = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("in_out_bgl"),
            entries: &[bgl_uniform(0), bgl_storage_ro(1), bgl_storage_rw(2)],
        });
        let bgl_bitonic = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("bitonic_bgl"),
            entries: &[bgl_uniform_dynamic(0), bgl_storage_rw(1)],
        });
        let bgl_transpose = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("transpose_bgl"),
            entries: &[bgl_uniform_dynamic(0), bgl_storage_ro(1), bgl_storage_rw(2)],
        });
        let bgl_rearrange = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rearrange_bgl"),
            entries: &[
                bgl_uniform(0),
                bgl_storage_ro(1), // entries
                bgl_storage_ro(2), // particles
                bgl_storage_rw(3), // sorted
                bgl_storage_rw(4), // rank
            ],
        });
        let bgl_density = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("density_bgl"),
            entries: &[
                bgl_uniform(0),
                bgl_storage_ro(1), // sorted
                bgl_storage_ro(2), // ranges
                bgl_storage_rw(3), // density_out
            ],
        });
        let bgl_force = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("force_bgl"),
            entries: &[
                bgl_uniform(0),
                bgl_storage_ro(1), // sorted
                bgl_storage_ro(2), // ranges
                bgl_storage_ro(3), // density
                bgl_storage_rw(4), // accel_out
            ],
        });
        let bgl_integrate = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("integrate_bgl"),
            entries: &[
                bgl_uniform(0),
                bgl_storage_ro(1), // sorted
                bgl_storage_ro(2), // density
                bgl_storage_ro(3), // accel
                bgl_storage_ro(4), // rank
                bgl_storage_rw(5), // particles_out
            ],
        });

        // --- Pipelines ---
        let pipeline_hash = compute_pipeline(&device, "hash", &hash_shader, &bgl_in_out);
        let pipeline_bitonic = compute_pipeline(&device, "bitonic", &bitonic_shader, &bgl_bitonic);
        let pipeline_transpose =
            compute_pipeline(&device, "transpose", &transpose_shader, &bgl_transpose);
        let pipeline_grid = compute_pipeline(&device, "grid_indices", &grid_shader, &bgl_in_out);
        let pipeline_rearrange =
            compute_pipeline(&device, "rearrange", &rearrange_shader, &bgl_rearrange);
        let pipeline_density = compute_pipeline(&device, "density", &density_shader, &bgl_density);
        let pipeline_force = compute_pipeline(&device, "force", &force_shader, &bgl_force);
        let pipeline_integrate =
            compute_pipeline(&device, "integrate", &integrate_shader, &bgl_integrate);

        // --- Bind groups ---
        // Transposes come in pairs, but pick the result buffer from the plan
        // rather than assume it.
        let transposes = passes
            .iter()
            .filter(|p| matches!(p, SortPass::Transpose { .. }))
            .count();
        let sorted_entries = if transposes % 2 == 0 {
            &bufs.entries
        } else {
            &bufs.entries_tmp
        };

        let hash_bg = [0usize, 1].map(|r| {
            stage_bind_group(
                &device,
                "hash_bg",
                &bgl_in_out,
                &bufs.params,
                &[&bufs.banks[r], &bufs.entries],
            )
        });
        let rearrange_bg = [0usize, 1].map(|r| {
            stage_bind_group(
                &device,
                "rearrange_bg",
                &bgl_rearrange,
                &bufs.params,
                &[sorted_entries, &bufs.banks[r], &bufs.sorted, &bufs.rank],
            )
        });
        let integrate_bg = [0usize, 1].map(|r| {
            stage_bind_group(
                &device,
                "integrate_bg",
                &bgl_integrate,
                &bufs.params,
                &[&bufs.sorted, &bufs.density, &bufs.accel, &bufs.rank, &bufs.banks[1 - r]],
            )
        });
        let entry_bufs = [&bufs.entries, &bufs.entries_tmp];
        let bitonic_bg = [0usize, 1].map(|a| {
            sort_bind_group(
                &device,
                "bitonic_bg",
                &bgl_bitonic,
                &bufs.sort_constants,
                &[entry_bufs[a]],
            )
        });
        let transpose_bg = [0usize, 1].map(|a| {
            sort_bind_group(
                &device,
                "transpose_bg",
                &bgl_transpose,
                &bufs.sort_constants,
                &[entry_bufs[a], entry_bufs[1 - a]],
            )
        });
        let grid_bg = stage_bind_group(
            &device,
            "grid_bg",
            &bgl_in_out,
            &bufs.params,
            &[sorted_entries, &bufs.ranges],
        );
        let density_bg = stage_bind_group(
            &device,
            "density_bg",
            &bgl_density,
            &bufs.params,
            &[&bufs.sorted, &bufs.ranges, &bufs.density],
        );
        let force_bg = stage_bind_group(
            &device,
            "force_bg",
            &bgl_force,
            &bufs.params,
            &[&bufs.sorted, &bufs.ranges, &bufs.density, &bufs.accel],
        );

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(SimError::Device(format!("pipeline setup failed: {err}")));
        }

        tracing::info!(
            particles = n,
            sort_len,
            sort_passes = passes.len(),
            cells_per_axis = grid.cells_per_axis(),
            key_scheme = ?grid.key_scheme,
            "GPU kernel ready"
        );

        Ok(Self {
            device,
            queue,
            adapter_name,
            pipeline_hash,
            pipeline_bitonic,
            pipeline_transpose,
            pipeline_grid,
            pipeline_rearrange,
            pipeline_density,
            pipeline_force,
            pipeline_integrate,
            hash_bg,
            rearrange_bg,
            integrate_bg,
            bitonic_bg,
            transpose_bg,
            grid_bg,
            density_bg,
            force_bg,
            bufs,
            passes,
            fluid,
            domain,
            grid,
            read: 0,
            tick: 0,
            last_step_us: 0,
            cached_particles: particles,
            cache_dirty: false,
        })
    }

    /// Name of the adapter the kernel runs on.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Length of the padded sort array.
    pub fn sort_len(&self) -> usize {
        self.bufs.sort_len as usize
    }

    /// Wall-clock time of the last tick, including the wait for completion.
    pub fn last_step_us(&self) -> u64 {
        self.last_step_us
    }

    /// Record one full tick into `encoder`.
    fn encode_tick(&self, encoder: &mut wgpu::CommandEncoder) {
        let r = self.read;
        let wg_sort = dispatch_size(self.bufs.sort_len, WORKGROUP_SIZE);
        let wg_particles = dispatch_size(self.bufs.n_particles, WORKGROUP_SIZE);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("hash"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline_hash);
            pass.set_bind_group(0, &self.hash_bg[r], &[]);
            pass.dispatch_workgroups(wg_sort, 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("bitonic_sort"),
                timestamp_writes: None,
            });
            let mut active = 0usize;
            for (i, sort_pass) in self.passes.iter().enumerate() {
                let offset = (i as u64 * SORT_CONSTANTS_STRIDE) as u32;
                match sort_pass {
                    SortPass::Merge { .. } => {
                        pass.set_pipeline(&self.pipeline_bitonic);
                        pass.set_bind_group(0, &self.bitonic_bg[active], &[offset]);
                    }
                    SortPass::Transpose { .. } => {
                        pass.set_pipeline(&self.pipeline_transpose);
                        pass.set_bind_group(0, &self.transpose_bg[active], &[offset]);
                        active ^= 1;
                    }
                }
                pass.dispatch_workgroups(wg_sort, 1, 1);
            }
        }

        encoder.clear_buffer(&self.bufs.ranges, 0, None);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("grid_indices"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline_grid);
            pass.set_bind_group(0, &self.grid_bg, &[]);
            pass.dispatch_workgroups(wg_sort, 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("rearrange"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline_rearrange);
            pass.set_bind_group(0, &self.rearrange_bg[r], &[]);
            pass.dispatch_workgroups(wg_particles, 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("density"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline_density);
            pass.set_bind_group(0, &self.density_bg, &[]);
            pass.dispatch_workgroups(wg_particles, 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("force"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline_force);
            pass.set_bind_group(0, &self.force_bg, &[]);
            pass.dispatch_workgroups(wg_particles, 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("integrate"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline_integrate);
            pass.set_bind_group(0, &self.integrate_bg[r], &[]);
            pass.dispatch_workgroups(wg_particles, 1, 1);
        }
    }
}

impl SimulationKernel for GpuKernel {
    fn step(&mut self, frame_time: f32) -> Result<f32, SimError> {
        let start = Instant::now();
        let dt = self.fluid.timestep.resolve(frame_time);
        let params = SimParams::new(&self.fluid, &self.domain, dt);
        let gpu_params =
            GpuSimParams::new(&params, &self.grid, self.bufs.n_particles, self.bufs.sort_len);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.bufs.update_params(&self.queue, &gpu_params);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sph_tick"),
        });
        self.encode_tick(&mut encoder);
        self.queue.submit(std::iter::once(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SimError::Device(format!("tick {} failed: {err}", self.tick + 1)));
        }

        self.read ^= 1;
        self.tick += 1;
        self.cache_dirty = true;
        self.last_step_us = start.elapsed().as_micros() as u64;

        tracing::trace!(tick = self.tick, dt, step_us = self.last_step_us, "GPU tick complete");
        Ok(dt)
    }

    fn particles(&mut self) -> Result<&[Particle], SimError> {
        if self.cache_dirty {
            self.cached_particles =
                self.bufs.readback_particles(&self.device, &self.queue, self.read)?;
            self.cache_dirty = false;
        }
        Ok(&self.cached_particles)
    }

    fn particle_count(&self) -> usize {
        self.bufs.n_particles as usize
    }

    fn domain(&self) -> &SimulationDomain {
        &self.domain
    }

    fn domain_mut(&mut self) -> &mut SimulationDomain {
        &mut self.domain
    }

    fn params(&self) -> &FluidParams {
        &self.fluid
    }

    fn tick_count(&self) -> u64 {
        self.tick
    }
}

/// Calculate dispatch workgroup count: ceil(total / workgroup_size).
fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

/// Compile a per-particle stage with the shared declarations prepended.
fn stage_shader(device: &wgpu::Device, label: &str, stage: &str) -> wgpu::ShaderModule {
    let source = format!("{COMMON_WGSL}\n{stage}");
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    bgl: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bgl],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Params uniform at binding 0, then `storage` at bindings 1.. in order.
fn stage_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    params: &wgpu::Buffer,
    storage: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: params.as_entire_binding(),
    }];
    entries.extend(storage.iter().enumerate().map(|(i, buf)| wgpu::BindGroupEntry {
        binding: i as u32 + 1,
        resource: buf.as_entire_binding(),
    }));
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

/// One `SortConstants` window of `constants` at binding 0, then `storage`.
fn sort_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    constants: &wgpu::Buffer,
    storage: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: constants,
            offset: 0,
            size: SORT_CONSTANTS_SIZE,
        }),
    }];
    entries.extend(storage.iter().enumerate().map(|(i, buf)| wgpu::BindGroupEntry {
        binding: i as u32 + 1,
        resource: buf.as_entire_binding(),
    }));
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
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

fn bgl_uniform_dynamic(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: SORT_CONSTANTS_SIZE,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
