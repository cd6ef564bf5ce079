//! GPU compute path
//!
//! [`GpuContext`] owns the device and queue shared by the compute kernel, the
//! renderer and the readback path. [`ComputeKernel`] owns the particle step
//! pipeline and its two ping-pong bind groups.

use std::sync::Arc;

use wgpu::{BindGroup, BindGroupLayout, CommandEncoder, ComputePipeline, Device, Queue};

use super::buffer::{MirrorSlot, ParticleBuffer};
use super::params::FrameUniforms;
use crate::error::{SimulationError, SimulationResult};
use crate::wgpu_utils::{binding_types, UniformBuffer};

/// Threads per workgroup along x in the step kernel.
pub const WORKGROUP_SIZE: u32 = 64;

const STEP_SHADER: &str = r#"
struct FrameUniforms {
    half_size: vec2f,
    color_origin: vec4f,
    color_fast: vec4f,
    target_position: vec2f,
    alpha: f32,
    particle_size: f32,
    power: f32,
    damping: f32,
    attraction_active: u32,
}

@group(0) @binding(0) var<uniform> uni: FrameUniforms;
@group(0) @binding(1) var<storage, read> particles_in: array<vec4f>;
@group(0) @binding(2) var<storage, read_write> particles_out: array<vec4f>;

@compute @workgroup_size(64, 1, 1)
fn step_particles(
    @builtin(global_invocation_id) id: vec3u,
    @builtin(num_workgroups) groups: vec3u,
) {
    let index = id.y * groups.x * 64u + id.x;
    if (index >= arrayLength(&particles_out)) {
        return;
    }

    let particle = particles_in[index];
    var position = particle.xy;
    var velocity = particle.zw;

    if (uni.attraction_active != 0u) {
        let diff = uni.target_position - position;
        let dist = length(diff);
        if (dist > 0.0) {
            let direction = diff / dist;
            velocity += direction / ((1.0 / uni.power) * max(dist, 4.0));
        }
    }

    velocity *= uni.damping;
    position += velocity;

    particles_out[index] = vec4f(position, velocity);
}
"#;

/// Device and queue handles shared across the engine.
#[derive(Clone)]
pub struct GpuContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
}

impl GpuContext {
    pub fn from_parts(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self { device, queue }
    }

    /// Requests a device from `adapter` with limits large enough for big
    /// particle buffers.
    pub async fn request_device(adapter: &wgpu::Adapter) -> SimulationResult<Self> {
        let supported = adapter.limits();
        let required_limits = wgpu::Limits {
            max_texture_dimension_2d: supported.max_texture_dimension_2d,
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..wgpu::Limits::downlevel_defaults()
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Attractor Device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| SimulationError::DeviceUnavailable(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("Using {} ({:?})", info.name, info.backend);

        Ok(Self::from_parts(Arc::new(device), Arc::new(queue)))
    }

    /// Device without a surface, for tests and offline runs.
    pub async fn headless() -> SimulationResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SimulationError::DeviceUnavailable(e.to_string()))?;

        Self::request_device(&adapter).await
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Largest particle count a single storage binding can hold.
    pub fn max_bindable_particles(&self) -> usize {
        let limits = self.device.limits();
        let bytes = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        (bytes / super::particle::PARTICLE_STRIDE) as usize
    }

    /// Blocks until every submitted command buffer has finished.
    pub fn wait_idle(&self) -> SimulationResult<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| SimulationError::DevicePoll(e.to_string()))
    }

    /// Maps the first `len` elements of `buffer` and copies them to the host.
    ///
    /// `buffer` must have `MAP_READ` usage and every copy into it must already
    /// be submitted.
    pub fn read_buffer<T: bytemuck::Pod>(
        &self,
        buffer: &wgpu::Buffer,
        len: usize,
    ) -> SimulationResult<Vec<T>> {
        let byte_len = (len * std::mem::size_of::<T>()) as u64;
        if byte_len == 0 {
            return Ok(Vec::new());
        }

        let slice = buffer.slice(..byte_len);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.wait_idle()?;

        futures::executor::block_on(receiver)
            .map_err(|_| SimulationError::Readback("map callback was dropped".to_string()))?
            .map_err(|e| SimulationError::Readback(e.to_string()))?;

        let data = {
            let mapped = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&mapped).to_vec()
        };
        buffer.unmap();

        Ok(data)
    }
}

/// Workgroup grid `(x, y)` covering `num_particles`, folding into a second
/// dimension once `x` would exceed `max_per_dimension`.
pub fn workgroup_grid(num_particles: usize, max_per_dimension: u32) -> (u32, u32) {
    let groups = num_particles.div_ceil(WORKGROUP_SIZE as usize) as u32;
    if groups == 0 {
        return (0, 0);
    }
    let x = groups.min(max_per_dimension.max(1));
    (x, groups.div_ceil(x))
}

/// The particle step pipeline plus its ping-pong bind groups.
pub struct ComputeKernel {
    pipeline: ComputePipeline,
    layout: BindGroupLayout,
    /// Indexed by the slot being read: `[A -> B, B -> A]`.
    bind_groups: Option<[BindGroup; 2]>,
    bound_generation: Option<u64>,
}

impl ComputeKernel {
    pub fn new(device: &Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Step Layout"),
            entries: &[
                binding_types::entry(0, wgpu::ShaderStages::COMPUTE, binding_types::uniform()),
                binding_types::entry(
                    1,
                    wgpu::ShaderStages::COMPUTE,
                    binding_types::storage_buffer_read_only(),
                ),
                binding_types::entry(
                    2,
                    wgpu::ShaderStages::COMPUTE,
                    binding_types::storage_buffer_read_write(),
                ),
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Step Shader"),
            source: wgpu::ShaderSource::Wgsl(STEP_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Step Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Particle Step Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("step_particles"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            pipeline,
            layout,
            bind_groups: None,
            bound_generation: None,
        }
    }

    /// Rebuilds the bind groups if `particles` was reallocated since the last
    /// call.
    pub fn bind(
        &mut self,
        device: &Device,
        particles: &ParticleBuffer,
        uniforms: &UniformBuffer<FrameUniforms>,
    ) {
        if self.bound_generation == Some(particles.generation()) {
            return;
        }

        let make = |source: MirrorSlot| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Particle Step {:?} -> {:?}", source, source.other())),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.binding_resource(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: particles.mirror(source).binding_resource(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: particles.mirror(source.other()).binding_resource(),
                    },
                ],
            })
        };

        self.bind_groups = Some([make(MirrorSlot::A), make(MirrorSlot::B)]);
        self.bound_generation = Some(particles.generation());
    }

    /// Records one step that reads `source` and writes the other mirror.
    ///
    /// Does nothing before [`bind`](Self::bind) or for an empty buffer.
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        source: MirrorSlot,
        num_particles: usize,
        max_per_dimension: u32,
    ) {
        let Some(bind_groups) = &self.bind_groups else {
            return;
        };
        let (x, y) = workgroup_grid(num_particles, max_per_dimension);
        if x == 0 {
            return;
        }

        log::debug!("Dispatching particle step {source:?}: {x}x{y} workgroups");

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle Step Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_groups[source.index()], &[]);
        pass.dispatch_workgroups(x, y, 1);
    }
}
