//! Instanced quad renderer reading particles straight from a device mirror.
//!
//! Each particle is one instance of a 6-vertex quad; the vertex stage fetches
//! its particle from the storage buffer by `instance_index`, so nothing is
//! copied per frame.

use wgpu::util::DeviceExt;
use wgpu::{BindGroup, BindGroupLayout, Buffer, CommandEncoder, Device, RenderPipeline, TextureFormat, TextureView};

use crate::simulation::{FrameView, MirrorSlot};
use crate::wgpu_utils::binding_types;

const PARTICLE_SHADER: &str = r#"
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
@group(0) @binding(1) var<storage, read> particles: array<vec4f>;

struct VertexOutput {
    @builtin(position) clip_position: vec4f,
    @location(0) color: vec4f,
}

@vertex
fn vs_main(
    @location(0) corner: vec2f,
    @builtin(instance_index) instance: u32,
) -> VertexOutput {
    let particle = particles[instance];
    let pixel = particle.xy + corner * uni.particle_size;

    let speed = min(length(particle.zw), 10.0) / 10.0;
    let rgb = mix(uni.color_origin.rgb, uni.color_fast.rgb, speed);

    var out: VertexOutput;
    out.clip_position = vec4f(pixel / uni.half_size, 0.0, 1.0);
    out.color = vec4f(rgb, uni.alpha);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4f {
    return in.color;
}
"#;

/// Unit quad as two triangles, centred on the particle.
const QUAD_CORNERS: [[f32; 2]; 6] = [
    [-0.5, -0.5],
    [0.5, -0.5],
    [0.5, 0.5],
    [-0.5, -0.5],
    [0.5, 0.5],
    [-0.5, 0.5],
];

pub const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 1.0,
};

pub struct ParticleRenderer {
    pipeline: RenderPipeline,
    layout: BindGroupLayout,
    quad: Buffer,
    /// One per mirror slot, indexed by [`MirrorSlot::index`].
    bind_groups: Option<[BindGroup; 2]>,
    bound_generation: Option<u64>,
}

impl ParticleRenderer {
    pub fn new(device: &Device, format: TextureFormat) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Render Layout"),
            entries: &[
                binding_types::entry(
                    0,
                    wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    binding_types::uniform(),
                ),
                binding_types::entry(
                    1,
                    wgpu::ShaderStages::VERTEX,
                    binding_types::storage_buffer_read_only(),
                ),
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Render Shader"),
            source: wgpu::ShaderSource::Wgsl(PARTICLE_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Render Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Particle Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                }],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Quad"),
            contents: bytemuck::cast_slice(&QUAD_CORNERS),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            pipeline,
            layout,
            quad,
            bind_groups: None,
            bound_generation: None,
        }
    }

    fn bind(&mut self, device: &Device, frame: &FrameView<'_>) {
        let generation = frame.particles.generation();
        if self.bound_generation == Some(generation) {
            return;
        }

        let make = |slot: MirrorSlot| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Particle Render {slot:?}")),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: frame.uniforms.binding_resource(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: frame.particles.mirror(slot).binding_resource(),
                    },
                ],
            })
        };

        self.bind_groups = Some([make(MirrorSlot::A), make(MirrorSlot::B)]);
        self.bound_generation = Some(generation);
    }

    /// Clears `target` and draws every particle of `frame`'s current mirror.
    pub fn draw(&mut self, encoder: &mut CommandEncoder, target: &TextureView, frame: &FrameView<'_>) {
        self.bind(frame.gpu.device(), frame);

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Particle Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let instances = frame.num_particles() as u32;
        let Some(bind_groups) = &self.bind_groups else {
            return;
        };
        if instances == 0 {
            return;
        }

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &bind_groups[frame.slot.index()], &[]);
        render_pass.set_vertex_buffer(0, self.quad.slice(..));
        render_pass.draw(0..QUAD_CORNERS.len() as u32, 0..instances);
    }
}
