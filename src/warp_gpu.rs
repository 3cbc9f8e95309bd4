//! GPU compositing backend.
//!
//! One render pipeline rasterizes the whole morph mesh in a single draw: each
//! vertex carries a destination position in pixel space plus one UV per
//! source texture, and the fragment stage samples both textures and blends
//! them by the morph parameter before applying a per-pass global alpha.
//! Shared vertices make the mesh seam-free by construction, so this path is
//! preferred whenever an adapter exists; the CPU path is the fallback.

use std::num::NonZeroU32;
use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::compositor::{horse_phase, lerp_points, Compositor, HorsePhase};
use crate::distort::distort_to_horse;
use crate::frame::FrameRgba;
use crate::geometry::{Point, Triangle};

const MORPH_SHADER: &str = r#"
struct MorphUniform {
  size: vec2<f32>,
  blend: f32,
  global_alpha: f32,
}

@group(0) @binding(0) var tex_a: texture_2d<f32>;
@group(0) @binding(1) var tex_b: texture_2d<f32>;
@group(0) @binding(2) var tex_sampler: sampler;
@group(0) @binding(3) var<uniform> morph: MorphUniform;

struct VertexInput {
  @location(0) position: vec2<f32>,
  @location(1) uv_a: vec2<f32>,
  @location(2) uv_b: vec2<f32>,
}

struct VertexOutput {
  @builtin(position) position: vec4<f32>,
  @location(0) uv_a: vec2<f32>,
  @location(1) uv_b: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
  var out: VertexOutput;
  let x = 2.0 * input.position.x / morph.size.x - 1.0;
  // Pixel y = 0 is the top of the frame; clip-space y points up.
  let y = 1.0 - 2.0 * input.position.y / morph.size.y;
  out.position = vec4<f32>(x, y, 0.0, 1.0);
  out.uv_a = input.uv_a;
  out.uv_b = input.uv_b;
  return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
  let ca = textureSample(tex_a, tex_sampler, input.uv_a);
  let cb = textureSample(tex_b, tex_sampler, input.uv_b);
  let mixed = mix(ca, cb, morph.blend);
  return vec4<f32>(mixed.rgb, mixed.a * morph.global_alpha);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MorphVertex {
    position: [f32; 2],
    uv_a: [f32; 2],
    uv_b: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MorphUniform {
    size: [f32; 2],
    blend: f32,
    global_alpha: f32,
}

pub struct GpuCompositor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    output_texture: wgpu::Texture,
    output_view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
    tex_a: wgpu::Texture,
    tex_b: wgpu::Texture,
}

impl GpuCompositor {
    pub async fn new(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("facemorph-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        let output_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("facemorph-render-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output_view = output_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = width
            .checked_mul(4)
            .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback_size = u64::from(padded_bytes_per_row) * u64::from(height);
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("facemorph-readback-buffer"),
            size: readback_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("facemorph-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<MorphUniform>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("facemorph-morph-shader"),
            source: wgpu::ShaderSource::Wgsl(MORPH_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("facemorph-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("facemorph-morph-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<MorphVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("facemorph-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let tex_a = create_source_texture(&device, width, height, "facemorph-tex-a");
        let tex_b = create_source_texture(&device, width, height, "facemorph-tex-b");
        let view_a = tex_a.create_view(&wgpu::TextureViewDescriptor::default());
        let view_b = tex_b.create_view(&wgpu::TextureViewDescriptor::default());

        let uniform = MorphUniform {
            size: [width as f32, height as f32],
            blend: 0.0,
            global_alpha: 1.0,
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("facemorph-uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("facemorph-bind-group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view_a),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&view_b),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            device,
            queue,
            width,
            height,
            output_texture,
            output_view,
            readback_buffer,
            unpadded_bytes_per_row,
            padded_bytes_per_row,
            pipeline,
            bind_group,
            uniform_buffer,
            tex_a,
            tex_b,
        })
    }

    fn upload(&self, texture: &wgpu::Texture, image: &RgbaImage) -> Result<()> {
        let (w, h) = image.dimensions();
        if (w, h) != (self.width, self.height) {
            return Err(anyhow!(
                "source image is {w}x{h}, compositor expects {}x{}",
                self.width,
                self.height
            ));
        }
        let bytes_per_row = NonZeroU32::new(w.saturating_mul(4))
            .ok_or_else(|| anyhow!("source image has invalid width {w}"))?;
        let rows_per_image =
            NonZeroU32::new(h).ok_or_else(|| anyhow!("source image has invalid height {h}"))?;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row.get()),
                rows_per_image: Some(rows_per_image.get()),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// One layer pass: write the uniforms, rasterize the given vertices, and
    /// submit. Each pass gets its own submit so queued texture and uniform
    /// writes land before the commands that read them.
    fn draw_pass(&self, vertices: &[MorphVertex], blend: f32, global_alpha: f32, clear: bool) {
        let uniform = MorphUniform {
            size: [self.width as f32, self.height as f32],
            blend,
            global_alpha,
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("facemorph-mesh-vertices"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("facemorph-layer-encoder"),
            });
        {
            let load = if clear {
                // Opaque black base keeps every composited pixel opaque.
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: 0.0,
                    g: 0.0,
                    b: 0.0,
                    a: 1.0,
                })
            } else {
                wgpu::LoadOp::Load
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("facemorph-layer-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.bind_group, &[]);
            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            render_pass.draw(0..vertices.len() as u32, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn read_frame(&self) -> Result<FrameRgba> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("facemorph-readback-encoder"),
            });
        let padded_bytes_per_row = NonZeroU32::new(self.padded_bytes_per_row)
            .ok_or_else(|| anyhow!("invalid padded row size {}", self.padded_bytes_per_row))?;
        let rows_per_image = NonZeroU32::new(self.height)
            .ok_or_else(|| anyhow!("invalid render height {}", self.height))?;
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.output_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row.get()),
                    rows_per_image: Some(rows_per_image.get()),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = self.readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let mapped = buffer_slice.get_mapped_range();
        let mut data = vec![0_u8; (self.unpadded_bytes_per_row * self.height) as usize];
        for (row_index, chunk) in mapped
            .chunks(self.padded_bytes_per_row as usize)
            .take(self.height as usize)
            .enumerate()
        {
            let dst_start = row_index * self.unpadded_bytes_per_row as usize;
            let dst_end = dst_start + self.unpadded_bytes_per_row as usize;
            data[dst_start..dst_end].copy_from_slice(&chunk[..self.unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        self.readback_buffer.unmap();

        FrameRgba::new(self.width, self.height, data)
    }

    fn to_uv(&self, p: Point) -> [f32; 2] {
        [p.x / self.width as f32, p.y / self.height as f32]
    }

    /// Dual-UV mesh: destination positions with one UV per source image,
    /// three vertices per triangle in triangle order.
    fn mesh_vertices(
        &self,
        dest: &[Point],
        src_a: &[Point],
        src_b: &[Point],
        triangles: &[Triangle],
    ) -> Vec<MorphVertex> {
        let mut vertices = Vec::with_capacity(triangles.len() * 3);
        for &[i, j, k] in triangles {
            for index in [i, j, k] {
                vertices.push(MorphVertex {
                    position: [dest[index].x, dest[index].y],
                    uv_a: self.to_uv(src_a[index]),
                    uv_b: self.to_uv(src_b[index]),
                });
            }
        }
        vertices
    }

    /// Single-image warp mesh: both UV channels sample the same texture, so a
    /// pass with blend 0 draws just that warped layer.
    fn warp_vertices(
        &self,
        src: &[Point],
        dest: &[Point],
        triangles: &[Triangle],
    ) -> Vec<MorphVertex> {
        let mut vertices = Vec::with_capacity(triangles.len() * 3);
        for &[i, j, k] in triangles {
            for index in [i, j, k] {
                let uv = self.to_uv(src[index]);
                vertices.push(MorphVertex {
                    position: [dest[index].x, dest[index].y],
                    uv_a: uv,
                    uv_b: uv,
                });
            }
        }
        vertices
    }

    fn fullscreen_vertices(&self) -> [MorphVertex; 6] {
        let w = self.width as f32;
        let h = self.height as f32;
        let corner = |x: f32, y: f32| MorphVertex {
            position: [x, y],
            uv_a: [x / w, y / h],
            uv_b: [x / w, y / h],
        };
        [
            corner(0.0, 0.0),
            corner(w, 0.0),
            corner(0.0, h),
            corner(0.0, h),
            corner(w, 0.0),
            corner(w, h),
        ]
    }
}

impl Compositor for GpuCompositor {
    fn render_two_way(
        &mut self,
        img_a: &RgbaImage,
        img_b: &RgbaImage,
        points_a: &[Point],
        points_b: &[Point],
        triangles: &[Triangle],
        t: f32,
    ) -> Result<FrameRgba> {
        debug_assert_eq!(points_a.len(), points_b.len());
        self.upload(&self.tex_a, img_a)?;
        self.upload(&self.tex_b, img_b)?;
        let mid = lerp_points(points_a, points_b, t);
        let vertices = self.mesh_vertices(&mid, points_a, points_b, triangles);
        self.draw_pass(&vertices, t, 1.0, true);
        self.read_frame()
    }

    fn render_horse(
        &mut self,
        img_source: &RgbaImage,
        img_horse: &RgbaImage,
        img_target: &RgbaImage,
        points_source: &[Point],
        points_target: &[Point],
        triangles: &[Triangle],
        t: f32,
    ) -> Result<FrameRgba> {
        let h = self.height as f32;
        match horse_phase(t) {
            HorsePhase::TowardHorse {
                amount,
                layer_alpha,
            } => {
                let distorted = distort_to_horse(points_source, amount, h, triangles);
                self.upload(&self.tex_a, img_horse)?;
                self.draw_pass(&self.fullscreen_vertices(), 0.0, 1.0, true);
                self.upload(&self.tex_a, img_source)?;
                let vertices = self.warp_vertices(points_source, &distorted, triangles);
                self.draw_pass(&vertices, 0.0, layer_alpha, false);
            }
            HorsePhase::FromHorse {
                amount,
                layer_alpha,
            } => {
                let distorted = distort_to_horse(points_target, amount, h, triangles);
                self.upload(&self.tex_a, img_target)?;
                let vertices = self.warp_vertices(points_target, &distorted, triangles);
                self.draw_pass(&vertices, 0.0, 1.0, true);
                self.upload(&self.tex_a, img_horse)?;
                self.draw_pass(&self.fullscreen_vertices(), 0.0, layer_alpha, false);
            }
        }
        self.read_frame()
    }
}

fn create_source_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    label: &str,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
