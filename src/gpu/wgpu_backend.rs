use std::sync::mpsc;

use image::RgbaImage;
use wgpu::util::DeviceExt;

use super::{GpuError, GpuResult, ProgramSource, RuntimeStatus};

const WORKGROUP_SIZE: u32 = 16;

/// Bindings shared by every generated program: sampled input, storage
/// output, uniform block.
const PRELUDE: &str = r#"
@group(0) @binding(0)
var src_tex: texture_2d<f32>;
@group(0) @binding(1)
var dst_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2)
var<uniform> params: Params;

fn texel(p: vec2<i32>) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(src_tex));
    return textureLoad(src_tex, clamp(p, vec2<i32>(0), size - vec2<i32>(1)), 0);
}

fn sample_src(uv: vec2<f32>) -> vec4<f32> {
    let pos = uv * params.resolution.xy - vec2<f32>(0.5);
    let base = floor(pos);
    let f = pos - base;
    let i = vec2<i32>(base);
    let top = mix(texel(i), texel(i + vec2<i32>(1, 0)), f.x);
    let bot = mix(texel(i + vec2<i32>(0, 1)), texel(i + vec2<i32>(1, 1)), f.x);
    return mix(top, bot, f.y);
}
"#;

const ENTRY: &str = r#"
@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let size = textureDimensions(src_tex);
    if (gid.x >= size.x || gid.y >= size.y) {
        return;
    }
    let uv = (vec2<f32>(gid.xy) + vec2<f32>(0.5)) / params.resolution.xy;
    let out = clamp(effect(uv), vec4<f32>(0.0), vec4<f32>(1.0));
    textureStore(dst_tex, vec2<i32>(gid.xy), out);
}
"#;

/// Full WGSL module for `source`: uniform struct, prelude, body, entry point.
pub(super) fn program_wgsl(source: &ProgramSource) -> String {
    let mut wgsl = String::from("struct Params {\n    resolution: vec4<f32>,\n");
    for name in source.uniforms {
        wgsl.push_str(&format!("    {name}: vec4<f32>,\n"));
    }
    wgsl.push_str("};\n");
    wgsl.push_str(PRELUDE);
    wgsl.push_str(source.body);
    wgsl.push_str(ENTRY);
    wgsl
}

/// Parses and validates the generated module with the same naga front end
/// wgpu compiles through, without needing a device.
pub(super) fn check_wgsl(source: &ProgramSource) -> GpuResult<()> {
    use wgpu::naga::front::wgsl;
    use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

    let wgsl = program_wgsl(source);
    let failed = |message: String| GpuError::ShaderCompilation {
        label: source.label.to_string(),
        message,
    };
    let module = wgsl::parse_str(&wgsl).map_err(|err| failed(err.emit_to_string(&wgsl)))?;
    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|err| failed(err.emit_to_string(&wgsl)))?;
    Ok(())
}

pub(super) struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    adapter_name: String,
    adapter_backend: String,
    adapter_driver: String,
    adapter_vendor_id: u32,
}

impl WgpuDevice {
    pub(super) fn new() -> GpuResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(GpuError::NoAdapter)?;
        let adapter_info = adapter.get_info();
        let adapter_driver = if adapter_info.driver.trim().is_empty() {
            "unknown".to_string()
        } else {
            adapter_info.driver.clone()
        };
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("photofx_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| GpuError::DeviceCreation(e.to_string()))?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("photofx_pass_bgl"),
            entries: &pass_layout_entries(),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("photofx_pass_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        tracing::info!(
            adapter = %adapter_info.name,
            backend = %adapter_info.backend,
            "wgpu device ready"
        );

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipeline_layout,
            adapter_name: adapter_info.name,
            adapter_backend: adapter_info.backend.to_string(),
            adapter_driver,
            adapter_vendor_id: adapter_info.vendor,
        })
    }

    pub(super) fn runtime_status(&self) -> RuntimeStatus {
        RuntimeStatus {
            available: true,
            adapter_vendor_id: Some(self.adapter_vendor_id),
            adapter_name: Some(self.adapter_name.clone()),
            adapter_backend: Some(self.adapter_backend.clone()),
            adapter_driver: Some(self.adapter_driver.clone()),
        }
    }

    pub(super) fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    pub(super) fn create_texture(&self, width: u32, height: u32) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("photofx_texture"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    pub(super) fn write_texture(&self, texture: &wgpu::Texture, rgba: &RgbaImage) {
        let (w, h) = rgba.dimensions();
        self.queue.write_texture(
            texture.as_image_copy(),
            rgba.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(w.saturating_mul(4)),
                rows_per_image: Some(h),
            },
            extent(w, h),
        );
    }

    pub(super) fn compile(&self, source: &ProgramSource) -> GpuResult<wgpu::ComputePipeline> {
        let wgsl = program_wgsl(source);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label),
            source: wgpu::ShaderSource::Wgsl(wgsl.into()),
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(source.label),
            layout: Some(&self.pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::ShaderCompilation {
                label: source.label.to_string(),
                message: err.to_string(),
            });
        }
        Ok(pipeline)
    }

    pub(super) fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        input: &wgpu::Texture,
        target: &wgpu::Texture,
        uniforms: &[[f32; 4]],
        width: u32,
        height: u32,
    ) {
        let params = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("photofx_params"),
            contents: bytemuck::cast_slice(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let input_view = input.create_view(&wgpu::TextureViewDescriptor::default());
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("photofx_pass_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&target_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("photofx_pass_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("photofx_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                width.div_ceil(WORKGROUP_SIZE),
                height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.queue.submit([encoder.finish()]);
    }

    pub(super) fn read_texture(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> GpuResult<RgbaImage> {
        let unpadded_bytes_per_row = width.saturating_mul(4);
        let padded_bytes_per_row = unpadded_bytes_per_row
            .div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("photofx_readback"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("photofx_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent(width, height),
        );
        self.queue.submit([encoder.finish()]);

        let slice = readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::wait());
        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let mapped = slice.get_mapped_range();
        let unpadded = unpadded_bytes_per_row as usize;
        let padded = padded_bytes_per_row as usize;
        let mut out = vec![0_u8; unpadded * height as usize];
        for (dst, src) in out.chunks_exact_mut(unpadded).zip(mapped.chunks(padded)) {
            dst.copy_from_slice(&src[..unpadded]);
        }
        drop(mapped);
        readback.unmap();

        RgbaImage::from_raw(width, height, out)
            .ok_or_else(|| GpuError::Readback("readback buffer size mismatch".to_string()))
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn pass_layout_entries() -> [wgpu::BindGroupLayoutEntry; 3] {
    [
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba8Unorm,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 2,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
    ]
}
