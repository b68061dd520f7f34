// gpu/raw.rs — GPU Bayer RAW → RGBA8 conversion.
//
// Mirrors `RawConverter::convert` in raw.rs. One invocation per output
// pixel; the shader is a line-for-line port of `RawConverter::linear_pixel`
// followed by gamma and 8-bit quantization.
//
// RESOURCES
// ─────────
//   binding 0   raw frame        R16Uint       texture_2d<u32>
//   binding 1   gain map         Rgba32Float   texture_2d<f32>
//   binding 2   output           Rgba8Unorm    texture_storage_2d (write)
//   binding 3   RawUniforms      uniform buffer
//
// Without a gain map a 1×1 unity texture is bound and `has_gain_map` is 0,
// so the layout never changes.
//
// AGREEMENT WITH THE CPU
// ──────────────────────
// The shader quantizes with floor(v·255 + 0.5) before the unorm store, so
// the only source of disagreement is `pow` and matrix rounding on the GPU.
// Channels may differ by at most 1 LSB.
//
// Validation is not repeated here: `convert` takes a `RawConverter`, which
// has already checked levels, neutral and the crop window.

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::gainmap::GainMap;
use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::image::GpuTexture;
use crate::image::{Image, Rgba8};
use crate::raw::RawConverter;

/// Uniform block for `raw_to_rgba.wgsl`.
///
/// Layout must match `RawParams` in the shader:
///   offset   0: black_level             vec4<f32>
///   offset  16: neutral (xyz, w unused)  vec4<f32>
///   offset  32: tone coefficients        vec4<f32>
///   offset  48: sensor_to_intermediate   mat3x3<f32> (3 × vec4 columns)
///   offset  96: intermediate_to_output   mat3x3<f32>
///   offset 144: raw / gain / out sizes, crop offset   8 × u32
///   offset 176: white_level f32, cfa, has_gain_map, _pad
///   total:  192 bytes
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct RawUniforms {
    black_level: [f32; 4],
    neutral: [f32; 4],
    tone: [f32; 4],
    sensor_to_intermediate: [[f32; 4]; 3],
    intermediate_to_output: [[f32; 4]; 3],
    raw_width: u32,
    raw_height: u32,
    gm_width: u32,
    gm_height: u32,
    out_width: u32,
    out_height: u32,
    offset_x: u32,
    offset_y: u32,
    white_level: f32,
    cfa: u32,
    has_gain_map: u32,
    _pad: u32,
}

impl RawUniforms {
    fn new(conv: &RawConverter) -> Self {
        let p = conv.params();
        let (raw_w, raw_h) = conv.raw_size();
        let crop = conv.crop();
        let (gm_w, gm_h) = conv.gain_map().map_or((1, 1), |m| (m.width(), m.height()));
        RawUniforms {
            black_level: p.black_level.map(|b| b as f32),
            neutral: [p.neutral[0], p.neutral[1], p.neutral[2], 0.0],
            tone: p.tone_curve.coeffs,
            sensor_to_intermediate: p.sensor_to_intermediate.to_wgsl_columns(),
            intermediate_to_output: p.intermediate_to_output.to_wgsl_columns(),
            raw_width: raw_w as u32,
            raw_height: raw_h as u32,
            gm_width: gm_w as u32,
            gm_height: gm_h as u32,
            out_width: crop.width as u32,
            out_height: crop.height as u32,
            offset_x: crop.offset_x as u32,
            offset_y: crop.offset_y as u32,
            white_level: p.white_level as f32,
            cfa: p.cfa as u32,
            has_gain_map: conv.gain_map().is_some() as u32,
            _pad: 0,
        }
    }
}

/// Compiled RAW conversion pipeline. Create once, reuse per frame.
pub struct GpuRawPipeline {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl GpuRawPipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let shader_src = gpu.workgroup_size.specialize(include_str!("../shaders/raw_to_rgba.wgsl"));
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("raw_to_rgba.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let texture_entry = |binding, sample_type| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type,
            },
            count: None,
        };

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuRaw BGL"),
            entries: &[
                texture_entry(0, wgpu::TextureSampleType::Uint),
                texture_entry(1, wgpu::TextureSampleType::Float { filterable: false }),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<RawUniforms>() as u64),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GpuRaw pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("raw_to_rgba"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "raw_to_rgba",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        GpuRawPipeline { pipeline, bgl }
    }

    /// Convert `raw` on the GPU and read the result back.
    ///
    /// # Errors
    /// `Kernel(InvalidDimensions)` if `raw` is not the frame size `conv` was
    /// built for; `BufferMap` / `ReadbackLost` if readback fails.
    pub fn convert(&self, gpu: &GpuDevice, conv: &RawConverter, raw: &Image<u16>) -> Result<Image<Rgba8>, GpuError> {
        let output = self.dispatch(gpu, conv, raw)?;
        output.readback_rgba8(gpu)
    }

    /// Record and submit the conversion, leaving the result on the GPU.
    pub fn dispatch(&self, gpu: &GpuDevice, conv: &RawConverter, raw: &Image<u16>) -> Result<GpuTexture, GpuError> {
        conv.check_frame(raw)?;
        let (out_w, out_h) = conv.output_size();
        let (out_w, out_h) = (out_w as u32, out_h as u32);

        let raw_tex = GpuTexture::upload(gpu, raw, wgpu::TextureFormat::R16Uint, "raw frame");
        let unity;
        let gains = match conv.gain_map() {
            Some(map) => map,
            None => {
                unity = GainMap::unity(1, 1)?;
                &unity
            }
        };
        let gain_tex = GpuTexture::upload(gpu, gains.as_image(), wgpu::TextureFormat::Rgba32Float, "gain map");
        let output = GpuTexture::new(
            gpu,
            out_w,
            out_h,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            "raw output",
        );

        let uniforms = RawUniforms::new(conv);
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("RawUniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("raw bind group"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&raw_tex.view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&gain_tex.view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&output.view) },
                wgpu::BindGroupEntry { binding: 3, resource: params_buf.as_entire_binding() },
            ],
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("raw_to_rgba") });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("raw_to_rgba"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (dx, dy) = gpu.dispatch_size(out_w, out_h);
            pass.dispatch_workgroups(dx, dy, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        debug!(out_w, out_h, cfa = %conv.params().cfa, gain_map = uniforms.has_gain_map != 0, "gpu raw convert");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayer::CfaPattern;
    use crate::color::{Matrix3, ToneCurve};
    use crate::gpu::test_support::run_gpu_test_in_subprocess;
    use crate::raw::{CropWindow, RawParams};

    #[test]
    fn test_uniform_size_matches_wgsl() {
        assert_eq!(std::mem::size_of::<RawUniforms>(), 192);
        assert_eq!(std::mem::size_of::<RawUniforms>() % 16, 0);
    }

    #[test]
    fn test_uniforms_from_converter() {
        let params = RawParams {
            black_level: [60, 61, 62, 63],
            white_level: 4095,
            cfa: CfaPattern::Gbrg,
            sensor_to_intermediate: Matrix3::from_row_major([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]),
            neutral: [0.5, 1.0, 0.75],
            tone_curve: ToneCurve::new([0.1, 0.2, 0.3, 0.4]),
            crop: Some(CropWindow { offset_x: 2, offset_y: 3, width: 10, height: 6 }),
            ..RawParams::default()
        };
        let map = GainMap::unity(4, 3).unwrap();
        let conv = RawConverter::new(params, Some(map), 20, 12).unwrap();
        let u = RawUniforms::new(&conv);

        assert_eq!(u.black_level, [60.0, 61.0, 62.0, 63.0]);
        assert_eq!(u.neutral, [0.5, 1.0, 0.75, 0.0]);
        assert_eq!(u.tone, [0.1, 0.2, 0.3, 0.4]);
        // First column of the row-major matrix above.
        assert_eq!(u.sensor_to_intermediate[0], [1.0, 4.0, 7.0, 0.0]);
        assert_eq!((u.raw_width, u.raw_height, u.gm_width, u.gm_height), (20, 12, 4, 3));
        assert_eq!((u.out_width, u.out_height, u.offset_x, u.offset_y), (10, 6, 2, 3));
        assert_eq!((u.white_level, u.cfa, u.has_gain_map), (4095.0, 2, 1));

        // Field offsets as the shader sees them.
        let bytes = bytemuck::bytes_of(&u);
        let word = |off: usize| u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
        assert_eq!(word(144), 20);
        assert_eq!(word(168), 2);
        assert_eq!(f32::from_bits(word(176)), 4095.0);
        assert_eq!(word(180), 2);
    }

    #[test]
    fn test_uniforms_without_gain_map() {
        let conv = RawConverter::new(RawParams::default(), None, 8, 8).unwrap();
        let u = RawUniforms::new(&conv);
        assert_eq!((u.gm_width, u.gm_height, u.has_gain_map), (1, 1, 0));
        assert_eq!((u.out_width, u.out_height, u.offset_x, u.offset_y), (8, 8, 0, 0));
    }

    fn assert_close(cpu: &Image<Rgba8>, gpu: &Image<Rgba8>, what: &str) {
        assert_eq!((cpu.width(), cpu.height()), (gpu.width(), gpu.height()));
        let mut worst = 0;
        for (x, y, c) in cpu.pixels() {
            let d = c.max_channel_diff(gpu.get(x, y));
            assert!(d <= 1, "{what}: ({x},{y}) cpu {c:?} gpu {:?}", gpu.get(x, y));
            worst = worst.max(d);
        }
        println!("{what}: max channel diff {worst}");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_raw_matches_cpu() {
        let gpu = GpuDevice::new().expect("need a Vulkan device");
        let pipeline = GpuRawPipeline::new(&gpu);
        let raw = Image::from_fn(67, 45, |x, y| 64 + ((x * 131 + y * 71 + x * y) % 960) as u16);
        let map = GainMap::from_interleaved(
            3,
            2,
            &[
                1.0, 1.0, 1.0, 1.0, 1.2, 1.1, 1.1, 1.3, 1.4, 1.0, 1.0, 1.5, //
                1.1, 1.0, 1.0, 1.1, 1.0, 1.0, 1.0, 1.0, 1.3, 1.2, 1.2, 1.2,
            ],
        )
        .unwrap();

        for cfa in CfaPattern::ALL {
            for gain_map in [None, Some(map.clone())] {
                let params = RawParams {
                    cfa,
                    sensor_to_intermediate: Matrix3::XYZ_D50_TO_PROPHOTO,
                    intermediate_to_output: Matrix3::PROPHOTO_TO_SRGB,
                    neutral: [0.9, 1.0, 0.8],
                    tone_curve: ToneCurve::new([-0.4, 0.6, 0.8, 0.0]),
                    crop: Some(CropWindow { offset_x: 3, offset_y: 1, width: 60, height: 40 }),
                    ..RawParams::default()
                };
                let with_map = gain_map.is_some();
                let conv = RawConverter::new(params, gain_map, raw.width(), raw.height()).unwrap();
                let cpu = conv.convert(&raw).unwrap();
                let out = pipeline.convert(&gpu, &conv, &raw).unwrap();
                assert_close(&cpu, &out, &format!("{cfa} gain_map={with_map}"));
            }
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_raw_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::raw::tests::inner_gpu_raw_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_raw_rejects_wrong_frame() {
        let gpu = GpuDevice::new().expect("need a Vulkan device");
        let pipeline = GpuRawPipeline::new(&gpu);
        let conv = RawConverter::new(RawParams::default(), None, 16, 16).unwrap();
        let raw = Image::filled(16, 15, 100u16);
        assert!(matches!(pipeline.convert(&gpu, &conv, &raw), Err(GpuError::Kernel(_))));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_raw_rejects_wrong_frame() {
        let out = run_gpu_test_in_subprocess("gpu::raw::tests::inner_gpu_raw_rejects_wrong_frame");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
