// gpu/harness.rs — Coordinate test on the GPU.
//
// The same fill → coordinate → verify sequence as `harness::run_coordinate_test`,
// recorded as three compute passes over storage buffers in one submission:
//
//   fill_kernel     full grid
//   coord_kernel    full grid, writes inside the launch window only
//   verify_kernel   full grid
//
// The coordinate kernel compares the expected dims with the extent it was
// actually launched over (num_workgroups × workgroup size), so a dispatch
// that does not cover the grid fails. That check works in whole workgroups.
//
// Each invocation that sees a mismatch writes 1 into its own slot of the
// `failures` buffer. No atomics: naga's SPIR-V output for atomics carries
// memory semantics that strict Vulkan validation rejects at module creation,
// and per-cell slots need no synchronisation anyway.
// The host ORs the slots after readback and also re-checks the output grid
// with the CPU `verify_output`, so a kernel that silently skipped a cell is
// caught even if it never wrote a failure.

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::config::HarnessConfig;
use crate::error::KernelError;
use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::image::read_buffer;
use crate::harness::{synthetic_input, verify_output, FailureFlag, HostChannel, TestMessage};
use crate::image::Image;

/// Layout must match `CoordParams` in coords.wgsl (48 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
struct CoordParams {
    dim_x: u32,
    dim_y: u32,
    x_start: u32,
    x_end: u32,
    y_start: u32,
    y_end: u32,
    expected_dim_x: u32,
    expected_dim_y: u32,
    fill_value: i32,
    _pad: [u32; 3],
}

/// Result of one GPU coordinate run.
#[derive(Debug, Clone)]
pub struct GpuCoordinateReport {
    pub message: TestMessage,
    /// Cells whose failure slot was set by a kernel.
    pub flagged_cells: usize,
    /// Cells the host-side re-check disagreed with.
    pub host_mismatches: usize,
    /// The output grid as read back.
    pub output: Image<i32>,
}

/// Compiled fill / coordinate / verify pipelines sharing one layout.
pub struct GpuCoordinatePipeline {
    fill: wgpu::ComputePipeline,
    coord: wgpu::ComputePipeline,
    verify: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl GpuCoordinatePipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let shader_src = gpu.workgroup_size.specialize(include_str!("../shaders/coords.wgsl"));
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("coords.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let storage_entry = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuCoordinate BGL"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GpuCoordinate pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let make = |entry_point: &'static str| {
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };

        GpuCoordinatePipeline {
            fill: make("fill_kernel"),
            coord: make("coord_kernel"),
            verify: make("verify_kernel"),
            bgl,
        }
    }

    /// Run the coordinate test for `cfg` and send the outcome to `channel`.
    ///
    /// # Errors
    /// `Kernel(InvalidDimensions)` for an empty grid, `Kernel(LaunchOutOfBounds)`
    /// for a window outside it, and readback failures.
    pub fn run<C: HostChannel + ?Sized>(
        &self,
        gpu: &GpuDevice,
        cfg: &HarnessConfig,
        channel: &mut C,
    ) -> Result<GpuCoordinateReport, GpuError> {
        let report = self.run_with_expected(gpu, cfg, (cfg.dim_x, cfg.dim_y))?;
        channel.send_message(report.message);
        Ok(report)
    }

    /// As [`run`](Self::run) without reporting, with the dims the coordinate
    /// kernel should expect given separately. A mismatch must fail the run.
    pub fn run_with_expected(
        &self,
        gpu: &GpuDevice,
        cfg: &HarnessConfig,
        expected: (usize, usize),
    ) -> Result<GpuCoordinateReport, GpuError> {
        if cfg.dim_x == 0 || cfg.dim_y == 0 {
            return Err(KernelError::InvalidDimensions {
                width: cfg.dim_x,
                height: cfg.dim_y,
                reason: "coordinate grid must be non-empty",
            }
            .into());
        }
        let window = cfg.launch_options().resolve(cfg.dim_x, cfg.dim_y)?;
        let (dim_x, dim_y) = (cfg.dim_x as u32, cfg.dim_y as u32);
        let cells = cfg.dim_x * cfg.dim_y;

        let input = synthetic_input(cfg.dim_x, cfg.dim_y, cfg.input_seed);
        let params = CoordParams {
            dim_x,
            dim_y,
            x_start: window.x_start as u32,
            x_end: window.x_end as u32,
            y_start: window.y_start as u32,
            y_end: window.y_end as u32,
            expected_dim_x: expected.0 as u32,
            expected_dim_y: expected.1 as u32,
            fill_value: cfg.fill_value,
            _pad: [0; 3],
        };

        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let input_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("coords input"),
            contents: bytemuck::cast_slice(input.as_slice()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let output_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("coords output"),
            size: (cells * std::mem::size_of::<i32>()) as u64,
            usage: storage,
            mapped_at_creation: false,
        });
        let failures_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("coords failures"),
            size: (cells * std::mem::size_of::<u32>()) as u64,
            usage: storage,
            mapped_at_creation: false,
        });
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("CoordParams"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("coords bind group"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: input_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: output_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: failures_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: params_buf.as_entire_binding() },
            ],
        });

        let grid = gpu.dispatch_size(dim_x, dim_y);
        let mut passes = vec![&self.fill];
        if window.is_empty() {
            debug!(?window, "empty launch window; coordinate pass skipped");
        } else {
            passes.push(&self.coord);
        }
        passes.push(&self.verify);

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("coords") });
        for pipeline in passes {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("coords"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid.0, grid.1, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let failures: Vec<u32> = read_buffer(gpu, &failures_buf, cells)?;
        let output = Image::from_vec(cfg.dim_x, cfg.dim_y, read_buffer::<i32>(gpu, &output_buf, cells)?);

        let flagged_cells = failures.iter().filter(|&&f| f != 0).count();
        let flag = FailureFlag::new();
        if flagged_cells > 0 {
            flag.fail();
        }
        let host_mismatches = verify_output(&output, &input, &window, cfg.fill_value, &flag);
        debug!(dim_x, dim_y, ?window, flagged_cells, host_mismatches, "gpu coordinate test");

        Ok(GpuCoordinateReport {
            message: TestMessage::from_passed(!flag.is_set()),
            flagged_cells,
            host_mismatches,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_support::run_gpu_test_in_subprocess;

    #[test]
    fn test_params_size_matches_wgsl() {
        assert_eq!(std::mem::size_of::<CoordParams>(), 48);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_coordinates() {
        let gpu = GpuDevice::new().expect("need a Vulkan device");
        let pipeline = GpuCoordinatePipeline::new(&gpu);

        // Full grid, size not a multiple of the workgroup.
        let cfg = HarnessConfig { dim_x: 37, dim_y: 19, fill_value: -3, ..HarnessConfig::default() };
        let mut sink = Vec::new();
        let report = pipeline.run(&gpu, &cfg, &mut sink).unwrap();
        assert_eq!(report.message, TestMessage::Passed, "{report:?}");
        assert_eq!(sink, vec![TestMessage::Passed]);

        // Bounded window: cells outside must keep the fill value.
        let cfg = HarnessConfig { x_start: 5, x_end: Some(20), y_start: 2, y_end: Some(9), ..cfg };
        let report = pipeline.run(&gpu, &cfg, &mut sink).unwrap();
        assert_eq!(report.message, TestMessage::Passed, "{report:?}");
        assert_eq!(report.output.get(0, 0), -3);
        assert_eq!(report.output.get(36, 18), -3);

        // Empty window: nothing but the fill.
        let cfg = HarnessConfig { x_start: 4, x_end: Some(4), ..cfg };
        let report = pipeline.run(&gpu, &cfg, &mut sink).unwrap();
        assert_eq!(report.message, TestMessage::Passed);
        assert!(report.output.pixels().all(|(_, _, v)| v == -3));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_coordinates() {
        let out = run_gpu_test_in_subprocess("gpu::harness::tests::inner_gpu_coordinates");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_coordinates_flag_wrong_dims() {
        let gpu = GpuDevice::new().expect("need a Vulkan device");
        let pipeline = GpuCoordinatePipeline::new(&gpu);
        let cfg = HarnessConfig { dim_x: 16, dim_y: 8, ..HarnessConfig::default() };
        let report = pipeline.run_with_expected(&gpu, &cfg, (16, 9)).unwrap();
        assert_eq!(report.message, TestMessage::Failed);
        assert_eq!(report.flagged_cells, 16 * 8);
        // The values themselves are still correct.
        assert_eq!(report.host_mismatches, 0);

        // Expecting a grid two workgroups wider than the launch also fails,
        // inside a bounded window only.
        let wg = gpu.workgroup_size;
        let cfg = HarnessConfig { x_start: 2, x_end: Some(6), y_start: 1, y_end: Some(3), ..cfg };
        let wide = (16 + 2 * wg.x as usize, 8);
        let report = pipeline.run_with_expected(&gpu, &cfg, wide).unwrap();
        assert_eq!(report.message, TestMessage::Failed);
        assert_eq!(report.flagged_cells, 4 * 2);
        assert_eq!(report.host_mismatches, 0);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_coordinates_flag_wrong_dims() {
        let out = run_gpu_test_in_subprocess("gpu::harness::tests::inner_gpu_coordinates_flag_wrong_dims");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
