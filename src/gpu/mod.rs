// gpu — wgpu mirror of the CPU kernels.
//
//   device    adapter selection, profiles, workgroup sizing, GpuError
//   image     texture upload / readback, buffer readback
//   raw       Bayer RAW → RGBA8 (mirrors raw.rs)
//   harness   fill / coordinate / verify kernels (mirrors harness.rs)
//
// Shaders live in src/shaders and are embedded with `include_str!`.

pub mod device;
pub mod harness;
pub mod image;
pub mod raw;

pub use device::{DeviceProfile, GpuDevice, GpuError, WorkgroupSize};
pub use harness::{GpuCoordinatePipeline, GpuCoordinateReport};
pub use raw::GpuRawPipeline;

#[cfg(test)]
pub(crate) mod test_support {
    /// GPU tests run in a child `cargo test` so a driver crash at process
    /// exit cannot fail the parent; the child prints GPU_TEST_OK on success.
    pub(crate) fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args(["test", "--lib", "--features", "gpu", "--", test_name, "--exact", "--ignored", "--nocapture"])
            .output()
            .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }
}
