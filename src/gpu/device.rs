// gpu/device.rs — wgpu device, hardware profile and workgroup sizing.
//
// ADAPTER SELECTION
// ─────────────────
// wgpu's `request_adapter` picks by power preference and will happily return
// a software rasterizer (llvmpipe) when one is listed first. We enumerate the
// Vulkan adapters ourselves and prefer real hardware:
//
//   DiscreteGpu / IntegratedGpu / VirtualGpu / Other   ← taken first
//   Cpu                                                ← last resort
//
// PROFILES
// ────────
// `DeviceProfile::Mobile` requests *lower* limits than the adapter offers,
// the ones a phone-class Vulkan driver reports. wgpu validates every
// dispatch against the requested limits, so a kernel that would not fit on
// the target is rejected on the development machine.
//
// WORKGROUP SIZES
// ───────────────
// naga does not accept `override` expressions inside @workgroup_size, so the
// size is substituted into the WGSL source as text ({{WG_X}} / {{WG_Y}})
// when a pipeline is built.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::error::KernelError;

/// Hardware profile controlling device limits and the default workgroup size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Use the adapter's own limits.
    Native,
    /// Phone-class limits: 256 invocations per workgroup, 4096² textures.
    Mobile,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::Mobile => write!(f, "Mobile (simulated limits)"),
        }
    }
}

/// Workgroup dimensions for 2D compute dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// 16×8 on desktop parts (four 32-wide warps, two 64-wide waves);
    /// 8×8 under the mobile profile.
    fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 16, y: 8 },
            DeviceProfile::Mobile => WorkgroupSize { x: 8, y: 8 },
        }
    }

    /// Substitute `{{WG_X}}` / `{{WG_Y}}` in a WGSL template.
    pub fn specialize(&self, template: &str) -> String {
        template
            .replace("{{WG_X}}", &self.x.to_string())
            .replace("{{WG_Y}}", &self.y.to_string())
    }

    /// Workgroups needed to cover `w × h` (ceiling division). Shaders must
    /// guard against the overhang.
    pub fn dispatch_size(&self, w: u32, h: u32) -> (u32, u32) {
        (w.div_ceil(self.x), h.div_ceil(self.y))
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Adapter, device, queue and active profile.
///
/// Fields drop top to bottom; `_instance` comes last so the Vulkan instance
/// outlives the device and queue.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    pub fn new() -> Result<Self, GpuError> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    pub fn new_with_profile(profile: DeviceProfile) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(profile))
    }

    async fn init_async(profile: DeviceProfile) -> Result<Self, GpuError> {
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::VULKAN);
        if adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }
        for a in &adapters {
            let info = a.get_info();
            debug!(name = %info.name, backend = ?info.backend, device_type = ?info.device_type, "vulkan adapter");
        }

        let pick = adapters
            .iter()
            .position(|a| a.get_info().device_type != wgpu::DeviceType::Cpu)
            .unwrap_or(0);
        let adapter = adapters.swap_remove(pick);

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("rawpipe"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits_for_profile(profile),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        let gpu = GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            workgroup_size: WorkgroupSize::for_profile(profile),
            _instance: instance,
        };
        info!(%gpu, "gpu device ready");
        Ok(gpu)
    }

    /// Override the workgroup size, checked against the profile's limit.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let total = x * y;
        let max = max_invocations_for_profile(self.profile);
        if total == 0 || total > max {
            return Err(GpuError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    pub fn dispatch_size(&self, w: u32, h: u32) -> (u32, u32) {
        self.workgroup_size.dispatch_size(w, h)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, workgroup: {} }}",
            self.adapter_info, self.profile, self.workgroup_size
        )
    }
}

// ============================================================
// Limits
// ============================================================

fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),
        DeviceProfile::Mobile => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_texture_dimension_2d: 4096,
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

fn max_invocations_for_profile(profile: DeviceProfile) -> u32 {
    limits_for_profile(profile).max_compute_invocations_per_workgroup
}

// ============================================================
// Error type
// ============================================================

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("no suitable Vulkan adapter found; check that `vulkaninfo` lists a device")]
    NoSuitableAdapter,

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("workgroup size {total} outside the profile limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },

    #[error("buffer map failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("readback callback never fired")]
    ReadbackLost,

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_support::run_gpu_test_in_subprocess;

    #[test]
    fn test_workgroup_size_for_profiles() {
        assert_eq!(WorkgroupSize::for_profile(DeviceProfile::Native), WorkgroupSize { x: 16, y: 8 });
        let mobile = WorkgroupSize::for_profile(DeviceProfile::Mobile);
        assert_eq!(mobile.total(), 64);
        assert!(mobile.total() <= max_invocations_for_profile(DeviceProfile::Mobile));
    }

    #[test]
    fn test_specialize_replaces_placeholders() {
        let ws = WorkgroupSize { x: 16, y: 8 };
        let src = ws.specialize("@workgroup_size({{WG_X}}, {{WG_Y}}, 1)");
        assert_eq!(src, "@workgroup_size(16, 8, 1)");
    }

    #[test]
    fn test_dispatch_size_ceiling() {
        let ws = WorkgroupSize { x: 8, y: 8 };
        assert_eq!(ws.dispatch_size(640, 480), (80, 60));
        assert_eq!(ws.dispatch_size(100, 1), (13, 1));
        assert_eq!(ws.dispatch_size(0, 0), (0, 0));
    }

    #[test]
    fn test_mobile_limits_cap_invocations() {
        let limits = limits_for_profile(DeviceProfile::Mobile);
        assert_eq!(limits.max_compute_invocations_per_workgroup, 256);
        assert_eq!(limits.max_texture_dimension_2d, 4096);
        assert_eq!(limits_for_profile(DeviceProfile::Native), wgpu::Limits::default());
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_device_init_mobile() {
        let mut gpu = GpuDevice::new_with_profile(DeviceProfile::Mobile).expect("need a Vulkan device");
        println!("{gpu}");
        assert_eq!(gpu.workgroup_size, WorkgroupSize { x: 8, y: 8 });
        gpu.set_workgroup_size(16, 16).expect("256 fits the mobile profile");
        assert!(matches!(
            gpu.set_workgroup_size(16, 17),
            Err(GpuError::WorkgroupTooLarge { total: 272, max: 256 })
        ));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_device_init_mobile() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_gpu_device_init_mobile");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
