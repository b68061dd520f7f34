// rawpipe: data-parallel camera kernels with a CPU reference and a wgpu mirror
//
//   reduce    row-average (and general) reductions
//   raw       Bayer RAW → RGBA8 conversion
//   harness   dispatch validation kernels + self-test suite
//
// Everything under `gpu` is behind the `gpu` feature and is validated
// against the CPU modules.

pub mod error;
pub mod image;
pub mod convert;
pub mod color;
pub mod bayer;
pub mod gainmap;
pub mod dispatch;
pub mod reduce;
pub mod raw;
pub mod harness;
pub mod config;

#[cfg(feature = "cli")]
pub mod logger;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use error::{KernelError, Result};
pub use image::{Image, Rgba8};
