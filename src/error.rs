// error.rs — Crate-wide error type.
//
// The kernel math itself never fails. Everything here is raised when inputs
// are validated (building a converter, launching a dispatch, reading config).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("input is empty")]
    EmptyInput,

    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid dimensions {width}x{height}: {reason}")]
    InvalidDimensions {
        width: usize,
        height: usize,
        reason: &'static str,
    },

    #[error("white level {white} must exceed black level {black}")]
    InvalidWhiteLevel { white: u32, black: u16 },

    #[error("neutral point component {index} is {value}, expected a finite positive value")]
    InvalidNeutral { index: usize, value: f32 },

    #[error("unknown CFA pattern {0}")]
    InvalidCfa(String),

    #[error("unknown colour matrix preset {0}")]
    UnknownMatrixPreset(String),

    #[error("launch bounds x=[{x_start},{x_end}) y=[{y_start},{y_end}) exceed {dim_x}x{dim_y}")]
    LaunchOutOfBounds {
        x_start: usize,
        x_end: usize,
        y_start: usize,
        y_end: usize,
        dim_x: usize,
        dim_y: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, KernelError>;
