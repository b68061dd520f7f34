// config.rs — TOML configuration for RAW conversion and the harness.
//
// Every field has a default, so an empty file is a valid config. A RAW
// config looks like:
//
//   black_level = [64, 64, 64, 64]
//   white_level = 1023
//   cfa = "RGGB"
//   sensor_to_intermediate = "xyz_d50_to_prophoto"      # preset name, or
//   intermediate_to_output = [[1, 0, 0], [0, 1, 0], [0, 0, 1]]   # rows
//   neutral = [1.0, 1.0, 1.0]
//   tone_curve = [0.0, 0.0, 1.0, 0.0]
//
//   [crop]
//   offset_x = 0
//   offset_y = 0
//   width = 640
//   height = 480
//
//   [gain_map]
//   width = 2
//   height = 1
//   values = [1.0, 1.0, 1.0, 1.0,  1.2, 1.0, 1.0, 1.3]

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bayer::CfaPattern;
use crate::color::{Matrix3, ToneCurve};
use crate::dispatch::LaunchOptions;
use crate::error::{KernelError, Result};
use crate::gainmap::GainMap;
use crate::raw::{CropWindow, RawParams};

// ---------------------------------------------------------------------------
// Matrices
// ---------------------------------------------------------------------------

/// A colour matrix given either by preset name or as three rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixSpec {
    Preset(String),
    Rows(Matrix3),
}

impl Default for MatrixSpec {
    fn default() -> Self {
        MatrixSpec::Preset("identity".to_string())
    }
}

impl MatrixSpec {
    pub fn resolve(&self) -> Result<Matrix3> {
        match self {
            MatrixSpec::Rows(m) => Ok(*m),
            MatrixSpec::Preset(name) => match name.to_ascii_lowercase().as_str() {
                "identity" => Ok(Matrix3::IDENTITY),
                "xyz_d50_to_prophoto" => Ok(Matrix3::XYZ_D50_TO_PROPHOTO),
                "prophoto_to_srgb" => Ok(Matrix3::PROPHOTO_TO_SRGB),
                _ => Err(KernelError::UnknownMatrixPreset(name.clone())),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// RAW
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainMapConfig {
    pub width: usize,
    pub height: usize,
    /// `width * height * 4` gains, channel order R, G even row, G odd row, B.
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub black_level: [u16; 4],
    pub white_level: u32,
    pub cfa: CfaPattern,
    pub sensor_to_intermediate: MatrixSpec,
    pub intermediate_to_output: MatrixSpec,
    pub neutral: [f32; 3],
    pub tone_curve: ToneCurve,
    pub crop: Option<CropWindow>,
    pub gain_map: Option<GainMapConfig>,
}

impl Default for RawConfig {
    fn default() -> Self {
        let p = RawParams::default();
        RawConfig {
            black_level: p.black_level,
            white_level: p.white_level,
            cfa: p.cfa,
            sensor_to_intermediate: MatrixSpec::default(),
            intermediate_to_output: MatrixSpec::default(),
            neutral: p.neutral,
            tone_curve: p.tone_curve,
            crop: None,
            gain_map: None,
        }
    }
}

impl RawConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve presets and validate into converter parameters.
    pub fn to_params(&self) -> Result<RawParams> {
        let params = RawParams {
            black_level: self.black_level,
            white_level: self.white_level,
            cfa: self.cfa,
            sensor_to_intermediate: self.sensor_to_intermediate.resolve()?,
            intermediate_to_output: self.intermediate_to_output.resolve()?,
            neutral: self.neutral,
            tone_curve: self.tone_curve,
            crop: self.crop,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn to_gain_map(&self) -> Result<Option<GainMap>> {
        self.gain_map
            .as_ref()
            .map(|g| GainMap::from_interleaved(g.width, g.height, &g.values))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub dim_x: usize,
    pub dim_y: usize,
    pub x_start: usize,
    pub x_end: Option<usize>,
    pub y_start: usize,
    pub y_end: Option<usize>,
    /// Value written by the fill kernel before the coordinate kernel runs.
    pub fill_value: i32,
    /// Seed for the synthetic input buffer.
    pub input_seed: u64,
    /// Element count for the reducer cases.
    pub reduce_len: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            dim_x: 32,
            dim_y: 16,
            x_start: 0,
            x_end: None,
            y_start: 0,
            y_end: None,
            fill_value: 0,
            input_seed: 0x5eed,
            reduce_len: 10_000,
        }
    }
}

impl HarnessConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: HarnessConfig = toml::from_str(content)?;
        cfg.launch_options().resolve(cfg.dim_x, cfg.dim_y)?;
        Ok(cfg)
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            x_start: self.x_start,
            x_end: self.x_end,
            y_start: self.y_start,
            y_end: self.y_end,
        }
    }

    /// Whether the launch covers less than the full grid.
    pub fn is_bounded(&self) -> bool {
        self.x_start > 0
            || self.y_start > 0
            || self.x_end.is_some_and(|e| e < self.dim_x)
            || self.y_end.is_some_and(|e| e < self.dim_y)
    }
}

pub fn load_raw_config<P: AsRef<Path>>(path: P) -> Result<RawConfig> {
    RawConfig::from_file(path)
}

pub fn load_harness_config<P: AsRef<Path>>(path: P) -> Result<HarnessConfig> {
    HarnessConfig::from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_raw_config_is_default() {
        let cfg = RawConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RawConfig::default());
        assert_eq!(cfg.to_params().unwrap(), RawParams::default());
    }

    #[test]
    fn test_raw_config_full() {
        let text = r#"
            black_level = [60, 62, 62, 64]
            white_level = 4095
            cfa = "BGGR"
            sensor_to_intermediate = "XYZ_D50_TO_PROPHOTO"
            intermediate_to_output = [[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.5]]
            neutral = [0.9, 1.0, 0.8]
            tone_curve = [-0.2, 0.1, 1.1, 0.0]

            [crop]
            offset_x = 2
            offset_y = 4
            width = 100
            height = 50
        "#;
        let params = RawConfig::from_toml_str(text).unwrap().to_params().unwrap();
        assert_eq!(params.black_level, [60, 62, 62, 64]);
        assert_eq!(params.white_level, 4095);
        assert_eq!(params.cfa, CfaPattern::Bggr);
        assert_eq!(params.sensor_to_intermediate, Matrix3::XYZ_D50_TO_PROPHOTO);
        assert_eq!(params.intermediate_to_output, Matrix3::diagonal([2.0, 1.0, 0.5]));
        assert_eq!(params.tone_curve, ToneCurve::new([-0.2, 0.1, 1.1, 0.0]));
        assert_eq!(params.crop, Some(CropWindow { offset_x: 2, offset_y: 4, width: 100, height: 50 }));
    }

    #[test]
    fn test_raw_config_rejects_bad_values() {
        assert!(matches!(RawConfig::from_toml_str("cfa = \"RGBW\""), Err(KernelError::Config(_))));
        let cfg = RawConfig::from_toml_str("sensor_to_intermediate = \"adobe\"").unwrap();
        assert!(matches!(cfg.to_params(), Err(KernelError::UnknownMatrixPreset(_))));
        let cfg = RawConfig::from_toml_str("white_level = 10").unwrap();
        assert!(matches!(cfg.to_params(), Err(KernelError::InvalidWhiteLevel { .. })));
    }

    #[test]
    fn test_gain_map_section() {
        let text = "[gain_map]\nwidth = 1\nheight = 1\nvalues = [1.5, 1.0, 1.0, 2.0]\n";
        let map = RawConfig::from_toml_str(text).unwrap().to_gain_map().unwrap().unwrap();
        assert_eq!(map.sample(0, 0, 4, 4), [1.5, 1.0, 1.0, 2.0]);

        let bad = "[gain_map]\nwidth = 2\nheight = 1\nvalues = [1.0]\n";
        assert!(RawConfig::from_toml_str(bad).unwrap().to_gain_map().is_err());
    }

    #[test]
    fn test_harness_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dim_x = 8\ndim_y = 4\nx_start = 2\nx_end = 6\nfill_value = -1").unwrap();
        let cfg = load_harness_config(file.path()).unwrap();
        assert_eq!((cfg.dim_x, cfg.dim_y), (8, 4));
        assert_eq!(cfg.fill_value, -1);
        assert!(cfg.is_bounded());
        assert_eq!(cfg.launch_options(), LaunchOptions::full().with_x(2, 6));
    }

    #[test]
    fn test_harness_config_rejects_bounds_outside_grid() {
        assert!(matches!(
            HarnessConfig::from_toml_str("dim_x = 4\nx_end = 5"),
            Err(KernelError::LaunchOutOfBounds { .. })
        ));
        assert!(!HarnessConfig::default().is_bounded());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_raw_config(dir.path().join("nope.toml")), Err(KernelError::Io(_))));
    }
}
