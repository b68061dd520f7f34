// tests/test_config.rs — Loading TOML configs from disk and converting with them.

use std::io::Write;

use rawpipe::bayer::CfaPattern;
use rawpipe::config::{load_harness_config, load_raw_config, RawConfig};
use rawpipe::raw::RawConverter;
use rawpipe::{Image, KernelError};

fn write_config(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
fn raw_config_drives_a_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "raw.toml",
        r#"
            black_level = [16, 16, 16, 16]
            white_level = 4095
            cfa = "GRBG"
            sensor_to_intermediate = "identity"
            intermediate_to_output = "prophoto_to_srgb"

            [crop]
            offset_x = 2
            offset_y = 2
            width = 8
            height = 4

            [gain_map]
            width = 1
            height = 1
            values = [1.0, 1.0, 1.0, 1.0]
        "#,
    );
    let cfg = load_raw_config(&path).unwrap();
    let params = cfg.to_params().unwrap();
    assert_eq!(params.cfa, CfaPattern::Grbg);

    let conv = RawConverter::new(params, cfg.to_gain_map().unwrap(), 12, 8).unwrap();
    let out = conv.convert(&Image::filled(12, 8, 2000u16)).unwrap();
    assert_eq!((out.width(), out.height()), (8, 4));
}

#[test]
fn crop_outside_frame_fails_at_converter_construction() {
    let cfg = RawConfig::from_toml_str("[crop]\noffset_x = 10\noffset_y = 0\nwidth = 8\nheight = 4\n").unwrap();
    let params = cfg.to_params().unwrap();
    assert!(matches!(RawConverter::new(params, None, 12, 8), Err(KernelError::InvalidDimensions { .. })));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "bad.toml", "white_level = \"bright\"\n");
    assert!(matches!(load_raw_config(&path), Err(KernelError::Config(_))));
    let path = write_config(&dir, "bad_harness.toml", "dim_x = -3\n");
    assert!(matches!(load_harness_config(&path), Err(KernelError::Config(_))));
}

#[test]
fn harness_config_defaults_fill_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "harness.toml", "y_start = 2\ny_end = 5\n");
    let cfg = load_harness_config(&path).unwrap();
    assert_eq!((cfg.dim_x, cfg.dim_y), (32, 16));
    assert!(cfg.is_bounded());
    let window = cfg.launch_options().resolve(cfg.dim_x, cfg.dim_y).unwrap();
    assert_eq!((window.width(), window.height()), (32, 3));
}
