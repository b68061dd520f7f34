// raw.rs — Bayer RAW → RGBA8 conversion (CPU reference).
//
// Every output pixel runs the same fixed pipeline over its own 3×3
// neighbourhood; nothing is shared between pixels:
//
//   1. clamp to interior          [1, w-2] × [1, h-2]
//   2. load 3×3 patch
//   3. black level + normalize    (v - bl[site]) / (white - bl[site])
//   4. gain map                   × bilinear gain for the site's CFA channel
//   5. demosaic                   stencil picked by the centre colour
//   6. neutral clamp              each channel to [0, neutral[c]]
//   7. sensor → intermediate      matrix
//   8. tonemap                    hue-preserving cubic
//   9. intermediate → output      matrix
//  10. clamp                      [0, 1]
//  11. sRGB gamma
//  12. pack                       floor(v·255 + 0.5), alpha 255
//
// All validation happens in `RawConverter::new`; the per-pixel path cannot
// fail.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bayer::{clamp_to_interior, demosaic, linearize_patch, load_patch, CfaPattern};
use crate::color::{gamma_correct, Matrix3, ToneCurve};
use crate::convert::pack_color_8888;
use crate::dispatch::{launch_2d, LaunchOptions};
use crate::error::{KernelError, Result};
use crate::gainmap::GainMap;
use crate::image::{Image, Rgba8};

/// Sub-rectangle of the raw frame to emit. Output pixel (x, y) reads raw
/// position (x + offset_x, y + offset_y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    pub offset_x: usize,
    pub offset_y: usize,
    pub width: usize,
    pub height: usize,
}

/// Per-frame conversion parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RawParams {
    /// Black level per 2×2 tile site, raster order.
    pub black_level: [u16; 4],
    pub white_level: u32,
    pub cfa: CfaPattern,
    pub sensor_to_intermediate: Matrix3,
    pub intermediate_to_output: Matrix3,
    /// Per-channel upper clamp applied right after demosaic.
    pub neutral: [f32; 3],
    pub tone_curve: ToneCurve,
    /// `None` emits the full frame.
    pub crop: Option<CropWindow>,
}

impl Default for RawParams {
    /// 10-bit sensor, black 64, RGGB, identity colour, no tonemap.
    fn default() -> Self {
        RawParams {
            black_level: [64; 4],
            white_level: 1023,
            cfa: CfaPattern::Rggb,
            sensor_to_intermediate: Matrix3::IDENTITY,
            intermediate_to_output: Matrix3::IDENTITY,
            neutral: [1.0; 3],
            tone_curve: ToneCurve::IDENTITY,
            crop: None,
        }
    }
}

impl RawParams {
    /// Check the parameters that the per-pixel math relies on.
    pub fn validate(&self) -> Result<()> {
        for &bl in &self.black_level {
            if self.white_level <= bl as u32 {
                return Err(KernelError::InvalidWhiteLevel { white: self.white_level, black: bl });
            }
        }
        for (index, &value) in self.neutral.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(KernelError::InvalidNeutral { index, value });
            }
        }
        Ok(())
    }
}

/// A validated converter bound to one raw frame size.
#[derive(Debug, Clone)]
pub struct RawConverter {
    params: RawParams,
    gain_map: Option<GainMap>,
    raw_width: usize,
    raw_height: usize,
    crop: CropWindow,
}

impl RawConverter {
    /// Validate `params` against a `raw_width × raw_height` frame.
    ///
    /// # Errors
    /// - `InvalidWhiteLevel` / `InvalidNeutral` from [`RawParams::validate`]
    /// - `InvalidDimensions` if the frame is smaller than 3×3 or the crop
    ///   window leaves the frame
    pub fn new(
        params: RawParams,
        gain_map: Option<GainMap>,
        raw_width: usize,
        raw_height: usize,
    ) -> Result<Self> {
        params.validate()?;
        if raw_width < 3 || raw_height < 3 {
            return Err(KernelError::InvalidDimensions {
                width: raw_width,
                height: raw_height,
                reason: "raw frame must be at least 3x3",
            });
        }
        let crop = params.crop.unwrap_or(CropWindow {
            offset_x: 0,
            offset_y: 0,
            width: raw_width,
            height: raw_height,
        });
        let inside = |offset: usize, len: usize, limit: usize| offset <= limit && len <= limit - offset;
        if crop.width == 0
            || crop.height == 0
            || !inside(crop.offset_x, crop.width, raw_width)
            || !inside(crop.offset_y, crop.height, raw_height)
        {
            return Err(KernelError::InvalidDimensions {
                width: crop.width,
                height: crop.height,
                reason: "crop window must be non-empty and inside the raw frame",
            });
        }
        Ok(RawConverter { params, gain_map, raw_width, raw_height, crop })
    }

    pub fn params(&self) -> &RawParams {
        &self.params
    }

    pub fn gain_map(&self) -> Option<&GainMap> {
        self.gain_map.as_ref()
    }

    pub fn crop(&self) -> CropWindow {
        self.crop
    }

    /// Output dimensions.
    pub fn output_size(&self) -> (usize, usize) {
        (self.crop.width, self.crop.height)
    }

    /// Raw frame dimensions the converter was built for.
    pub fn raw_size(&self) -> (usize, usize) {
        (self.raw_width, self.raw_height)
    }

    /// `InvalidDimensions` unless `raw` is `raw_size()`.
    pub fn check_frame(&self, raw: &Image<u16>) -> Result<()> {
        if raw.width() != self.raw_width || raw.height() != self.raw_height {
            return Err(KernelError::InvalidDimensions {
                width: raw.width(),
                height: raw.height(),
                reason: "raw frame does not match converter dimensions",
            });
        }
        Ok(())
    }

    /// Linear output-space RGB for raw position (x, y), before gamma and
    /// packing. Stops after the `[0, 1]` clamp.
    pub fn linear_pixel(&self, raw: &Image<u16>, x: usize, y: usize) -> [f32; 3] {
        let p = &self.params;
        let (w, h) = (self.raw_width, self.raw_height);
        let (x, y) = clamp_to_interior(x, y, w, h);

        let mut patch = load_patch(raw, x, y);
        match &self.gain_map {
            Some(map) => linearize_patch(&mut patch, x, y, &p.black_level, p.white_level, |i, j| {
                map.sample(i, j, w, h)[p.cfa.gain_channel(i, j)]
            }),
            None => linearize_patch(&mut patch, x, y, &p.black_level, p.white_level, |_, _| 1.0),
        }

        let mut rgb = demosaic(p.cfa.color_at(x, y), &patch);
        for c in 0..3 {
            rgb[c] = rgb[c].clamp(0.0, p.neutral[c]);
        }

        let rgb = p.sensor_to_intermediate.mul_vec(rgb);
        let rgb = p.tone_curve.apply(rgb);
        let rgb = p.intermediate_to_output.mul_vec(rgb);
        rgb.map(|v| v.clamp(0.0, 1.0))
    }

    /// Fully converted pixel for raw position (x, y).
    #[inline]
    pub fn convert_pixel(&self, raw: &Image<u16>, x: usize, y: usize) -> Rgba8 {
        pack_color_8888(gamma_correct(self.linear_pixel(raw, x, y)))
    }

    /// Convert the whole crop window, rows in parallel.
    ///
    /// # Errors
    /// `InvalidDimensions` if `raw` is not the size the converter was built for.
    pub fn convert(&self, raw: &Image<u16>) -> Result<Image<Rgba8>> {
        self.check_frame(raw)?;
        debug!(
            raw_w = self.raw_width,
            raw_h = self.raw_height,
            out_w = self.crop.width,
            out_h = self.crop.height,
            cfa = %self.params.cfa,
            gain_map = self.gain_map.is_some(),
            "raw convert"
        );
        let CropWindow { offset_x, offset_y, width, height } = self.crop;
        let mut out = Image::new(width, height);
        launch_2d(&mut out, &LaunchOptions::full(), |ctx| {
            self.convert_pixel(raw, ctx.x + offset_x, ctx.y + offset_y)
        })?;
        Ok(out)
    }
}

/// One-shot helper: validate and convert.
pub fn convert_raw(raw: &Image<u16>, params: &RawParams, gain_map: Option<&GainMap>) -> Result<Image<Rgba8>> {
    RawConverter::new(params.clone(), gain_map.cloned(), raw.width(), raw.height())?.convert(raw)
}

/// Decode a packed little-endian `u16` frame with `stride` samples per row.
///
/// # Errors
/// `InvalidDimensions` if `stride < width` or the frame size overflows;
/// `LengthMismatch` if `bytes` is not exactly `stride * height` samples.
pub fn frame_from_le_bytes(bytes: &[u8], width: usize, height: usize, stride: usize) -> Result<Image<u16>> {
    if stride < width {
        return Err(KernelError::InvalidDimensions { width, height, reason: "stride must be at least the width" });
    }
    let expected = stride
        .checked_mul(height)
        .and_then(|samples| samples.checked_mul(2))
        .ok_or(KernelError::InvalidDimensions { width, height, reason: "frame size overflows usize" })?;
    if bytes.len() != expected {
        return Err(KernelError::LengthMismatch { expected, actual: bytes.len() });
    }
    let samples = bytes.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect();
    Ok(Image::from_vec_with_stride(width, height, stride, samples))
}
