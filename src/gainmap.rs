// gainmap.rs — Lens-shading gain map.
//
// A low-resolution grid of per-channel gains (R, G_even, G_odd, B) that
// corrects vignetting and colour shading. Raw pixel (x, y) maps into the grid
// by plain scaling, (x / raw_w · map_w, y / raw_h · map_h), and the four
// surrounding grid cells are blended bilinearly. The "next" cell is clamped
// at the right and bottom edges, so the last column and row replicate.

use crate::error::{KernelError, Result};
use crate::image::Image;

/// Per-channel gain grid.
#[derive(Debug, Clone)]
pub struct GainMap {
    gains: Image<[f32; 4]>,
}

impl GainMap {
    /// Wrap a gain grid.
    ///
    /// # Errors
    /// Returns `InvalidDimensions` if the grid is empty.
    pub fn new(gains: Image<[f32; 4]>) -> Result<Self> {
        if gains.is_empty() {
            return Err(KernelError::InvalidDimensions {
                width: gains.width(),
                height: gains.height(),
                reason: "gain map must be non-empty",
            });
        }
        Ok(GainMap { gains })
    }

    /// A map that applies gain 1.0 to every channel.
    pub fn unity(width: usize, height: usize) -> Result<Self> {
        GainMap::new(Image::filled(width, height, [1.0; 4]))
    }

    /// Build from a flat `width * height * 4` slice, channel-interleaved.
    pub fn from_interleaved(width: usize, height: usize, values: &[f32]) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|cells| cells.checked_mul(4))
            .ok_or(KernelError::InvalidDimensions {
                width,
                height,
                reason: "gain map size overflows usize",
            })?;
        if values.len() != expected {
            return Err(KernelError::LengthMismatch { expected, actual: values.len() });
        }
        let cells = values
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        GainMap::new(Image::from_vec(width, height, cells))
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.gains.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.gains.height()
    }

    pub fn as_image(&self) -> &Image<[f32; 4]> {
        &self.gains
    }

    /// Interpolated gains for raw pixel (x, y) of a `raw_w × raw_h` frame.
    pub fn sample(&self, x: usize, y: usize, raw_w: usize, raw_h: usize) -> [f32; 4] {
        let gw = self.gains.width();
        let gh = self.gains.height();
        let interp_x = x as f32 / raw_w as f32 * gw as f32;
        let interp_y = y as f32 / raw_h as f32 * gh as f32;
        // x < raw_w keeps interp_x < gw; min() guards float rounding.
        let gx = (interp_x as usize).min(gw - 1);
        let gy = (interp_y as usize).min(gh - 1);
        let gx_next = if gx + 1 < gw { gx + 1 } else { gx };
        let gy_next = if gy + 1 < gh { gy + 1 } else { gy };

        let fx = interp_x - gx as f32;
        let fy = interp_y - gy as f32;
        let tl = self.gains.get(gx, gy);
        let tr = self.gains.get(gx_next, gy);
        let bl = self.gains.get(gx, gy_next);
        let br = self.gains.get(gx_next, gy_next);

        let mut out = [0.0f32; 4];
        for c in 0..4 {
            out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
        }
        out
    }
}
