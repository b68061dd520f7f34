// bayer.rs — Colour filter array geometry, linearization and demosaic.
//
// A Bayer sensor records one colour per photosite. The 2×2 tile repeats
// across the frame; the four standard arrangements are named by reading the
// tile row-major:
//
//   RGGB      GRBG      GBRG      BGGR
//   R G       G R       G B       B G
//   G B       B G       R G       G R
//
// Black levels are given per *position* in the 2×2 tile (raster order,
// independent of colour). Gain-map channels are given per *colour*, with
// the two greens told apart by row parity:
//
//   channel 0 = R, 1 = G on an even row, 2 = G on an odd row, 3 = B.
//
// DEMOSAIC
// ────────
// Bilinear interpolation over a 3×3 patch. The patch is indexed
//
//   0 1 2
//   3 4 5
//   6 7 8
//
// and the stencil is picked by what colour sits at the centre (index 4):
//
//   red centre        R = c           G = mean(1,3,5,7)  B = mean(0,2,6,8)
//   green, red row    R = mean(3,5)   G = c              B = mean(1,7)
//   green, blue row   R = mean(1,7)   G = c              B = mean(3,5)
//   blue centre       R = mean(0,2,6,8)  G = mean(1,3,5,7)  B = c

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::image::Image;

// ---------------------------------------------------------------------------
// CFA pattern
// ---------------------------------------------------------------------------

/// The four Bayer arrangements. Discriminants are the wire indices used by
/// camera metadata (`android.sensor.info.colorFilterArrangement`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CfaPattern {
    Rggb = 0,
    Grbg = 1,
    Gbrg = 2,
    Bggr = 3,
}

/// What a photosite records, with greens split by their horizontal
/// neighbours (which decides the demosaic stencil).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfaColor {
    Red,
    /// Green whose left/right neighbours are red.
    GreenRedRow,
    /// Green whose left/right neighbours are blue.
    GreenBlueRow,
    Blue,
}

impl CfaPattern {
    pub const ALL: [CfaPattern; 4] = [
        CfaPattern::Rggb,
        CfaPattern::Grbg,
        CfaPattern::Gbrg,
        CfaPattern::Bggr,
    ];

    /// The 2×2 tile in raster order.
    fn tile(self) -> [CfaColor; 4] {
        use CfaColor::*;
        match self {
            CfaPattern::Rggb => [Red, GreenRedRow, GreenBlueRow, Blue],
            CfaPattern::Grbg => [GreenRedRow, Red, Blue, GreenBlueRow],
            CfaPattern::Gbrg => [GreenBlueRow, Blue, Red, GreenRedRow],
            CfaPattern::Bggr => [Blue, GreenBlueRow, GreenRedRow, Red],
        }
    }

    /// Colour recorded at (x, y).
    #[inline]
    pub fn color_at(self, x: usize, y: usize) -> CfaColor {
        self.tile()[site_index(x, y)]
    }

    /// Gain-map channel for the photosite at (x, y).
    #[inline]
    pub fn gain_channel(self, x: usize, y: usize) -> usize {
        match self.color_at(x, y) {
            CfaColor::Red => 0,
            CfaColor::Blue => 3,
            CfaColor::GreenRedRow | CfaColor::GreenBlueRow => 1 + (y & 1),
        }
    }
}

impl TryFrom<u32> for CfaPattern {
    type Error = KernelError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(CfaPattern::Rggb),
            1 => Ok(CfaPattern::Grbg),
            2 => Ok(CfaPattern::Gbrg),
            3 => Ok(CfaPattern::Bggr),
            other => Err(KernelError::InvalidCfa(other.to_string())),
        }
    }
}

impl FromStr for CfaPattern {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGGB" => Ok(CfaPattern::Rggb),
            "GRBG" => Ok(CfaPattern::Grbg),
            "GBRG" => Ok(CfaPattern::Gbrg),
            "BGGR" => Ok(CfaPattern::Bggr),
            _ => Err(KernelError::InvalidCfa(s.to_string())),
        }
    }
}

impl fmt::Display for CfaPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CfaPattern::Rggb => "RGGB",
            CfaPattern::Grbg => "GRBG",
            CfaPattern::Gbrg => "GBRG",
            CfaPattern::Bggr => "BGGR",
        };
        f.write_str(name)
    }
}

/// Position of (x, y) inside its 2×2 tile, raster order.
#[inline]
pub fn site_index(x: usize, y: usize) -> usize {
    (x & 1) | ((y & 1) << 1)
}

// ---------------------------------------------------------------------------
// 3×3 neighbourhood
// ---------------------------------------------------------------------------

/// A 3×3 patch of samples centred on one photosite, row-major.
pub type Patch3x3 = [f32; 9];

/// Clamp (x, y) into the interior `[1, w-2] × [1, h-2]` so the 3×3 patch
/// never leaves the frame. Border pixels replicate their inner neighbour.
///
/// Callers guarantee `w >= 3 && h >= 3`.
#[inline]
pub fn clamp_to_interior(x: usize, y: usize, w: usize, h: usize) -> (usize, usize) {
    (x.clamp(1, w - 2), y.clamp(1, h - 2))
}

/// Load the raw 3×3 neighbourhood around an interior point (x, y).
///
/// # Panics
/// Panics if (x, y) is not an interior point of `raw`.
#[inline]
pub fn load_patch(raw: &Image<u16>, x: usize, y: usize) -> Patch3x3 {
    assert!(
        x >= 1 && y >= 1 && x + 1 < raw.width() && y + 1 < raw.height(),
        "patch centre ({x},{y}) is not interior to {}×{}",
        raw.width(),
        raw.height(),
    );
    let mut patch = [0.0f32; 9];
    let mut k = 0;
    for j in y - 1..=y + 1 {
        for i in x - 1..=x + 1 {
            // SAFETY: the assert above keeps i < width and j < height.
            patch[k] = unsafe { raw.get_unchecked(i, j) } as f32;
            k += 1;
        }
    }
    patch
}

/// Subtract the per-site black level and normalize to `[0, 1]` relative to
/// the white level, multiplying by the per-site gain when one is supplied.
///
/// `gain(i, j)` returns the gain for photosite (i, j); the patch is centred
/// on (x, y).
#[inline]
pub fn linearize_patch(
    patch: &mut Patch3x3,
    x: usize,
    y: usize,
    black_level: &[u16; 4],
    white_level: u32,
    mut gain: impl FnMut(usize, usize) -> f32,
) {
    let white = white_level as f32;
    let mut k = 0;
    for j in y - 1..=y + 1 {
        for i in x - 1..=x + 1 {
            let bl = black_level[site_index(i, j)] as f32;
            patch[k] = gain(i, j) * (patch[k] - bl) / (white - bl);
            k += 1;
        }
    }
}

/// Bilinear demosaic of a linearized patch whose centre has colour `center`.
#[inline]
pub fn demosaic(center: CfaColor, p: &Patch3x3) -> [f32; 3] {
    let cross = (p[1] + p[3] + p[5] + p[7]) / 4.0;
    let diag = (p[0] + p[2] + p[6] + p[8]) / 4.0;
    let horiz = (p[3] + p[5]) / 2.0;
    let vert = (p[1] + p[7]) / 2.0;
    match center {
        CfaColor::Red => [p[4], cross, diag],
        CfaColor::GreenRedRow => [horiz, p[4], vert],
        CfaColor::GreenBlueRow => [vert, p[4], horiz],
        CfaColor::Blue => [diag, cross, p[4]],
    }
}
