// color.rs — Colour-space maths for the RAW pipeline.
//
// Three pieces:
//   Matrix3    3×3 row-major transform, applied to column vectors.
//   gamma      sRGB piecewise transfer function (linear → encoded).
//   ToneCurve  cubic polynomial applied hue-preservingly to an RGB triple.
//
// HUE-PRESERVING TONEMAP
// ──────────────────────
// Applying a curve to R, G and B independently shifts hue whenever the curve
// is non-linear. Instead we only push the min and max channels through the
// curve and place the middle channel at the same *relative* position between
// them that it had before:
//
//   m  = min(R,G,B)   M  = max(R,G,B)   mid = the remaining channel
//   m' = f(m)         M' = f(M)
//   mid' = m' + (M' − m') · (mid − m) / (M − m)
//
// so (mid − m)/(M − m), the hue fraction, is unchanged. When M == m the
// pixel is grey and mid' = M'.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Matrix3
// ---------------------------------------------------------------------------

/// A 3×3 colour transform stored row-major. `m * v` treats `v` as a column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matrix3 {
    pub rows: [[f32; 3]; 3],
}

impl Matrix3 {
    pub const IDENTITY: Matrix3 = Matrix3::from_rows([
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ]);

    /// CIE XYZ (D50) to linear ROMM / ProPhoto RGB.
    pub const XYZ_D50_TO_PROPHOTO: Matrix3 = Matrix3::from_rows([
        [1.345_943_3, -0.255_607_5, -0.051_111_8],
        [-0.544_598_9, 1.508_167_3, 0.020_535_1],
        [0.0, 0.0, 1.211_812_8],
    ]);

    /// Linear ProPhoto RGB to linear sRGB (Bradford D50 → D65).
    pub const PROPHOTO_TO_SRGB: Matrix3 = Matrix3::from_rows([
        [2.034_075_7, -0.727_334_2, -0.306_741_6],
        [-0.228_813_2, 1.231_730_1, -0.002_916_9],
        [-0.008_569_8, -0.153_286_6, 1.161_856_4],
    ]);

    pub const fn from_rows(rows: [[f32; 3]; 3]) -> Self {
        Matrix3 { rows }
    }

    /// Build from a flat row-major slice of nine values.
    pub fn from_row_major(v: [f32; 9]) -> Self {
        Matrix3::from_rows([[v[0], v[1], v[2]], [v[3], v[4], v[5]], [v[6], v[7], v[8]]])
    }

    /// A diagonal scale, e.g. white-balance gains.
    pub fn diagonal(d: [f32; 3]) -> Self {
        Matrix3::from_rows([[d[0], 0.0, 0.0], [0.0, d[1], 0.0], [0.0, 0.0, d[2]]])
    }

    #[inline]
    pub fn mul_vec(&self, v: [f32; 3]) -> [f32; 3] {
        let r = &self.rows;
        [
            r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
            r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
            r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
        ]
    }

    /// Matrix product `self * rhs`: applying the result equals applying
    /// `rhs` first, then `self`.
    pub fn mul(&self, rhs: &Matrix3) -> Matrix3 {
        let mut out = [[0.0f32; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.rows[i][k] * rhs.rows[k][j]).sum();
            }
        }
        Matrix3 { rows: out }
    }

    /// Column-major flattening, padded to vec4 columns as WGSL `mat3x3<f32>`
    /// lays out in a uniform buffer.
    pub fn to_wgsl_columns(&self) -> [[f32; 4]; 3] {
        let r = &self.rows;
        [
            [r[0][0], r[1][0], r[2][0], 0.0],
            [r[0][1], r[1][1], r[2][1], 0.0],
            [r[0][2], r[1][2], r[2][2], 0.0],
        ]
    }
}

impl Default for Matrix3 {
    fn default() -> Self {
        Matrix3::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// sRGB gamma
// ---------------------------------------------------------------------------

/// sRGB transfer function for one linear channel.
#[inline]
pub fn gamma_encode(x: f32) -> f32 {
    if x <= 0.003_130_8 {
        x * 12.92
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
pub fn gamma_correct(rgb: [f32; 3]) -> [f32; 3] {
    [gamma_encode(rgb[0]), gamma_encode(rgb[1]), gamma_encode(rgb[2])]
}

// ---------------------------------------------------------------------------
// Tone curve
// ---------------------------------------------------------------------------

/// `f(v) = a·v³ + b·v² + c·v + d`, coefficients stored `[a, b, c, d]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToneCurve {
    pub coeffs: [f32; 4],
}

impl ToneCurve {
    /// `f(v) = v`.
    pub const IDENTITY: ToneCurve = ToneCurve { coeffs: [0.0, 0.0, 1.0, 0.0] };

    pub const fn new(coeffs: [f32; 4]) -> Self {
        ToneCurve { coeffs }
    }

    #[inline]
    pub fn eval(&self, v: f32) -> f32 {
        let [a, b, c, d] = self.coeffs;
        ((a * v + b) * v + c) * v + d
    }

    /// Hue-preserving application to an RGB triple (see module header).
    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| rgb[a].total_cmp(&rgb[b]));
        let [lo, mid, hi] = order;

        let min = rgb[lo];
        let max = rgb[hi];
        let new_min = self.eval(min);
        let new_max = self.eval(max);
        let new_mid = if max == min {
            new_max
        } else {
            new_min + (new_max - new_min) * (rgb[mid] - min) / (max - min)
        };

        let mut out = [0.0f32; 3];
        out[lo] = new_min;
        out[mid] = new_mid;
        out[hi] = new_max;
        out
    }
}

impl Default for ToneCurve {
    fn default() -> Self {
        ToneCurve::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close3(a: [f32; 3], b: [f32; 3], tol: f32) {
        for c in 0..3 {
            assert!((a[c] - b[c]).abs() <= tol, "channel {c}: {a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_identity_mul_vec() {
        let v = [0.1, 0.5, 0.9];
        assert_eq!(Matrix3::IDENTITY.mul_vec(v), v);
    }

    #[test]
    fn test_mul_composes_right_to_left() {
        let scale = Matrix3::diagonal([2.0, 3.0, 4.0]);
        let swap = Matrix3::from_row_major([0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        let v = [1.0, 10.0, 100.0];
        let composed = swap.mul(&scale).mul_vec(v);
        assert_eq!(composed, swap.mul_vec(scale.mul_vec(v)));
        assert_eq!(composed, [30.0, 2.0, 400.0]);
    }

    #[test]
    fn test_prophoto_white_maps_to_srgb_white() {
        let white = Matrix3::PROPHOTO_TO_SRGB.mul_vec([1.0, 1.0, 1.0]);
        assert_close3(white, [1.0, 1.0, 1.0], 1e-4);
    }

    #[test]
    fn test_d50_white_maps_to_prophoto_white() {
        let d50 = [0.9642, 1.0, 0.8249];
        assert_close3(Matrix3::XYZ_D50_TO_PROPHOTO.mul_vec(d50), [1.0, 1.0, 1.0], 1e-3);
    }

    #[test]
    fn test_wgsl_columns_transpose() {
        let m = Matrix3::from_row_major([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let cols = m.to_wgsl_columns();
        assert_eq!(cols[0], [1.0, 4.0, 7.0, 0.0]);
        assert_eq!(cols[2], [3.0, 6.0, 9.0, 0.0]);
    }

    #[test]
    fn test_gamma_linear_segment() {
        assert_eq!(gamma_encode(0.0), 0.0);
        assert!((gamma_encode(0.002) - 0.002 * 12.92).abs() < 1e-7);
    }

    #[test]
    fn test_gamma_endpoints_and_monotonic() {
        assert!((gamma_encode(1.0) - 1.0).abs() < 1e-6);
        // 18% grey encodes to roughly 0.46.
        assert!((gamma_encode(0.18) - 0.4614).abs() < 1e-3);
        let mut prev = -1.0;
        for i in 0..=100 {
            let v = gamma_encode(i as f32 / 100.0);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn test_gamma_segments_meet() {
        let knee = 0.003_130_8f32;
        let below = knee * 12.92;
        let above = 1.055 * knee.powf(1.0 / 2.4) - 0.055;
        assert!((below - above).abs() < 1e-4);
    }

    #[test]
    fn test_tonemap_identity_curve_is_identity() {
        let rgb = [0.7, 0.2, 0.45];
        assert_close3(ToneCurve::IDENTITY.apply(rgb), rgb, 1e-6);
    }

    #[test]
    fn test_tonemap_every_permutation_unpermutes() {
        // Curve doubles its input; identity-shaped, so output = 2 * input.
        let curve = ToneCurve::new([0.0, 0.0, 2.0, 0.0]);
        let perms = [
            [0.1, 0.5, 0.9], [0.1, 0.9, 0.5], [0.5, 0.1, 0.9],
            [0.5, 0.9, 0.1], [0.9, 0.1, 0.5], [0.9, 0.5, 0.1],
        ];
        for rgb in perms {
            let out = curve.apply(rgb);
            assert_close3(out, [rgb[0] * 2.0, rgb[1] * 2.0, rgb[2] * 2.0], 1e-6);
        }
    }

    #[test]
    fn test_tonemap_preserves_hue_fraction() {
        let curve = ToneCurve::new([-0.5, 0.3, 1.2, 0.0]);
        let rgb = [0.2, 0.8, 0.35];
        let out = curve.apply(rgb);
        let before = (rgb[2] - rgb[0]) / (rgb[1] - rgb[0]);
        let after = (out[2] - out[0]) / (out[1] - out[0]);
        assert!((before - after).abs() < 1e-5);
        assert!((out[0] - curve.eval(0.2)).abs() < 1e-6);
        assert!((out[1] - curve.eval(0.8)).abs() < 1e-6);
    }

    #[test]
    fn test_tonemap_grey_uses_max() {
        let curve = ToneCurve::new([0.0, 1.0, 0.0, 0.1]);
        let out = curve.apply([0.5, 0.5, 0.5]);
        let expected = curve.eval(0.5);
        assert_close3(out, [expected; 3], 1e-7);
    }
}
