// convert.rs — Conversions between float colour and packed RGBA8.
//
//   [f32; 3] in [0, 1]  →  Rgba8      (pack_color_8888, alpha forced to 255)
//   Rgba8               →  [f32; 4]   (unpack_color_8888)
//   Image<Rgba8>        →  Vec<u8>    (to_rgba_bytes, padding stripped)
//
// Packing uses floor(v * 255 + 0.5) after clamping, so 0.5/255 rounds up.

use crate::image::{Image, Rgba8};

/// Pack a float RGB colour into an opaque `Rgba8`.
///
/// Each channel is clamped to [0, 1] first; NaN packs as 0.
#[inline]
pub fn pack_color_8888(rgb: [f32; 3]) -> Rgba8 {
    Rgba8 {
        r: pack_channel(rgb[0]),
        g: pack_channel(rgb[1]),
        b: pack_channel(rgb[2]),
        a: 255,
    }
}

#[inline]
fn pack_channel(v: f32) -> u8 {
    // `as u8` saturates and maps NaN to 0.
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Unpack an `Rgba8` into normalized floats `[r, g, b, a]`.
#[inline]
pub fn unpack_color_8888(px: Rgba8) -> [f32; 4] {
    [
        px.r as f32 / 255.0,
        px.g as f32 / 255.0,
        px.b as f32 / 255.0,
        px.a as f32 / 255.0,
    ]
}

/// Flatten an RGBA image into `width * height * 4` bytes, row-major,
/// with stride padding removed.
pub fn to_rgba_bytes(img: &Image<Rgba8>) -> Vec<u8> {
    let compact = img.to_compact();
    bytemuck::cast_slice(compact.as_slice()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_extremes() {
        assert_eq!(pack_color_8888([0.0, 1.0, 0.5]), Rgba8::new(0, 255, 128, 255));
    }

    #[test]
    fn test_pack_clamps_out_of_range() {
        assert_eq!(pack_color_8888([-0.3, 1.7, f32::NAN]), Rgba8::new(0, 255, 0, 255));
    }

    #[test]
    fn test_unpack_inverts_pack_within_half_step() {
        let rgb = [0.2f32, 0.4, 0.9];
        let back = unpack_color_8888(pack_color_8888(rgb));
        for c in 0..3 {
            assert!((back[c] - rgb[c]).abs() <= 0.5 / 255.0 + 1e-6);
        }
        assert_eq!(back[3], 1.0);
    }

    #[test]
    fn test_to_rgba_bytes_strips_padding() {
        let px = Rgba8::new(1, 2, 3, 4);
        let img = Image::from_vec_with_stride(1, 2, 2, vec![px, Rgba8::default(), px, Rgba8::default()]);
        assert_eq!(to_rgba_bytes(&img), vec![1, 2, 3, 4, 1, 2, 3, 4]);
    }
}
