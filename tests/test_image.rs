// tests/test_image.rs — Integration tests for Image<T>, Rgba8 and packing.
//
// These run with `cargo test --test test_image` and see only the public API.

use rawpipe::convert::{pack_color_8888, to_rgba_bytes, unpack_color_8888};
use rawpipe::{Image, Rgba8};

// ===== Image construction & basic access =====

#[test]
fn image_new_zero_initialized() {
    let img: Image<u16> = Image::new(100, 50);
    assert_eq!((img.width(), img.height()), (100, 50));
    assert_eq!(img.get(0, 0), 0);
    assert_eq!(img.get(99, 49), 0);
}

#[test]
fn image_set_get_checkerboard() {
    let mut img: Image<u16> = Image::new(10, 10);
    for y in 0..10 {
        for x in 0..10 {
            img.set(x, y, if (x + y) % 2 == 0 { 1023 } else { 64 });
        }
    }
    for (x, y, v) in img.pixels() {
        let expected = if (x + y) % 2 == 0 { 1023 } else { 64 };
        assert_eq!(v, expected, "mismatch at ({x}, {y})");
    }
}

#[test]
fn image_from_vec_is_row_major() {
    //  [10, 20, 30]
    //  [40, 50, 60]
    let img = Image::from_vec(3, 2, vec![10i32, 20, 30, 40, 50, 60]);
    assert_eq!(img.get(2, 0), 30);
    assert_eq!(img.get(0, 1), 40);
    assert_eq!(img.row(1), &[40, 50, 60]);
}

// ===== Stride =====

#[test]
fn stride_does_not_affect_pixel_access() {
    let mut img: Image<u16> = Image::new_with_stride(3, 2, 8);
    img.set(2, 1, 7);
    assert_eq!(img.get(2, 1), 7);
    assert_eq!(img.as_slice()[8 + 2], 7);
    assert_eq!(img.pixels().count(), 6);
}

#[test]
fn compact_copy_drops_padding() {
    let img = Image::from_vec_with_stride(2, 2, 4, vec![1u16, 2, 99, 99, 3, 4, 99, 99]);
    let compact = img.to_compact();
    assert_eq!(compact.stride(), 2);
    assert_eq!(compact.as_slice(), &[1, 2, 3, 4]);
}

#[test]
fn clone_is_independent() {
    let a = Image::filled(4, 4, [1.0f32; 4]);
    let mut b = a.clone();
    b.set(0, 0, [2.0; 4]);
    assert_eq!(a.get(0, 0), [1.0; 4]);
}

#[test]
fn empty_and_single_pixel_images() {
    let empty: Image<u8> = Image::new(0, 5);
    assert!(empty.is_empty());
    assert_eq!(empty.pixels().count(), 0);

    let one = Image::filled(1, 1, 42u8);
    assert_eq!(one.pixels().collect::<Vec<_>>(), vec![(0, 0, 42)]);
}

// ===== RGBA packing =====

#[test]
fn pack_unpack_extremes() {
    let px = pack_color_8888([1.0, 0.0, 1.0]);
    assert_eq!(px, Rgba8::new(255, 0, 255, 255));
    assert_eq!(unpack_color_8888(px), [1.0, 0.0, 1.0, 1.0]);
}

#[test]
fn pack_rounds_half_up() {
    // 0.5/255 sits exactly on the rounding boundary.
    assert_eq!(pack_color_8888([0.5 / 255.0, 0.0, 0.0]).r, 1);
    assert_eq!(pack_color_8888([0.49 / 255.0, 0.0, 0.0]).r, 0);
}

#[test]
fn rgba_bytes_skip_stride_padding() {
    let mut img: Image<Rgba8> = Image::new_with_stride(2, 1, 3);
    img.set(0, 0, Rgba8::new(1, 2, 3, 4));
    img.set(1, 0, Rgba8::new(5, 6, 7, 8));
    assert_eq!(to_rgba_bytes(&img), vec![1, 2, 3, 4, 5, 6, 7, 8]);
}
