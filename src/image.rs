// image.rs — Runtime-sized image container, generic over element type.
//
// Every kernel in this crate reads or writes an `Image<T>`:
//
//   Image<u16>       RAW16 Bayer frame (one sample per photosite)
//   Image<[f32; 4]>  lens-shading gain map (R, G_even, G_odd, B)
//   Image<Rgba8>     packed 8-bit output of the RAW converter
//   Image<i32>       harness input/output buffers
//   Image<[u8; 3]>   interleaved YUV rows for the reducer
//
// Two traits split the requirements:
//   Element: anything storable (Copy + Default + Send + Sync). Vector
//            elements like [f32; 4] and Rgba8 only need this.
//   Pixel:   scalar elements that also convert to and from f32. The reducer
//            and the RAW linearization step work through this.

use std::fmt;

use bytemuck::{Pod, Zeroable};

// ---------------------------------------------------------------------------
// Element / Pixel traits
// ---------------------------------------------------------------------------

/// Trait for types that can be stored in an [`Image`].
///
/// `Send + Sync` lets the dispatcher hand disjoint rows to rayon workers.
pub trait Element: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> Element for T {}

/// Scalar pixel types with a raw (non-normalized) f32 conversion.
pub trait Pixel: Element + PartialOrd {
    /// Convert this pixel value to f32. Raw cast, not normalized.
    fn to_f32(self) -> f32;

    /// Construct a pixel from an f32 value (with appropriate clamping/rounding).
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for u16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 65535.0).round() as u16
    }
}

impl Pixel for i32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.round() as i32
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Rgba8
// ---------------------------------------------------------------------------

/// An 8-bit-per-channel RGBA pixel, laid out `r, g, b, a` in memory.
///
/// `#[repr(C)]` + `Pod` let an `Image<Rgba8>` be viewed as raw bytes for PNG
/// encoding and for comparison against `Rgba8Unorm` GPU readbacks.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Rgba8 { r, g, b, a }
    }

    /// Pack as `0xAARRGGBB`.
    #[inline]
    pub fn to_argb(self) -> u32 {
        (self.a as u32) << 24 | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// Largest per-channel absolute difference. Used when comparing GPU
    /// output against the CPU reference.
    pub fn max_channel_diff(self, other: Rgba8) -> u8 {
        self.r
            .abs_diff(other.r)
            .max(self.g.abs_diff(other.g))
            .max(self.b.abs_diff(other.b))
            .max(self.a.abs_diff(other.a))
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------
// Row-major, contiguous buffer with explicit stride.
//
// Memory layout (stride = 5, width = 4):
//
//   data index:  0  1  2  3 [4]  5  6  7  8 [9] 10 11 12 13 [14]
//   pixel:       ■  ■  ■  ■  ·   ■  ■  ■  ■  ·   ■  ■  ■  ■  ·
//   row:         |--- row 0 ---|  |--- row 1 ---|  |--- row 2 ---|
//
// RAW16 frames from camera HALs routinely arrive with a row stride larger
// than the active width, so the converter must honour it.

/// A 2D image with runtime dimensions, generic over element type `T`.
pub struct Image<T: Element> {
    /// Element data in row-major order. Length = height * stride.
    data: Vec<T>,
    width: usize,
    height: usize,
    /// Row stride in *elements* (not bytes). stride >= width.
    stride: usize,
}

impl<T: Element> Clone for Image<T> {
    fn clone(&self) -> Self {
        Image {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }
}

impl<T: Element> Image<T> {
    /// Create a default-initialized image. Stride equals width.
    pub fn new(width: usize, height: usize) -> Self {
        Self::new_with_stride(width, height, width)
    }

    /// Create an image with every element set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Image {
            data: vec![value; width * height],
            width,
            height,
            stride: width,
        }
    }

    /// Create a default-initialized image with an explicit stride.
    ///
    /// # Panics
    /// Panics if `stride < width`.
    pub fn new_with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(
            stride >= width,
            "stride ({stride}) must be >= width ({width})"
        );
        Image {
            data: vec![T::default(); height * stride],
            width,
            height,
            stride,
        }
    }

    /// Create an image from an existing vector with no row padding.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image {
            data,
            width,
            height,
            stride: width,
        }
    }

    /// Create an image from raw data with explicit stride.
    ///
    /// # Panics
    /// Panics if `data.len() != height * stride` or `stride < width`.
    pub fn from_vec_with_stride(
        width: usize,
        height: usize,
        stride: usize,
        data: Vec<T>,
    ) -> Self {
        assert!(stride >= width, "stride ({stride}) must be >= width ({width})");
        assert_eq!(
            data.len(),
            height * stride,
            "data length ({}) must equal height * stride ({})",
            data.len(),
            height * stride,
        );
        Image {
            data,
            width,
            height,
            stride,
        }
    }

    /// Build an image by evaluating `f(x, y)` at every position.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image::from_vec(width, height, data)
    }

    // --- Accessors ---

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get the element at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.stride + x]
    }

    /// Get an element without bounds checking.
    ///
    /// # Safety
    /// Caller must guarantee x < width and y < height.
    #[inline(always)]
    pub unsafe fn get_unchecked(&self, x: usize, y: usize) -> T {
        debug_assert!(x < self.width && y < self.height,
            "get_unchecked({x},{y}) out of bounds for {}x{}", self.width, self.height);
        *self.data.get_unchecked(y * self.stride + x)
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        self.bounds_check(x, y);
        let idx = y * self.stride + x;
        &mut self.data[idx]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        *self.get_mut(x, y) = value;
    }

    /// Borrow a single row (active pixels only, no stride padding).
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Iterate over all elements as `(x, y, value)` tuples, skipping padding.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width).map(move |x| (x, y, self.data[y * self.stride + x]))
        })
    }

    /// Flat view of the underlying buffer, stride padding included.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Copy the active pixels into a new image with `stride == width`.
    pub fn to_compact(&self) -> Image<T> {
        if self.stride == self.width {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            data.extend_from_slice(self.row(y));
        }
        Image::from_vec(self.width, self.height, data)
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

impl<T: Element + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Image<{}> {{ {}×{}, stride={} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
            self.stride,
        )?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(16) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.get(x, y))?;
            }
            if self.width > 16 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

impl<T: Element> std::ops::Index<(usize, usize)> for Image<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        self.bounds_check(x, y);
        &self.data[y * self.stride + x]
    }
}

impl<T: Element> std::ops::IndexMut<(usize, usize)> for Image<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        self.bounds_check(x, y);
        let idx = y * self.stride + x;
        &mut self.data[idx]
    }
}
