// dispatch.rs — Per-coordinate kernel launches on the CPU.
//
// A kernel here is a closure invoked once per output cell with a
// `KernelContext` describing where it is and how large the launch is. This
// is the CPU counterpart of a GPU compute dispatch: the closure must only
// depend on its context and read-only captures, so rows can run on any
// thread in any order.
//
// Rows are the unit of parallelism (rayon `par_chunks_mut` over the stride).
// Within a row, cells run sequentially.
//
// BOUNDED LAUNCHES
// ────────────────
// `LaunchOptions` restricts a launch to `[x_start, x_end) × [y_start, y_end)`.
// Cells outside the window are not visited and keep whatever the output
// held before. `dim_x`/`dim_y` in the context stay the full image size.

use rayon::prelude::*;
use tracing::debug;

use crate::error::{KernelError, Result};
use crate::image::{Element, Image};

/// Per-invocation coordinates and launch dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelContext {
    pub x: usize,
    pub y: usize,
    pub dim_x: usize,
    pub dim_y: usize,
}

impl KernelContext {
    /// Linear index `x + dim_x * y`.
    #[inline]
    pub fn linear_index(&self) -> usize {
        self.x + self.dim_x * self.y
    }
}

/// Optional launch window. `None` ends mean "to the edge".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub x_start: usize,
    pub x_end: Option<usize>,
    pub y_start: usize,
    pub y_end: Option<usize>,
}

impl LaunchOptions {
    /// Launch over the whole output.
    pub fn full() -> Self {
        LaunchOptions::default()
    }

    pub fn with_x(mut self, start: usize, end: usize) -> Self {
        self.x_start = start;
        self.x_end = Some(end);
        self
    }

    pub fn with_y(mut self, start: usize, end: usize) -> Self {
        self.y_start = start;
        self.y_end = Some(end);
        self
    }

    /// Resolve against the launch dimensions into concrete half-open ranges.
    ///
    /// # Errors
    /// `LaunchOutOfBounds` if an end exceeds the dimension or a start
    /// exceeds its end.
    pub fn resolve(&self, dim_x: usize, dim_y: usize) -> Result<LaunchWindow> {
        let x_end = self.x_end.unwrap_or(dim_x);
        let y_end = self.y_end.unwrap_or(dim_y);
        if x_end > dim_x || y_end > dim_y || self.x_start > x_end || self.y_start > y_end {
            return Err(KernelError::LaunchOutOfBounds {
                x_start: self.x_start,
                x_end,
                y_start: self.y_start,
                y_end,
                dim_x,
                dim_y,
            });
        }
        Ok(LaunchWindow { x_start: self.x_start, x_end, y_start: self.y_start, y_end })
    }
}

/// Concrete half-open launch window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchWindow {
    pub x_start: usize,
    pub x_end: usize,
    pub y_start: usize,
    pub y_end: usize,
}

impl LaunchWindow {
    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x_start && x < self.x_end && y >= self.y_start && y < self.y_end
    }

    pub fn width(&self) -> usize {
        self.x_end - self.x_start
    }

    pub fn height(&self) -> usize {
        self.y_end - self.y_start
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Run `kernel` once per cell of `out` inside `opts`, storing its result.
pub fn launch_2d<T, F>(out: &mut Image<T>, opts: &LaunchOptions, kernel: F) -> Result<()>
where
    T: Element,
    F: Fn(KernelContext) -> T + Sync,
{
    let (dim_x, dim_y) = (out.width(), out.height());
    let window = opts.resolve(dim_x, dim_y)?;
    debug!(dim_x, dim_y, ?window, "launch_2d");
    if out.is_empty() {
        return Ok(());
    }

    let stride = out.stride();
    out.as_mut_slice()
        .par_chunks_mut(stride)
        .enumerate()
        .filter(|(y, _)| *y >= window.y_start && *y < window.y_end)
        .for_each(|(y, row)| {
            for x in window.x_start..window.x_end {
                row[x] = kernel(KernelContext { x, y, dim_x, dim_y });
            }
        });
    Ok(())
}

/// Like [`launch_2d`], but each invocation also receives the input cell at
/// its own coordinate.
///
/// # Errors
/// `InvalidDimensions` if `input` and `out` differ in size.
pub fn launch_2d_with_input<I, O, F>(
    input: &Image<I>,
    out: &mut Image<O>,
    opts: &LaunchOptions,
    kernel: F,
) -> Result<()>
where
    I: Element,
    O: Element,
    F: Fn(I, KernelContext) -> O + Sync,
{
    if input.width() != out.width() || input.height() != out.height() {
        return Err(KernelError::InvalidDimensions {
            width: input.width(),
            height: input.height(),
            reason: "input and output dimensions differ",
        });
    }
    launch_2d(out, opts, |ctx| {
        // SAFETY: ctx.x < dim_x and ctx.y < dim_y, equal to input's size.
        let v = unsafe { input.get_unchecked(ctx.x, ctx.y) };
        kernel(v, ctx)
    })
}

/// One invocation per element of a 1D buffer (`dim_y == 1`).
pub fn launch_1d<T, F>(out: &mut [T], kernel: F)
where
    T: Element,
    F: Fn(KernelContext) -> T + Sync,
{
    let dim_x = out.len();
    debug!(dim_x, "launch_1d");
    out.par_iter_mut().enumerate().for_each(|(x, cell)| {
        *cell = kernel(KernelContext { x, y: 0, dim_x, dim_y: 1 });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_2d_covers_every_cell() {
        let mut out: Image<i32> = Image::new(7, 5);
        launch_2d(&mut out, &LaunchOptions::full(), |ctx| ctx.linear_index() as i32).unwrap();
        for (x, y, v) in out.pixels() {
            assert_eq!(v, (x + 7 * y) as i32);
        }
    }

    #[test]
    fn test_launch_2d_reports_full_dims() {
        let mut out: Image<u8> = Image::new(6, 4);
        let opts = LaunchOptions::full().with_x(1, 3).with_y(2, 4);
        launch_2d(&mut out, &opts, |ctx| (ctx.dim_x == 6 && ctx.dim_y == 4) as u8).unwrap();
        for (x, y, v) in out.pixels() {
            let inside = (1..3).contains(&x) && (2..4).contains(&y);
            assert_eq!(v, inside as u8, "({x},{y})");
        }
    }

    #[test]
    fn test_launch_2d_respects_stride() {
        let mut out: Image<i32> = Image::new_with_stride(3, 2, 5);
        launch_2d(&mut out, &LaunchOptions::full(), |_| 9).unwrap();
        // Padding cells untouched.
        assert_eq!(out.as_slice(), &[9, 9, 9, 0, 0, 9, 9, 9, 0, 0]);
    }

    #[test]
    fn test_launch_out_of_bounds_is_error() {
        let mut out: Image<i32> = Image::new(4, 4);
        let opts = LaunchOptions::full().with_x(0, 5);
        assert!(matches!(
            launch_2d(&mut out, &opts, |_| 0),
            Err(KernelError::LaunchOutOfBounds { x_end: 5, dim_x: 4, .. })
        ));
        let inverted = LaunchOptions::full().with_y(3, 1);
        assert!(launch_2d(&mut out, &inverted, |_| 0).is_err());
    }

    #[test]
    fn test_window_extent() {
        let window = LaunchOptions::full().with_x(2, 5).resolve(8, 3).unwrap();
        assert_eq!((window.width(), window.height()), (3, 3));
        assert!(!window.is_empty());
        assert!(LaunchOptions::full().with_y(1, 1).resolve(8, 3).unwrap().is_empty());
    }

    #[test]
    fn test_launch_empty_image() {
        let mut out: Image<i32> = Image::new(0, 0);
        launch_2d(&mut out, &LaunchOptions::full(), |_| 1).unwrap();
    }

    #[test]
    fn test_launch_with_input_dimension_check() {
        let input: Image<i32> = Image::new(3, 3);
        let mut out: Image<i32> = Image::new(3, 2);
        assert!(launch_2d_with_input(&input, &mut out, &LaunchOptions::full(), |v, _| v).is_err());
    }

    #[test]
    fn test_launch_1d() {
        let mut buf = vec![0usize; 10];
        launch_1d(&mut buf, |ctx| ctx.x * 2 + ctx.y + ctx.dim_y);
        assert_eq!(buf, (0..10).map(|x| x * 2 + 1).collect::<Vec<_>>());
    }
}
