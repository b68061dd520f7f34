// reduce.rs — General reductions and the row-average reducer.
//
// A reduction is described by four operations:
//
//   init        fresh accumulator
//   accumulate  fold one input element into an accumulator
//   combine     merge two partial accumulators
//   finish      turn the final accumulator (and element count) into a result
//
// `reduce` splits the input into fixed-size chunks, folds each chunk on a
// rayon worker and combines the partials. Chunk boundaries are independent
// of the thread count, so results are reproducible run to run.
//
// The YUV row average is `TripleMean`: a running f32 sum per channel, scaled
// by 1/N at the end (a multiply, not three divides).

use rayon::prelude::*;
use tracing::debug;

use crate::error::{KernelError, Result};
use crate::image::{Image, Pixel, Rgba8};

/// Number of elements folded sequentially before partials are combined.
pub const REDUCE_CHUNK: usize = 4096;

/// Accumulator / combiner / out-converter description of a reduction.
pub trait Reduction: Sync {
    type Input: Sync;
    type Accum: Send;
    type Output;

    fn init(&self) -> Self::Accum;
    fn accumulate(&self, acc: &mut Self::Accum, item: &Self::Input);
    fn combine(&self, acc: &mut Self::Accum, other: Self::Accum);
    fn finish(&self, acc: Self::Accum, count: usize) -> Self::Output;
}

/// Run a reduction over `input`, chunked across rayon workers.
pub fn reduce<R: Reduction>(input: &[R::Input], reduction: &R) -> R::Output {
    debug!(len = input.len(), chunks = input.len().div_ceil(REDUCE_CHUNK), "reduce");
    let acc = input
        .par_chunks(REDUCE_CHUNK)
        .map(|chunk| {
            let mut acc = reduction.init();
            for item in chunk {
                reduction.accumulate(&mut acc, item);
            }
            acc
        })
        .reduce(
            || reduction.init(),
            |mut a, b| {
                reduction.combine(&mut a, b);
                a
            },
        );
    reduction.finish(acc, input.len())
}

// ---------------------------------------------------------------------------
// Channel triples
// ---------------------------------------------------------------------------

/// Elements that carry at least three channels; only the first three take
/// part in the average (a fourth alpha/padding channel is ignored).
pub trait ChannelTriple: Copy + Send + Sync {
    fn triple(&self) -> [f32; 3];
}

impl<T: Pixel> ChannelTriple for [T; 3] {
    #[inline]
    fn triple(&self) -> [f32; 3] {
        [self[0].to_f32(), self[1].to_f32(), self[2].to_f32()]
    }
}

impl<T: Pixel> ChannelTriple for [T; 4] {
    #[inline]
    fn triple(&self) -> [f32; 3] {
        [self[0].to_f32(), self[1].to_f32(), self[2].to_f32()]
    }
}

impl ChannelTriple for Rgba8 {
    #[inline]
    fn triple(&self) -> [f32; 3] {
        [self.r as f32, self.g as f32, self.b as f32]
    }
}

// ---------------------------------------------------------------------------
// TripleMean
// ---------------------------------------------------------------------------

/// Per-channel arithmetic mean of the first three channels.
pub struct TripleMean<P>(std::marker::PhantomData<fn() -> P>);

impl<P> TripleMean<P> {
    pub fn new() -> Self {
        TripleMean(std::marker::PhantomData)
    }
}

impl<P> Default for TripleMean<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ChannelTriple> Reduction for TripleMean<P> {
    type Input = P;
    type Accum = [f32; 3];
    type Output = [f32; 3];

    fn init(&self) -> [f32; 3] {
        [0.0; 3]
    }

    #[inline]
    fn accumulate(&self, acc: &mut [f32; 3], item: &P) {
        let t = item.triple();
        acc[0] += t[0];
        acc[1] += t[1];
        acc[2] += t[2];
    }

    fn combine(&self, acc: &mut [f32; 3], other: [f32; 3]) {
        acc[0] += other[0];
        acc[1] += other[1];
        acc[2] += other[2];
    }

    fn finish(&self, acc: [f32; 3], count: usize) -> [f32; 3] {
        let inv = 1.0 / count as f32;
        [acc[0] * inv, acc[1] * inv, acc[2] * inv]
    }
}

/// Mean of the first three channels over every element of `pixels`.
///
/// # Errors
/// `EmptyInput` if `pixels` is empty.
pub fn average_triples<P: ChannelTriple>(pixels: &[P]) -> Result<[f32; 3]> {
    if pixels.is_empty() {
        return Err(KernelError::EmptyInput);
    }
    Ok(reduce(pixels, &TripleMean::new()))
}

/// Mean over the first `n` elements of `pixels`.
///
/// # Errors
/// `EmptyInput` if `n == 0`; `LengthMismatch` if `n > pixels.len()`.
pub fn average_triples_n<P: ChannelTriple>(pixels: &[P], n: usize) -> Result<[f32; 3]> {
    if n == 0 {
        return Err(KernelError::EmptyInput);
    }
    if n > pixels.len() {
        return Err(KernelError::LengthMismatch { expected: n, actual: pixels.len() });
    }
    average_triples(&pixels[..n])
}

/// One average per image row, rows reduced in parallel.
///
/// Each row is reduced with a sequential running sum; this is the
/// one-invocation-per-row form of the reducer.
pub fn row_averages<P: ChannelTriple + crate::image::Element>(img: &Image<P>) -> Result<Vec<[f32; 3]>> {
    if img.width() == 0 {
        return Err(KernelError::EmptyInput);
    }
    let mean = TripleMean::<P>::new();
    Ok((0..img.height())
        .into_par_iter()
        .map(|y| {
            let mut acc = mean.init();
            for px in img.row(y) {
                mean.accumulate(&mut acc, px);
            }
            mean.finish(acc, img.width())
        })
        .collect())
}

// ---------------------------------------------------------------------------
// MinMax
// ---------------------------------------------------------------------------

/// Smallest and largest value, with their indices. NaNs are skipped.
pub struct MinMax;

/// Value and index of one extreme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extreme {
    pub value: f32,
    pub index: usize,
}

impl Reduction for MinMax {
    type Input = (usize, f32);
    type Accum = Option<(Extreme, Extreme)>;
    type Output = Option<(Extreme, Extreme)>;

    fn init(&self) -> Self::Accum {
        None
    }

    fn accumulate(&self, acc: &mut Self::Accum, &(index, value): &(usize, f32)) {
        if value.is_nan() {
            return;
        }
        let e = Extreme { value, index };
        *acc = Some(match *acc {
            None => (e, e),
            Some((lo, hi)) => (
                if value < lo.value { e } else { lo },
                if value > hi.value { e } else { hi },
            ),
        });
    }

    fn combine(&self, acc: &mut Self::Accum, other: Self::Accum) {
        *acc = match (*acc, other) {
            (None, o) => o,
            (a, None) => a,
            (Some((lo_a, hi_a)), Some((lo_b, hi_b))) => Some((
                // Ties keep the lower index so the result is order-independent.
                if lo_b.value < lo_a.value || (lo_b.value == lo_a.value && lo_b.index < lo_a.index) {
                    lo_b
                } else {
                    lo_a
                },
                if hi_b.value > hi_a.value || (hi_b.value == hi_a.value && hi_b.index < hi_a.index) {
                    hi_b
                } else {
                    hi_a
                },
            )),
        };
    }

    fn finish(&self, acc: Self::Accum, _count: usize) -> Self::Output {
        acc
    }
}

/// Convenience wrapper: min/max (value, index) of a float slice.
pub fn find_min_max(values: &[f32]) -> Option<(Extreme, Extreme)> {
    let indexed: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    reduce(&indexed, &MinMax)
}
