// harness.rs — Dispatch validation kernels and the self-test suite.
//
// COORDINATE TEST
// ───────────────
// Three passes over an `i32` grid of `dim_x × dim_y`:
//
//   fill     every cell ← fill_value
//   offset   cells inside the launch window ← input + x + dim_x·y
//            (each invocation also checks that the dims it was handed
//            match the expected grid, flagging a failure otherwise)
//   verify   host re-reads the grid: inside the window the formula must
//            hold, outside it the fill value must still be there
//
// Any mismatch sets a shared `FailureFlag`; the outcome is reported to the
// host as one of two sentinel messages (`TestMessage::{Passed, Failed}`).
//
// SUITE
// ─────
// `TestSuite` runs a list of `UnitTest`s in order. Each test compares a
// kernel result against a straightforward sequential reference and reports
// a `TestMessage`; the suite passes iff every test does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use tracing::{debug, info, warn};

use crate::bayer::CfaPattern;
use crate::config::HarnessConfig;
use crate::dispatch::{launch_2d, launch_2d_with_input, KernelContext, LaunchOptions, LaunchWindow};
use crate::error::Result;
use crate::image::Image;
use crate::raw::{RawConverter, RawParams};
use crate::reduce::{average_triples, find_min_max};

// ---------------------------------------------------------------------------
// Host messages
// ---------------------------------------------------------------------------

/// Sentinel messages a test sends back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TestMessage {
    Passed = 100,
    Failed = 101,
}

impl TestMessage {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            100 => Some(TestMessage::Passed),
            101 => Some(TestMessage::Failed),
            _ => None,
        }
    }

    pub fn from_passed(passed: bool) -> Self {
        if passed {
            TestMessage::Passed
        } else {
            TestMessage::Failed
        }
    }

    pub fn is_passed(self) -> bool {
        self == TestMessage::Passed
    }
}

/// Where test results go.
pub trait HostChannel {
    fn send_message(&mut self, msg: TestMessage);
}

impl HostChannel for Sender<TestMessage> {
    fn send_message(&mut self, msg: TestMessage) {
        if self.send(msg).is_err() {
            warn!(code = msg.code(), "host receiver dropped; message lost");
        }
    }
}

impl HostChannel for Vec<TestMessage> {
    fn send_message(&mut self, msg: TestMessage) {
        self.push(msg);
    }
}

// ---------------------------------------------------------------------------
// Failure flag
// ---------------------------------------------------------------------------

/// Set once by any invocation that sees a mismatch. Never cleared.
#[derive(Debug, Default)]
pub struct FailureFlag(AtomicBool);

impl FailureFlag {
    pub fn new() -> Self {
        FailureFlag(AtomicBool::new(false))
    }

    #[inline]
    pub fn fail(&self) {
        // Only "any failure" is observed; no ordering with other memory.
        self.0.store(true, Ordering::Relaxed);
    }

    /// Record a failure if `cond` is false. Returns `cond`.
    #[inline]
    pub fn check(&self, cond: bool) -> bool {
        if !cond {
            self.fail();
        }
        cond
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// Coordinate kernel body: `input + x + dim_x·y`, flagging a failure if the
/// launch dims disagree with `expected`.
#[inline]
pub fn offset_kernel(input: i32, ctx: KernelContext, expected: (usize, usize), flag: &FailureFlag) -> i32 {
    flag.check(ctx.dim_x == expected.0 && ctx.dim_y == expected.1);
    // i32 index arithmetic, as on the GPU: grids past 2^31 cells wrap.
    input.wrapping_add(ctx.linear_index() as i32)
}

/// Re-read `out` and check every cell. Returns the number of mismatches.
pub fn verify_output(
    out: &Image<i32>,
    input: &Image<i32>,
    window: &LaunchWindow,
    fill_value: i32,
    flag: &FailureFlag,
) -> usize {
    let dim_x = out.width();
    let mut mismatches = 0;
    for (x, y, v) in out.pixels() {
        let expected = if window.contains(x, y) {
            // Truncates like offset_kernel on grids past 2^31 cells.
            input.get(x, y).wrapping_add((x + dim_x * y) as i32)
        } else {
            fill_value
        };
        if !flag.check(v == expected) {
            if mismatches == 0 {
                warn!(x, y, got = v, expected, "coordinate mismatch");
            }
            mismatches += 1;
        }
    }
    mismatches
}

/// Deterministic synthetic input for the coordinate test.
pub fn synthetic_input(dim_x: usize, dim_y: usize, seed: u64) -> Image<i32> {
    let mut rng = XorShift64::new(seed);
    Image::from_fn(dim_x, dim_y, |_, _| (rng.next_u64() % 2001) as i32 - 1000)
}

/// Run fill → offset → verify on the CPU and report to `channel`.
pub fn run_coordinate_test<C: HostChannel + ?Sized>(cfg: &HarnessConfig, channel: &mut C) -> Result<TestMessage> {
    let opts = cfg.launch_options();
    let window = opts.resolve(cfg.dim_x, cfg.dim_y)?;
    let expected = (cfg.dim_x, cfg.dim_y);
    let flag = FailureFlag::new();

    let input = synthetic_input(cfg.dim_x, cfg.dim_y, cfg.input_seed);
    let mut out: Image<i32> = Image::new(cfg.dim_x, cfg.dim_y);
    let fill = cfg.fill_value;
    launch_2d(&mut out, &LaunchOptions::full(), |_| fill)?;
    launch_2d_with_input(&input, &mut out, &opts, |v, ctx| offset_kernel(v, ctx, expected, &flag))?;

    let mismatches = verify_output(&out, &input, &window, fill, &flag);
    debug!(dim_x = cfg.dim_x, dim_y = cfg.dim_y, ?window, mismatches, "coordinate test");

    let msg = TestMessage::from_passed(!flag.is_set());
    channel.send_message(msg);
    Ok(msg)
}

// ---------------------------------------------------------------------------
// Suite
// ---------------------------------------------------------------------------

/// One named self-test.
pub trait UnitTest {
    fn name(&self) -> &str;
    fn run(&self) -> Result<TestMessage>;
}

/// Outcome of one test in a suite run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub name: String,
    pub message: TestMessage,
}

/// Ordered collection of `UnitTest`s.
#[derive(Default)]
pub struct TestSuite {
    tests: Vec<Box<dyn UnitTest>>,
}

impl TestSuite {
    pub fn new() -> Self {
        TestSuite { tests: Vec::new() }
    }

    /// The built-in cases, parameterised by `cfg`.
    pub fn standard(cfg: &HarnessConfig) -> Self {
        let mut suite = TestSuite::new();
        let full = HarnessConfig { x_start: 0, x_end: None, y_start: 0, y_end: None, ..cfg.clone() };
        suite.add(CoordinateCase { name: "coordinates", cfg: full });
        let bounded = if cfg.is_bounded() {
            cfg.clone()
        } else {
            // Inner window one cell in from each edge (when the grid allows).
            let x0 = cfg.dim_x.min(1);
            let y0 = cfg.dim_y.min(1);
            HarnessConfig {
                x_start: x0,
                x_end: Some(cfg.dim_x.saturating_sub(1).max(x0)),
                y_start: y0,
                y_end: Some(cfg.dim_y.saturating_sub(1).max(y0)),
                ..cfg.clone()
            }
        };
        suite.add(CoordinateCase { name: "bounded coordinates", cfg: bounded });
        suite.add(ReducerCase { len: cfg.reduce_len, seed: cfg.input_seed });
        suite.add(MinMaxCase { len: cfg.reduce_len, seed: cfg.input_seed });
        suite.add(RawUniformCase);
        suite
    }

    pub fn add<T: UnitTest + 'static>(&mut self, test: T) {
        self.tests.push(Box::new(test));
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Run every test in order, forwarding each result to `channel`.
    ///
    /// A test that returns an error counts as failed.
    pub fn run<C: HostChannel + ?Sized>(&self, channel: &mut C) -> SuiteReport {
        let mut outcomes = Vec::with_capacity(self.tests.len());
        for test in &self.tests {
            let message = match test.run() {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(test = test.name(), error = %e, "test errored");
                    TestMessage::Failed
                }
            };
            if message.is_passed() {
                info!(test = test.name(), "PASSED");
            } else {
                warn!(test = test.name(), "FAILED");
            }
            channel.send_message(message);
            outcomes.push(TestOutcome { name: test.name().to_string(), message });
        }
        SuiteReport { outcomes }
    }
}

/// Per-test results of a suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<TestOutcome>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.message.is_passed())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|o| !o.message.is_passed())
    }

    pub fn summary(&self) -> TestMessage {
        TestMessage::from_passed(self.passed())
    }
}

// ---------------------------------------------------------------------------
// Built-in cases
// ---------------------------------------------------------------------------

struct CoordinateCase {
    name: &'static str,
    cfg: HarnessConfig,
}

impl UnitTest for CoordinateCase {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self) -> Result<TestMessage> {
        let mut sink = Vec::new();
        run_coordinate_test(&self.cfg, &mut sink)
    }
}

/// Parallel row-average against a sequential f64 running sum.
struct ReducerCase {
    len: usize,
    seed: u64,
}

impl UnitTest for ReducerCase {
    fn name(&self) -> &str {
        "reducer"
    }

    fn run(&self) -> Result<TestMessage> {
        let mut rng = XorShift64::new(self.seed);
        let pixels: Vec<[u8; 3]> = (0..self.len.max(1))
            .map(|_| {
                let v = rng.next_u64();
                [v as u8, (v >> 8) as u8, (v >> 16) as u8]
            })
            .collect();

        let mut sum = [0.0f64; 3];
        for p in &pixels {
            for c in 0..3 {
                sum[c] += p[c] as f64;
            }
        }
        let got = average_triples(&pixels)?;
        let ok = (0..3).all(|c| {
            let want = sum[c] / pixels.len() as f64;
            (got[c] as f64 - want).abs() <= 1e-2
        });
        if !ok {
            debug!(?got, ?sum, n = pixels.len(), "reducer mismatch");
        }
        Ok(TestMessage::from_passed(ok))
    }
}

/// Parallel min/max against a sequential scan.
struct MinMaxCase {
    len: usize,
    seed: u64,
}

impl UnitTest for MinMaxCase {
    fn name(&self) -> &str {
        "min/max reduction"
    }

    fn run(&self) -> Result<TestMessage> {
        let mut rng = XorShift64::new(self.seed ^ 0x9e37_79b9);
        let values: Vec<f32> = (0..self.len.max(1)).map(|_| (rng.next_u64() % 100_000) as f32 - 50_000.0).collect();

        let mut lo = (0, values[0]);
        let mut hi = (0, values[0]);
        for (i, &v) in values.iter().enumerate() {
            if v < lo.1 {
                lo = (i, v);
            }
            if v > hi.1 {
                hi = (i, v);
            }
        }
        let ok = match find_min_max(&values) {
            Some((min, max)) => (min.index, min.value) == lo && (max.index, max.value) == hi,
            None => false,
        };
        Ok(TestMessage::from_passed(ok))
    }
}

/// A flat mid-grey frame must come out as uniform neutral grey for every
/// CFA layout.
struct RawUniformCase;

impl UnitTest for RawUniformCase {
    fn name(&self) -> &str {
        "raw uniform field"
    }

    fn run(&self) -> Result<TestMessage> {
        let raw = Image::filled(16, 12, 512u16);
        let mut ok = true;
        let mut first = None;
        for cfa in CfaPattern::ALL {
            let params = RawParams { cfa, ..RawParams::default() };
            let out = RawConverter::new(params, None, raw.width(), raw.height())?.convert(&raw)?;
            let px0 = out.get(0, 0);
            let expected = *first.get_or_insert(px0);
            ok &= px0.r == px0.g && px0.g == px0.b && px0.a == 255;
            ok &= out.pixels().all(|(_, _, px)| px == expected);
        }
        Ok(TestMessage::from_passed(ok))
    }
}

// ---------------------------------------------------------------------------
// Seeded input
// ---------------------------------------------------------------------------

/// xorshift64; enough for reproducible synthetic inputs.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        XorShift64 { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }
}
