// rawpipe — command-line front end.
//
//   rawpipe convert  --input frame.raw --width W --height H --output out.png
//   rawpipe selftest [--config harness.toml]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use rawpipe::config::{load_harness_config, load_raw_config, HarnessConfig, RawConfig};
use rawpipe::convert::to_rgba_bytes;
use rawpipe::harness::{TestMessage, TestSuite};
use rawpipe::logger;
use rawpipe::raw::{frame_from_le_bytes, RawConverter};
use rawpipe::{Image, Rgba8};

#[derive(Parser)]
#[command(name = "rawpipe")]
#[command(about = "Bayer RAW conversion and kernel self-tests")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a little-endian 16-bit Bayer frame to PNG
    Convert {
        /// Raw frame, `stride * height` little-endian u16 samples
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        width: usize,

        #[arg(long)]
        height: usize,

        /// Samples per row in the file (defaults to the width)
        #[arg(long)]
        stride: Option<usize>,

        /// RAW conversion config (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        /// Run the conversion on the GPU
        #[cfg(feature = "gpu")]
        #[arg(long)]
        gpu: bool,
    },

    /// Run the built-in kernel self-tests
    Selftest {
        /// Harness config (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also run the coordinate test on the GPU
        #[cfg(feature = "gpu")]
        #[arg(long)]
        gpu: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init_cli_logger(cli.verbose);

    let result = match cli.command {
        Command::Convert {
            input,
            width,
            height,
            stride,
            config,
            output,
            #[cfg(feature = "gpu")]
            gpu,
        } => {
            let opts = ConvertArgs {
                input,
                width,
                height,
                stride: stride.unwrap_or(width),
                config,
                output,
                #[cfg(feature = "gpu")]
                gpu,
            };
            run_convert(&opts).map(|()| TestMessage::Passed)
        }
        Command::Selftest {
            config,
            #[cfg(feature = "gpu")]
            gpu,
        } => {
            #[cfg(not(feature = "gpu"))]
            let gpu = false;
            run_selftest(config.as_deref(), gpu)
        }
    };

    match result {
        Ok(TestMessage::Passed) => ExitCode::SUCCESS,
        Ok(TestMessage::Failed) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::from(2)
        }
    }
}

struct ConvertArgs {
    input: PathBuf,
    width: usize,
    height: usize,
    stride: usize,
    config: Option<PathBuf>,
    output: PathBuf,
    #[cfg(feature = "gpu")]
    gpu: bool,
}

fn run_convert(args: &ConvertArgs) -> anyhow::Result<()> {
    let cfg = match &args.config {
        Some(path) => load_raw_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => RawConfig::default(),
    };
    let params = cfg.to_params()?;
    let gain_map = cfg.to_gain_map()?;

    let bytes = std::fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let frame = frame_from_le_bytes(&bytes, args.width, args.height, args.stride)
        .with_context(|| format!("decoding {}", args.input.display()))?;
    let conv = RawConverter::new(params, gain_map, frame.width(), frame.height())?;
    info!(input = %args.input.display(), width = args.width, height = args.height, cfa = %conv.params().cfa, "converting");

    let out = convert_frame(args, &conv, &frame)?;
    write_png(&args.output, &out)?;
    info!(output = %args.output.display(), width = out.width(), height = out.height(), "wrote PNG");
    println!("✅ {}", args.output.display());
    Ok(())
}

#[cfg(feature = "gpu")]
fn convert_frame(args: &ConvertArgs, conv: &RawConverter, frame: &Image<u16>) -> anyhow::Result<Image<Rgba8>> {
    if args.gpu {
        let gpu = rawpipe::gpu::GpuDevice::new()?;
        let pipeline = rawpipe::gpu::GpuRawPipeline::new(&gpu);
        return Ok(pipeline.convert(&gpu, conv, frame)?);
    }
    Ok(conv.convert(frame)?)
}

#[cfg(not(feature = "gpu"))]
fn convert_frame(_args: &ConvertArgs, conv: &RawConverter, frame: &Image<u16>) -> anyhow::Result<Image<Rgba8>> {
    Ok(conv.convert(frame)?)
}

fn write_png(path: &Path, img: &Image<Rgba8>) -> anyhow::Result<()> {
    let (w, h) = (img.width() as u32, img.height() as u32);
    let Some(buf) = image::RgbaImage::from_raw(w, h, to_rgba_bytes(img)) else {
        bail!("output buffer does not match {w}x{h}");
    };
    buf.save(path).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn run_selftest(config: Option<&Path>, gpu: bool) -> anyhow::Result<TestMessage> {
    let cfg = match config {
        Some(path) => load_harness_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    info!(dim_x = cfg.dim_x, dim_y = cfg.dim_y, bounded = cfg.is_bounded(), "running self-tests");

    let suite = TestSuite::standard(&cfg);
    let (mut tx, rx) = mpsc::channel::<TestMessage>();
    let report = suite.run(&mut tx);
    let gpu_message = if gpu { Some(run_gpu_selftest(&cfg, &mut tx)?) } else { None };
    drop(tx);

    let codes: Vec<u32> = rx.iter().map(TestMessage::code).collect();
    info!(?codes, "host messages");

    for outcome in &report.outcomes {
        let mark = if outcome.message.is_passed() { "✅" } else { "❌" };
        println!("{mark} {}", outcome.name);
    }
    if let Some(msg) = gpu_message {
        let mark = if msg.is_passed() { "✅" } else { "❌" };
        println!("{mark} gpu coordinates");
    }

    let passed = report.passed() && gpu_message.map_or(true, TestMessage::is_passed);
    Ok(TestMessage::from_passed(passed))
}

#[cfg(feature = "gpu")]
fn run_gpu_selftest(cfg: &HarnessConfig, tx: &mut mpsc::Sender<TestMessage>) -> anyhow::Result<TestMessage> {
    let gpu = rawpipe::gpu::GpuDevice::new()?;
    let pipeline = rawpipe::gpu::GpuCoordinatePipeline::new(&gpu);
    let report = pipeline.run(&gpu, cfg, tx)?;
    Ok(report.message)
}

#[cfg(not(feature = "gpu"))]
fn run_gpu_selftest(_cfg: &HarnessConfig, _tx: &mut mpsc::Sender<TestMessage>) -> anyhow::Result<TestMessage> {
    bail!("built without the `gpu` feature")
}
