// demos/gpu_raw.rs — CPU vs GPU RAW conversion, side by side.
//
// Converts a Bayer frame with both pipelines and writes one PNG with the
// CPU result on top and the GPU result below:
//
//   ┌────────────────┐
//   │  CPU           │
//   ├────────────────┤
//   │  GPU           │
//   └────────────────┘
//
// Per-channel disagreement is printed to stdout.
//
// USAGE
// ─────
//   cargo run --features gpu --example gpu_raw                 # synthetic frame
//   cargo run --features gpu --example gpu_raw -- frame.raw 4032 3024 [raw.toml]
//                                                              # LE u16 samples

use rawpipe::config::{load_raw_config, RawConfig};
use rawpipe::convert::to_rgba_bytes;
use rawpipe::gpu::{GpuDevice, GpuRawPipeline};
use rawpipe::raw::{frame_from_le_bytes, RawConverter};
use rawpipe::{Image, Rgba8};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let (raw, cfg) = match (args.get(1), args.get(2), args.get(3)) {
        (Some(path), Some(w), Some(h)) => {
            let w: usize = w.parse().expect("width must be an integer");
            let h: usize = h.parse().expect("height must be an integer");
            let bytes = std::fs::read(path).expect("failed to read raw frame");
            let raw = frame_from_le_bytes(&bytes, w, h, w).expect("frame size does not match file");
            let cfg = args
                .get(4)
                .map(|p| load_raw_config(p).expect("failed to load config"))
                .unwrap_or_default();
            (raw, cfg)
        }
        _ => {
            eprintln!("[gpu_raw] no frame given, using a synthetic colour chart");
            (colour_chart(640, 480), RawConfig::default())
        }
    };

    let params = cfg.to_params().expect("invalid RAW parameters");
    let gain_map = cfg.to_gain_map().expect("invalid gain map");
    let conv = RawConverter::new(params, gain_map, raw.width(), raw.height()).expect("invalid frame");
    eprintln!("[gpu_raw] frame {}×{}, {}", raw.width(), raw.height(), conv.params().cfa);

    let cpu = conv.convert(&raw).expect("CPU conversion failed");

    let gpu = GpuDevice::new().expect("failed to initialise a Vulkan GPU");
    eprintln!("[gpu_raw] GPU: {}", gpu.adapter_info);
    let pipeline = GpuRawPipeline::new(&gpu);
    let out = pipeline.convert(&gpu, &conv, &raw).expect("GPU conversion failed");

    let mut histogram = [0usize; 256];
    for (x, y, px) in cpu.pixels() {
        histogram[px.max_channel_diff(out.get(x, y)) as usize] += 1;
    }
    for (diff, count) in histogram.iter().enumerate().filter(|(_, n)| **n > 0) {
        println!("max channel diff {diff:3}: {count} px");
    }

    let stacked = stack(&cpu, &out);
    let (w, h) = (stacked.width() as u32, stacked.height() as u32);
    let png = image::RgbaImage::from_raw(w, h, to_rgba_bytes(&stacked)).expect("buffer size");
    png.save("gpu_raw.png").expect("failed to write gpu_raw.png");
    eprintln!("[gpu_raw] wrote gpu_raw.png");
}

/// RGGB mosaic of six flat colour patches on a grey ramp.
fn colour_chart(w: usize, h: usize) -> Image<u16> {
    const PATCHES: [[u16; 3]; 6] = [
        [900, 200, 150],
        [200, 800, 200],
        [150, 250, 900],
        [850, 850, 200],
        [500, 500, 500],
        [120, 120, 120],
    ];
    Image::from_fn(w, h, |x, y| {
        let patch = (x * 3 / w) + 3 * (y * 2 / h);
        let rgb = if (x % (w / 3)) > 8 && (y % (h / 2)) > 8 {
            PATCHES[patch]
        } else {
            let g = 64 + (x * 900 / w) as u16;
            [g, g, g]
        };
        match (x & 1, y & 1) {
            (0, 0) => rgb[0],
            (1, 1) => rgb[2],
            _ => rgb[1],
        }
    })
}

fn stack(top: &Image<Rgba8>, bottom: &Image<Rgba8>) -> Image<Rgba8> {
    let (w, h) = (top.width(), top.height());
    Image::from_fn(w, h * 2, |x, y| if y < h { top.get(x, y) } else { bottom.get(x, y - h) })
}
