// gpu/image.rs — Texture upload and readback.
//
// STRIDE COMPACTION
// ─────────────────
// A CPU `Image<T>` may carry stride padding, and wgpu wants buffer→texture
// copies with `bytes_per_row` a multiple of 256. Every upload therefore goes
// through a staging buffer whose rows hold the active pixels packed at the
// front and zero padding up to the aligned row length:
//
//   CPU   (stride 5, width 3)      staging (aligned row = 256 bytes)
//   [a b c _ _]                    [a b c 0 0 … 0]
//   [d e f _ _]                    [d e f 0 0 … 0]
//
// Readback reverses it: copy texture → MAP_READ buffer, wait, strip padding.

use bytemuck::Pod;
use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::image::{Element, Image, Rgba8};

const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Pack the active pixels of `src` into 256-byte-aligned rows.
pub(crate) fn staging_rows<T: Element + Pod>(src: &Image<T>) -> (Vec<u8>, u32) {
    let texel = std::mem::size_of::<T>() as u32;
    let row_bytes = src.width() as u32 * texel;
    let aligned = align_to(row_bytes, COPY_ALIGNMENT);
    let mut staging = vec![0u8; aligned as usize * src.height()];
    for y in 0..src.height() {
        let dst = y * aligned as usize;
        staging[dst..dst + row_bytes as usize].copy_from_slice(bytemuck::cast_slice(src.row(y)));
    }
    (staging, aligned)
}

/// A 2D texture plus its default view.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

impl GpuTexture {
    /// Allocate an uninitialised texture.
    pub fn new(
        gpu: &GpuDevice,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        label: &str,
    ) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture { texture, view, width, height, format }
    }

    /// Upload `src` into a new texture of `format`. The texel size of
    /// `format` must equal `size_of::<T>()`.
    pub fn upload<T: Element + Pod>(
        gpu: &GpuDevice,
        src: &Image<T>,
        format: wgpu::TextureFormat,
        label: &str,
    ) -> Self {
        debug_assert_eq!(format.block_copy_size(None), Some(std::mem::size_of::<T>() as u32));
        let (width, height) = (src.width() as u32, src.height() as u32);
        let tex = GpuTexture::new(
            gpu,
            width,
            height,
            format,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
            label,
        );

        let (staging, aligned) = staging_rows(src);
        let staging_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("staging"),
            contents: &staging,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned),
                    rows_per_image: Some(height),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));
        tex
    }

    /// Read an `Rgba8Unorm` texture back as a compact `Image<Rgba8>`.
    /// Blocks until the copy completes.
    pub fn readback_rgba8(&self, gpu: &GpuDevice) -> Result<Image<Rgba8>, GpuError> {
        let aligned = align_to(self.width * 4, COPY_ALIGNMENT);
        let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: aligned as u64 * self.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let bytes = map_and_copy(gpu, &readback_buf)?;
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = Vec::with_capacity(w * h);
        for y in 0..h {
            let start = y * aligned as usize;
            pixels.extend_from_slice(bytemuck::cast_slice::<u8, Rgba8>(&bytes[start..start + w * 4]));
        }
        Ok(Image::from_vec(w, h, pixels))
    }
}

/// Copy `len` elements of a storage buffer back to the CPU.
pub fn read_buffer<T: Pod>(gpu: &GpuDevice, src: &wgpu::Buffer, len: usize) -> Result<Vec<T>, GpuError> {
    let size = (len * std::mem::size_of::<T>()) as u64;
    let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("buffer readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("buffer readback") });
    encoder.copy_buffer_to_buffer(src, 0, &readback_buf, 0, size);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let bytes = map_and_copy(gpu, &readback_buf)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

/// Map a MAP_READ buffer, wait for the GPU, and copy its bytes out.
fn map_and_copy(gpu: &GpuDevice, buf: &wgpu::Buffer) -> Result<Vec<u8>, GpuError> {
    let slice = buf.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    receiver.recv().map_err(|_| GpuError::ReadbackLost)??;

    let bytes = slice.get_mapped_range().to_vec();
    buf.unmap();
    Ok(bytes)
}
