/*!
    YUV→RGB framebuffer generation and RGB→pixel-buffer read-back.
*/

use std::sync::Arc;

use tracing::warn;

use reel_types::{ImageOrientation, PixelFormat, Rotation, Size, Timestamp};

use crate::context::PipelineContext;
use crate::framebuffer::{Framebuffer, TimingStyle};
use crate::pixel_buffer::{PixelBuffer, PixelBufferPool};

/**
    Converts tapped or decoded YUV pixel buffers into framebuffers, and
    framebuffers back into writer-compatible pixel buffers.

    All conversion work runs on the context's image-processing queue;
    calls from any other thread block until the queue has produced the
    result.
*/
pub struct FramebufferGenerator {
    context: Arc<PipelineContext>,
}

impl FramebufferGenerator {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /**
        Color-convert a full-range BT.601 YUV buffer into an RGBA
        framebuffer, rotated so the result is portrait-oriented, stamped
        as a video frame at `at`.

        Returns `None` for pixel formats the converter does not handle.
    */
    pub fn generate_from_yuv(
        &self,
        buffer: &PixelBuffer,
        at: Timestamp,
        source_orientation: ImageOrientation,
    ) -> Option<Arc<Framebuffer>> {
        let format = buffer.format();
        if !format.is_planar() {
            warn!(?format, "framebuffer generator expects planar YUV input");
            return None;
        }

        let width = buffer.width();
        let height = buffer.height();
        let planes: Vec<Vec<u8>> = (0..buffer.plane_count())
            .map(|index| buffer.plane(index).to_vec())
            .collect();
        let pool = Arc::clone(self.context.framebuffer_pool());

        self.context.image_queue().run_sync(move || {
            let rgba = yuv_to_rgba(format, width, height, &planes);
            let rotation = source_orientation.rotation_needed(ImageOrientation::Portrait);
            let (rotated, out_size) = rotate_rgba(&rgba, Size::new(width, height), rotation);

            let framebuffer = pool.request(out_size, ImageOrientation::Portrait);
            framebuffer.set_timing_style(TimingStyle::VideoFrame(at));
            framebuffer.write_pixels(rotated);
            Some(framebuffer)
        })
    }

    /**
        Read a framebuffer back into a pool-allocated pixel buffer,
        swizzling into the pool's format. `None` when the pool is
        exhausted (back-pressure) or the geometry does not match.
    */
    pub fn render_into_pixel_buffer(
        &self,
        framebuffer: &Arc<Framebuffer>,
        pool: &Arc<PixelBufferPool>,
    ) -> Option<PixelBuffer> {
        let framebuffer = Arc::clone(framebuffer);
        let pool = Arc::clone(pool);

        self.context.image_queue().run_sync(move || {
            let size = framebuffer.size();
            if size.width != pool.width() || size.height != pool.height() {
                warn!(
                    fb_width = size.width,
                    fb_height = size.height,
                    pool_width = pool.width(),
                    pool_height = pool.height(),
                    "framebuffer read-back size mismatch"
                );
                return None;
            }
            let mut buffer = pool.try_acquire()?;
            let rgba = framebuffer.read_pixels();
            match buffer.format() {
                PixelFormat::Bgra => swizzle_rgba_to_bgra(&rgba, buffer.plane_mut(0)),
                PixelFormat::Rgba => buffer.plane_mut(0).copy_from_slice(&rgba),
                other => {
                    warn!(?other, "unsupported read-back pixel format");
                    return None;
                }
            }
            Some(buffer)
        })
    }
}

/**
    Full-range BT.601 YUV→RGBA conversion.
*/
pub fn yuv_to_rgba(format: PixelFormat, width: u32, height: u32, planes: &[Vec<u8>]) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let chroma_w = w.div_ceil(2);
    let mut rgba = vec![0u8; w * h * 4];

    for row in 0..h {
        for col in 0..w {
            let y = planes[0][row * w + col] as f32;
            let (cb, cr) = match format {
                PixelFormat::Yuv420p => {
                    let chroma_index = (row / 2) * chroma_w + col / 2;
                    (
                        planes[1][chroma_index] as f32,
                        planes[2][chroma_index] as f32,
                    )
                }
                PixelFormat::Nv12 => {
                    let chroma_index = (row / 2) * chroma_w * 2 + (col / 2) * 2;
                    (
                        planes[1][chroma_index] as f32,
                        planes[1][chroma_index + 1] as f32,
                    )
                }
                // Callers filter interleaved formats before conversion.
                _ => (128.0, 128.0),
            };

            let r = y + 1.402 * (cr - 128.0);
            let g = y - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
            let b = y + 1.772 * (cb - 128.0);

            let out = (row * w + col) * 4;
            rgba[out] = r.clamp(0.0, 255.0) as u8;
            rgba[out + 1] = g.clamp(0.0, 255.0) as u8;
            rgba[out + 2] = b.clamp(0.0, 255.0) as u8;
            rgba[out + 3] = 255;
        }
    }
    rgba
}

/**
    Apply a rotation to packed RGBA pixels, returning the rotated pixels
    and the (possibly transposed) output size.
*/
pub fn rotate_rgba(pixels: &[u8], size: Size, rotation: Rotation) -> (Vec<u8>, Size) {
    if rotation == Rotation::NoRotation {
        return (pixels.to_vec(), size);
    }

    let src_w = size.width as usize;
    let src_h = size.height as usize;
    let out_size = if rotation.flips_dimensions() {
        size.transposed()
    } else {
        size
    };
    let dst_w = out_size.width as usize;
    let dst_h = out_size.height as usize;

    let mut rotated = vec![0u8; pixels.len()];
    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let (sx, sy) = match rotation {
                Rotation::NoRotation => (dx, dy),
                Rotation::Rotate180 => (src_w - 1 - dx, src_h - 1 - dy),
                Rotation::FlipHorizontally => (src_w - 1 - dx, dy),
                Rotation::FlipVertically => (dx, src_h - 1 - dy),
                Rotation::RotateClockwise => (dy, src_h - 1 - dx),
                Rotation::RotateCounterclockwise => (src_w - 1 - dy, dx),
                Rotation::RotateClockwiseAndFlipVertically => (src_w - 1 - dy, src_h - 1 - dx),
                Rotation::RotateClockwiseAndFlipHorizontally => (dy, dx),
            };
            let src = (sy * src_w + sx) * 4;
            let dst = (dy * dst_w + dx) * 4;
            rotated[dst..dst + 4].copy_from_slice(&pixels[src..src + 4]);
        }
    }
    (rotated, out_size)
}

/**
    Channel swizzle from packed RGBA to packed BGRA.
*/
pub fn swizzle_rgba_to_bgra(rgba: &[u8], bgra: &mut [u8]) {
    debug_assert_eq!(rgba.len(), bgra.len());
    for (src, dst) in rgba.chunks_exact(4).zip(bgra.chunks_exact_mut(4)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
        dst[3] = src[3];
    }
}
