/*!
    Shared runtime for the reel media pipeline.

    Everything here is session-scoped and threaded through constructors
    explicitly: the [`PipelineContext`] owns the image-processing queue and
    the framebuffer pool; [`Framebuffer`]s are the currency the graph
    trades in; [`PixelBuffer`]s bridge to host-visible memory on the
    decode and encode edges.
*/

mod consumer;
mod context;
mod framebuffer;
mod framebuffer_pool;
mod generator;
mod pixel_buffer;
mod sample;

pub use consumer::{FrameConsumer, TargetList};
pub use context::{PipelineContext, ReadingGate, SerialQueue};
pub use framebuffer::{Framebuffer, Texture, TimingStyle, UserInfo};
pub use framebuffer_pool::FramebufferPool;
pub use generator::{FramebufferGenerator, rotate_rgba, swizzle_rgba_to_bgra, yuv_to_rgba};
pub use pixel_buffer::{PixelBuffer, PixelBufferPool};
pub use sample::{AudioSampleBuffer, SampleBuffer, VideoSampleBuffer};
