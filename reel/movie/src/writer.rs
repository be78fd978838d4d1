/*!
    Container writer contract.

    Mirrors the encoder-side surface the host platform provides: tracks
    with settings, a session anchored at a start time, per-track readiness,
    and a finalize/cancel lifecycle. Readiness and error changes arrive
    through plain callback subscriptions.
*/

use std::sync::Arc;

use reel_core::{AudioSampleBuffer, PixelBuffer, PixelBufferPool};
use reel_types::{Error, PixelFormat, Result, Size, Timestamp, TrackKind};

/**
    Video codec for the output track.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum VideoCodec {
    H264,
    Hevc,
}

/**
    Audio codec for the output track.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum AudioCodec {
    Aac,
}

/**
    Settings for the writer's video input.
*/
#[derive(Clone, Debug)]
pub struct VideoOutputSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Pixel format the adaptor pool hands out.
    pub source_pixel_format: PixelFormat,
    /// Interleave movie fragments for streaming delivery.
    pub optimize_for_network_use: bool,
    /// Interval between movie fragments.
    pub fragment_interval: Timestamp,
}

impl VideoOutputSettings {
    /**
        The default H.264/BGRA settings for an output of the given size,
        with a 1 s fragment interval in a 1000 Hz timescale.
    */
    pub fn for_size(size: Size) -> Self {
        Self {
            codec: VideoCodec::H264,
            width: size.width,
            height: size.height,
            source_pixel_format: PixelFormat::Bgra,
            optimize_for_network_use: false,
            fragment_interval: Timestamp::new(1000, 1000),
        }
    }

    pub fn optimized_for_network_use(mut self) -> Self {
        self.optimize_for_network_use = true;
        self
    }
}

/**
    Settings for the writer's audio input. Always caller-supplied.
*/
#[derive(Clone, Debug)]
pub struct AudioOutputSettings {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: Option<u64>,
}

impl AudioOutputSettings {
    pub fn aac_stereo(sample_rate: u32) -> Self {
        Self {
            codec: AudioCodec::Aac,
            sample_rate,
            channels: 2,
            bitrate: None,
        }
    }
}

/**
    Writer lifecycle state as reported by the backend.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterBackendStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

/// Observer of per-track readiness changes.
pub type ReadinessObserver = Arc<dyn Fn(TrackKind, bool) + Send + Sync>;

/// Observer of asynchronous writer failures.
pub type ErrorObserver = Arc<dyn Fn(Error) + Send + Sync>;

/**
    The container-writing encoder.

    Contract notes:
    - `append_pixel_buffer` timestamps must be strictly increasing; the
      backend aborts the session on duplicates, so the movie output drops
      them before they get here.
    - `start_session` is called exactly once per recording, with the first
      appended frame's timestamp; samples earlier than the anchor are
      edited out by the backend.
    - `pixel_buffer_pool` is `None` until `start_writing` has succeeded.
    - Subscribed observers may be invoked from any thread, but not
      re-entrantly from within a call into the writer.
*/
pub trait ContainerWriter: Send {
    fn add_video_track(&mut self, settings: &VideoOutputSettings) -> Result<()>;

    fn add_audio_track(&mut self, settings: &AudioOutputSettings) -> Result<()>;

    fn start_writing(&mut self) -> Result<()>;

    fn start_session(&mut self, at: Timestamp);

    fn append_pixel_buffer(&mut self, buffer: PixelBuffer, at: Timestamp) -> Result<()>;

    fn append_audio_sample(&mut self, sample: AudioSampleBuffer) -> Result<()>;

    fn is_ready_for_more_media_data(&self, track: TrackKind) -> bool;

    fn mark_finished(&mut self, track: TrackKind);

    fn end_session(&mut self, at: Timestamp);

    /**
        Finalize the container. `completion` fires once trailing metadata
        has been written; the file is unusable if this never runs.
    */
    fn finish_writing(&mut self, completion: Box<dyn FnOnce() + Send>);

    fn cancel_writing(&mut self);

    fn status(&self) -> WriterBackendStatus;

    fn error(&self) -> Option<Error>;

    /// The adaptor's pixel-buffer pool, once a session has started.
    fn pixel_buffer_pool(&self) -> Option<Arc<PixelBufferPool>>;

    fn subscribe_readiness(&mut self, observer: ReadinessObserver);

    fn subscribe_error(&mut self, observer: ErrorObserver);
}
