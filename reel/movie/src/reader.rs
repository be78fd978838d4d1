/*!
    Asset decoder contract.

    The host platform supplies the actual demuxer/decoder; the pipeline
    drives it through these traits and never sees codec details.
*/

use reel_core::SampleBuffer;
use reel_types::{ImageOrientation, PixelFormat, Result, Size, TimeRange, TrackKind};

/**
    Track outputs to configure when a reader is created.
*/
#[derive(Clone, Debug)]
pub struct ReaderSettings {
    /// Pixel format the video track output should decode into.
    pub video_pixel_format: PixelFormat,
    /// Whether to configure an audio track output.
    pub include_audio: bool,
    /// Restrict decoding to a sub-range of the asset.
    pub time_range: Option<TimeRange>,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            video_pixel_format: PixelFormat::Nv12,
            include_audio: false,
            time_range: None,
        }
    }
}

impl ReaderSettings {
    pub fn with_audio(mut self) -> Self {
        self.include_audio = true;
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }
}

/**
    Reader lifecycle state.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderStatus {
    Unknown,
    Reading,
    /// All samples in the configured range have been vended.
    Completed,
    Failed,
    Cancelled,
}

/**
    A stored media asset that readers can be created from.

    A movie input creates a fresh reader per start (and per loop
    iteration); the asset itself is the durable handle.
*/
pub trait Asset: Send + Sync {
    /// Total duration of the asset.
    fn duration(&self) -> reel_types::Timestamp;

    /// Pixel dimensions of the video track.
    fn natural_size(&self) -> Size;

    /// Orientation the video track was captured in.
    fn preferred_orientation(&self) -> ImageOrientation;

    fn has_audio_track(&self) -> bool;

    /// Construct a decoder for this asset with the given track outputs.
    fn make_reader(&self, settings: &ReaderSettings) -> Result<Box<dyn AssetReader>>;
}

/**
    A single decoding pass over (a range of) an asset.
*/
pub trait AssetReader: Send {
    /// Narrow the decode to a sub-range. Only valid before
    /// [`start_reading`](Self::start_reading).
    fn set_time_range(&mut self, range: TimeRange);

    fn start_reading(&mut self) -> Result<()>;

    /**
        Pull the next decoded sample for the given track, in presentation
        order. `None` once the track is exhausted or the reader stopped.
    */
    fn copy_next_sample(&mut self, track: TrackKind) -> Option<SampleBuffer>;

    fn cancel_reading(&mut self);

    fn status(&self) -> ReaderStatus;

    /// The failure, when [`status`](Self::status) is
    /// [`ReaderStatus::Failed`].
    fn error(&self) -> Option<reel_types::Error>;
}
