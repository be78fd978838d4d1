/*!
    Sample buffers: timestamped pixel or audio payloads.
*/

use std::sync::Arc;

use reel_types::{Timestamp, TrackKind};

use crate::pixel_buffer::PixelBuffer;

/**
    One decoded video frame with its presentation time.
*/
pub struct VideoSampleBuffer {
    pixel_buffer: Option<PixelBuffer>,
    presentation_time: Timestamp,
}

impl VideoSampleBuffer {
    pub fn new(pixel_buffer: PixelBuffer, presentation_time: Timestamp) -> Self {
        Self {
            pixel_buffer: Some(pixel_buffer),
            presentation_time,
        }
    }

    pub fn presentation_time(&self) -> Timestamp {
        self.presentation_time
    }

    pub fn pixel_buffer(&self) -> Option<&PixelBuffer> {
        self.pixel_buffer.as_ref()
    }

    /**
        Move the payload out, leaving the sample invalidated.
    */
    pub fn take_pixel_buffer(&mut self) -> Option<PixelBuffer> {
        self.pixel_buffer.take()
    }

    /**
        Release the payload. The backing storage returns to its pool.
    */
    pub fn invalidate(&mut self) {
        self.pixel_buffer = None;
    }

    pub fn is_valid(&self) -> bool {
        self.pixel_buffer.is_some()
    }
}

/**
    A run of decoded audio samples with its presentation time.
*/
#[derive(Clone)]
pub struct AudioSampleBuffer {
    data: Option<Arc<[u8]>>,
    sample_count: usize,
    presentation_time: Timestamp,
}

impl AudioSampleBuffer {
    pub fn new(data: Arc<[u8]>, sample_count: usize, presentation_time: Timestamp) -> Self {
        Self {
            data: Some(data),
            sample_count,
            presentation_time,
        }
    }

    pub fn presentation_time(&self) -> Timestamp {
        self.presentation_time
    }

    pub fn data(&self) -> Option<&Arc<[u8]>> {
        self.data.as_ref()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn invalidate(&mut self) {
        self.data = None;
    }

    pub fn is_valid(&self) -> bool {
        self.data.is_some()
    }
}

/**
    A sample of either media kind. Consumers dispatch on
    [`track_kind`](Self::track_kind) instead of downcasting.
*/
pub enum SampleBuffer {
    Video(VideoSampleBuffer),
    Audio(AudioSampleBuffer),
}

impl SampleBuffer {
    pub fn track_kind(&self) -> TrackKind {
        match self {
            Self::Video(_) => TrackKind::Video,
            Self::Audio(_) => TrackKind::Audio,
        }
    }

    pub fn presentation_time(&self) -> Timestamp {
        match self {
            Self::Video(sample) => sample.presentation_time(),
            Self::Audio(sample) => sample.presentation_time(),
        }
    }

    pub fn invalidate(&mut self) {
        match self {
            Self::Video(sample) => sample.invalidate(),
            Self::Audio(sample) => sample.invalidate(),
        }
    }
}
